//! libSQL backend: async `Store` trait implementation.
//!
//! Supports local file and in-memory databases. A single connection is
//! reused for all operations; `libsql::Connection` is `Send + Sync` and
//! safe for concurrent async use.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::model::{
    Contact, DeliveryStats, DeliveryStatus, Direction, EventTag, Lead, LeadEvent, LeadSource,
    MessageRecord, MessageStatus, NewLead, Template, TemplateKind, digit_identifier,
};
use crate::store::traits::Store;

/// libSQL store backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to open database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(Self { db: Arc::new(db), conn })
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        Ok(Self { db: Arc::new(db), conn })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_else(|_| Uuid::nil())
}

/// Map a libsql Row to a Lead.
///
/// Column order: 0:id, 1:identifier, 2:email, 3:phone, 4:first_name,
/// 5:last_name, 6:company, 7:country, 8:feed_id, 9:source,
/// 10:delivery_status, 11:template_sent, 12:last_message_id,
/// 13:retry_count, 14:created_at, 15:updated_at
fn row_to_lead(row: &libsql::Row) -> Result<Lead, libsql::Error> {
    let id_str: String = row.get(0)?;
    let source_str: String = row.get(9)?;
    let status_str: String = row.get(10)?;
    let template_sent: i64 = row.get(11)?;
    let created_str: String = row.get(14)?;
    let updated_str: String = row.get(15)?;

    Ok(Lead {
        id: parse_uuid(&id_str),
        identifier: row.get(1)?,
        email: row.get(2)?,
        phone: row.get(3)?,
        first_name: row.get(4).ok(),
        last_name: row.get(5).ok(),
        company: row.get(6).ok(),
        country: row.get(7).ok(),
        feed_id: row.get(8).ok(),
        source: LeadSource::parse(&source_str),
        delivery_status: DeliveryStatus::parse(&status_str),
        template_sent: template_sent != 0,
        last_message_id: row.get(12).ok(),
        retry_count: row.get(13)?,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

const LEAD_COLUMNS: &str = "id, identifier, email, phone, first_name, last_name, company, \
     country, feed_id, source, delivery_status, template_sent, last_message_id, retry_count, \
     created_at, updated_at";

/// Map a libsql Row to a Contact.
///
/// Column order: 0:id, 1:phone, 2:name, 3:lead_id, 4:last_message_sent_at,
/// 5:last_message_received_at, 6:last_message_at, 7:unread_count,
/// 8:created_at, 9:updated_at
fn row_to_contact(row: &libsql::Row) -> Result<Contact, libsql::Error> {
    let id_str: String = row.get(0)?;
    let lead_id_str: Option<String> = row.get(3).ok();
    let sent_str: Option<String> = row.get(4).ok();
    let received_str: Option<String> = row.get(5).ok();
    let last_str: Option<String> = row.get(6).ok();
    let created_str: String = row.get(8)?;
    let updated_str: String = row.get(9)?;

    Ok(Contact {
        id: parse_uuid(&id_str),
        phone: row.get(1)?,
        name: row.get(2).ok(),
        lead_id: lead_id_str.as_deref().and_then(|s| Uuid::parse_str(s).ok()),
        last_message_sent_at: parse_optional_datetime(&sent_str),
        last_message_received_at: parse_optional_datetime(&received_str),
        last_message_at: parse_optional_datetime(&last_str),
        unread_count: row.get(7)?,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

const CONTACT_COLUMNS: &str = "id, phone, name, lead_id, last_message_sent_at, \
     last_message_received_at, last_message_at, unread_count, created_at, updated_at";

fn row_to_template(row: &libsql::Row) -> Result<Template, libsql::Error> {
    let id_str: String = row.get(0)?;
    let kind_str: String = row.get(3)?;
    let created_str: String = row.get(6)?;

    Ok(Template {
        id: parse_uuid(&id_str),
        identifier: row.get(1)?,
        title: row.get(2)?,
        kind: TemplateKind::parse(&kind_str),
        content: row.get(4)?,
        remainder_hours: row.get(5)?,
        created_at: parse_datetime(&created_str),
    })
}

/// Map a UNIQUE-violation query error to `Constraint`, everything else to
/// `Query`.
fn map_write_error(op: &str, e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    if msg.contains("UNIQUE") {
        DatabaseError::Constraint(format!("{op}: {msg}"))
    } else {
        DatabaseError::Query(format!("{op}: {msg}"))
    }
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Store for LibSqlBackend {
    async fn upsert_lead(&self, new: &NewLead) -> Result<(Lead, bool), DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();

        let inserted = conn
            .execute(
                "INSERT INTO leads (id, identifier, email, phone, first_name, last_name,
                    company, country, feed_id, source, delivery_status, template_sent,
                    retry_count, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'pending', 0, ?11, ?12, ?12)
                 ON CONFLICT(phone) DO NOTHING",
                params![
                    id,
                    digit_identifier(),
                    new.email.as_str(),
                    new.phone.as_str(),
                    opt_text(new.first_name.as_deref()),
                    opt_text(new.last_name.as_deref()),
                    opt_text(new.company.as_deref()),
                    opt_text(new.country.as_deref()),
                    opt_text(new.feed_id.as_deref()),
                    new.source.as_str(),
                    new.retry_count,
                    now,
                ],
            )
            .await
            .map_err(|e| map_write_error("upsert_lead", e))?
            > 0;

        let lead = self
            .get_lead_by_phone(&new.phone)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "lead".into(),
                key: new.phone.clone(),
            })?;

        if inserted {
            debug!(id = %lead.id, phone = %lead.phone, "Lead created");
        }
        Ok((lead, inserted))
    }

    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_lead: {e}")))?;

        match rows.next().await.map_err(|e| DatabaseError::Query(e.to_string()))? {
            Some(row) => Ok(Some(
                row_to_lead(&row).map_err(|e| DatabaseError::Serialization(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    async fn get_lead_by_phone(&self, phone: &str) -> Result<Option<Lead>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {LEAD_COLUMNS} FROM leads WHERE phone = ?1"),
                params![phone],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_lead_by_phone: {e}")))?;

        match rows.next().await.map_err(|e| DatabaseError::Query(e.to_string()))? {
            Some(row) => Ok(Some(
                row_to_lead(&row).map_err(|e| DatabaseError::Serialization(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    async fn mark_lead_sent(
        &self,
        id: Uuid,
        message_id: Option<&str>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE leads SET delivery_status = 'sent', template_sent = 1,
                    last_message_id = COALESCE(?2, last_message_id), updated_at = ?3
                 WHERE id = ?1",
                params![id.to_string(), opt_text(message_id), Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_lead_sent: {e}")))?;
        Ok(())
    }

    async fn mark_lead_failed(&self, id: Uuid) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "UPDATE leads SET delivery_status = 'failed', retry_count = retry_count - 1,
                updated_at = ?2
             WHERE id = ?1",
            params![id.to_string(), Utc::now().to_rfc3339()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("mark_lead_failed: {e}")))?;

        let mut rows = conn
            .query(
                "SELECT retry_count FROM leads WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_lead_failed: {e}")))?;

        match rows.next().await.map_err(|e| DatabaseError::Query(e.to_string()))? {
            Some(row) => row.get::<i64>(0).map_err(|e| DatabaseError::Serialization(e.to_string())),
            None => Err(DatabaseError::NotFound { entity: "lead".into(), key: id.to_string() }),
        }
    }

    async fn count_leads_by_status(&self) -> Result<DeliveryStats, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT delivery_status, COUNT(*) FROM leads GROUP BY delivery_status",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("count_leads_by_status: {e}")))?;

        let mut stats = DeliveryStats::default();
        while let Some(row) = rows.next().await.map_err(|e| DatabaseError::Query(e.to_string()))? {
            let status: String = row.get(0).map_err(|e| DatabaseError::Serialization(e.to_string()))?;
            let count: i64 = row.get(1).map_err(|e| DatabaseError::Serialization(e.to_string()))?;
            let count = count.max(0) as u64;
            match DeliveryStatus::parse(&status) {
                DeliveryStatus::Pending => stats.pending = count,
                DeliveryStatus::Sent => stats.sent = count,
                DeliveryStatus::Delivered => stats.delivered = count,
                DeliveryStatus::Failed => stats.failed = count,
            }
        }
        Ok(stats)
    }

    async fn append_event(
        &self,
        lead_id: Uuid,
        tag: &EventTag,
        payload: Option<&serde_json::Value>,
    ) -> Result<bool, DatabaseError> {
        let payload_str = payload.map(|p| p.to_string());
        let inserted = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO lead_events (lead_id, tag, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    lead_id.to_string(),
                    tag.key(),
                    opt_text(payload_str.as_deref()),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("append_event: {e}")))?;
        Ok(inserted > 0)
    }

    async fn has_event(&self, lead_id: Uuid, tag: &EventTag) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT 1 FROM lead_events WHERE lead_id = ?1 AND tag = ?2 LIMIT 1",
                params![lead_id.to_string(), tag.key()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("has_event: {e}")))?;

        Ok(rows.next().await.map_err(|e| DatabaseError::Query(e.to_string()))?.is_some())
    }

    async fn list_events(&self, lead_id: Uuid) -> Result<Vec<LeadEvent>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT lead_id, tag, payload, created_at FROM lead_events
                 WHERE lead_id = ?1 ORDER BY created_at ASC",
                params![lead_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_events: {e}")))?;

        let mut events = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| DatabaseError::Query(e.to_string()))? {
            let tag_str: String = row.get(1).map_err(|e| DatabaseError::Serialization(e.to_string()))?;
            let Some(tag) = EventTag::from_key(&tag_str) else {
                // Unknown tags are skipped rather than failing the read.
                continue;
            };
            let payload_str: Option<String> = row.get(2).ok();
            let created_str: String =
                row.get(3).map_err(|e| DatabaseError::Serialization(e.to_string()))?;
            events.push(LeadEvent {
                lead_id,
                tag,
                payload: payload_str.and_then(|s| serde_json::from_str(&s).ok()),
                created_at: parse_datetime(&created_str),
            });
        }
        Ok(events)
    }

    async fn touch_contact_outbound(
        &self,
        phone: &str,
        name: Option<&str>,
        lead_id: Option<Uuid>,
        sent_at: DateTime<Utc>,
    ) -> Result<Contact, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let sent = sent_at.to_rfc3339();
        let lead_id_str = lead_id.map(|id| id.to_string());

        self.conn()
            .execute(
                "INSERT INTO contacts (id, phone, name, lead_id, last_message_sent_at,
                    last_message_at, unread_count, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5, 0, ?6, ?6)
                 ON CONFLICT(phone) DO UPDATE SET
                    name = COALESCE(excluded.name, contacts.name),
                    lead_id = COALESCE(excluded.lead_id, contacts.lead_id),
                    last_message_sent_at = excluded.last_message_sent_at,
                    last_message_at = CASE
                        WHEN contacts.last_message_received_at IS NULL
                             OR contacts.last_message_received_at < excluded.last_message_sent_at
                        THEN excluded.last_message_sent_at
                        ELSE contacts.last_message_received_at
                    END,
                    updated_at = excluded.updated_at",
                params![
                    Uuid::new_v4().to_string(),
                    phone,
                    opt_text(name),
                    opt_text(lead_id_str.as_deref()),
                    sent,
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("touch_contact_outbound: {e}")))?;

        self.get_contact_by_phone(phone).await?.ok_or_else(|| DatabaseError::NotFound {
            entity: "contact".into(),
            key: phone.to_string(),
        })
    }

    async fn touch_contact_inbound(
        &self,
        phone: &str,
        received_at: DateTime<Utc>,
    ) -> Result<Contact, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let received = received_at.to_rfc3339();

        self.conn()
            .execute(
                "INSERT INTO contacts (id, phone, last_message_received_at, last_message_at,
                    unread_count, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3, 1, ?4, ?4)
                 ON CONFLICT(phone) DO UPDATE SET
                    last_message_received_at = excluded.last_message_received_at,
                    last_message_at = CASE
                        WHEN contacts.last_message_sent_at IS NULL
                             OR contacts.last_message_sent_at < excluded.last_message_received_at
                        THEN excluded.last_message_received_at
                        ELSE contacts.last_message_sent_at
                    END,
                    unread_count = contacts.unread_count + 1,
                    updated_at = excluded.updated_at",
                params![Uuid::new_v4().to_string(), phone, received, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("touch_contact_inbound: {e}")))?;

        self.get_contact_by_phone(phone).await?.ok_or_else(|| DatabaseError::NotFound {
            entity: "contact".into(),
            key: phone.to_string(),
        })
    }

    async fn get_contact_by_phone(&self, phone: &str) -> Result<Option<Contact>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE phone = ?1"),
                params![phone],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_contact_by_phone: {e}")))?;

        match rows.next().await.map_err(|e| DatabaseError::Query(e.to_string()))? {
            Some(row) => Ok(Some(
                row_to_contact(&row).map_err(|e| DatabaseError::Serialization(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    async fn list_contacts(&self) -> Result<Vec<Contact>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {CONTACT_COLUMNS} FROM contacts ORDER BY created_at ASC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_contacts: {e}")))?;

        let mut contacts = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| DatabaseError::Query(e.to_string()))? {
            contacts.push(
                row_to_contact(&row).map_err(|e| DatabaseError::Serialization(e.to_string()))?,
            );
        }
        Ok(contacts)
    }

    async fn insert_message(&self, message: &MessageRecord) -> Result<(), DatabaseError> {
        let metadata = message.metadata.as_ref().map(|m| m.to_string());
        self.conn()
            .execute(
                "INSERT INTO messages (id, message_id, conversation_id, contact_id, from_addr,
                    to_addr, body, direction, status, metadata, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    message.id.to_string(),
                    message.message_id.as_str(),
                    opt_text(message.conversation_id.as_deref()),
                    opt_text(message.contact_id.map(|id| id.to_string()).as_deref()),
                    message.from.as_str(),
                    message.to.as_str(),
                    message.body.as_str(),
                    message.direction.as_str(),
                    message.status.as_str(),
                    opt_text(metadata.as_deref()),
                    message.timestamp.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| map_write_error("insert_message", e))?;

        debug!(message_id = %message.message_id, to = %message.to, "Message recorded");
        Ok(())
    }

    async fn update_message_status(
        &self,
        message_id: &str,
        status: MessageStatus,
    ) -> Result<bool, DatabaseError> {
        let updated = self
            .conn()
            .execute(
                "UPDATE messages SET status = ?2 WHERE message_id = ?1",
                params![message_id, status.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_message_status: {e}")))?;
        Ok(updated > 0)
    }

    async fn count_outbound_to(&self, phone: &str) -> Result<u64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM messages WHERE to_addr = ?1 AND direction = 'outbound'",
                params![phone],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("count_outbound_to: {e}")))?;

        match rows.next().await.map_err(|e| DatabaseError::Query(e.to_string()))? {
            Some(row) => {
                let count: i64 =
                    row.get(0).map_err(|e| DatabaseError::Serialization(e.to_string()))?;
                Ok(count.max(0) as u64)
            }
            None => Ok(0),
        }
    }

    async fn insert_template(&self, template: &Template) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO templates (id, identifier, title, kind, content, remainder_hours,
                    created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    template.id.to_string(),
                    template.identifier.as_str(),
                    template.title.as_str(),
                    template.kind.as_str(),
                    template.content.as_str(),
                    template.remainder_hours,
                    template.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| map_write_error("insert_template", e))?;
        Ok(())
    }

    async fn list_reminder_templates(&self) -> Result<Vec<Template>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, identifier, title, kind, content, remainder_hours, created_at
                 FROM templates WHERE kind = 'Reminder' ORDER BY remainder_hours ASC",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_reminder_templates: {e}")))?;

        let mut templates = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| DatabaseError::Query(e.to_string()))? {
            templates.push(
                row_to_template(&row).map_err(|e| DatabaseError::Serialization(e.to_string()))?,
            );
        }
        Ok(templates)
    }

    async fn get_feed_cursor(&self, feed_id: &str) -> Result<Option<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT cursor FROM feed_cursors WHERE feed_id = ?1",
                params![feed_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_feed_cursor: {e}")))?;

        match rows.next().await.map_err(|e| DatabaseError::Query(e.to_string()))? {
            Some(row) => Ok(Some(
                row.get::<String>(0).map_err(|e| DatabaseError::Serialization(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    async fn set_feed_cursor(&self, feed_id: &str, cursor: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO feed_cursors (feed_id, cursor, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(feed_id) DO UPDATE SET
                    cursor = excluded.cursor,
                    updated_at = excluded.updated_at",
                params![feed_id, cursor, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_feed_cursor: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::model::LeadSource;

    fn new_lead(phone: &str) -> NewLead {
        NewLead {
            email: "a@b.com".into(),
            phone: phone.into(),
            first_name: Some("Asha".into()),
            last_name: Some("Rao".into()),
            company: None,
            country: Some("IN".into()),
            feed_id: Some("feed-1".into()),
            source: LeadSource::ExternalForm,
            retry_count: 3,
        }
    }

    #[tokio::test]
    async fn upsert_lead_is_insert_only() {
        let store = LibSqlBackend::new_memory().await.unwrap();

        let (lead, created) = store.upsert_lead(&new_lead("919729360795")).await.unwrap();
        assert!(created);
        assert_eq!(lead.delivery_status, DeliveryStatus::Pending);
        assert_eq!(lead.retry_count, 3);

        // Second upsert with different fields must not overwrite anything.
        let mut second = new_lead("919729360795");
        second.first_name = Some("Other".into());
        let (again, created) = store.upsert_lead(&second).await.unwrap();
        assert!(!created);
        assert_eq!(again.id, lead.id);
        assert_eq!(again.first_name.as_deref(), Some("Asha"));
    }

    #[tokio::test]
    async fn append_event_is_append_if_absent() {
        let store = LibSqlBackend::new_memory().await.unwrap();
        let (lead, _) = store.upsert_lead(&new_lead("919729360795")).await.unwrap();

        assert!(store.append_event(lead.id, &EventTag::FailureNotified, None).await.unwrap());
        assert!(!store.append_event(lead.id, &EventTag::FailureNotified, None).await.unwrap());
        assert!(store.has_event(lead.id, &EventTag::FailureNotified).await.unwrap());

        let events = store.list_events(lead.id).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn reminder_events_are_per_template() {
        let store = LibSqlBackend::new_memory().await.unwrap();
        let (lead, _) = store.upsert_lead(&new_lead("919729360795")).await.unwrap();

        let t1 = EventTag::ReminderSent { template_id: Uuid::new_v4() };
        let t2 = EventTag::ReminderSent { template_id: Uuid::new_v4() };
        assert!(store.append_event(lead.id, &t1, None).await.unwrap());
        assert!(store.append_event(lead.id, &t2, None).await.unwrap());
        assert!(!store.append_event(lead.id, &t1, None).await.unwrap());
    }

    #[tokio::test]
    async fn mark_lead_failed_decrements_below_zero() {
        let store = LibSqlBackend::new_memory().await.unwrap();
        let mut lead = new_lead("919729360795");
        lead.retry_count = 1;
        let (lead, _) = store.upsert_lead(&lead).await.unwrap();

        assert_eq!(store.mark_lead_failed(lead.id).await.unwrap(), 0);
        assert_eq!(store.mark_lead_failed(lead.id).await.unwrap(), -1);

        let lead = store.get_lead(lead.id).await.unwrap().unwrap();
        assert_eq!(lead.delivery_status, DeliveryStatus::Failed);
    }

    #[tokio::test]
    async fn contact_timestamps_track_max() {
        let store = LibSqlBackend::new_memory().await.unwrap();
        let earlier = Utc::now() - chrono::Duration::hours(2);
        let later = Utc::now();

        let contact = store
            .touch_contact_outbound("919729360795", Some("Asha"), None, earlier)
            .await
            .unwrap();
        assert_eq!(contact.last_message_at, contact.last_message_sent_at);
        assert_eq!(contact.unread_count, 0);

        let contact = store.touch_contact_inbound("919729360795", later).await.unwrap();
        assert_eq!(contact.last_message_at, contact.last_message_received_at);
        assert_eq!(contact.unread_count, 1);
        // Sent-at untouched by the inbound update.
        assert_eq!(contact.last_message_sent_at.unwrap(), earlier);
    }

    #[tokio::test]
    async fn message_id_unique_and_status_noop_when_absent() {
        let store = LibSqlBackend::new_memory().await.unwrap();
        let msg = MessageRecord {
            id: Uuid::new_v4(),
            message_id: "wamid.1".into(),
            conversation_id: None,
            contact_id: None,
            from: "sender-id".into(),
            to: "919729360795".into(),
            body: "hello".into(),
            direction: Direction::Outbound,
            status: MessageStatus::Sent,
            metadata: None,
            timestamp: Utc::now(),
        };
        store.insert_message(&msg).await.unwrap();

        let dup = MessageRecord { id: Uuid::new_v4(), ..msg.clone() };
        let err = store.insert_message(&dup).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));

        assert!(store.update_message_status("wamid.1", MessageStatus::Read).await.unwrap());
        assert!(!store.update_message_status("wamid.missing", MessageStatus::Read).await.unwrap());
        assert_eq!(store.count_outbound_to("919729360795").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn feed_cursor_persists() {
        let store = LibSqlBackend::new_memory().await.unwrap();
        assert_eq!(store.get_feed_cursor("feed-1").await.unwrap(), None);

        store.set_feed_cursor("feed-1", "50").await.unwrap();
        store.set_feed_cursor("feed-1", "100").await.unwrap();
        assert_eq!(store.get_feed_cursor("feed-1").await.unwrap().as_deref(), Some("100"));
    }

    #[tokio::test]
    async fn delivery_stats_counts() {
        let store = LibSqlBackend::new_memory().await.unwrap();
        let (a, _) = store.upsert_lead(&new_lead("919729360795")).await.unwrap();
        let (_b, _) = store.upsert_lead(&new_lead("919729360796")).await.unwrap();

        store.mark_lead_sent(a.id, Some("wamid.1")).await.unwrap();

        let stats = store.count_leads_by_status().await.unwrap();
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.failed, 0);
    }
}
