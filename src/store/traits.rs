//! `Store` trait: single async interface for all persistence.
//!
//! The orchestrator only ever talks to this trait; the concrete backend is
//! `LibSqlBackend`. The event-log methods are the dedup primitive: `append_event`
//! is append-if-absent and reports whether the row was actually inserted, so
//! callers get atomic "append unless already present" semantics from the store
//! instead of a read-then-write race.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::model::{
    Contact, DeliveryStats, EventTag, Lead, LeadEvent, MessageRecord, MessageStatus, NewLead,
    Template,
};

/// Backend-agnostic store covering leads, contacts, messages, templates,
/// the per-lead event log, and per-feed pagination cursors.
#[async_trait]
pub trait Store: Send + Sync {
    // ── Leads ───────────────────────────────────────────────────────

    /// Insert a lead keyed on phone with set-on-insert semantics: if a lead
    /// with this phone already exists, nothing is overwritten. Returns the
    /// stored lead and whether this call created it.
    async fn upsert_lead(&self, new: &NewLead) -> Result<(Lead, bool), DatabaseError>;

    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>, DatabaseError>;

    async fn get_lead_by_phone(&self, phone: &str) -> Result<Option<Lead>, DatabaseError>;

    /// Record a successful delivery: status=sent, template_sent, message id.
    async fn mark_lead_sent(
        &self,
        id: Uuid,
        message_id: Option<&str>,
    ) -> Result<(), DatabaseError>;

    /// Record a failed delivery: status=failed, retry budget decremented by
    /// one. Returns the new retry count (may go negative).
    async fn mark_lead_failed(&self, id: Uuid) -> Result<i64, DatabaseError>;

    /// Lead counts by delivery status.
    async fn count_leads_by_status(&self) -> Result<DeliveryStats, DatabaseError>;

    // ── Event log ───────────────────────────────────────────────────

    /// Append an event unless one with the same tag already exists for this
    /// lead. Returns `true` if the event was inserted.
    async fn append_event(
        &self,
        lead_id: Uuid,
        tag: &EventTag,
        payload: Option<&serde_json::Value>,
    ) -> Result<bool, DatabaseError>;

    async fn has_event(&self, lead_id: Uuid, tag: &EventTag) -> Result<bool, DatabaseError>;

    /// All events for a lead, oldest first.
    async fn list_events(&self, lead_id: Uuid) -> Result<Vec<LeadEvent>, DatabaseError>;

    // ── Contacts ────────────────────────────────────────────────────

    /// Upsert a contact on an outbound send: stamps `last_message_sent_at`
    /// and recomputes `last_message_at`. Name and lead link are only set
    /// when provided.
    async fn touch_contact_outbound(
        &self,
        phone: &str,
        name: Option<&str>,
        lead_id: Option<Uuid>,
        sent_at: DateTime<Utc>,
    ) -> Result<Contact, DatabaseError>;

    /// Upsert a contact on an inbound message: stamps
    /// `last_message_received_at`, recomputes `last_message_at`, bumps the
    /// unread counter.
    async fn touch_contact_inbound(
        &self,
        phone: &str,
        received_at: DateTime<Utc>,
    ) -> Result<Contact, DatabaseError>;

    async fn get_contact_by_phone(&self, phone: &str) -> Result<Option<Contact>, DatabaseError>;

    async fn list_contacts(&self) -> Result<Vec<Contact>, DatabaseError>;

    // ── Messages ────────────────────────────────────────────────────

    /// Insert a message. The provider message id is unique; inserting a
    /// duplicate is a constraint violation.
    async fn insert_message(&self, message: &MessageRecord) -> Result<(), DatabaseError>;

    /// Update a message's status by provider id. Returns `false` (no-op)
    /// if no message with that id exists.
    async fn update_message_status(
        &self,
        message_id: &str,
        status: MessageStatus,
    ) -> Result<bool, DatabaseError>;

    /// Count outbound messages to a channel address.
    async fn count_outbound_to(&self, phone: &str) -> Result<u64, DatabaseError>;

    // ── Templates ───────────────────────────────────────────────────

    async fn insert_template(&self, template: &Template) -> Result<(), DatabaseError>;

    /// All Reminder-kind templates, unfiltered (callers skip zero-hour ones).
    async fn list_reminder_templates(&self) -> Result<Vec<Template>, DatabaseError>;

    // ── Feed cursors ────────────────────────────────────────────────

    /// Persisted pagination cursor for a submissions feed.
    async fn get_feed_cursor(&self, feed_id: &str) -> Result<Option<String>, DatabaseError>;

    async fn set_feed_cursor(&self, feed_id: &str, cursor: &str) -> Result<(), DatabaseError>;
}
