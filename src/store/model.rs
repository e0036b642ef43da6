//! Persistent record types: leads, contacts, messages, templates, events.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a lead came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeadSource {
    /// External form-submission feed.
    ExternalForm,
    Manual,
    Api,
}

impl LeadSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadSource::ExternalForm => "external-form",
            LeadSource::Manual => "manual",
            LeadSource::Api => "api",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "manual" => LeadSource::Manual,
            "api" => LeadSource::Api,
            _ => LeadSource::ExternalForm,
        }
    }
}

/// Delivery state of the lead's session-opening message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "sent" => DeliveryStatus::Sent,
            "delivered" => DeliveryStatus::Delivered,
            "failed" => DeliveryStatus::Failed,
            _ => DeliveryStatus::Pending,
        }
    }
}

/// One externally-sourced lead and its delivery/retry state.
#[derive(Debug, Clone)]
pub struct Lead {
    pub id: Uuid,
    /// Short numeric identifier, human-friendly.
    pub identifier: String,
    pub email: String,
    /// Channel-address form (digits only, country code included).
    pub phone: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company: Option<String>,
    /// ISO country code derived from the phone prefix, when recognized.
    pub country: Option<String>,
    pub feed_id: Option<String>,
    pub source: LeadSource,
    pub delivery_status: DeliveryStatus,
    pub template_sent: bool,
    pub last_message_id: Option<String>,
    /// Remaining delivery attempts. Decremented on failure, never reset.
    /// May go negative; callers check `<= 0`.
    pub retry_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    /// Display name for template substitution: "First Last", trimmed.
    pub fn display_name(&self) -> String {
        let name = format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or(""),
            self.last_name.as_deref().unwrap_or("")
        );
        name.trim().to_string()
    }
}

/// Fields for creating a lead. Insert-only: if a lead with the same phone
/// already exists, none of these overwrite it.
#[derive(Debug, Clone)]
pub struct NewLead {
    pub email: String,
    pub phone: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company: Option<String>,
    pub country: Option<String>,
    pub feed_id: Option<String>,
    pub source: LeadSource,
    pub retry_count: i64,
}

/// One channel address's conversation activity.
#[derive(Debug, Clone)]
pub struct Contact {
    pub id: Uuid,
    pub phone: String,
    pub name: Option<String>,
    /// Weak reference to the lead (lookup only, not ownership).
    pub lead_id: Option<Uuid>,
    pub last_message_sent_at: Option<DateTime<Utc>>,
    pub last_message_received_at: Option<DateTime<Utc>>,
    /// Max of sent-at and received-at.
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    /// Fallback-aware display name for template substitution.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().filter(|n| !n.is_empty()).unwrap_or("there")
    }
}

/// Message direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "inbound" => Direction::Inbound,
            _ => Direction::Outbound,
        }
    }
}

/// Provider-reported message status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "delivered" => MessageStatus::Delivered,
            "read" => MessageStatus::Read,
            "failed" => MessageStatus::Failed,
            _ => MessageStatus::Sent,
        }
    }
}

/// One delivered or received message unit. Immutable once created except
/// for `status`.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub id: Uuid,
    /// Provider-issued identifier, unique at write time.
    pub message_id: String,
    pub conversation_id: Option<String>,
    pub contact_id: Option<Uuid>,
    pub from: String,
    pub to: String,
    pub body: String,
    pub direction: Direction,
    pub status: MessageStatus,
    pub metadata: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// Template kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Reminder,
    Welcome,
}

impl TemplateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateKind::Reminder => "Reminder",
            TemplateKind::Welcome => "Welcome",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "Welcome" => TemplateKind::Welcome,
            _ => TemplateKind::Reminder,
        }
    }
}

/// A reminder/welcome message template. Read-only input to the
/// orchestrator; body uses `{{placeholder}}` substitution.
#[derive(Debug, Clone)]
pub struct Template {
    pub id: Uuid,
    pub identifier: String,
    pub title: String,
    pub kind: TemplateKind,
    pub content: String,
    /// Hours after the last outbound send at which this reminder fires.
    /// Zero means disabled.
    pub remainder_hours: i64,
    pub created_at: DateTime<Utc>,
}

/// Tag for one entry in a lead's append-only event log.
///
/// The string key doubles as the uniqueness constraint per lead, so an
/// `INSERT OR IGNORE` append is naturally append-if-absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventTag {
    SubmissionReceived,
    SessionStarted,
    ReminderSent { template_id: Uuid },
    FailureNotified,
    DeadLeadMarked,
}

impl EventTag {
    /// Stable string key stored in the database.
    pub fn key(&self) -> String {
        match self {
            EventTag::SubmissionReceived => "submission-received".to_string(),
            EventTag::SessionStarted => "session-started".to_string(),
            EventTag::ReminderSent { template_id } => format!("reminder:{template_id}"),
            EventTag::FailureNotified => "failure-notified".to_string(),
            EventTag::DeadLeadMarked => "dead-lead-marked".to_string(),
        }
    }

    /// Parse a stored key back into a tag.
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "submission-received" => Some(EventTag::SubmissionReceived),
            "session-started" => Some(EventTag::SessionStarted),
            "failure-notified" => Some(EventTag::FailureNotified),
            "dead-lead-marked" => Some(EventTag::DeadLeadMarked),
            _ => {
                let id = key.strip_prefix("reminder:")?;
                Uuid::parse_str(id).ok().map(|template_id| EventTag::ReminderSent { template_id })
            }
        }
    }
}

/// One entry in a lead's event log. Append-only, never overwritten.
#[derive(Debug, Clone)]
pub struct LeadEvent {
    pub lead_id: Uuid,
    pub tag: EventTag,
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Lead counts by delivery status, for the stats accessor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    pub pending: u64,
    pub sent: u64,
    pub delivered: u64,
    pub failed: u64,
}

/// Generate a short numeric identifier (5 digits).
pub fn digit_identifier() -> String {
    let mut rng = rand::thread_rng();
    (0..5).map(|_| char::from(b'0' + rng.gen_range(0..10))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_tag_key_roundtrip() {
        let id = Uuid::new_v4();
        let tags = [
            EventTag::SubmissionReceived,
            EventTag::SessionStarted,
            EventTag::ReminderSent { template_id: id },
            EventTag::FailureNotified,
            EventTag::DeadLeadMarked,
        ];
        for tag in tags {
            assert_eq!(EventTag::from_key(&tag.key()), Some(tag));
        }
    }

    #[test]
    fn event_tag_unknown_key() {
        assert_eq!(EventTag::from_key("reminder:not-a-uuid"), None);
        assert_eq!(EventTag::from_key("bogus"), None);
    }

    #[test]
    fn reminder_tags_differ_by_template() {
        let a = EventTag::ReminderSent { template_id: Uuid::new_v4() };
        let b = EventTag::ReminderSent { template_id: Uuid::new_v4() };
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn digit_identifier_shape() {
        let id = digit_identifier();
        assert_eq!(id.len(), 5);
        assert!(id.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn contact_display_name_fallback() {
        let contact = Contact {
            id: Uuid::new_v4(),
            phone: "919729360795".into(),
            name: None,
            lead_id: None,
            last_message_sent_at: None,
            last_message_received_at: None,
            last_message_at: None,
            unread_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(contact.display_name(), "there");

        let named = Contact { name: Some("Asha".into()), ..contact };
        assert_eq!(named.display_name(), "Asha");
    }
}
