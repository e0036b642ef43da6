//! External collaborators: messaging channel, submissions feed, notifier.
//!
//! The orchestrators depend on the traits here, not the concrete clients,
//! so tests can substitute fakes at the seams.

pub mod lead_source;
pub mod notify;
pub mod whatsapp;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{ChannelError, NotifyError};

pub use self::lead_source::LeadSourceClient;
pub use self::notify::Notifier;
pub use self::whatsapp::{MediaKind, WhatsAppClient};

/// Result of one outbound send attempt.
///
/// Expected failure modes (auth, rate limit, invalid number, transport
/// errors) are the `Rejected` variant, never an `Err`; callers treat them
/// as delivery outcomes to record, not errors to propagate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered { message_id: Option<String> },
    Rejected { detail: String },
}

impl SendOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, SendOutcome::Delivered { .. })
    }

    pub fn message_id(&self) -> Option<&str> {
        match self {
            SendOutcome::Delivered { message_id } => message_id.as_deref(),
            SendOutcome::Rejected { .. } => None,
        }
    }
}

/// Outbound messaging channel (single sender identity).
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Free-form text. Only accepted inside an open session window.
    async fn send_text(&self, to: &str, body: &str) -> SendOutcome;

    /// Pre-approved template message; opens a session window.
    async fn send_template(
        &self,
        to: &str,
        template_name: &str,
        language: &str,
        body_params: &[String],
    ) -> SendOutcome;

    /// Media by URL with optional caption.
    async fn send_media(
        &self,
        to: &str,
        kind: MediaKind,
        url: &str,
        caption: Option<&str>,
    ) -> SendOutcome;

    /// The channel identity messages are sent from.
    fn sender_address(&self) -> &str;
}

/// One submission from the external form feed.
#[derive(Debug, Clone, Deserialize)]
pub struct Submission {
    #[serde(rename = "submittedAt")]
    pub submitted_at: String,
    #[serde(default)]
    pub values: Vec<FieldValue>,
    #[serde(rename = "pageUrl", default)]
    pub page_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldValue {
    pub name: String,
    pub value: String,
}

impl Submission {
    /// First value with the given field name, if non-empty.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|v| v.name == name)
            .map(|v| v.value.as_str())
            .filter(|v| !v.is_empty())
    }
}

/// One page of the submissions feed.
#[derive(Debug, Clone, Default)]
pub struct SubmissionPage {
    pub items: Vec<Submission>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// Paginated read access to an external submissions feed.
#[async_trait]
pub trait LeadFeed: Send + Sync {
    async fn list_submissions(
        &self,
        feed_id: &str,
        cursor: Option<&str>,
        page_size: u32,
    ) -> Result<SubmissionPage, ChannelError>;
}

/// Out-of-band notification when a lead is unreachable on the channel.
#[async_trait]
pub trait UnreachableNotifier: Send + Sync {
    async fn notify_unreachable(
        &self,
        email: &str,
        phone: &str,
        name: Option<&str>,
    ) -> Result<(), NotifyError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_value_lookup() {
        let sub = Submission {
            submitted_at: "2026-01-01T00:00:00Z".into(),
            values: vec![
                FieldValue { name: "email".into(), value: "a@b.com".into() },
                FieldValue { name: "phone".into(), value: "".into() },
            ],
            page_url: None,
        };
        assert_eq!(sub.value("email"), Some("a@b.com"));
        // Empty values count as missing.
        assert_eq!(sub.value("phone"), None);
        assert_eq!(sub.value("company"), None);
    }

    #[test]
    fn send_outcome_accessors() {
        let ok = SendOutcome::Delivered { message_id: Some("wamid.1".into()) };
        assert!(ok.is_delivered());
        assert_eq!(ok.message_id(), Some("wamid.1"));

        let failed = SendOutcome::Rejected { detail: "invalid number".into() };
        assert!(!failed.is_delivered());
        assert_eq!(failed.message_id(), None);
    }
}
