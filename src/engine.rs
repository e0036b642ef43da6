//! Conversation window & retry engine.
//!
//! The decision half of the orchestrator: given a contact/lead pair and a
//! candidate message, decide whether and how to send, and record the outcome
//! idempotently. All decision functions are pure reads over passed-in state
//! and never touch the network; the `Engine` struct adds the store-backed
//! outcome recording and the atomic ledger checks that callers run
//! immediately around a side-effecting send.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::channels::SendOutcome;
use crate::error::DatabaseError;
use crate::store::model::{Contact, DeliveryStatus, EventTag, Lead, LeadEvent};
use crate::store::Store;

/// Provider-defined session window: free-form text is only accepted this
/// long after the last inbound message.
pub const SESSION_WINDOW_HOURS: f64 = 24.0;

/// Elapsed hours between two instants, fractional.
fn elapsed_hours(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 3_600_000.0
}

/// Whether a contact is due for a reminder configured at `remainder_hours`.
///
/// False without a `last_message_sent_at`. False when the contact replied
/// at-or-after the last outbound send. Otherwise true iff the elapsed time
/// since the last send falls inside [remainder_hours − window,
/// remainder_hours + window], bounds inclusive.
///
/// The window is deliberately narrow and non-idempotent in time: the
/// scheduled task must fire at least once per 2×window hours or eligible
/// contacts are skipped entirely. `Config::validate` enforces that.
pub fn is_eligible_for_reminder(
    contact: &Contact,
    remainder_hours: i64,
    window_hours: f64,
    now: DateTime<Utc>,
) -> bool {
    let Some(sent_at) = contact.last_message_sent_at else {
        return false;
    };
    if let Some(received_at) = contact.last_message_received_at
        && sent_at <= received_at
    {
        // Already replied after our last send.
        return false;
    }

    let elapsed = elapsed_hours(sent_at, now);
    let target = remainder_hours as f64;
    elapsed >= target - window_hours && elapsed <= target + window_hours
}

/// Whether the provider's 24-hour session window is open for this contact.
///
/// When closed, free-form text is rejected by the channel and a template
/// (session opener) must be sent first.
pub fn is_session_window_open(contact: &Contact, now: DateTime<Utc>) -> bool {
    match contact.last_message_received_at {
        Some(received_at) => elapsed_hours(received_at, now) < SESSION_WINDOW_HOURS,
        None => false,
    }
}

/// Whether the lead's event log already contains an entry with this tag.
pub fn already_processed(events: &[LeadEvent], tag: &EventTag) -> bool {
    events.iter().any(|e| e.tag == *tag)
}

/// What to do about a lead whose delivery keeps failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    None,
    /// Budget exhausted and not yet notified: the caller should notify the
    /// unreachable lead once, then append the failure-notified event.
    NotifyFailure,
}

/// Decide whether retry exhaustion requires a one-time failure notification.
///
/// Side-effect-free: the caller executes the notification and appends the
/// event afterwards.
pub fn retry_action(lead: &Lead, events: &[LeadEvent]) -> RetryAction {
    if lead.delivery_status == DeliveryStatus::Failed
        && lead.retry_count <= 0
        && !already_processed(events, &EventTag::FailureNotified)
    {
        RetryAction::NotifyFailure
    } else {
        RetryAction::None
    }
}

/// Store-backed half of the engine: outcome recording and atomic ledger
/// checks.
pub struct Engine {
    store: Arc<dyn Store>,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Atomic variant of [`already_processed`] against the store ledger.
    /// Check this immediately before any side-effecting send.
    pub async fn already_processed(
        &self,
        lead: &Lead,
        tag: &EventTag,
    ) -> Result<bool, DatabaseError> {
        self.store.has_event(lead.id, tag).await
    }

    /// Record a delivery outcome on the lead.
    ///
    /// Success: status becomes `sent` (terminal), the template flag and
    /// message id are stored, and a session-started event is appended.
    /// Failure: status becomes `failed` and the retry budget is decremented;
    /// no event is appended, so the next scheduled pass retries
    /// automatically.
    pub async fn record_delivery_outcome(
        &self,
        lead: &Lead,
        outcome: &SendOutcome,
    ) -> Result<(), DatabaseError> {
        match outcome {
            SendOutcome::Delivered { message_id } => {
                self.store.mark_lead_sent(lead.id, message_id.as_deref()).await?;
                let payload = message_id
                    .as_ref()
                    .map(|id| serde_json::json!({ "messageId": id }));
                self.store
                    .append_event(lead.id, &EventTag::SessionStarted, payload.as_ref())
                    .await?;
            }
            SendOutcome::Rejected { detail } => {
                let remaining = self.store.mark_lead_failed(lead.id).await?;
                tracing::warn!(
                    lead = %lead.identifier,
                    phone = %lead.phone,
                    remaining,
                    "Delivery failed: {detail}"
                );
            }
        }
        Ok(())
    }

    /// [`retry_action`] evaluated against the stored event log.
    pub async fn retry_action_for(&self, lead: &Lead) -> Result<RetryAction, DatabaseError> {
        let events = self.store.list_events(lead.id).await?;
        Ok(retry_action(lead, &events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rand::Rng;
    use uuid::Uuid;

    fn contact(
        sent_hours_ago: Option<f64>,
        received_hours_ago: Option<f64>,
        now: DateTime<Utc>,
    ) -> Contact {
        let at = |hours: f64| now - Duration::milliseconds((hours * 3_600_000.0) as i64);
        let sent = sent_hours_ago.map(at);
        let received = received_hours_ago.map(at);
        Contact {
            id: Uuid::new_v4(),
            phone: "919729360795".into(),
            name: Some("Asha".into()),
            lead_id: None,
            last_message_sent_at: sent,
            last_message_received_at: received,
            last_message_at: sent.max(received),
            unread_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn lead(status: DeliveryStatus, retry_count: i64) -> Lead {
        Lead {
            id: Uuid::new_v4(),
            identifier: "12345".into(),
            email: "a@b.com".into(),
            phone: "919729360795".into(),
            first_name: None,
            last_name: None,
            company: None,
            country: None,
            feed_id: None,
            source: crate::store::LeadSource::ExternalForm,
            delivery_status: status,
            template_sent: false,
            last_message_id: None,
            retry_count,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn event(tag: EventTag) -> LeadEvent {
        LeadEvent { lead_id: Uuid::new_v4(), tag, payload: None, created_at: Utc::now() }
    }

    #[test]
    fn never_eligible_without_sent_timestamp() {
        let now = Utc::now();
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let received = if rng.gen_bool(0.5) {
                Some(rng.gen_range(0.0..200.0))
            } else {
                None
            };
            let hours = rng.gen_range(1..100);
            let c = contact(None, received, now);
            assert!(!is_eligible_for_reminder(&c, hours, 1.0, now));
        }
    }

    #[test]
    fn eligibility_window_boundaries() {
        let now = Utc::now();
        // Inclusive at remainder_hours ± 1.
        assert!(is_eligible_for_reminder(&contact(Some(23.0), None, now), 24, 1.0, now));
        assert!(is_eligible_for_reminder(&contact(Some(25.0), None, now), 24, 1.0, now));
        assert!(is_eligible_for_reminder(&contact(Some(24.0), None, now), 24, 1.0, now));
        // Exclusive just outside.
        assert!(!is_eligible_for_reminder(&contact(Some(22.99), None, now), 24, 1.0, now));
        assert!(!is_eligible_for_reminder(&contact(Some(25.01), None, now), 24, 1.0, now));
    }

    #[test]
    fn configurable_window_width() {
        let now = Utc::now();
        // ±6h revision of the window.
        assert!(is_eligible_for_reminder(&contact(Some(19.0), None, now), 24, 6.0, now));
        assert!(is_eligible_for_reminder(&contact(Some(30.0), None, now), 24, 6.0, now));
        assert!(!is_eligible_for_reminder(&contact(Some(31.0), None, now), 24, 6.0, now));
    }

    #[test]
    fn replied_contact_not_eligible() {
        let now = Utc::now();
        // Received 1h ago, sent 2h ago: the contact already answered.
        let c = contact(Some(2.0), Some(1.0), now);
        assert!(!is_eligible_for_reminder(&c, 2, 1.0, now));
    }

    #[test]
    fn reminder_due_when_reply_is_older_than_send() {
        let now = Utc::now();
        // Sent 25h ago, received 30h ago, 24h template: eligible, and the
        // session window is closed.
        let c = contact(Some(25.0), Some(30.0), now);
        assert!(is_eligible_for_reminder(&c, 24, 1.0, now));
        assert!(!is_session_window_open(&c, now));
    }

    #[test]
    fn session_window_boundary() {
        let now = Utc::now();
        assert!(is_session_window_open(&contact(None, Some(23.9), now), now));
        assert!(!is_session_window_open(&contact(None, Some(24.0), now), now));
        assert!(!is_session_window_open(&contact(None, None, now), now));
    }

    #[test]
    fn retry_action_requires_all_three_conditions() {
        let exhausted = lead(DeliveryStatus::Failed, 0);
        assert_eq!(retry_action(&exhausted, &[]), RetryAction::NotifyFailure);

        // Negative budget still triggers.
        let negative = lead(DeliveryStatus::Failed, -2);
        assert_eq!(retry_action(&negative, &[]), RetryAction::NotifyFailure);

        // Budget remaining: no action.
        let retrying = lead(DeliveryStatus::Failed, 1);
        assert_eq!(retry_action(&retrying, &[]), RetryAction::None);

        // Not failed: no action.
        let pending = lead(DeliveryStatus::Pending, 0);
        assert_eq!(retry_action(&pending, &[]), RetryAction::None);

        // Already notified: no action, ever again.
        let notified = lead(DeliveryStatus::Failed, 0);
        assert_eq!(
            retry_action(&notified, &[event(EventTag::FailureNotified)]),
            RetryAction::None
        );
    }

    #[test]
    fn already_processed_matches_tags() {
        let template_id = Uuid::new_v4();
        let events = vec![
            event(EventTag::SessionStarted),
            event(EventTag::ReminderSent { template_id }),
        ];
        assert!(already_processed(&events, &EventTag::SessionStarted));
        assert!(already_processed(&events, &EventTag::ReminderSent { template_id }));
        assert!(!already_processed(
            &events,
            &EventTag::ReminderSent { template_id: Uuid::new_v4() }
        ));
        assert!(!already_processed(&events, &EventTag::FailureNotified));
    }

    #[tokio::test]
    async fn record_outcome_success_and_failure() {
        let store: Arc<dyn Store> = Arc::new(
            crate::store::LibSqlBackend::new_memory().await.unwrap(),
        );
        let engine = Engine::new(Arc::clone(&store));

        let (stored, _) = store
            .upsert_lead(&crate::store::NewLead {
                email: "a@b.com".into(),
                phone: "919729360795".into(),
                first_name: None,
                last_name: None,
                company: None,
                country: None,
                feed_id: None,
                source: crate::store::LeadSource::ExternalForm,
                retry_count: 2,
            })
            .await
            .unwrap();

        engine
            .record_delivery_outcome(
                &stored,
                &SendOutcome::Rejected { detail: "rate limited".into() },
            )
            .await
            .unwrap();
        let after_fail = store.get_lead(stored.id).await.unwrap().unwrap();
        assert_eq!(after_fail.delivery_status, DeliveryStatus::Failed);
        assert_eq!(after_fail.retry_count, 1);
        // Failures are not deduplicated: no event appended.
        assert!(store.list_events(stored.id).await.unwrap().is_empty());

        engine
            .record_delivery_outcome(
                &after_fail,
                &SendOutcome::Delivered { message_id: Some("wamid.1".into()) },
            )
            .await
            .unwrap();
        let after_send = store.get_lead(stored.id).await.unwrap().unwrap();
        assert_eq!(after_send.delivery_status, DeliveryStatus::Sent);
        assert!(after_send.template_sent);
        assert_eq!(after_send.last_message_id.as_deref(), Some("wamid.1"));
        assert!(engine.already_processed(&after_send, &EventTag::SessionStarted).await.unwrap());
    }
}
