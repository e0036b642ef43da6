//! Lead ingestion: poll the submissions feed, create leads, open sessions.
//!
//! One `Ingestor` owns a set of feed ids and walks each feed's pages from
//! its persisted cursor. Every submission becomes at most one lead (keyed
//! on phone) and at most one session-opening template send, enforced by
//! the lead's delivery status and the event log rather than by anything
//! the poller remembers in memory.

pub mod phone;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::channels::{LeadFeed, MessageSender, Submission, UnreachableNotifier};
use crate::config::Config;
use crate::engine::{Engine, RetryAction};
use crate::error::Result;
use crate::store::model::{DeliveryStats, DeliveryStatus, EventTag, Lead, LeadSource, NewLead};
use crate::store::Store;

use self::phone::{country_from_phone, format_phone, is_valid_phone};

/// Why a submission produced no lead. Logged, never fatal.
#[derive(Debug, PartialEq, Eq)]
enum SkipReason {
    MissingEmail,
    MissingPhone,
    InvalidPhone(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::MissingEmail => write!(f, "no email field"),
            SkipReason::MissingPhone => write!(f, "no phone field"),
            SkipReason::InvalidPhone(p) => write!(f, "invalid phone {p:?}"),
        }
    }
}

/// Feed-to-lead orchestrator.
pub struct Ingestor {
    store: Arc<dyn Store>,
    engine: Engine,
    sender: Arc<dyn MessageSender>,
    feed: Arc<dyn LeadFeed>,
    notifier: Arc<dyn UnreachableNotifier>,
    config: Config,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn Store>,
        sender: Arc<dyn MessageSender>,
        feed: Arc<dyn LeadFeed>,
        notifier: Arc<dyn UnreachableNotifier>,
        config: Config,
    ) -> Self {
        Self {
            engine: Engine::new(Arc::clone(&store)),
            store,
            sender,
            feed,
            notifier,
            config,
        }
    }

    /// Walk every configured feed once. The shutdown flag is checked
    /// between submissions; the submission in flight always completes.
    pub async fn poll_now(&self, shutdown: &AtomicBool) -> Result<()> {
        for feed_id in &self.config.lead_source.feed_ids {
            if shutdown.load(Ordering::Relaxed) {
                return Ok(());
            }
            if let Err(e) = self.poll_feed(feed_id, shutdown).await {
                tracing::error!(%feed_id, "Feed poll failed: {e}");
            }
        }
        Ok(())
    }

    /// Walk one feed from its persisted cursor.
    ///
    /// The cursor only advances past a fully-processed page, so a crash or
    /// cancellation mid-page re-reads that page; the event log and the
    /// insert-only lead upsert make the replay harmless.
    pub async fn poll_feed(&self, feed_id: &str, shutdown: &AtomicBool) -> Result<()> {
        let page_size = self.config.lead_source.page_size;
        let mut cursor = self.store.get_feed_cursor(feed_id).await?;

        loop {
            let page = self
                .feed
                .list_submissions(feed_id, cursor.as_deref(), page_size)
                .await?;
            tracing::debug!(feed_id, count = page.items.len(), "Fetched submissions page");

            for submission in &page.items {
                if shutdown.load(Ordering::Relaxed) {
                    tracing::info!(feed_id, "Feed walk cancelled");
                    return Ok(());
                }
                if let Err(e) = self.process_submission(feed_id, submission).await {
                    // One bad submission must not stall the feed.
                    tracing::error!(feed_id, "Submission processing failed: {e}");
                }
            }

            match (page.has_more, page.next_cursor) {
                (true, Some(next)) => {
                    self.store.set_feed_cursor(feed_id, &next).await?;
                    cursor = Some(next);
                }
                _ => break,
            }
            if shutdown.load(Ordering::Relaxed) {
                tracing::info!(feed_id, "Feed walk cancelled");
                return Ok(());
            }
        }
        Ok(())
    }

    /// One submission: validate, create the lead if new, then drive its
    /// delivery state machine.
    pub async fn process_submission(&self, feed_id: &str, submission: &Submission) -> Result<()> {
        let lead = match self.lead_from_submission(feed_id, submission) {
            Ok(lead) => lead,
            Err(reason) => {
                tracing::warn!(feed_id, "Skipping submission: {reason}");
                return Ok(());
            }
        };

        let (stored, created) = self.store.upsert_lead(&lead).await?;
        if created {
            tracing::info!(
                lead = %stored.identifier,
                phone = %stored.phone,
                "New lead from feed {feed_id}"
            );
        }
        let payload = serde_json::json!({
            "submittedAt": submission.submitted_at,
            "pageUrl": submission.page_url,
        });
        self.store
            .append_event(stored.id, &EventTag::SubmissionReceived, Some(&payload))
            .await?;

        self.process_lead(&stored).await
    }

    fn lead_from_submission(
        &self,
        feed_id: &str,
        submission: &Submission,
    ) -> std::result::Result<NewLead, SkipReason> {
        let email = submission.value("email").ok_or(SkipReason::MissingEmail)?;
        let raw_phone = submission
            .value("phone")
            .or_else(|| submission.value("mobilephone"))
            .ok_or(SkipReason::MissingPhone)?;

        let phone = format_phone(raw_phone, &self.config.reminder.default_country_code);
        if !is_valid_phone(&phone) {
            return Err(SkipReason::InvalidPhone(raw_phone.to_string()));
        }

        Ok(NewLead {
            email: email.to_string(),
            phone: phone.clone(),
            first_name: submission.value("firstname").map(String::from),
            last_name: submission.value("lastname").map(String::from),
            company: submission.value("company").map(String::from),
            country: country_from_phone(&phone).map(String::from),
            feed_id: Some(feed_id.to_string()),
            source: LeadSource::ExternalForm,
            retry_count: self.config.reminder.retry_budget,
        })
    }

    /// Drive one lead through its delivery state machine.
    ///
    /// Sent is terminal. Exhausted-and-failed gets the one-time failure
    /// notification. Everything else (pending, or failed with budget left)
    /// gets a session-opener attempt.
    pub async fn process_lead(&self, lead: &Lead) -> Result<()> {
        if lead.delivery_status == DeliveryStatus::Sent && lead.template_sent {
            tracing::debug!(lead = %lead.identifier, "Opener already delivered, nothing to do");
            return Ok(());
        }

        if self.engine.retry_action_for(lead).await? == RetryAction::NotifyFailure {
            self.notify_failure(lead).await?;
            return Ok(());
        }
        if lead.delivery_status == DeliveryStatus::Failed && lead.retry_count <= 0 {
            // Exhausted and already notified.
            return Ok(());
        }

        let name = lead.display_name();
        let params = if name.is_empty() { vec![] } else { vec![name.clone()] };
        let outcome = self
            .sender
            .send_template(
                &lead.phone,
                &self.config.whatsapp.welcome_template,
                &self.config.whatsapp.template_language,
                &params,
            )
            .await;

        if outcome.is_delivered() {
            self.store
                .touch_contact_outbound(
                    &lead.phone,
                    (!name.is_empty()).then_some(name.as_str()),
                    Some(lead.id),
                    Utc::now(),
                )
                .await?;
        }
        self.engine.record_delivery_outcome(lead, &outcome).await?;
        Ok(())
    }

    /// One-time unreachable notification for an exhausted lead.
    async fn notify_failure(&self, lead: &Lead) -> Result<()> {
        let name = lead.display_name();
        let name = (!name.is_empty()).then_some(name);
        match self
            .notifier
            .notify_unreachable(&lead.email, &lead.phone, name.as_deref())
            .await
        {
            Ok(()) => {
                self.store
                    .append_event(lead.id, &EventTag::FailureNotified, None)
                    .await?;
                tracing::info!(lead = %lead.identifier, "Unreachable lead notified");
            }
            Err(e) => {
                // Leave the event unwritten so the next pass retries.
                tracing::error!(lead = %lead.identifier, "Failure notification failed: {e}");
            }
        }
        Ok(())
    }

    /// Lead counts by delivery status.
    pub async fn delivery_stats(&self) -> Result<DeliveryStats> {
        Ok(self.store.count_leads_by_status().await?)
    }
}

/// Spawn the feed polling loop. Returns the task handle and a shutdown
/// flag; set the flag and the loop exits after the tick in flight.
pub fn spawn_ingest_poller(ingestor: Arc<Ingestor>) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);
    let interval_secs = ingestor.config.lead_source.poll_interval_secs;

    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!("Feed poller started (every {interval_secs}s)");

        loop {
            interval.tick().await;
            if shutdown_flag.load(Ordering::Relaxed) {
                tracing::info!("Feed poller shutting down");
                break;
            }
            if let Err(e) = ingestor.poll_now(&shutdown_flag).await {
                tracing::error!("Feed poll cycle failed: {e}");
            }
        }
    });

    (handle, shutdown)
}
