//! Scheduled reminder engine.
//!
//! A cron-driven pass over (reminder template × contact) pairs. Each pair
//! sends at most once ever, enforced by a per-template event in the lead's
//! event log, and only while the contact sits inside the template's
//! eligibility window. Contacts idle past every configured reminder get a
//! one-time dead-lead notification instead.

pub mod render;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::channels::{MessageSender, SendOutcome, UnreachableNotifier};
use crate::config::Config;
use crate::engine::{is_eligible_for_reminder, is_session_window_open};
use crate::error::Result;
use crate::store::model::{
    Contact, Direction, EventTag, Lead, MessageRecord, MessageStatus, Template,
};
use crate::store::Store;

/// Counters from one reminder pass, for the run log line.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub considered: u64,
    pub sent: u64,
    pub openers_sent: u64,
    pub failed: u64,
    pub dead_leads_notified: u64,
}

/// The scheduled half of the orchestrator.
pub struct ReminderEngine {
    store: Arc<dyn Store>,
    sender: Arc<dyn MessageSender>,
    notifier: Arc<dyn UnreachableNotifier>,
    config: Config,
}

impl ReminderEngine {
    pub fn new(
        store: Arc<dyn Store>,
        sender: Arc<dyn MessageSender>,
        notifier: Arc<dyn UnreachableNotifier>,
        config: Config,
    ) -> Self {
        Self { store, sender, notifier, config }
    }

    /// One full reminder pass at `now`.
    ///
    /// The shutdown flag is checked between items; the item in flight
    /// always completes so no send is left half-recorded.
    pub async fn run_once(&self, now: DateTime<Utc>, shutdown: &AtomicBool) -> Result<RunReport> {
        let mut report = RunReport::default();

        let templates: Vec<Template> = self
            .store
            .list_reminder_templates()
            .await?
            .into_iter()
            .filter(|t| t.remainder_hours > 0)
            .collect();
        if templates.is_empty() {
            tracing::debug!("No active reminder templates");
            return Ok(report);
        }
        let contacts = self.store.list_contacts().await?;
        tracing::info!(
            templates = templates.len(),
            contacts = contacts.len(),
            "Reminder pass started"
        );

        for template in &templates {
            for contact in &contacts {
                if shutdown.load(Ordering::Relaxed) {
                    tracing::info!("Reminder pass cancelled");
                    return Ok(report);
                }
                report.considered += 1;
                if let Err(e) = self.process_pair(template, contact, now, &mut report).await {
                    tracing::error!(
                        template = %template.identifier,
                        phone = %contact.phone,
                        "Reminder item failed: {e}"
                    );
                }
            }
        }

        self.dead_lead_pass(&templates, &contacts, now, shutdown, &mut report).await;

        tracing::info!(
            sent = report.sent,
            openers = report.openers_sent,
            failed = report.failed,
            dead = report.dead_leads_notified,
            "Reminder pass finished"
        );
        Ok(report)
    }

    /// One (template, contact) item.
    async fn process_pair(
        &self,
        template: &Template,
        contact: &Contact,
        now: DateTime<Utc>,
        report: &mut RunReport,
    ) -> Result<()> {
        // Reminders only go to contacts that are leads.
        let Some(lead) = self.store.get_lead_by_phone(&contact.phone).await? else {
            return Ok(());
        };

        let tag = EventTag::ReminderSent { template_id: template.id };
        if self.store.has_event(lead.id, &tag).await? {
            return Ok(());
        }
        if !is_eligible_for_reminder(
            contact,
            template.remainder_hours,
            self.config.reminder.window_hours,
            now,
        ) {
            return Ok(());
        }

        if !is_session_window_open(contact, now) && !self.send_opener(&lead, contact).await? {
            report.failed += 1;
            return Ok(());
        }

        let body = self.render_body(template, contact, &lead);
        let outcome = self.sender.send_text(&contact.phone, &body).await;
        match outcome {
            SendOutcome::Delivered { ref message_id } => {
                self.record_reminder(template, contact, &lead, &body, message_id.as_deref(), now)
                    .await?;
                report.sent += 1;
                tracing::info!(
                    template = %template.identifier,
                    phone = %contact.phone,
                    "Reminder sent"
                );
            }
            SendOutcome::Rejected { detail } => {
                // No event appended: the next eligible run retries.
                report.failed += 1;
                tracing::warn!(
                    template = %template.identifier,
                    phone = %contact.phone,
                    "Reminder rejected: {detail}"
                );
            }
        }
        Ok(())
    }

    /// Re-open a closed session window with the welcome template. Returns
    /// whether the opener was delivered.
    async fn send_opener(&self, lead: &Lead, contact: &Contact) -> Result<bool> {
        let name = contact.display_name().to_string();
        let outcome = self
            .sender
            .send_template(
                &contact.phone,
                &self.config.whatsapp.welcome_template,
                &self.config.whatsapp.template_language,
                &[name],
            )
            .await;

        match outcome {
            SendOutcome::Delivered { .. } => {
                // Give the provider a beat before the follow-up text.
                tokio::time::sleep(Duration::from_millis(self.config.reminder.opener_delay_ms))
                    .await;
                tracing::debug!(phone = %contact.phone, "Session opener sent");
                Ok(true)
            }
            SendOutcome::Rejected { detail } => {
                tracing::warn!(
                    phone = %contact.phone,
                    lead = %lead.identifier,
                    "Session opener rejected, skipping reminder: {detail}"
                );
                Ok(false)
            }
        }
    }

    fn render_body(&self, template: &Template, contact: &Contact, lead: &Lead) -> String {
        let mut values: HashMap<&str, String> = HashMap::new();
        values.insert("name", contact.display_name().to_string());
        values.insert("first_name", contact.display_name().to_string());
        if let Some(company) = &lead.company {
            values.insert("company", company.clone());
        }
        render::html_to_text(&render::render_template(&template.content, &values))
    }

    /// Persist the delivered reminder and append its dedup event.
    async fn record_reminder(
        &self,
        template: &Template,
        contact: &Contact,
        lead: &Lead,
        body: &str,
        message_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let message_id = match message_id {
            Some(id) => id.to_string(),
            // No provider ack id: synthesize one so the row is still unique.
            None => format!("local-{}", Uuid::new_v4()),
        };
        let metadata = serde_json::json!({
            "templateId": template.id,
            "templateTitle": template.title,
            "remainderHours": template.remainder_hours,
            "sentAt": now.to_rfc3339(),
        });
        self.store
            .insert_message(&MessageRecord {
                id: Uuid::new_v4(),
                message_id,
                conversation_id: Some(format!("reminder-{}-{}", contact.id, template.id)),
                contact_id: Some(contact.id),
                from: self.sender.sender_address().to_string(),
                to: contact.phone.clone(),
                body: body.to_string(),
                direction: Direction::Outbound,
                status: MessageStatus::Sent,
                metadata: Some(metadata),
                timestamp: now,
            })
            .await?;
        self.store
            .touch_contact_outbound(&contact.phone, None, Some(lead.id), now)
            .await?;
        self.store
            .append_event(lead.id, &EventTag::ReminderSent { template_id: template.id }, None)
            .await?;
        Ok(())
    }

    /// Contacts idle beyond every configured reminder are dead leads:
    /// notify once and mark the lead.
    async fn dead_lead_pass(
        &self,
        templates: &[Template],
        contacts: &[Contact],
        now: DateTime<Utc>,
        shutdown: &AtomicBool,
        report: &mut RunReport,
    ) {
        let Some(max_hours) = templates.iter().map(|t| t.remainder_hours).max() else {
            return;
        };
        let horizon = max_hours as f64 + self.config.reminder.window_hours;

        for contact in contacts {
            if shutdown.load(Ordering::Relaxed) {
                tracing::info!("Dead-lead pass cancelled");
                return;
            }
            if let Err(e) = self.check_dead_lead(contact, horizon, now, report).await {
                tracing::error!(phone = %contact.phone, "Dead-lead check failed: {e}");
            }
        }
    }

    async fn check_dead_lead(
        &self,
        contact: &Contact,
        horizon_hours: f64,
        now: DateTime<Utc>,
        report: &mut RunReport,
    ) -> Result<()> {
        let Some(sent_at) = contact.last_message_sent_at else {
            return Ok(());
        };
        // A reply at-or-after our last send means the lead is alive.
        if contact
            .last_message_received_at
            .is_some_and(|received| sent_at <= received)
        {
            return Ok(());
        }
        let idle_hours = (now - sent_at).num_milliseconds() as f64 / 3_600_000.0;
        if idle_hours <= horizon_hours {
            return Ok(());
        }

        let Some(lead) = self.store.get_lead_by_phone(&contact.phone).await? else {
            return Ok(());
        };
        if self.store.has_event(lead.id, &EventTag::DeadLeadMarked).await? {
            return Ok(());
        }

        let name = lead.display_name();
        let name = (!name.is_empty()).then_some(name);
        match self
            .notifier
            .notify_unreachable(&lead.email, &lead.phone, name.as_deref())
            .await
        {
            Ok(()) => {
                self.store
                    .append_event(lead.id, &EventTag::DeadLeadMarked, None)
                    .await?;
                report.dead_leads_notified += 1;
                tracing::info!(lead = %lead.identifier, "Dead lead notified");
            }
            Err(e) => {
                tracing::error!(lead = %lead.identifier, "Dead-lead notification failed: {e}");
            }
        }
        Ok(())
    }
}

/// Spawn the cron-scheduled reminder loop. A single task awaits each run,
/// so runs never overlap; a small random jitter spreads the start time.
pub fn spawn_reminder_ticker(
    engine: Arc<ReminderEngine>,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);
    let schedule_expr = engine.config.reminder.cron_schedule.clone();

    let handle = tokio::spawn(async move {
        // Validated in Config::from_env.
        let schedule = match cron::Schedule::from_str(&schedule_expr) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Invalid reminder schedule {schedule_expr:?}: {e}");
                return;
            }
        };
        tracing::info!("Reminder ticker started (schedule {schedule_expr:?})");

        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                tracing::warn!("Reminder schedule has no future firings, stopping");
                break;
            };
            let jitter = rand::thread_rng().gen_range(0..5_000);
            let until = (next - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
                + Duration::from_millis(jitter);

            // Wake periodically so shutdown is not stuck behind a long sleep.
            let deadline = tokio::time::Instant::now() + until;
            while tokio::time::Instant::now() < deadline {
                if shutdown_flag.load(Ordering::Relaxed) {
                    tracing::info!("Reminder ticker shutting down");
                    return;
                }
                let remaining = deadline - tokio::time::Instant::now();
                tokio::time::sleep(remaining.min(Duration::from_secs(1))).await;
            }
            if shutdown_flag.load(Ordering::Relaxed) {
                tracing::info!("Reminder ticker shutting down");
                return;
            }

            if let Err(e) = engine.run_once(Utc::now(), &shutdown_flag).await {
                tracing::error!("Reminder run failed: {e}");
            }
        }
    });

    (handle, shutdown)
}
