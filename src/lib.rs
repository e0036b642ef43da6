//! Contact re-engagement and message delivery orchestrator.
//!
//! Pulls leads from an external form-submissions feed, opens WhatsApp
//! sessions with a pre-approved template, and runs scheduled reminders
//! against contacts who have gone quiet. Idempotency is anchored in an
//! append-only per-lead event log rather than in anything the pollers
//! remember across restarts.

pub mod channels;
pub mod config;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod reminder;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
