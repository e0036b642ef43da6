use std::sync::atomic::Ordering;
use std::sync::Arc;

use lead_relay::channels::{LeadSourceClient, Notifier, WhatsAppClient};
use lead_relay::config::Config;
use lead_relay::ingest::{self, Ingestor};
use lead_relay::reminder::{self, ReminderEngine};
use lead_relay::store::{LibSqlBackend, Store};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("Error: invalid configuration: {e}");
        std::process::exit(1);
    });

    eprintln!("📨 Lead Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Feeds: {}", config.lead_source.feed_ids.join(", "));
    eprintln!(
        "   Feed poll: every {}s | Reminders: {} (±{}h window)",
        config.lead_source.poll_interval_secs,
        config.reminder.cron_schedule,
        config.reminder.window_hours,
    );
    eprintln!(
        "   Notifications: email {}, sms {}",
        if config.notify.smtp.is_some() { "on" } else { "off" },
        if config.notify.sms.is_some() { "on" } else { "off" },
    );

    // ── Database ─────────────────────────────────────────────────────────
    let db_path =
        std::env::var("LEAD_RELAY_DB_PATH").unwrap_or_else(|_| "./data/lead-relay.db".to_string());
    let store: Arc<dyn Store> = Arc::new(
        LibSqlBackend::new_local(std::path::Path::new(&db_path))
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {db_path}: {e}");
                std::process::exit(1);
            }),
    );
    eprintln!("   Database: {db_path}");

    let stats = store.count_leads_by_status().await?;
    eprintln!(
        "   Leads: {} pending, {} sent, {} failed\n",
        stats.pending, stats.sent, stats.failed
    );

    // ── Channels ─────────────────────────────────────────────────────────
    let sender = Arc::new(WhatsAppClient::new(&config.whatsapp));
    let feed = Arc::new(LeadSourceClient::new(&config.lead_source));
    let notifier = Arc::new(Notifier::new(config.notify.clone()));

    // ── Orchestrators ────────────────────────────────────────────────────
    let ingestor = Arc::new(Ingestor::new(
        Arc::clone(&store),
        sender.clone(),
        feed,
        notifier.clone(),
        config.clone(),
    ));
    let reminder_engine = Arc::new(ReminderEngine::new(
        Arc::clone(&store),
        sender,
        notifier,
        config,
    ));

    let (ingest_handle, ingest_shutdown) = ingest::spawn_ingest_poller(ingestor);
    let (reminder_handle, reminder_shutdown) = reminder::spawn_reminder_ticker(reminder_engine);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    ingest_shutdown.store(true, Ordering::Relaxed);
    reminder_shutdown.store(true, Ordering::Relaxed);
    let _ = tokio::join!(ingest_handle, reminder_handle);

    Ok(())
}
