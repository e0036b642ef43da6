//! Error types for Lead Relay.

/// Top-level error type for the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid cron schedule '{schedule}': {message}")]
    InvalidSchedule { schedule: String, message: String },

    #[error(
        "Reminder schedule fires every {gap_hours:.1}h but the eligibility window \
         is only ±{window_hours:.1}h wide, so eligible contacts would be skipped"
    )]
    ScheduleWindowMismatch { gap_hours: f64, window_hours: f64 },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with key {key}")]
    NotFound { entity: String, key: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors from the external feed / messaging channel clients.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("HTTP request to {name} failed: {reason}")]
    Http { name: String, reason: String },

    #[error("{name} returned an unexpected response: {reason}")]
    InvalidResponse { name: String, reason: String },

    #[error("Authentication failed for {name}")]
    AuthFailed { name: String },
}

/// Errors from the unreachable-lead notifier.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Email notification failed: {0}")]
    Email(String),

    #[error("SMS notification failed: {0}")]
    Sms(String),

    #[error("No notification transport configured")]
    NotConfigured,
}

/// Result type alias for the orchestrator.
pub type Result<T> = std::result::Result<T, Error>;
