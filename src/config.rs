//! Configuration types, built from environment variables.

use std::str::FromStr;

use chrono::Utc;
use secrecy::SecretString;

use crate::error::ConfigError;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_required(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// WhatsApp Cloud API credentials and template defaults.
#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    pub api_url: String,
    /// The single outbound channel identity (one sender address).
    pub phone_number_id: String,
    pub access_token: SecretString,
    /// Pre-approved template used as the session opener.
    pub welcome_template: String,
    pub template_language: String,
}

impl WhatsAppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            api_url: env_string("WHATSAPP_API_URL", "https://graph.facebook.com/v19.0"),
            phone_number_id: env_required("WHATSAPP_PHONE_NUMBER_ID")?,
            access_token: SecretString::from(env_required("WHATSAPP_ACCESS_TOKEN")?),
            welcome_template: env_string("WHATSAPP_WELCOME_TEMPLATE", "welcome_template"),
            template_language: env_string("WHATSAPP_TEMPLATE_LANGUAGE", "en"),
        })
    }
}

/// Submissions feed access.
#[derive(Debug, Clone)]
pub struct LeadSourceConfig {
    pub api_url: String,
    pub api_key: SecretString,
    /// Feeds to poll, comma-separated in `LEAD_FEED_IDS`.
    pub feed_ids: Vec<String>,
    pub page_size: u32,
    pub poll_interval_secs: u64,
}

impl LeadSourceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let feed_ids: Vec<String> = env_required("LEAD_FEED_IDS")?
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if feed_ids.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "LEAD_FEED_IDS".into(),
                message: "no feed ids configured".into(),
            });
        }

        Ok(Self {
            api_url: env_string("LEAD_SOURCE_API_URL", "https://api.hubapi.com"),
            api_key: SecretString::from(env_required("LEAD_SOURCE_API_KEY")?),
            feed_ids,
            page_size: env_or("LEAD_SOURCE_PAGE_SIZE", 50),
            poll_interval_secs: env_or("LEAD_SOURCE_POLL_INTERVAL_SECS", 60),
        })
    }
}

/// SMTP transport for failure notifications.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

/// REST SMS gateway for the notification fallback.
#[derive(Debug, Clone)]
pub struct SmsConfig {
    pub api_url: String,
    pub account_sid: String,
    pub auth_token: SecretString,
    pub from_number: String,
}

/// Notification transports. Both are optional; with neither configured the
/// orchestrator logs exhausted leads but cannot notify them.
#[derive(Debug, Clone, Default)]
pub struct NotifyConfig {
    pub smtp: Option<SmtpConfig>,
    pub sms: Option<SmsConfig>,
}

impl NotifyConfig {
    pub fn from_env() -> Self {
        let smtp = std::env::var("NOTIFY_SMTP_HOST").ok().map(|host| {
            let username = env_string("NOTIFY_SMTP_USERNAME", "");
            SmtpConfig {
                host,
                port: env_or("NOTIFY_SMTP_PORT", 587),
                from_address: env_string("NOTIFY_FROM_ADDRESS", &username),
                username,
                password: SecretString::from(env_string("NOTIFY_SMTP_PASSWORD", "")),
            }
        });

        let sms = std::env::var("SMS_ACCOUNT_SID").ok().map(|account_sid| SmsConfig {
            api_url: env_string("SMS_API_URL", "https://api.twilio.com/2010-04-01"),
            account_sid,
            auth_token: SecretString::from(env_string("SMS_AUTH_TOKEN", "")),
            from_number: env_string("SMS_FROM_NUMBER", ""),
        });

        Self { smtp, sms }
    }
}

/// Reminder scheduling and retry policy.
#[derive(Debug, Clone)]
pub struct ReminderConfig {
    /// Cron expression (with seconds field) for the reminder run.
    pub cron_schedule: String,
    /// Half-width of the eligibility window around `remainder_hours`.
    pub window_hours: f64,
    /// Pause after a session opener before the follow-up text.
    pub opener_delay_ms: u64,
    /// Initial retry budget for new leads.
    pub retry_budget: i64,
    /// Country code prepended to leading-zero national numbers.
    pub default_country_code: String,
}

impl ReminderConfig {
    pub fn from_env() -> Self {
        Self {
            cron_schedule: env_string("REMINDER_CRON", "0 0 * * * *"),
            window_hours: env_or("REMINDER_WINDOW_HOURS", 1.0),
            opener_delay_ms: env_or("REMINDER_OPENER_DELAY_MS", 1000),
            retry_budget: env_or("LEAD_RETRY_BUDGET", 3),
            default_country_code: env_string("DEFAULT_COUNTRY_CODE", "91"),
        }
    }
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            cron_schedule: "0 0 * * * *".into(),
            window_hours: 1.0,
            opener_delay_ms: 1000,
            retry_budget: 3,
            default_country_code: "91".into(),
        }
    }
}

/// Aggregated orchestrator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub whatsapp: WhatsAppConfig,
    pub lead_source: LeadSourceConfig,
    pub reminder: ReminderConfig,
    pub notify: NotifyConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            whatsapp: WhatsAppConfig::from_env()?,
            lead_source: LeadSourceConfig::from_env()?,
            reminder: ReminderConfig::from_env(),
            notify: NotifyConfig::from_env(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Cross-field validation. The reminder eligibility window is only
    /// 2×`window_hours` wide, so a schedule that fires less often than that
    /// silently skips eligible contacts; reject it up front.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reminder.window_hours <= 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "REMINDER_WINDOW_HOURS".into(),
                message: "must be positive".into(),
            });
        }

        let gap_hours = schedule_gap_hours(&self.reminder.cron_schedule)?;
        if gap_hours > 2.0 * self.reminder.window_hours {
            return Err(ConfigError::ScheduleWindowMismatch {
                gap_hours,
                window_hours: self.reminder.window_hours,
            });
        }
        Ok(())
    }
}

/// Hours between the next two firings of a cron schedule.
pub fn schedule_gap_hours(schedule: &str) -> Result<f64, ConfigError> {
    let parsed = cron::Schedule::from_str(schedule).map_err(|e| ConfigError::InvalidSchedule {
        schedule: schedule.to_string(),
        message: e.to_string(),
    })?;

    let mut upcoming = parsed.upcoming(Utc);
    match (upcoming.next(), upcoming.next()) {
        (Some(first), Some(second)) => {
            Ok((second - first).num_milliseconds() as f64 / 3_600_000.0)
        }
        _ => Err(ConfigError::InvalidSchedule {
            schedule: schedule.to_string(),
            message: "schedule never fires twice".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(schedule: &str, window_hours: f64) -> Config {
        Config {
            whatsapp: WhatsAppConfig {
                api_url: "https://graph.facebook.com/v19.0".into(),
                phone_number_id: "1".into(),
                access_token: SecretString::from("t"),
                welcome_template: "welcome_template".into(),
                template_language: "en".into(),
            },
            lead_source: LeadSourceConfig {
                api_url: "https://api.hubapi.com".into(),
                api_key: SecretString::from("k"),
                feed_ids: vec!["feed-1".into()],
                page_size: 50,
                poll_interval_secs: 60,
            },
            reminder: ReminderConfig {
                cron_schedule: schedule.into(),
                window_hours,
                ..ReminderConfig::default()
            },
            notify: NotifyConfig::default(),
        }
    }

    #[test]
    fn schedule_gap_hourly() {
        let gap = schedule_gap_hours("0 0 * * * *").unwrap();
        assert!((gap - 1.0).abs() < 0.01, "expected ~1h, got {gap}");
    }

    #[test]
    fn daily_schedule_with_narrow_window_rejected() {
        // Daily firing gap (24h) > 2×1h window: the latent missed-reminder
        // bug, rejected at config time.
        let err = config_with("0 0 18 * * *", 1.0).validate().unwrap_err();
        assert!(matches!(err, ConfigError::ScheduleWindowMismatch { .. }));
    }

    #[test]
    fn daily_schedule_with_wide_window_accepted() {
        config_with("0 0 18 * * *", 12.0).validate().unwrap();
    }

    #[test]
    fn hourly_schedule_with_default_window_accepted() {
        config_with("0 0 * * * *", 1.0).validate().unwrap();
    }

    #[test]
    fn invalid_schedule_rejected() {
        let err = config_with("not a cron", 1.0).validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSchedule { .. }));
    }

    #[test]
    fn zero_window_rejected() {
        let err = config_with("0 0 * * * *", 0.0).validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
