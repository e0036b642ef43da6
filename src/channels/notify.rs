//! Unreachable-lead notifier: SMTP email with optional SMS fallback.

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;

use crate::channels::UnreachableNotifier;
use crate::config::NotifyConfig;
use crate::error::NotifyError;

/// Sends the one-time "we couldn't reach you" notification when a lead's
/// retry budget runs out or a lead goes dead.
pub struct Notifier {
    config: NotifyConfig,
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(config: NotifyConfig) -> Self {
        Self { config, client: reqwest::Client::new() }
    }

    /// Notification body, shared between email and SMS.
    fn failure_body(name: Option<&str>, phone: &str) -> String {
        format!(
            "Hi {},\n\n\
             We tried contacting you on WhatsApp at {} but couldn't reach you.\n\n\
             This may be due to an incorrect number or a network issue. Please \
             resubmit your form with a valid WhatsApp number so we can assist you.",
            name.unwrap_or("there"),
            phone,
        )
    }

    /// Send the failure email via SMTP.
    fn send_email(&self, to: &str, body: &str) -> Result<(), NotifyError> {
        let Some(smtp) = &self.config.smtp else {
            return Err(NotifyError::NotConfigured);
        };

        let creds = Credentials::new(smtp.username.clone(), smtp.password.expose_secret().into());
        let transport = SmtpTransport::relay(&smtp.host)
            .map_err(|e| NotifyError::Email(format!("SMTP relay error: {e}")))?
            .port(smtp.port)
            .credentials(creds)
            .build();

        let email = Message::builder()
            .from(
                smtp.from_address
                    .parse()
                    .map_err(|e| NotifyError::Email(format!("Invalid from address: {e}")))?,
            )
            .to(to.parse().map_err(|e| NotifyError::Email(format!("Invalid to address: {e}")))?)
            .subject("We couldn't reach you on WhatsApp")
            .body(body.to_string())
            .map_err(|e| NotifyError::Email(format!("Failed to build email: {e}")))?;

        transport
            .send(&email)
            .map_err(|e| NotifyError::Email(format!("SMTP send failed: {e}")))?;

        tracing::info!("Failure notification email sent to {to}");
        Ok(())
    }

    /// Send the failure SMS through the REST gateway.
    async fn send_sms(&self, to: &str, body: &str) -> Result<(), NotifyError> {
        let Some(sms) = &self.config.sms else {
            return Err(NotifyError::NotConfigured);
        };

        let url = format!(
            "{}/Accounts/{}/Messages.json",
            sms.api_url.trim_end_matches('/'),
            sms.account_sid
        );

        let resp = self
            .client
            .post(&url)
            .basic_auth(&sms.account_sid, Some(sms.auth_token.expose_secret()))
            .form(&[("To", to), ("From", sms.from_number.as_str()), ("Body", body)])
            .send()
            .await
            .map_err(|e| NotifyError::Sms(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            return Err(NotifyError::Sms(format!("{status}: {detail}")));
        }

        tracing::info!("Failure notification SMS sent to {to}");
        Ok(())
    }
}

#[async_trait]
impl UnreachableNotifier for Notifier {
    async fn notify_unreachable(
        &self,
        email: &str,
        phone: &str,
        name: Option<&str>,
    ) -> Result<(), NotifyError> {
        if self.config.smtp.is_none() && self.config.sms.is_none() {
            return Err(NotifyError::NotConfigured);
        }

        let body = Self::failure_body(name, phone);

        let email_result = match &self.config.smtp {
            Some(_) => self.send_email(email, &body),
            None => Err(NotifyError::NotConfigured),
        };
        if email_result.is_ok() {
            // SMS is a fallback, not a second copy.
            return Ok(());
        }

        if self.config.sms.is_some() {
            if let Err(e) = &email_result {
                tracing::warn!("Email notification failed ({e}), falling back to SMS");
            }
            let sms_to = format!("+{}", phone.trim_start_matches('+'));
            return self.send_sms(&sms_to, &body).await;
        }

        email_result
    }
}
