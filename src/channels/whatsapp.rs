//! WhatsApp Cloud API client.
//!
//! Talks to the Graph messages endpoint for one phone-number identity.
//! Every send returns a tagged [`SendOutcome`]; API rejections and
//! transport errors both surface as `Rejected` so callers can record them
//! as delivery failures.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::channels::{MessageSender, SendOutcome};
use crate::config::WhatsAppConfig;

/// Media kinds accepted by the messages endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Document,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Document => "document",
            MediaKind::Audio => "audio",
        }
    }

    /// Captions are only supported on visual/document media.
    fn supports_caption(&self) -> bool {
        !matches!(self, MediaKind::Audio)
    }
}

/// WhatsApp Cloud API client for a single sender identity.
pub struct WhatsAppClient {
    api_url: String,
    phone_number_id: String,
    access_token: SecretString,
    client: reqwest::Client,
}

impl WhatsAppClient {
    pub fn new(config: &WhatsAppConfig) -> Self {
        Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            phone_number_id: config.phone_number_id.clone(),
            access_token: config.access_token.clone(),
            client: reqwest::Client::new(),
        }
    }

    fn messages_url(&self) -> String {
        format!("{}/{}/messages", self.api_url, self.phone_number_id)
    }

    /// POST a payload to the messages endpoint and fold the response into a
    /// SendOutcome.
    async fn post_message(&self, to: &str, payload: serde_json::Value) -> SendOutcome {
        let resp = self
            .client
            .post(self.messages_url())
            .bearer_auth(self.access_token.expose_secret())
            .json(&payload)
            .send()
            .await;

        let resp = match resp {
            Ok(r) => r,
            Err(e) => {
                return SendOutcome::Rejected { detail: format!("transport: {e}") };
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(to, %status, "WhatsApp send rejected: {body}");
            return SendOutcome::Rejected { detail: format!("{status}: {body}") };
        }

        let data: serde_json::Value = match resp.json().await {
            Ok(d) => d,
            Err(e) => {
                // Delivered but unparseable ack: keep the success, lose the id.
                tracing::warn!(to, "WhatsApp ack parse error: {e}");
                return SendOutcome::Delivered { message_id: None };
            }
        };

        let message_id = data
            .get("messages")
            .and_then(|m| m.get(0))
            .and_then(|m| m.get("id"))
            .and_then(serde_json::Value::as_str)
            .map(String::from);

        tracing::debug!(to, message_id = message_id.as_deref().unwrap_or("-"), "WhatsApp sent");
        SendOutcome::Delivered { message_id }
    }

    /// Mark an inbound message as read.
    pub async fn mark_as_read(&self, message_id: &str) -> SendOutcome {
        let payload = serde_json::json!({
            "messaging_product": "whatsapp",
            "status": "read",
            "message_id": message_id,
        });
        self.post_message(message_id, payload).await
    }
}

#[async_trait]
impl MessageSender for WhatsAppClient {
    async fn send_text(&self, to: &str, body: &str) -> SendOutcome {
        let payload = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "text",
            "text": { "preview_url": false, "body": body },
        });
        self.post_message(to, payload).await
    }

    async fn send_template(
        &self,
        to: &str,
        template_name: &str,
        language: &str,
        body_params: &[String],
    ) -> SendOutcome {
        let mut template = serde_json::json!({
            "name": template_name,
            "language": { "code": language },
        });
        if !body_params.is_empty() {
            let parameters: Vec<serde_json::Value> = body_params
                .iter()
                .map(|p| serde_json::json!({ "type": "text", "text": p }))
                .collect();
            template["components"] = serde_json::json!([
                { "type": "body", "parameters": parameters }
            ]);
        }

        let payload = serde_json::json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "template",
            "template": template,
        });
        self.post_message(to, payload).await
    }

    async fn send_media(
        &self,
        to: &str,
        kind: MediaKind,
        url: &str,
        caption: Option<&str>,
    ) -> SendOutcome {
        let mut media = serde_json::json!({ "link": url });
        if let Some(caption) = caption.filter(|_| kind.supports_caption()) {
            media["caption"] = serde_json::Value::String(caption.to_string());
        }

        let mut payload = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": kind.as_str(),
        });
        payload[kind.as_str()] = media;
        self.post_message(to, payload).await
    }

    fn sender_address(&self) -> &str {
        &self.phone_number_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> WhatsAppClient {
        WhatsAppClient::new(&WhatsAppConfig {
            api_url: "https://graph.facebook.com/v19.0/".into(),
            phone_number_id: "1234567890".into(),
            access_token: SecretString::from("fake-token"),
            welcome_template: "welcome_template".into(),
            template_language: "en".into(),
        })
    }

    #[test]
    fn messages_url_strips_trailing_slash() {
        assert_eq!(
            client().messages_url(),
            "https://graph.facebook.com/v19.0/1234567890/messages"
        );
    }

    #[test]
    fn sender_address_is_phone_number_id() {
        assert_eq!(client().sender_address(), "1234567890");
    }

    #[test]
    fn audio_drops_caption() {
        assert!(!MediaKind::Audio.supports_caption());
        assert!(MediaKind::Image.supports_caption());
        assert!(MediaKind::Document.supports_caption());
    }

    // Network calls against a fake token must fold into Rejected, never Err.

    #[tokio::test]
    async fn send_text_offline_is_rejected_outcome() {
        let ch = WhatsAppClient::new(&WhatsAppConfig {
            api_url: "http://127.0.0.1:1".into(),
            phone_number_id: "1".into(),
            access_token: SecretString::from("t"),
            welcome_template: "welcome_template".into(),
            template_language: "en".into(),
        });
        let outcome = ch.send_text("919729360795", "hello").await;
        assert!(matches!(outcome, SendOutcome::Rejected { .. }));
    }

    #[tokio::test]
    async fn send_template_offline_is_rejected_outcome() {
        let ch = WhatsAppClient::new(&WhatsAppConfig {
            api_url: "http://127.0.0.1:1".into(),
            phone_number_id: "1".into(),
            access_token: SecretString::from("t"),
            welcome_template: "welcome_template".into(),
            template_language: "en".into(),
        });
        let outcome = ch
            .send_template("919729360795", "welcome_template", "en", &["Asha".into()])
            .await;
        assert!(matches!(outcome, SendOutcome::Rejected { .. }));
    }
}
