//! Submissions feed client: paginated reads from the external form API.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::channels::{LeadFeed, Submission, SubmissionPage};
use crate::config::LeadSourceConfig;
use crate::error::ChannelError;

/// HTTP client for the form-submissions feed.
pub struct LeadSourceClient {
    api_url: String,
    api_key: SecretString,
    client: reqwest::Client,
}

/// Wire shape of one feed page.
#[derive(Debug, Deserialize)]
struct FeedResponse {
    #[serde(default)]
    results: Vec<Submission>,
    #[serde(default)]
    offset: Option<serde_json::Value>,
    #[serde(rename = "hasMore", default)]
    has_more: bool,
}

impl LeadSourceClient {
    pub fn new(config: &LeadSourceConfig) -> Self {
        Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            client: reqwest::Client::new(),
        }
    }

    fn feed_url(&self, feed_id: &str) -> String {
        format!("{}/form-integrations/v1/submissions/forms/{feed_id}", self.api_url)
    }
}

#[async_trait]
impl LeadFeed for LeadSourceClient {
    async fn list_submissions(
        &self,
        feed_id: &str,
        cursor: Option<&str>,
        page_size: u32,
    ) -> Result<SubmissionPage, ChannelError> {
        let mut request = self
            .client
            .get(self.feed_url(feed_id))
            .bearer_auth(self.api_key.expose_secret())
            .query(&[("limit", page_size.to_string())]);
        if let Some(cursor) = cursor {
            request = request.query(&[("offset", cursor)]);
        }

        let resp = request.send().await.map_err(|e| ChannelError::Http {
            name: "lead-source".into(),
            reason: e.to_string(),
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ChannelError::AuthFailed { name: "lead-source".into() });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ChannelError::InvalidResponse {
                name: "lead-source".into(),
                reason: format!("{status}: {body}"),
            });
        }

        let feed: FeedResponse = resp.json().await.map_err(|e| ChannelError::InvalidResponse {
            name: "lead-source".into(),
            reason: e.to_string(),
        })?;

        // The feed reports offsets as either numbers or strings.
        let next_cursor = feed.offset.and_then(|v| match v {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        });

        Ok(SubmissionPage { items: feed.results, next_cursor, has_more: feed.has_more })
    }
}
