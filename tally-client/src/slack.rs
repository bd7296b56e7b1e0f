//! Slack incoming-webhook client

use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::handle_empty_response;

/// Webhook destination and message overrides
#[derive(Clone)]
pub struct SlackConfig {
    pub webhook_url: String,
    /// Channel override; legacy webhooks honour it, app webhooks ignore it
    pub channel: Option<String>,
    pub username: Option<String>,
}

impl std::fmt::Debug for SlackConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The webhook URL is itself the credential
        f.debug_struct("SlackConfig")
            .field("webhook_url", &"<redacted>")
            .field("channel", &self.channel)
            .field("username", &self.username)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct WebhookMessage<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
}

/// Posts plain-text messages to one webhook
#[derive(Debug, Clone)]
pub struct SlackWebhook {
    config: SlackConfig,
    client: Client,
}

impl SlackWebhook {
    pub fn new(config: SlackConfig) -> Self {
        Self::with_client(config, Client::new())
    }

    pub fn with_client(config: SlackConfig, client: Client) -> Self {
        Self { config, client }
    }

    /// Post `text` to the channel
    ///
    /// Slack answers `200 ok` on success and a short plain-text reason
    /// (`invalid_payload`, `channel_not_found`, ...) otherwise.
    pub async fn post_message(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Err(ClientError::InvalidRequest("message text is empty".to_string()));
        }

        let message = WebhookMessage {
            text,
            channel: self.config.channel.as_deref(),
            username: self.config.username.as_deref(),
        };

        let response = self
            .client
            .post(&self.config.webhook_url)
            .json(&message)
            .send()
            .await?;

        debug!(status = %response.status(), chars = text.len(), "Posted Slack message");
        handle_empty_response(response).await
    }
}
