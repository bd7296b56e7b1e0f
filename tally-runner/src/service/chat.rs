//! Chat service
//!
//! Every chat failure is a delivery failure regardless of its cause: the
//! extract already exists at that point, so the run degrades instead of
//! failing.

use async_trait::async_trait;
use tally_client::SlackWebhook;

use crate::error::{ErrorKind, StepError, StepResult};

/// Sends a message to the configured channel
#[async_trait]
pub trait ChatSink: Send + Sync {
    async fn send(&self, text: &str) -> StepResult<()>;
}

/// Chat sink backed by a Slack incoming webhook
pub struct SlackChat {
    webhook: SlackWebhook,
}

impl SlackChat {
    pub fn new(webhook: SlackWebhook) -> Self {
        Self { webhook }
    }
}

#[async_trait]
impl ChatSink for SlackChat {
    async fn send(&self, text: &str) -> StepResult<()> {
        self.webhook
            .post_message(text)
            .await
            .map_err(|e| StepError::new(ErrorKind::Delivery, e.to_string()))
    }
}
