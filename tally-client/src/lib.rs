//! Tally HTTP Clients
//!
//! Type-safe HTTP clients for the three managed services the export
//! pipeline talks to:
//! - Snowflake SQL API v2 (statement execution, async polling, partitions)
//! - Amazon S3 or any S3-compatible store (PUT/HEAD and presigned GET URLs via opendal)
//! - Slack incoming webhooks
//!
//! # Example
//!
//! ```no_run
//! use tally_client::{SlackWebhook, SlackConfig};
//!
//! #[tokio::main]
//! async fn main() -> tally_client::Result<()> {
//!     let slack = SlackWebhook::new(SlackConfig {
//!         webhook_url: "https://hooks.slack.com/services/T000/B000/XXXX".to_string(),
//!         channel: None,
//!         username: Some("tally-bot".to_string()),
//!     });
//!
//!     slack.post_message("Monthly balance extract is ready").await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod s3;
pub mod slack;
pub mod snowflake;

// Re-export commonly used types
pub use error::{ClientError, Result};
pub use s3::{Credentials, ObjectInfo, S3Client, S3Config};
pub use slack::{SlackConfig, SlackWebhook};
pub use snowflake::{ResultSet, SnowflakeClient, SnowflakeConfig};

// =============================================================================
// Response Handlers
// =============================================================================

/// Handle an API response that carries no useful content
///
/// Checks the status code and returns an error if the request failed.
pub(crate) async fn handle_empty_response(response: reqwest::Response) -> Result<()> {
    let status = response.status();

    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(ClientError::api_error(status.as_u16(), error_text));
    }

    Ok(())
}
