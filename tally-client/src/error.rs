//! Error types for the Tally clients

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to the warehouse, object store or chat
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed before a response arrived
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Remote service returned an error status code
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the service
        message: String,
    },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Request could not be signed
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Object store failure without a more specific classification
    #[error("Object storage error: {0}")]
    Storage(String),
}

impl ClientError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// HTTP status of the failure, if the service answered
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ApiError { status, .. } => Some(*status),
            Self::RequestFailed(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_)) || self.status() == Some(404)
    }

    /// Check if the credentials were rejected (401/403)
    pub fn is_auth_error(&self) -> bool {
        matches!(self.status(), Some(401) | Some(403))
    }

    /// Check if the request or the remote operation timed out
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::RequestFailed(e) => e.is_timeout(),
            _ => matches!(self.status(), Some(408) | Some(504)),
        }
    }

    /// Check if the service could not be reached or is temporarily unavailable
    pub fn is_connectivity(&self) -> bool {
        match self {
            Self::RequestFailed(e) => e.is_connect() || e.is_request() || e.status().is_none(),
            _ => matches!(self.status(), Some(429) | Some(500..=503)),
        }
    }
}
