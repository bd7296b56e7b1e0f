//! Step error taxonomy
//!
//! Every failure a step can report is classified into an [`ErrorKind`].
//! The kind decides the exit code and whether the host scheduler should
//! retry.

use serde::Serialize;
use tally_client::ClientError;
use thiserror::Error;

/// Failure classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Service unreachable or temporarily unavailable
    Connectivity,
    /// Credentials rejected or missing privileges
    Authorization,
    /// The warehouse rejected or failed a statement
    Query,
    /// An object or resource that must exist does not
    NotFound,
    /// A message or object could not be delivered
    Delivery,
    /// The step or the remote operation ran out of time
    Timeout,
    /// The period produced no rows and the policy forbids an empty file
    EmptyExtract,
    /// Invalid settings or templates
    Configuration,
    /// A required upstream artifact is missing or malformed
    Precondition,
}

impl ErrorKind {
    /// Whether rerunning later could succeed without any change
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Connectivity | ErrorKind::Timeout)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Connectivity => "connectivity",
            ErrorKind::Authorization => "authorization",
            ErrorKind::Query => "query",
            ErrorKind::NotFound => "not found",
            ErrorKind::Delivery => "delivery",
            ErrorKind::Timeout => "timeout",
            ErrorKind::EmptyExtract => "empty extract",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Precondition => "precondition",
        };
        write!(f, "{}", name)
    }
}

/// Error returned by a step or a service seam
#[derive(Debug, Clone, Error)]
#[error("{kind} error: {message}")]
pub struct StepError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StepError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Precondition, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Classifies a client error, using `fallback` for anything that is
    /// not clearly a transport, auth, timeout or missing-resource problem
    pub fn from_client(err: ClientError, fallback: ErrorKind) -> Self {
        let kind = if err.is_timeout() {
            ErrorKind::Timeout
        } else if err.is_auth_error() {
            ErrorKind::Authorization
        } else if err.is_not_found() {
            ErrorKind::NotFound
        } else if err.is_connectivity() {
            ErrorKind::Connectivity
        } else {
            match &err {
                ClientError::InvalidRequest(_) => ErrorKind::Precondition,
                ClientError::Signing(_) => ErrorKind::Configuration,
                _ => fallback,
            }
        };
        Self::new(kind, err.to_string())
    }
}

pub type StepResult<T> = std::result::Result<T, StepError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ErrorKind::Connectivity.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(!ErrorKind::Query.is_retryable());
        assert!(!ErrorKind::Delivery.is_retryable());
        assert!(!ErrorKind::EmptyExtract.is_retryable());
    }

    #[test]
    fn test_classify_client_errors() {
        let cases = [
            (ClientError::api_error(403, "denied"), ErrorKind::Authorization),
            (ClientError::api_error(404, "NoSuchKey"), ErrorKind::NotFound),
            (ClientError::api_error(408, "timeout"), ErrorKind::Timeout),
            (ClientError::api_error(503, "unavailable"), ErrorKind::Connectivity),
            (ClientError::api_error(422, "syntax error"), ErrorKind::Query),
            (ClientError::InvalidRequest("empty".into()), ErrorKind::Precondition),
            (ClientError::Signing("bad".into()), ErrorKind::Configuration),
            (ClientError::Storage("unexpected".into()), ErrorKind::Query),
        ];
        for (err, expected) in cases {
            assert_eq!(StepError::from_client(err, ErrorKind::Query).kind, expected);
        }
    }

    #[test]
    fn test_display() {
        let err = StepError::new(ErrorKind::NotFound, "s3://exports/balances/2024-03.csv");
        assert_eq!(err.to_string(), "not found error: s3://exports/balances/2024-03.csv");
    }
}
