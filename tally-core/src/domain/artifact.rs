//! Artifact domain types
//!
//! Values handed from one pipeline step to the next. Artifacts are owned by
//! the run that produced them and are never shared across runs.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Location of a generated extract in object storage
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub bucket: String,
    pub key: String,
}

impl ArtifactRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Time-limited download link for an extract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedUrl {
    pub url: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SignedUrl {
    /// Lifetime of the link
    pub fn lifetime(&self) -> Duration {
        self.expires_at - self.issued_at
    }

    /// A usable link: an absolute http(s) URL with a host and no whitespace
    pub fn is_well_formed(&self) -> bool {
        // The URL parser silently strips or encodes whitespace
        if self.url.chars().any(char::is_whitespace) {
            return false;
        }
        match Url::parse(&self.url) {
            Ok(url) => {
                matches!(url.scheme(), "http" | "https")
                    && url.host_str().is_some_and(|host| !host.is_empty())
            }
            Err(_) => false,
        }
    }
}

/// A value produced by a step, stored under a named slot for the rest of the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Artifact {
    Object(ArtifactRef),
    Link(SignedUrl),
}

impl Artifact {
    /// Short type name for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Artifact::Object(_) => "object",
            Artifact::Link(_) => "link",
        }
    }
}
