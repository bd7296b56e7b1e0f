//! Object storage service

use std::time::Duration;

use async_trait::async_trait;
use tally_client::{ObjectInfo, S3Client};

use crate::error::{ErrorKind, StepError, StepResult};

/// The object-store calls the pipeline makes
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket every key is relative to
    fn bucket(&self) -> &str;

    /// Writes `body` to `key`, replacing any previous object
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> StepResult<()>;

    /// Confirms `key` exists; a missing object is a `NotFound` error
    async fn head(&self, key: &str) -> StepResult<ObjectInfo>;

    /// Signs a time-limited GET URL for `key` without any network call
    async fn presign_get(&self, key: &str, expires_in: Duration) -> StepResult<String>;
}

/// Object store backed by S3 or an S3-compatible service
pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    pub fn new(client: S3Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> &str {
        self.client.bucket()
    }

    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> StepResult<()> {
        self.client
            .put_object(key, body, content_type)
            .await
            .map_err(|e| StepError::from_client(e, ErrorKind::Delivery))
    }

    async fn head(&self, key: &str) -> StepResult<ObjectInfo> {
        self.client
            .head_object(key)
            .await
            .map_err(|e| StepError::from_client(e, ErrorKind::Configuration))
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> StepResult<String> {
        self.client
            .presign_get(key, expires_in)
            .await
            .map_err(|e| StepError::from_client(e, ErrorKind::Configuration))
    }
}
