//! Signed link generation step

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use tally_client::s3::MAX_PRESIGN_EXPIRY_SECS;
use tally_core::domain::artifact::{Artifact, SignedUrl};
use tally_core::domain::pipeline::{DOWNLOAD_URL, EXTRACT_OBJECT, GENERATE_LINK};
use tally_core::domain::run::RunStatus;

use crate::context::RunContext;
use crate::error::{StepError, StepResult};
use crate::service::ObjectStore;
use crate::steps::Step;

/// Presigns a download URL for the extract written by the load step
pub struct GenerateLink {
    store: Arc<dyn ObjectStore>,
    expires_in: Duration,
}

impl GenerateLink {
    pub fn new(store: Arc<dyn ObjectStore>, expires_in: Duration) -> StepResult<Self> {
        let secs = expires_in.as_secs();
        if secs == 0 || secs > MAX_PRESIGN_EXPIRY_SECS || expires_in.subsec_nanos() != 0 {
            return Err(StepError::configuration(format!(
                "link expiry must be a whole number of seconds between 1 and {}",
                MAX_PRESIGN_EXPIRY_SECS
            )));
        }
        Ok(Self { store, expires_in })
    }

    /// Signs the link and records it as issued at `now`
    ///
    /// Presigned URLs carry second-precision timestamps, so `issued_at` is
    /// truncated to keep `expires_at - issued_at` equal to the configured
    /// lifetime.
    pub async fn sign(&self, key: &str, now: DateTime<Utc>) -> StepResult<SignedUrl> {
        let issued_at = now.trunc_subsecs(0);
        let lifetime = chrono::Duration::from_std(self.expires_in)
            .map_err(|e| StepError::configuration(format!("invalid link expiry: {}", e)))?;

        let url = self.store.presign_get(key, self.expires_in).await?;
        Ok(SignedUrl {
            url,
            issued_at,
            expires_at: issued_at + lifetime,
        })
    }
}

#[async_trait]
impl Step for GenerateLink {
    fn name(&self) -> &'static str {
        GENERATE_LINK
    }

    fn phase(&self) -> RunStatus {
        RunStatus::Linking
    }

    async fn run(&self, ctx: &RunContext) -> StepResult<()> {
        let object = ctx.object(EXTRACT_OBJECT)?;
        if object.bucket != self.store.bucket() {
            return Err(StepError::precondition(format!(
                "{} is not in bucket '{}'",
                object,
                self.store.bucket()
            )));
        }

        // The link must never point at an object that is not there
        self.store.head(&object.key).await?;

        let link = self.sign(&object.key, Utc::now()).await?;
        ctx.log_info(
            GENERATE_LINK,
            format!("Signed link for {} valid until {}", object, link.expires_at.to_rfc3339()),
        );
        ctx.put_artifact(DOWNLOAD_URL, Artifact::Link(link))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{FakeStore, run_context};
    use chrono::TimeZone;
    use tally_core::domain::artifact::ArtifactRef;

    fn store_with_extract() -> Arc<FakeStore> {
        let store = Arc::new(FakeStore::new("exports"));
        store.insert_object("balances/2024-03.csv", b"ACCOUNT_ID\n".to_vec());
        store
    }

    #[test]
    fn test_expiry_bounds() {
        let store = Arc::new(FakeStore::new("exports"));
        assert!(GenerateLink::new(store.clone(), Duration::from_secs(0)).is_err());
        assert!(GenerateLink::new(store.clone(), Duration::from_secs(604_801)).is_err());
        assert!(GenerateLink::new(store.clone(), Duration::from_millis(1500)).is_err());
        assert!(GenerateLink::new(store, Duration::from_secs(604_800)).is_ok());
    }

    #[tokio::test]
    async fn test_expiration_is_exactly_issued_plus_lifetime() {
        let step = GenerateLink::new(store_with_extract(), Duration::from_secs(3600)).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 6, 0, 0).unwrap() + chrono::Duration::milliseconds(250);

        let link = step.sign("balances/2024-03.csv", now).await.unwrap();
        assert_eq!(link.issued_at, Utc.with_ymd_and_hms(2024, 3, 15, 6, 0, 0).unwrap());
        assert_eq!(link.lifetime(), chrono::Duration::seconds(3600));
        assert!(link.expires_at > link.issued_at);
        assert!(link.is_well_formed());
        assert!(link.url.contains("X-Amz-Expires=3600"));
    }

    #[tokio::test]
    async fn test_link_requires_extract_artifact() {
        let step = GenerateLink::new(store_with_extract(), Duration::from_secs(3600)).unwrap();
        let ctx = run_context("2024-03-15");

        let err = step.run(&ctx).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Precondition);
        assert!(ctx.artifact(DOWNLOAD_URL).is_none());
    }

    #[tokio::test]
    async fn test_link_for_missing_object_is_not_found() {
        let step = GenerateLink::new(Arc::new(FakeStore::new("exports")), Duration::from_secs(3600)).unwrap();
        let ctx = run_context("2024-03-15");
        ctx.put_artifact(
            EXTRACT_OBJECT,
            Artifact::Object(ArtifactRef::new("exports", "balances/2024-03.csv")),
        )
        .unwrap();

        let err = step.run(&ctx).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(ctx.artifact(DOWNLOAD_URL).is_none());
    }

    #[tokio::test]
    async fn test_link_stored_for_existing_object() {
        let step = GenerateLink::new(store_with_extract(), Duration::from_secs(604_800)).unwrap();
        let ctx = run_context("2024-03-15");
        ctx.put_artifact(
            EXTRACT_OBJECT,
            Artifact::Object(ArtifactRef::new("exports", "balances/2024-03.csv")),
        )
        .unwrap();

        step.run(&ctx).await.unwrap();
        let link = ctx.link(DOWNLOAD_URL).unwrap();
        assert!(
            link.url
                .starts_with("https://exports.s3.amazonaws.com/balances/2024-03.csv?")
        );
        assert_eq!(link.lifetime(), chrono::Duration::seconds(604_800));
    }
}
