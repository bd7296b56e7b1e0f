//! S3 object store client
//!
//! Talks to Amazon S3 or any S3-compatible store (MinIO, Ceph, ...) through
//! an opendal operator. Only the three calls the pipeline needs are exposed:
//! PUT, HEAD and presigned GET.

use std::time::Duration;

use opendal::layers::{RetryLayer, TimeoutLayer};
use opendal::{ErrorKind as StorageErrorKind, Operator};
use tracing::debug;
use url::{Host, Url};

use crate::error::{ClientError, Result};

/// Longest lifetime S3 accepts for a presigned URL (7 days)
pub const MAX_PRESIGN_EXPIRY_SECS: u64 = 604_800;

const DEFAULT_RETRY_MAX_TIMES: usize = 3;
const DEFAULT_RETRY_MIN_DELAY: Duration = Duration::from_millis(100);
const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(2);

/// Static AWS credentials
#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Connection settings for one bucket
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint; defaults to `https://s3.<region>.amazonaws.com`
    pub endpoint: Option<String>,
    /// Forces path-style (`true`) or virtual-host (`false`) addressing.
    /// When unset, AWS hosts use virtual-host style and everything else
    /// uses path style.
    pub path_style: Option<bool>,
    /// Upper bound for a single object operation, retries excluded
    pub timeout: Option<Duration>,
    /// Attempts after the first one for temporary failures
    pub retry_max_times: usize,
}

impl S3Config {
    pub fn new(bucket: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: region.into(),
            endpoint: None,
            path_style: None,
            timeout: None,
            retry_max_times: DEFAULT_RETRY_MAX_TIMES,
        }
    }

    /// Endpoint as `scheme://host[:port]`, without path or default port
    pub fn resolved_endpoint(&self) -> Result<String> {
        let url = match &self.endpoint {
            Some(endpoint) => normalize_endpoint(endpoint)?,
            None => parse_endpoint(&format!("https://s3.{}.amazonaws.com", self.region))?,
        };
        Ok(endpoint_origin(&url))
    }

    /// Whether requests put the bucket in the path rather than the host
    pub fn uses_path_style(&self) -> Result<bool> {
        if let Some(v) = self.path_style {
            return Ok(v);
        }
        let url = parse_endpoint(&self.resolved_endpoint()?)?;
        Ok(!prefer_virtual_host_style(&url))
    }
}

/// Metadata returned by a HEAD request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectInfo {
    pub content_length: Option<u64>,
    pub etag: Option<String>,
}

/// Client for a single bucket
#[derive(Clone)]
pub struct S3Client {
    bucket: String,
    operator: Operator,
}

impl std::fmt::Debug for S3Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Client").field("bucket", &self.bucket).finish()
    }
}

impl S3Client {
    /// Build the operator for `config`
    ///
    /// Credentials are taken only from `credentials`; the AWS config files,
    /// environment and instance metadata are never consulted.
    pub fn new(config: S3Config, credentials: Credentials) -> Result<Self> {
        if config.bucket.trim().is_empty() {
            return Err(ClientError::InvalidRequest("bucket name is empty".to_string()));
        }

        let endpoint = config.resolved_endpoint()?;
        let path_style = config.uses_path_style()?;

        let mut builder = opendal::services::S3::default()
            .endpoint(&endpoint)
            .bucket(&config.bucket)
            .region(&config.region)
            .access_key_id(&credentials.access_key_id)
            .secret_access_key(&credentials.secret_access_key)
            .disable_config_load()
            .disable_ec2_metadata();
        if !path_style {
            builder = builder.enable_virtual_host_style();
        }
        if let Some(token) = credentials.session_token.as_deref() {
            builder = builder.session_token(token);
        }

        let mut operator = Operator::new(builder)
            .map_err(|e| ClientError::InvalidRequest(format!("init S3 operator: {}", e)))?
            .finish();
        if let Some(timeout) = config.timeout.filter(|t| !t.is_zero()) {
            operator = operator.layer(TimeoutLayer::new().with_timeout(timeout));
        }
        operator = operator.layer(
            RetryLayer::new()
                .with_jitter()
                .with_min_delay(DEFAULT_RETRY_MIN_DELAY)
                .with_max_delay(DEFAULT_RETRY_MAX_DELAY)
                .with_max_times(config.retry_max_times),
        );

        debug!(
            bucket = %config.bucket,
            endpoint = %endpoint,
            path_style,
            "Configured S3 client"
        );

        Ok(Self {
            bucket: config.bucket,
            operator,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    // =============================================================================
    // Objects
    // =============================================================================

    /// Upload `body` to `key`, replacing any existing object
    pub async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        let size = body.len();
        self.operator
            .write_with(key, body)
            .content_type(content_type)
            .await
            .map_err(|e| self.storage_error(key, e))?;

        debug!(bucket = %self.bucket, key, size, "PUT object");
        Ok(())
    }

    /// Fetch metadata for `key`
    ///
    /// Returns [`ClientError::NotFound`] if the object does not exist.
    pub async fn head_object(&self, key: &str) -> Result<ObjectInfo> {
        let meta = self
            .operator
            .stat(key)
            .await
            .map_err(|e| self.storage_error(key, e))?;

        debug!(bucket = %self.bucket, key, size = meta.content_length(), "HEAD object");
        Ok(ObjectInfo {
            content_length: Some(meta.content_length()),
            etag: meta.etag().map(str::to_string),
        })
    }

    /// Presigned GET URL for `key`, valid for `expires_in`
    ///
    /// Signing is purely local, so this never checks that the object exists.
    pub async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String> {
        let secs = expires_in.as_secs();
        if secs == 0 || secs > MAX_PRESIGN_EXPIRY_SECS {
            return Err(ClientError::Signing(format!(
                "presign expiry must be between 1 and {} seconds, got {}",
                MAX_PRESIGN_EXPIRY_SECS, secs
            )));
        }

        let request = self
            .operator
            .presign_read(key, expires_in)
            .await
            .map_err(|e| ClientError::Signing(e.to_string()))?;
        Ok(request.uri().to_string())
    }

    fn storage_error(&self, key: &str, err: opendal::Error) -> ClientError {
        let message = err.to_string();
        match err.kind() {
            StorageErrorKind::NotFound => {
                ClientError::NotFound(format!("s3://{}/{}", self.bucket, key))
            }
            StorageErrorKind::PermissionDenied => ClientError::api_error(403, message),
            StorageErrorKind::RateLimited => ClientError::api_error(429, message),
            StorageErrorKind::ConfigInvalid | StorageErrorKind::Unsupported => {
                ClientError::InvalidRequest(message)
            }
            _ if err.is_temporary() => ClientError::api_error(503, message),
            _ => ClientError::Storage(message),
        }
    }
}

fn parse_endpoint(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| ClientError::InvalidRequest(format!("invalid endpoint '{}': {}", raw, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ClientError::InvalidRequest(format!(
            "endpoint must use http or https: {}",
            raw
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ClientError::InvalidRequest(format!("endpoint has no host: {}", raw)));
    }
    Ok(url)
}

/// Accepts a full URL or a bare `host[:port]`; bare local hosts get `http`
fn normalize_endpoint(raw: &str) -> Result<Url> {
    let endpoint = raw.trim();
    if endpoint.is_empty() {
        return Err(ClientError::InvalidRequest("empty endpoint".to_string()));
    }
    if endpoint.contains("://") {
        return parse_endpoint(endpoint);
    }
    let plain = parse_endpoint(&format!("http://{endpoint}"))?;
    if is_local_endpoint(&plain) {
        Ok(plain)
    } else {
        parse_endpoint(&format!("https://{endpoint}"))
    }
}

fn endpoint_origin(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    }
}

fn is_local_endpoint(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(_)) | Some(Host::Ipv6(_)) => true,
        None => false,
    }
}

fn prefer_virtual_host_style(url: &Url) -> bool {
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    host.ends_with(".amazonaws.com") || host == "amazonaws.com"
}
