//! Runner configuration
//!
//! Everything the pipeline needs is read from the environment once at run
//! start and passed down explicitly. Loading goes through a lookup function
//! so tests can feed a map instead of touching the process environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use tally_client::s3::MAX_PRESIGN_EXPIRY_SECS;
use url::Url;

/// How the extract file gets into object storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractMode {
    /// Rows are fetched over the SQL API and uploaded by the runner
    Fetch,
    /// The warehouse unloads the file to an external stage
    Unload,
}

impl FromStr for ExtractMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fetch" => Ok(ExtractMode::Fetch),
            "unload" => Ok(ExtractMode::Unload),
            other => Err(anyhow!("unknown extract mode '{}' (expected fetch or unload)", other)),
        }
    }
}

/// What to do when the period has no rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyExtractPolicy {
    /// Write a header-only file and log a warning
    Allow,
    /// Fail the load step before anything is written
    Fail,
}

impl FromStr for EmptyExtractPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Ok(EmptyExtractPolicy::Allow),
            "fail" => Ok(EmptyExtractPolicy::Fail),
            other => Err(anyhow!("unknown empty extract policy '{}' (expected allow or fail)", other)),
        }
    }
}

/// Warehouse object names
///
/// This is all `render` and `plan` need, so it loads without credentials.
#[derive(Debug, Clone)]
pub struct TableConfig {
    pub database: String,
    pub schema_origin: String,
    pub schema_destination: String,
    pub source_table: String,
    pub table: String,
    /// External stage for `unload` mode, e.g. `@DB.SCHEMA.EXPORT_STAGE`
    pub stage: Option<String>,
    pub key_prefix: String,
}

impl TableConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            database: required(&lookup, "TALLY_DATABASE")?,
            schema_origin: optional(&lookup, "TALLY_SCHEMA_ORIGIN").unwrap_or_else(|| "PUBLIC".to_string()),
            schema_destination: optional(&lookup, "TALLY_SCHEMA_DESTINATION")
                .unwrap_or_else(|| "FINANCE".to_string()),
            source_table: optional(&lookup, "TALLY_SOURCE_TABLE")
                .unwrap_or_else(|| "DAILY_ACCOUNT_BALANCES".to_string()),
            table: optional(&lookup, "TALLY_TABLE").unwrap_or_else(|| "ACCOUNT_MONTHLY_BALANCE".to_string()),
            stage: optional(&lookup, "TALLY_STAGE"),
            key_prefix: optional(&lookup, "TALLY_KEY_PREFIX").unwrap_or_else(|| "balances".to_string()),
        })
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Fully qualified target table
    pub fn qualified_table(&self) -> String {
        format!("{}.{}.{}", self.database, self.schema_destination, self.table)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("database", &self.database),
            ("schema_origin", &self.schema_origin),
            ("schema_destination", &self.schema_destination),
            ("source_table", &self.source_table),
            ("table", &self.table),
        ] {
            if !is_identifier(value) {
                bail!("{} '{}' is not a valid warehouse identifier", name, value);
            }
        }

        if let Some(stage) = &self.stage {
            if !is_stage_name(stage) {
                bail!("stage '{}' must look like @NAME or @DB.SCHEMA.NAME", stage);
            }
        }

        if !is_key_prefix(&self.key_prefix) {
            bail!(
                "key_prefix '{}' may only use letters, digits, '_', '-', '.' and '/' and must not contain '..'",
                self.key_prefix
            );
        }

        Ok(())
    }
}

/// Snowflake SQL API connection
#[derive(Clone)]
pub struct WarehouseConfig {
    pub url: String,
    pub token: String,
    pub token_type: String,
    pub warehouse: Option<String>,
    pub role: Option<String>,
}

impl std::fmt::Debug for WarehouseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarehouseConfig")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("warehouse", &self.warehouse)
            .field("role", &self.role)
            .finish()
    }
}

/// Object storage bucket and credentials
#[derive(Clone)]
pub struct StorageConfig {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub path_style: Option<bool>,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("path_style", &self.path_style)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Slack webhook destination
#[derive(Clone)]
pub struct ChatConfig {
    pub webhook_url: String,
    pub channel: Option<String>,
    pub username: Option<String>,
}

impl std::fmt::Debug for ChatConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatConfig")
            .field("webhook_url", &"<redacted>")
            .field("channel", &self.channel)
            .field("username", &self.username)
            .finish()
    }
}

/// Runner configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub tables: TableConfig,
    pub warehouse: WarehouseConfig,
    pub storage: StorageConfig,
    pub chat: ChatConfig,

    pub extract_mode: ExtractMode,
    pub empty_extract: EmptyExtractPolicy,

    /// Lifetime of the signed download URL
    pub link_expiry: Duration,

    /// Upper bound on any single step, including warehouse polling
    pub step_timeout: Duration,

    /// Delay between status polls of a running statement
    pub poll_interval: Duration,

    /// Directory whose files replace the bundled templates
    pub queries_dir: Option<PathBuf>,

    /// Where to write the JSON run report
    pub report_path: Option<PathBuf>,
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Required: TALLY_SNOWFLAKE_URL, TALLY_SNOWFLAKE_TOKEN, TALLY_DATABASE,
    /// TALLY_S3_BUCKET, AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY and
    /// TALLY_SLACK_WEBHOOK_URL. Everything else has a default.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let tables = TableConfig::from_lookup(&lookup)?;

        let warehouse = WarehouseConfig {
            url: required(&lookup, "TALLY_SNOWFLAKE_URL")?,
            token: required(&lookup, "TALLY_SNOWFLAKE_TOKEN")?,
            token_type: optional(&lookup, "TALLY_SNOWFLAKE_TOKEN_TYPE").unwrap_or_else(|| "OAUTH".to_string()),
            warehouse: optional(&lookup, "TALLY_SNOWFLAKE_WAREHOUSE"),
            role: optional(&lookup, "TALLY_SNOWFLAKE_ROLE"),
        };

        let storage = StorageConfig {
            bucket: required(&lookup, "TALLY_S3_BUCKET")?,
            region: optional(&lookup, "TALLY_S3_REGION").unwrap_or_else(|| "us-east-1".to_string()),
            endpoint: optional(&lookup, "TALLY_S3_ENDPOINT"),
            path_style: parse_optional(&lookup, "TALLY_S3_PATH_STYLE")?,
            access_key_id: required(&lookup, "AWS_ACCESS_KEY_ID")?,
            secret_access_key: required(&lookup, "AWS_SECRET_ACCESS_KEY")?,
            session_token: optional(&lookup, "AWS_SESSION_TOKEN"),
        };

        let chat = ChatConfig {
            webhook_url: required(&lookup, "TALLY_SLACK_WEBHOOK_URL")?,
            channel: optional(&lookup, "TALLY_SLACK_CHANNEL"),
            username: Some(optional(&lookup, "TALLY_SLACK_USERNAME").unwrap_or_else(|| "tally-bot".to_string())),
        };

        Ok(Self {
            tables,
            warehouse,
            storage,
            chat,
            extract_mode: parse_optional(&lookup, "TALLY_EXTRACT_MODE")?.unwrap_or(ExtractMode::Fetch),
            empty_extract: parse_optional(&lookup, "TALLY_EMPTY_EXTRACT")?
                .unwrap_or(EmptyExtractPolicy::Allow),
            link_expiry: Duration::from_secs(
                parse_optional(&lookup, "TALLY_LINK_EXPIRY_SECS")?.unwrap_or(MAX_PRESIGN_EXPIRY_SECS),
            ),
            step_timeout: Duration::from_secs(parse_optional(&lookup, "TALLY_STEP_TIMEOUT_SECS")?.unwrap_or(300)),
            poll_interval: Duration::from_millis(parse_optional(&lookup, "TALLY_POLL_INTERVAL_MS")?.unwrap_or(1000)),
            queries_dir: optional(&lookup, "TALLY_QUERIES_DIR").map(PathBuf::from),
            report_path: optional(&lookup, "TALLY_REPORT_PATH").map(PathBuf::from),
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.tables.validate()?;

        if !is_http_url(&self.warehouse.url) {
            bail!("snowflake url must start with http:// or https://");
        }
        if self.warehouse.token.trim().is_empty() {
            bail!("snowflake token cannot be empty");
        }
        for (name, value) in [("warehouse", &self.warehouse.warehouse), ("role", &self.warehouse.role)] {
            if let Some(value) = value {
                if !is_identifier(value) {
                    bail!("snowflake {} '{}' is not a valid identifier", name, value);
                }
            }
        }

        if self.storage.bucket.trim().is_empty() {
            bail!("bucket cannot be empty");
        }
        if self.storage.region.trim().is_empty() {
            bail!("region cannot be empty");
        }

        if !is_http_url(&self.chat.webhook_url) {
            bail!("slack webhook url must start with http:// or https://");
        }

        if self.extract_mode == ExtractMode::Unload && self.tables.stage.is_none() {
            bail!("TALLY_STAGE is required when TALLY_EXTRACT_MODE=unload");
        }

        let expiry = self.link_expiry.as_secs();
        if expiry == 0 || expiry > MAX_PRESIGN_EXPIRY_SECS {
            bail!(
                "link expiry must be between 1 and {} seconds, got {}",
                MAX_PRESIGN_EXPIRY_SECS,
                expiry
            );
        }

        if self.step_timeout.is_zero() {
            bail!("step_timeout must be greater than 0");
        }

        if self.poll_interval.is_zero() {
            bail!("poll_interval must be greater than 0");
        }

        Ok(())
    }
}

/// `[A-Za-z_][A-Za-z0-9_$]*`
pub fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn is_stage_name(value: &str) -> bool {
    match value.strip_prefix('@') {
        Some(rest) => rest.split('.').all(is_identifier),
        None => false,
    }
}

/// `[A-Za-z0-9_./-]*` without `..`; empty means objects sit at the bucket root
fn is_key_prefix(value: &str) -> bool {
    !value.contains("..")
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/'))
}

/// Absolute `http(s)` URL with a host
fn is_http_url(value: &str) -> bool {
    match Url::parse(value) {
        Ok(url) => {
            matches!(url.scheme(), "http" | "https") && url.host_str().is_some_and(|h| !h.is_empty())
        }
        Err(_) => false,
    }
}

fn optional(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<String> {
    optional(lookup, key).ok_or_else(|| anyhow!("{} environment variable not set", key))
}

fn parse_optional<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional(lookup, key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| anyhow!("{}", e))
                .with_context(|| format!("invalid value '{}' for {}", raw, key))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("TALLY_SNOWFLAKE_URL", "https://acme.snowflakecomputing.com"),
            ("TALLY_SNOWFLAKE_TOKEN", "token"),
            ("TALLY_DATABASE", "ANALYTICS"),
            ("TALLY_S3_BUCKET", "exports"),
            ("AWS_ACCESS_KEY_ID", "AKID"),
            ("AWS_SECRET_ACCESS_KEY", "SECRET"),
            ("TALLY_SLACK_WEBHOOK_URL", "https://hooks.slack.com/services/T/B/X"),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> anyhow::Result<Config> {
        Config::from_lookup(|key| env.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn test_defaults() {
        let config = load(&base_env()).unwrap();
        assert_eq!(config.tables.schema_origin, "PUBLIC");
        assert_eq!(config.tables.table, "ACCOUNT_MONTHLY_BALANCE");
        assert_eq!(config.tables.key_prefix, "balances");
        assert_eq!(config.warehouse.token_type, "OAUTH");
        assert_eq!(config.storage.region, "us-east-1");
        assert_eq!(config.chat.username.as_deref(), Some("tally-bot"));
        assert_eq!(config.extract_mode, ExtractMode::Fetch);
        assert_eq!(config.empty_extract, EmptyExtractPolicy::Allow);
        assert_eq!(config.link_expiry, Duration::from_secs(604_800));
        assert_eq!(config.step_timeout, Duration::from_secs(300));
        assert_eq!(config.poll_interval, Duration::from_millis(1000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_required_variable() {
        let mut env = base_env();
        env.remove("TALLY_S3_BUCKET");
        let err = load(&env).unwrap_err();
        assert!(err.to_string().contains("TALLY_S3_BUCKET"));
    }

    #[test]
    fn test_invalid_number_is_an_error() {
        let mut env = base_env();
        env.insert("TALLY_LINK_EXPIRY_SECS", "a week");
        let err = load(&env).unwrap_err();
        assert!(format!("{:#}", err).contains("TALLY_LINK_EXPIRY_SECS"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = load(&base_env()).unwrap();

        config.link_expiry = Duration::from_secs(604_801);
        assert!(config.validate().is_err());
        config.link_expiry = Duration::from_secs(3600);
        assert!(config.validate().is_ok());

        config.tables.table = "BALANCE; DROP TABLE X".to_string();
        assert!(config.validate().is_err());
        config.tables.table = "ACCOUNT_MONTHLY_BALANCE".to_string();

        config.chat.webhook_url = "hooks.slack.com".to_string();
        assert!(config.validate().is_err());
        config.chat.webhook_url = "https://hooks.slack.com/services/T/B/X".to_string();

        config.extract_mode = ExtractMode::Unload;
        assert!(config.validate().is_err());
        config.tables.stage = Some("@ANALYTICS.PUBLIC.EXPORT_STAGE".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_modes_parse() {
        let mut env = base_env();
        env.insert("TALLY_EXTRACT_MODE", "UNLOAD");
        env.insert("TALLY_EMPTY_EXTRACT", "fail");
        env.insert("TALLY_STAGE", "@EXPORT_STAGE");
        env.insert("TALLY_S3_PATH_STYLE", "true");
        let config = load(&env).unwrap();
        assert_eq!(config.extract_mode, ExtractMode::Unload);
        assert_eq!(config.empty_extract, EmptyExtractPolicy::Fail);
        assert_eq!(config.storage.path_style, Some(true));
        assert!(config.validate().is_ok());

        env.insert("TALLY_EXTRACT_MODE", "stream");
        assert!(load(&env).is_err());
    }

    #[test]
    fn test_identifiers() {
        assert!(is_identifier("ACCOUNT_MONTHLY_BALANCE"));
        assert!(is_identifier("_tmp$1"));
        assert!(!is_identifier("1TABLE"));
        assert!(!is_identifier("A-B"));
        assert!(!is_identifier(""));
        assert!(is_stage_name("@DB.SCHEMA.STAGE"));
        assert!(!is_stage_name("DB.SCHEMA.STAGE"));
        assert!(!is_stage_name("@DB..STAGE"));
    }

    #[test]
    fn test_key_prefix_charset() {
        assert!(is_key_prefix("balances"));
        assert!(is_key_prefix("finance/monthly_balances-v2.0"));
        assert!(is_key_prefix(""));
        assert!(!is_key_prefix("balances/../secrets"));
        assert!(!is_key_prefix("month end"));
        assert!(!is_key_prefix("balances?x=1"));
        assert!(!is_key_prefix("balances#frag"));
        assert!(!is_key_prefix("bal%20ances"));
        assert!(!is_key_prefix("saldos/año"));

        let mut config = load(&base_env()).unwrap();
        config.tables.key_prefix = "exports?acl=public".to_string();
        assert!(config.validate().is_err());
        config.tables.key_prefix = "exports/balances".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_http_urls() {
        assert!(is_http_url("https://hooks.slack.com/services/T/B/X"));
        assert!(is_http_url("http://localhost:8080"));
        assert!(!is_http_url("hooks.slack.com"));
        assert!(!is_http_url("ftp://hooks.slack.com"));
        assert!(!is_http_url("https://"));
        assert!(!is_http_url("https://host:notaport/x"));
    }

    #[test]
    fn test_table_config_only_needs_names() {
        let env = HashMap::from([("TALLY_DATABASE", "ANALYTICS")]);
        let tables = TableConfig::from_lookup(|key| env.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(tables.qualified_table(), "ANALYTICS.FINANCE.ACCOUNT_MONTHLY_BALANCE");
        assert!(tables.validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = load(&base_env()).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("SECRET"));
        assert!(!rendered.contains("hooks.slack.com"));
    }
}
