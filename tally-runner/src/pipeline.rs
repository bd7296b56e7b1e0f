//! Pipeline assembly
//!
//! Builds the service clients from configuration, renders every statement
//! for the run date up front and pairs the monthly balance graph with its
//! step implementations.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use tracing::info;

use tally_client::{
    Credentials, S3Client, S3Config, SlackConfig, SlackWebhook, SnowflakeClient, SnowflakeConfig,
};
use tally_core::domain::pipeline::PipelineGraph;
use tally_core::dto::report::RunReport;

use crate::config::{Config, ExtractMode, TableConfig};
use crate::execution::RunOutcome;
use crate::executor::Executor;
use crate::service::{
    ChatSink, ObjectStore, S3ObjectStore, SlackChat, SnowflakeWarehouse, Warehouse,
};
use crate::steps::{ExtractStatements, GenerateLink, LoadExtract, Notify, ProvisionTable, Step};
use crate::templates::{
    CREATE_TABLE, DELETE_PERIOD, INSERT_PERIOD, QueryParams, QueryTemplates, SELECT_PERIOD,
    TemplateError, UNLOAD_PERIOD,
};

/// Handles to the managed services a run talks to
#[derive(Clone)]
pub struct Services {
    pub warehouse: Arc<dyn Warehouse>,
    pub store: Arc<dyn ObjectStore>,
    pub chat: Arc<dyn ChatSink>,
}

impl Services {
    /// Real clients; the warehouse and chat share one HTTP connection pool
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.step_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        let snowflake = SnowflakeClient::with_client(
            SnowflakeConfig {
                account_url: config.warehouse.url.clone(),
                token: config.warehouse.token.clone(),
                token_type: config.warehouse.token_type.clone(),
                database: Some(config.tables.database.clone()),
                schema: Some(config.tables.schema_destination.clone()),
                warehouse: config.warehouse.warehouse.clone(),
                role: config.warehouse.role.clone(),
                statement_timeout_secs: config.step_timeout.as_secs(),
                poll_interval: config.poll_interval,
            },
            http.clone(),
        );

        let mut credentials = Credentials::new(
            config.storage.access_key_id.clone(),
            config.storage.secret_access_key.clone(),
        );
        if let Some(token) = &config.storage.session_token {
            credentials = credentials.with_session_token(token.clone());
        }
        let s3 = S3Client::new(
            S3Config {
                endpoint: config.storage.endpoint.clone(),
                path_style: config.storage.path_style,
                timeout: Some(config.step_timeout),
                ..S3Config::new(config.storage.bucket.clone(), config.storage.region.clone())
            },
            credentials,
        )
        .context("Failed to create S3 client")?;

        let slack = SlackWebhook::with_client(
            SlackConfig {
                webhook_url: config.chat.webhook_url.clone(),
                channel: config.chat.channel.clone(),
                username: config.chat.username.clone(),
            },
            http,
        );

        Ok(Self {
            warehouse: Arc::new(SnowflakeWarehouse::new(snowflake)),
            store: Arc::new(S3ObjectStore::new(s3)),
            chat: Arc::new(SlackChat::new(slack)),
        })
    }
}

/// Every statement of one run, rendered for its period
#[derive(Debug, Clone)]
pub struct RenderedQueries {
    pub create_table: String,
    pub delete_period: String,
    pub insert_period: String,
    /// `SELECT` or `COPY INTO`, depending on the extract mode
    pub extract: String,
    pub object_key: String,
}

impl RenderedQueries {
    pub fn render(
        templates: &QueryTemplates,
        tables: &TableConfig,
        mode: ExtractMode,
        run_date: NaiveDate,
    ) -> Result<Self, TemplateError> {
        let params = QueryParams::new(tables, run_date)?;
        let extract_template = match mode {
            ExtractMode::Fetch => SELECT_PERIOD,
            ExtractMode::Unload => UNLOAD_PERIOD,
        };

        Ok(Self {
            create_table: templates.render(CREATE_TABLE, &params)?,
            delete_period: templates.render(DELETE_PERIOD, &params)?,
            insert_period: templates.render(INSERT_PERIOD, &params)?,
            extract: templates.render(extract_template, &params)?,
            object_key: params.object_key,
        })
    }

    /// Statements in execution order, labelled by template
    pub fn statements(&self, mode: ExtractMode) -> [(&'static str, &str); 4] {
        let extract_template = match mode {
            ExtractMode::Fetch => SELECT_PERIOD,
            ExtractMode::Unload => UNLOAD_PERIOD,
        };
        [
            (CREATE_TABLE, self.create_table.as_str()),
            (DELETE_PERIOD, self.delete_period.as_str()),
            (INSERT_PERIOD, self.insert_period.as_str()),
            (extract_template, self.extract.as_str()),
        ]
    }
}

/// Pairs the monthly balance graph with steps bound to `services`
pub fn build_executor(
    config: &Config,
    templates: Arc<QueryTemplates>,
    services: &Services,
    run_date: NaiveDate,
) -> anyhow::Result<Executor> {
    let queries = RenderedQueries::render(&templates, &config.tables, config.extract_mode, run_date)?;

    let steps: Vec<Box<dyn Step>> = vec![
        Box::new(ProvisionTable::new(services.warehouse.clone(), queries.create_table)?),
        Box::new(LoadExtract::new(
            services.warehouse.clone(),
            services.store.clone(),
            ExtractStatements {
                delete_period: queries.delete_period,
                insert_period: queries.insert_period,
                extract: queries.extract,
            },
            config.extract_mode,
            config.empty_extract,
            queries.object_key,
        )),
        Box::new(GenerateLink::new(services.store.clone(), config.link_expiry)?),
        Box::new(Notify::new(
            services.chat.clone(),
            templates,
            config.tables.qualified_table(),
        )),
    ];

    let executor = Executor::new(&PipelineGraph::monthly_balance(), steps, config.step_timeout)?;
    Ok(executor)
}

/// Runs the whole pipeline once for `run_date`
///
/// # Arguments
///
/// * `config` - Validated runner configuration
/// * `services` - Warehouse, object store and chat the steps talk to
/// * `run_date` - Logical run date; the extract covers its calendar month
///
/// # Returns
///
/// The finished run. `Err` means the run never started; step failures are
/// reported through the returned outcome.
pub async fn run_pipeline(
    config: &Config,
    services: &Services,
    run_date: NaiveDate,
) -> anyhow::Result<RunOutcome> {
    let templates = QueryTemplates::load(config.queries_dir.as_deref())
        .context("Failed to load query templates")?;
    let executor = build_executor(config, Arc::new(templates), services, run_date)?;

    info!(
        "Executing pipeline '{}' with {} steps",
        executor.pipeline().name,
        executor.pipeline().steps.len()
    );
    Ok(executor.execute(run_date).await?)
}

/// Writes the run report as pretty JSON
pub fn write_report(report: &RunReport, path: &Path) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize run report")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write run report to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, StepError};
    use crate::testing::{FakeChat, FakeStore, FakeWarehouse, result_set};
    use std::collections::HashMap;
    use std::time::Duration;
    use tally_core::domain::run::{RunStatus, StepStatus};

    fn config(overrides: &[(&str, &str)]) -> Config {
        let mut vars: HashMap<String, String> = [
            ("TALLY_SNOWFLAKE_URL", "https://acme.snowflakecomputing.com"),
            ("TALLY_SNOWFLAKE_TOKEN", "token"),
            ("TALLY_DATABASE", "ANALYTICS"),
            ("TALLY_S3_BUCKET", "exports"),
            ("AWS_ACCESS_KEY_ID", "AKIDEXAMPLE"),
            ("AWS_SECRET_ACCESS_KEY", "SECRETEXAMPLE"),
            ("TALLY_SLACK_WEBHOOK_URL", "https://hooks.slack.com/services/T/B/X"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        for (k, v) in overrides {
            vars.insert(k.to_string(), v.to_string());
        }
        let config = Config::from_lookup(|key| vars.get(key).cloned()).unwrap();
        config.validate().unwrap();
        config
    }

    fn balances() -> FakeWarehouse {
        FakeWarehouse::new().respond(
            "SELECT",
            result_set(
                &["ACCOUNT_ID", "BALANCE_AMOUNT", "CURRENCY", "AS_OF_DATE", "PERIOD"],
                &[
                    &["A-1", "100.50", "USD", "2024-03-31", "2024-03"],
                    &["A-2", "-3.00", "EUR", "2024-03-30", "2024-03"],
                ],
            ),
        )
    }

    fn services(warehouse: Arc<FakeWarehouse>, store: Arc<FakeStore>, chat: Arc<FakeChat>) -> Services {
        Services {
            warehouse,
            store,
            chat,
        }
    }

    fn march_15() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    #[test]
    fn test_rendered_queries_cover_the_period() {
        let config = config(&[]);
        let queries = RenderedQueries::render(
            &QueryTemplates::bundled(),
            &config.tables,
            ExtractMode::Fetch,
            march_15(),
        )
        .unwrap();

        assert_eq!(queries.object_key, "balances/2024-03.csv");
        assert!(queries.create_table.contains("ANALYTICS.FINANCE.ACCOUNT_MONTHLY_BALANCE"));
        assert!(queries.insert_period.contains("'2024-03-01'"));
        assert!(queries.insert_period.contains("'2024-04-01'"));
        assert!(queries.extract.starts_with("SELECT"));

        let labels: Vec<_> = queries.statements(ExtractMode::Fetch).iter().map(|(l, _)| *l).collect();
        assert_eq!(labels, [CREATE_TABLE, DELETE_PERIOD, INSERT_PERIOD, SELECT_PERIOD]);
    }

    #[tokio::test]
    async fn test_monthly_run_end_to_end() {
        let warehouse = Arc::new(balances());
        let store = Arc::new(FakeStore::new("exports"));
        let chat = Arc::new(FakeChat::new());

        let outcome = run_pipeline(
            &config(&[]),
            &services(warehouse.clone(), store.clone(), chat.clone()),
            march_15(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.status(), RunStatus::Succeeded);
        assert_eq!(outcome.exit_code(), 0);

        let body = String::from_utf8(store.object("balances/2024-03.csv").unwrap()).unwrap();
        assert!(body.starts_with("ACCOUNT_ID,BALANCE_AMOUNT,CURRENCY,AS_OF_DATE,PERIOD\n"));
        assert!(body.contains("A-2,-3.00,EUR,2024-03-30,2024-03\n"));

        let artifact = outcome.artifact.clone().unwrap();
        assert_eq!(artifact.key, "balances/2024-03.csv");

        let link = outcome.link.clone().unwrap();
        assert!(link.url.starts_with("https://exports.s3.amazonaws.com/balances/2024-03.csv?"));
        assert!(link.url.contains("X-Amz-Expires=604800"));

        let messages = chat.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains(&link.url));
        assert!(messages[0].contains("2024-03"));

        let executed = warehouse.executed();
        assert_eq!(executed.len(), 4);
        assert!(executed[0].starts_with("CREATE TABLE IF NOT EXISTS"));
        assert!(executed[1].starts_with("DELETE"));
        assert!(executed[2].starts_with("INSERT"));

        let report = outcome.into_report();
        assert_eq!(report.exit_code, 0);
    }

    #[tokio::test]
    async fn test_permission_error_stops_before_any_write() {
        let warehouse = Arc::new(balances().fail(
            "CREATE TABLE",
            StepError::new(ErrorKind::Authorization, "Insufficient privileges to operate on schema"),
        ));
        let store = Arc::new(FakeStore::new("exports"));
        let chat = Arc::new(FakeChat::new());

        let outcome = run_pipeline(
            &config(&[]),
            &services(warehouse.clone(), store.clone(), chat.clone()),
            march_15(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.status(), RunStatus::Failed);
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(outcome.error.as_ref().unwrap().kind, ErrorKind::Authorization);
        assert_eq!(outcome.run.step("provision_table").unwrap().status, StepStatus::Failed);
        for skipped in ["load_extract", "generate_link", "notify"] {
            assert_eq!(outcome.run.step(skipped).unwrap().status, StepStatus::Skipped);
        }
        assert_eq!(warehouse.executed().len(), 1);
        assert_eq!(store.put_count(), 0);
        assert!(chat.messages().is_empty());
        assert!(outcome.link.is_none());
    }

    #[tokio::test]
    async fn test_failed_notification_degrades_and_keeps_link() {
        let store = Arc::new(FakeStore::new("exports"));
        let chat = Arc::new(FakeChat::failing(StepError::new(
            ErrorKind::Delivery,
            "channel_not_found",
        )));

        let outcome = run_pipeline(
            &config(&[]),
            &services(Arc::new(balances()), store.clone(), chat),
            march_15(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.status(), RunStatus::Degraded);
        assert_eq!(outcome.exit_code(), 3);
        assert!(store.object("balances/2024-03.csv").is_some());

        let report = outcome.into_report();
        assert!(report.link.is_some());
        assert_eq!(report.exit_code, 3);
    }

    #[tokio::test]
    async fn test_rejected_upload_fails_without_link_or_message() {
        let store = Arc::new(
            FakeStore::new("exports")
                .failing_puts(StepError::new(ErrorKind::Authorization, "AccessDenied")),
        );
        let chat = Arc::new(FakeChat::new());

        let outcome = run_pipeline(
            &config(&[]),
            &services(Arc::new(balances()), store.clone(), chat.clone()),
            march_15(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.status(), RunStatus::Failed);
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(outcome.error.as_ref().unwrap().kind, ErrorKind::Authorization);
        assert_eq!(outcome.run.step("provision_table").unwrap().status, StepStatus::Succeeded);
        assert_eq!(outcome.run.step("load_extract").unwrap().status, StepStatus::Failed);
        for skipped in ["generate_link", "notify"] {
            assert_eq!(outcome.run.step(skipped).unwrap().status, StepStatus::Skipped);
        }
        assert!(outcome.artifact.is_none());
        assert!(outcome.link.is_none());
        assert!(store.object("balances/2024-03.csv").is_none());
        assert!(chat.messages().is_empty());
    }

    #[tokio::test]
    async fn test_slow_warehouse_times_out_as_retryable() {
        let warehouse = Arc::new(balances().delay(Duration::from_secs(2)));
        let store = Arc::new(FakeStore::new("exports"));
        let chat = Arc::new(FakeChat::new());
        let mut config = config(&[]);
        config.step_timeout = Duration::from_millis(50);

        let outcome = run_pipeline(
            &config,
            &services(warehouse.clone(), store.clone(), chat.clone()),
            march_15(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.status(), RunStatus::Failed);
        let err = outcome.error.as_ref().unwrap();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(err.is_retryable());
        assert_eq!(outcome.exit_code(), 124);
        assert_eq!(warehouse.executed().len(), 1);
        assert_eq!(store.put_count(), 0);
        assert!(chat.messages().is_empty());
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let warehouse = Arc::new(balances());
        let store = Arc::new(FakeStore::new("exports"));
        let chat = Arc::new(FakeChat::new());
        let services = services(warehouse.clone(), store.clone(), chat.clone());
        let config = config(&[]);

        let first = run_pipeline(&config, &services, march_15()).await.unwrap();
        let second = run_pipeline(&config, &services, march_15()).await.unwrap();

        assert_eq!(first.status(), RunStatus::Succeeded);
        assert_eq!(second.status(), RunStatus::Succeeded);
        assert_eq!(first.artifact, second.artifact);
        assert_eq!(store.put_count(), 2);
        assert_eq!(chat.messages().len(), 2);

        let executed = warehouse.executed();
        assert_eq!(executed.len(), 8);
        assert_eq!(executed[0], executed[4]);
    }

    #[tokio::test]
    async fn test_empty_period_with_fail_policy() {
        let warehouse = Arc::new(FakeWarehouse::new());
        let store = Arc::new(FakeStore::new("exports"));
        let chat = Arc::new(FakeChat::new());

        let outcome = run_pipeline(
            &config(&[("TALLY_EMPTY_EXTRACT", "fail")]),
            &services(warehouse, store.clone(), chat.clone()),
            march_15(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.status(), RunStatus::Failed);
        assert_eq!(outcome.error.as_ref().unwrap().kind, ErrorKind::EmptyExtract);
        assert_eq!(store.put_count(), 0);
        assert!(chat.messages().is_empty());
    }

    #[tokio::test]
    async fn test_unload_mode_lets_the_warehouse_write() {
        let store = Arc::new(FakeStore::new("exports"));
        let warehouse = Arc::new(FakeWarehouse::new().writes_object(
            "COPY INTO",
            store.clone(),
            "balances/2024-03.csv",
        ));
        let chat = Arc::new(FakeChat::new());

        let outcome = run_pipeline(
            &config(&[
                ("TALLY_EXTRACT_MODE", "unload"),
                ("TALLY_STAGE", "@ANALYTICS.FINANCE.EXPORT_STAGE"),
            ]),
            &services(warehouse.clone(), store.clone(), chat.clone()),
            march_15(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.status(), RunStatus::Succeeded);
        assert_eq!(store.put_count(), 0);
        assert!(warehouse.executed()[3].starts_with("COPY INTO @ANALYTICS.FINANCE.EXPORT_STAGE"));
        assert_eq!(chat.messages().len(), 1);
    }

    #[test]
    fn test_non_idempotent_ddl_override_is_rejected() {
        let dir = std::env::temp_dir().join(format!("tally-ddl-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(CREATE_TABLE),
            "CREATE OR REPLACE TABLE {{ params.database }}.X.Y (A INT)",
        )
        .unwrap();

        let templates = QueryTemplates::load(Some(&dir)).unwrap();
        let services = services(
            Arc::new(FakeWarehouse::new()),
            Arc::new(FakeStore::new("exports")),
            Arc::new(FakeChat::new()),
        );
        let result = build_executor(&config(&[]), Arc::new(templates), &services, march_15());
        assert!(result.is_err());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_write_report() {
        let path = std::env::temp_dir().join(format!("tally-report-{}.json", uuid::Uuid::new_v4()));
        let mut run = tally_core::domain::run::Run::new(march_15(), ["notify"]).unwrap();
        run.status = RunStatus::Failed;
        let report = RunReport::from_run("account_monthly_balance".to_string(), run, None, None, 1, vec![]);

        write_report(&report, &path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["exit_code"], 1);

        std::fs::remove_file(&path).unwrap();
    }
}
