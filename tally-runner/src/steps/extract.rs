//! Extract loading step
//!
//! Refreshes the period's rows in the target table, then gets them into
//! object storage as a CSV file at the period's deterministic key, either by
//! fetching and uploading them or by letting the warehouse unload them to
//! an external stage.

use std::sync::Arc;

use async_trait::async_trait;
use tally_client::ResultSet;
use tally_core::domain::artifact::{Artifact, ArtifactRef};
use tally_core::domain::pipeline::{EXTRACT_OBJECT, LOAD_EXTRACT};
use tally_core::domain::run::RunStatus;

use crate::config::{EmptyExtractPolicy, ExtractMode};
use crate::context::RunContext;
use crate::error::{ErrorKind, StepError, StepResult};
use crate::service::{ObjectStore, Warehouse};
use crate::steps::Step;

/// Header of the extract file when the warehouse does not report one
pub const EXTRACT_COLUMNS: [&str; 5] = [
    "ACCOUNT_ID",
    "BALANCE_AMOUNT",
    "CURRENCY",
    "AS_OF_DATE",
    "PERIOD",
];

const CSV_CONTENT_TYPE: &str = "text/csv";

/// Rendered statements for one period
#[derive(Debug, Clone)]
pub struct ExtractStatements {
    pub delete_period: String,
    pub insert_period: String,
    /// `SELECT` in fetch mode, `COPY INTO @stage` in unload mode
    pub extract: String,
}

/// Loads the period and writes the extract
pub struct LoadExtract {
    warehouse: Arc<dyn Warehouse>,
    store: Arc<dyn ObjectStore>,
    statements: ExtractStatements,
    mode: ExtractMode,
    empty_policy: EmptyExtractPolicy,
    key: String,
}

impl LoadExtract {
    pub fn new(
        warehouse: Arc<dyn Warehouse>,
        store: Arc<dyn ObjectStore>,
        statements: ExtractStatements,
        mode: ExtractMode,
        empty_policy: EmptyExtractPolicy,
        key: String,
    ) -> Self {
        Self {
            warehouse,
            store,
            statements,
            mode,
            empty_policy,
            key,
        }
    }

    /// Applies the empty-extract policy; `Ok` means a header-only file is fine
    fn check_empty(&self, ctx: &RunContext) -> StepResult<()> {
        match self.empty_policy {
            EmptyExtractPolicy::Fail => Err(StepError::new(
                ErrorKind::EmptyExtract,
                format!("period {} has no rows to export", ctx.period),
            )),
            EmptyExtractPolicy::Allow => {
                ctx.log_warning(
                    LOAD_EXTRACT,
                    format!("Period {} has no rows, writing a header-only file", ctx.period),
                );
                Ok(())
            }
        }
    }

    async fn fetch_and_upload(&self, ctx: &RunContext) -> StepResult<()> {
        let result = self.warehouse.execute(&self.statements.extract).await?;
        ctx.log_info(LOAD_EXTRACT, format!("Fetched {} row(s)", result.row_count()));

        if result.is_empty() {
            self.check_empty(ctx)?;
        }

        let body = encode_csv(&header(&result), &result.rows)?;
        let size = body.len();
        self.store.put(&self.key, body, CSV_CONTENT_TYPE).await?;
        ctx.log_info(
            LOAD_EXTRACT,
            format!("Uploaded {} bytes to s3://{}/{}", size, self.store.bucket(), self.key),
        );
        Ok(())
    }

    async fn unload(&self, ctx: &RunContext) -> StepResult<()> {
        let result = self.warehouse.execute(&self.statements.extract).await?;
        let unloaded = rows_unloaded(&result);
        if let Some(count) = unloaded {
            ctx.log_info(LOAD_EXTRACT, format!("Warehouse unloaded {} row(s) to the stage", count));
        }

        // COPY INTO writes no file at all for an empty result
        if unloaded == Some(0) {
            self.check_empty(ctx)?;
            let columns: Vec<String> = EXTRACT_COLUMNS.iter().map(|c| c.to_string()).collect();
            let body = encode_csv(&columns, &[])?;
            self.store.put(&self.key, body, CSV_CONTENT_TYPE).await?;
        }

        let info = self.store.head(&self.key).await?;
        ctx.log_info(
            LOAD_EXTRACT,
            format!(
                "Confirmed s3://{}/{} ({} bytes)",
                self.store.bucket(),
                self.key,
                info.content_length.map(|n| n.to_string()).unwrap_or_else(|| "?".to_string())
            ),
        );
        Ok(())
    }
}

#[async_trait]
impl Step for LoadExtract {
    fn name(&self) -> &'static str {
        LOAD_EXTRACT
    }

    fn phase(&self) -> RunStatus {
        RunStatus::Loading
    }

    async fn run(&self, ctx: &RunContext) -> StepResult<()> {
        ctx.log_info(
            LOAD_EXTRACT,
            format!(
                "Loading period {} [{}, {})",
                ctx.period,
                ctx.period.start(),
                ctx.period.end_exclusive()
            ),
        );

        ctx.log_debug(LOAD_EXTRACT, format!("Extract key {} in {:?} mode", self.key, self.mode));
        self.warehouse.execute(&self.statements.delete_period).await?;
        let inserted = self.warehouse.execute(&self.statements.insert_period).await?;
        if let Some(count) = first_count(&inserted) {
            ctx.log_info(LOAD_EXTRACT, format!("Inserted {} month-end balance(s)", count));
        }

        match self.mode {
            ExtractMode::Fetch => self.fetch_and_upload(ctx).await?,
            ExtractMode::Unload => self.unload(ctx).await?,
        }

        ctx.put_artifact(
            EXTRACT_OBJECT,
            Artifact::Object(ArtifactRef::new(self.store.bucket(), &self.key)),
        )
    }
}

/// Encodes rows as CSV with a header line; NULL becomes an empty field
pub fn encode_csv(columns: &[String], rows: &[Vec<Option<String>>]) -> StepResult<Vec<u8>> {
    let encode_err = |e: csv::Error| StepError::precondition(format!("failed to encode extract: {}", e));

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(columns).map_err(encode_err)?;
    for row in rows {
        writer
            .write_record(row.iter().map(|value| value.as_deref().unwrap_or("")))
            .map_err(encode_err)?;
    }
    writer
        .into_inner()
        .map_err(|e| StepError::precondition(format!("failed to encode extract: {}", e)))
}

fn header(result: &ResultSet) -> Vec<String> {
    if result.columns.is_empty() {
        EXTRACT_COLUMNS.iter().map(|c| c.to_string()).collect()
    } else {
        result.columns.clone()
    }
}

fn rows_unloaded(result: &ResultSet) -> Option<u64> {
    result
        .value(0, "rows_unloaded")
        .and_then(|v| v.parse().ok())
}

/// First numeric cell, which is how DML reports affected rows
fn first_count(result: &ResultSet) -> Option<u64> {
    result
        .rows
        .first()
        .and_then(|row| row.first())
        .and_then(|v| v.as_deref())
        .and_then(|v| v.parse().ok())
}
