//! Table provisioning step

use std::sync::Arc;

use async_trait::async_trait;
use tally_core::domain::pipeline::PROVISION_TABLE;
use tally_core::domain::run::RunStatus;

use crate::context::RunContext;
use crate::error::{StepError, StepResult};
use crate::service::Warehouse;
use crate::steps::Step;

/// Ensures the target table exists
pub struct ProvisionTable {
    warehouse: Arc<dyn Warehouse>,
    ddl: String,
}

impl ProvisionTable {
    /// Rejects DDL that would fail or replace the table on a second run
    pub fn new(warehouse: Arc<dyn Warehouse>, ddl: String) -> StepResult<Self> {
        if !is_idempotent_ddl(&ddl) {
            return Err(StepError::configuration(
                "table DDL must be a CREATE TABLE IF NOT EXISTS statement",
            ));
        }
        Ok(Self { warehouse, ddl })
    }
}

fn is_idempotent_ddl(ddl: &str) -> bool {
    let normalized = ddl
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_uppercase();
    normalized.starts_with("CREATE TABLE IF NOT EXISTS ")
        || normalized.starts_with("CREATE TRANSIENT TABLE IF NOT EXISTS ")
}

#[async_trait]
impl Step for ProvisionTable {
    fn name(&self) -> &'static str {
        PROVISION_TABLE
    }

    fn phase(&self) -> RunStatus {
        RunStatus::Provisioning
    }

    async fn run(&self, ctx: &RunContext) -> StepResult<()> {
        ctx.log_info(PROVISION_TABLE, "Ensuring target table exists");
        let result = self.warehouse.execute(&self.ddl).await?;

        // Snowflake answers with a one-row status such as "... already exists, statement succeeded."
        if let Some(status) = result.rows.first().and_then(|row| row.first()).and_then(|v| v.as_deref()) {
            ctx.log_info(PROVISION_TABLE, status);
        }
        Ok(())
    }
}
