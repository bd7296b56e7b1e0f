//! Warehouse service
//!
//! The steps only need "run this SQL and give me the rows". The Snowflake
//! implementation maps client errors onto the step error taxonomy, with
//! anything unclassified reported as a query error.

use async_trait::async_trait;
use tally_client::{ResultSet, SnowflakeClient};
use tracing::debug;

use crate::error::{ErrorKind, StepError, StepResult};

/// Executes SQL statements against the warehouse
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn execute(&self, sql: &str) -> StepResult<ResultSet>;
}

/// Warehouse backed by the Snowflake SQL API
pub struct SnowflakeWarehouse {
    client: SnowflakeClient,
}

impl SnowflakeWarehouse {
    pub fn new(client: SnowflakeClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Warehouse for SnowflakeWarehouse {
    async fn execute(&self, sql: &str) -> StepResult<ResultSet> {
        debug!("Executing SQL:\n{}", sql);
        self.client
            .execute(sql)
            .await
            .map_err(|e| StepError::from_client(e, ErrorKind::Query))
    }
}
