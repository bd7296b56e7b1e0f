//! Pipeline steps
//!
//! One implementation per node of the monthly balance graph. Steps receive
//! their rendered SQL and service handles at construction and read or write
//! artifacts through the run context.

mod extract;
mod link;
mod notify;
mod provision;

pub use extract::{EXTRACT_COLUMNS, ExtractStatements, LoadExtract, encode_csv};
pub use link::GenerateLink;
pub use notify::Notify;
pub use provision::ProvisionTable;

use async_trait::async_trait;
use tally_core::domain::run::RunStatus;

use crate::context::RunContext;
use crate::error::{StepError, StepResult};

/// A unit of work in the pipeline
#[async_trait]
pub trait Step: Send + Sync {
    /// Name of the graph node this step implements
    fn name(&self) -> &'static str;

    /// Run status while this step executes
    fn phase(&self) -> RunStatus;

    /// Whether `error` leaves the run degraded instead of failed
    fn degrades_on(&self, _error: &StepError) -> bool {
        false
    }

    async fn run(&self, ctx: &RunContext) -> StepResult<()>;
}
