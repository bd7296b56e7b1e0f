//! Execution context for one run
//!
//! Holds the per-run state shared by the steps:
//! - the logical run date and its reporting period
//! - the artifact store, where each slot can be written exactly once
//! - the log buffer that ends up in the run report

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::NaiveDate;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tally_core::domain::artifact::{Artifact, ArtifactRef, SignedUrl};
use tally_core::domain::log::{LogEntry, LogLevel};
use tally_core::domain::period::ReportingPeriod;
use tally_core::domain::run::Run;

use crate::error::{StepError, StepResult};
use crate::service::LogBufferService;

/// Execution context shared across the steps of a run
pub struct RunContext {
    pub run_id: Uuid,
    pub run_date: NaiveDate,
    pub period: ReportingPeriod,

    artifacts: Mutex<HashMap<String, Artifact>>,
    log_buffer: Arc<dyn LogBufferService>,
}

impl RunContext {
    /// Context for `run`, sharing its id, run date and period
    pub fn new(run: &Run, log_buffer: Arc<dyn LogBufferService>) -> Self {
        Self {
            run_id: run.id,
            run_date: run.run_date,
            period: run.period,
            artifacts: Mutex::new(HashMap::new()),
            log_buffer,
        }
    }

    // =============================================================================
    // Artifacts
    // =============================================================================

    /// Stores `artifact` under `slot`
    ///
    /// A slot is written once per run; a second write is rejected.
    pub fn put_artifact(&self, slot: &str, artifact: Artifact) -> StepResult<()> {
        let mut artifacts = self.artifacts.lock().unwrap_or_else(PoisonError::into_inner);
        if artifacts.contains_key(slot) {
            return Err(StepError::precondition(format!(
                "artifact '{}' was already produced in this run",
                slot
            )));
        }
        debug!(run_id = %self.run_id, slot, kind = artifact.kind(), "Stored artifact");
        artifacts.insert(slot.to_string(), artifact);
        Ok(())
    }

    pub fn artifact(&self, slot: &str) -> Option<Artifact> {
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(slot)
            .cloned()
    }

    /// The object reference stored under `slot`
    pub fn object(&self, slot: &str) -> StepResult<ArtifactRef> {
        match self.artifact(slot) {
            Some(Artifact::Object(object)) => Ok(object),
            Some(other) => Err(StepError::precondition(format!(
                "artifact '{}' is a {}, expected an object",
                slot,
                other.kind()
            ))),
            None => Err(StepError::precondition(format!(
                "artifact '{}' has not been produced",
                slot
            ))),
        }
    }

    /// The signed URL stored under `slot`
    pub fn link(&self, slot: &str) -> StepResult<SignedUrl> {
        match self.artifact(slot) {
            Some(Artifact::Link(link)) => Ok(link),
            Some(other) => Err(StepError::precondition(format!(
                "artifact '{}' is a {}, expected a link",
                slot,
                other.kind()
            ))),
            None => Err(StepError::precondition(format!(
                "artifact '{}' has not been produced",
                slot
            ))),
        }
    }

    // =============================================================================
    // Logs
    // =============================================================================

    /// Adds a log entry to the buffer
    pub fn add_log(&self, entry: LogEntry) {
        self.log_buffer.add_entry(entry);
    }

    pub fn log_debug(&self, step: &str, message: impl Into<String>) {
        let message = message.into();
        debug!(step, "{}", message);
        self.add_log(LogEntry::new(LogLevel::Debug, Some(step), message));
    }

    pub fn log_info(&self, step: &str, message: impl Into<String>) {
        let message = message.into();
        info!(step, "{}", message);
        self.add_log(LogEntry::new(LogLevel::Info, Some(step), message));
    }

    pub fn log_warning(&self, step: &str, message: impl Into<String>) {
        let message = message.into();
        warn!(step, "{}", message);
        self.add_log(LogEntry::new(LogLevel::Warning, Some(step), message));
    }

    pub fn log_error(&self, step: &str, message: impl Into<String>) {
        let message = message.into();
        error!(step, "{}", message);
        self.add_log(LogEntry::new(LogLevel::Error, Some(step), message));
    }

    /// Drains all log entries from the buffer
    pub fn drain_logs(&self) -> Vec<LogEntry> {
        self.log_buffer.drain()
    }
}
