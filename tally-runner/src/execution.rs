//! Execution types for the Tally runner
//!
//! These types only exist at runtime during a run. The serializable
//! summary handed to operators is [`RunReport`].

use tally_core::domain::artifact::{ArtifactRef, SignedUrl};
use tally_core::domain::log::LogEntry;
use tally_core::domain::run::{Run, RunStatus};
use tally_core::dto::report::RunReport;

use crate::error::{ErrorKind, StepError};

/// Process exit codes reported to the scheduler
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const FAILURE: i32 = 1;
    pub const CONFIGURATION: i32 = 2;
    pub const DEGRADED: i32 = 3;
    /// `EX_TEMPFAIL`: safe to retry later
    pub const RETRYABLE: i32 = 75;
    /// Standard timeout exit code
    pub const TIMEOUT: i32 = 124;
}

/// Result of a pipeline execution
#[derive(Debug)]
pub struct RunOutcome {
    pub pipeline: String,
    pub run: Run,
    pub artifact: Option<ArtifactRef>,
    pub link: Option<SignedUrl>,
    /// Error that decided the final status, if any
    pub error: Option<StepError>,
    pub logs: Vec<LogEntry>,
}

impl RunOutcome {
    pub fn status(&self) -> RunStatus {
        self.run.status
    }

    pub fn exit_code(&self) -> i32 {
        match self.run.status {
            RunStatus::Succeeded => exit_codes::SUCCESS,
            RunStatus::Degraded => exit_codes::DEGRADED,
            _ => match self.error.as_ref().map(|e| e.kind) {
                Some(ErrorKind::Timeout) => exit_codes::TIMEOUT,
                Some(ErrorKind::Connectivity) => exit_codes::RETRYABLE,
                Some(ErrorKind::Configuration) => exit_codes::CONFIGURATION,
                _ => exit_codes::FAILURE,
            },
        }
    }

    /// Convert the outcome into the report written for operators
    pub fn into_report(self) -> RunReport {
        let exit_code = self.exit_code();
        RunReport::from_run(
            self.pipeline,
            self.run,
            self.artifact,
            self.link,
            exit_code,
            self.logs,
        )
    }
}
