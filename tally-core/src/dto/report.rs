//! Run report DTO
//!
//! Written at the end of every run so the scheduler (or an operator) can see
//! what happened without scraping logs. A degraded run's report still
//! carries the download link, which is how a human recovers it.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::artifact::{ArtifactRef, SignedUrl};
use crate::domain::log::LogEntry;
use crate::domain::period::ReportingPeriod;
use crate::domain::run::{Run, RunStatus, StepRecord};

/// Summary of a finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub pipeline: String,
    pub run_date: NaiveDate,
    pub period: ReportingPeriod,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepRecord>,
    pub artifact: Option<ArtifactRef>,
    pub link: Option<SignedUrl>,
    pub error: Option<String>,
    pub exit_code: i32,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

impl RunReport {
    /// Builds a report from a finished run and the artifacts it produced
    pub fn from_run(
        pipeline: impl Into<String>,
        run: Run,
        artifact: Option<ArtifactRef>,
        link: Option<SignedUrl>,
        exit_code: i32,
        logs: Vec<LogEntry>,
    ) -> Self {
        let error = run.first_error().map(str::to_string);
        Self {
            run_id: run.id,
            pipeline: pipeline.into(),
            run_date: run.run_date,
            period: run.period,
            status: run.status,
            started_at: run.started_at,
            completed_at: run.completed_at,
            steps: run.steps,
            artifact,
            link,
            error,
            exit_code,
            logs,
        }
    }
}
