//! Run domain types
//!
//! A run is one scheduled execution of the full step chain for a period.
//! Its status follows a forward-only state machine:
//!
//! ```text
//! Pending -> Provisioning -> Loading -> Linking -> Notifying -> Succeeded
//!                                                     \-> Degraded
//! any non-terminal state -> Failed
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::period::{PeriodError, ReportingPeriod};

/// Errors raised by illegal state changes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    #[error("invalid run transition from {from} to {to}")]
    InvalidTransition { from: RunStatus, to: RunStatus },

    #[error("step '{0}' is not part of this run")]
    UnknownStep(String),
}

/// Run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Provisioning,
    Loading,
    Linking,
    Notifying,
    Succeeded,
    /// The extract exists but the notification could not be delivered
    Degraded,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Degraded | RunStatus::Failed
        )
    }

    /// Position of an active phase in the chain
    fn rank(&self) -> u8 {
        match self {
            RunStatus::Pending => 0,
            RunStatus::Provisioning => 1,
            RunStatus::Loading => 2,
            RunStatus::Linking => 3,
            RunStatus::Notifying => 4,
            RunStatus::Succeeded | RunStatus::Degraded | RunStatus::Failed => 5,
        }
    }

    /// Returns true if the state machine allows moving to `next`
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            RunStatus::Failed => true,
            RunStatus::Degraded => *self == RunStatus::Notifying,
            RunStatus::Pending => false,
            _ => next.rank() > self.rank(),
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Provisioning => "PROVISIONING",
            RunStatus::Loading => "LOADING",
            RunStatus::Linking => "LINKING",
            RunStatus::Notifying => "NOTIFYING",
            RunStatus::Succeeded => "SUCCEEDED",
            RunStatus::Degraded => "DEGRADED",
            RunStatus::Failed => "FAILED",
        };
        write!(f, "{}", name)
    }
}

/// Status of a single step within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Not executed because an upstream step did not succeed
    Skipped,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::Running => write!(f, "running"),
            StepStatus::Succeeded => write!(f, "succeeded"),
            StepStatus::Failed => write!(f, "failed"),
            StepStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Execution record of one step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl StepRecord {
    fn pending(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: StepStatus::Pending,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

/// One invocation of the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    /// Logical execution date supplied by the scheduler
    pub run_date: NaiveDate,
    pub period: ReportingPeriod,
    pub status: RunStatus,
    pub steps: Vec<StepRecord>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    /// Creates a pending run with one pending record per step, in execution order
    ///
    /// Fails if `run_date` falls outside the years a period can label.
    pub fn new<'a>(
        run_date: NaiveDate,
        step_names: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, PeriodError> {
        Ok(Self {
            id: Uuid::new_v4(),
            run_date,
            period: ReportingPeriod::containing(run_date)?,
            status: RunStatus::Pending,
            steps: step_names.into_iter().map(StepRecord::pending).collect(),
            started_at: None,
            completed_at: None,
        })
    }

    /// Moves the run to `next`, stamping start and completion times
    pub fn transition(&mut self, next: RunStatus) -> Result<(), RunError> {
        if !self.status.can_transition_to(next) {
            return Err(RunError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        self.status = next;
        Ok(())
    }

    pub fn step(&self, name: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.name == name)
    }

    fn step_mut(&mut self, name: &str) -> Result<&mut StepRecord, RunError> {
        self.steps
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| RunError::UnknownStep(name.to_string()))
    }

    pub fn mark_step_running(&mut self, name: &str) -> Result<(), RunError> {
        let step = self.step_mut(name)?;
        step.status = StepStatus::Running;
        step.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_step_succeeded(&mut self, name: &str) -> Result<(), RunError> {
        let step = self.step_mut(name)?;
        step.status = StepStatus::Succeeded;
        step.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_step_failed(&mut self, name: &str, error: impl Into<String>) -> Result<(), RunError> {
        let step = self.step_mut(name)?;
        step.status = StepStatus::Failed;
        step.completed_at = Some(Utc::now());
        step.error = Some(error.into());
        Ok(())
    }

    pub fn mark_step_skipped(&mut self, name: &str) -> Result<(), RunError> {
        let step = self.step_mut(name)?;
        step.status = StepStatus::Skipped;
        Ok(())
    }

    /// First recorded step error, if any
    pub fn first_error(&self) -> Option<&str> {
        self.steps.iter().find_map(|s| s.error.as_deref())
    }
}
