//! Pipeline executor
//!
//! Runs the steps of a validated graph strictly in order:
//! - every step is bounded by the step timeout
//! - consumed artifacts are checked before a step starts, produced ones after it ends
//! - after a failure the remaining steps are recorded as skipped
//! - a failure the step classifies as degrading lets the run finish as DEGRADED

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use tally_core::domain::artifact::{Artifact, ArtifactRef, SignedUrl};
use tally_core::domain::period::PeriodError;
use tally_core::domain::pipeline::{GraphError, PipelineGraph, StepSpec, ValidatedPipeline};
use tally_core::domain::run::{Run, RunError, RunStatus};

use crate::context::RunContext;
use crate::error::{ErrorKind, StepError};
use crate::execution::RunOutcome;
use crate::service::{InMemoryLogBuffer, LogBufferService};
use crate::steps::Step;

/// Errors detected while assembling the executor
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("invalid pipeline graph: {0}")]
    Graph(#[from] GraphError),

    #[error("no implementation for step '{0}'")]
    MissingStep(String),

    #[error("implementation '{0}' does not match any step of the graph")]
    UnknownStep(String),

    #[error("more than one implementation for step '{0}'")]
    DuplicateStep(String),

    #[error("cannot start run: {0}")]
    Period(#[from] PeriodError),
}

/// Executes one validated pipeline
pub struct Executor {
    pipeline: ValidatedPipeline,
    steps: HashMap<String, Box<dyn Step>>,
    step_timeout: Duration,
}

impl Executor {
    /// Validates `graph` and pairs every node with exactly one implementation
    ///
    /// # Arguments
    ///
    /// * `graph` - Step graph to validate and order
    /// * `steps` - One implementation per graph node, matched by name
    /// * `step_timeout` - Upper bound for each step's `run`
    ///
    /// # Returns
    ///
    /// An executor ready to run, or the first graph or pairing problem found
    pub fn new(
        graph: &PipelineGraph,
        steps: Vec<Box<dyn Step>>,
        step_timeout: Duration,
    ) -> Result<Self, ExecutorError> {
        let pipeline = graph.validate()?;

        let mut by_name: HashMap<String, Box<dyn Step>> = HashMap::new();
        for step in steps {
            let name = step.name();
            if pipeline.get(name).is_none() {
                return Err(ExecutorError::UnknownStep(name.to_string()));
            }
            if by_name.insert(name.to_string(), step).is_some() {
                return Err(ExecutorError::DuplicateStep(name.to_string()));
            }
        }

        if let Some(missing) = pipeline
            .step_names()
            .find(|name| !by_name.contains_key(*name))
        {
            return Err(ExecutorError::MissingStep(missing.to_string()));
        }

        Ok(Self {
            pipeline,
            steps: by_name,
            step_timeout,
        })
    }

    pub fn pipeline(&self) -> &ValidatedPipeline {
        &self.pipeline
    }

    /// Runs every step for `run_date` and returns the finished run
    ///
    /// `Err` only when no run can be created for `run_date`; step failures
    /// end up in the outcome.
    pub async fn execute(&self, run_date: NaiveDate) -> Result<RunOutcome, ExecutorError> {
        let log_buffer = Arc::new(InMemoryLogBuffer::new());
        let mut run = Run::new(run_date, self.pipeline.step_names())?;
        let ctx = RunContext::new(&run, log_buffer.clone());

        info!(
            run_id = %run.id,
            pipeline = %self.pipeline.name,
            run_date = %run_date,
            period = %run.period,
            "Starting run"
        );

        let mut failure: Option<StepError> = None;
        let mut degradation: Option<StepError> = None;

        for spec in &self.pipeline.steps {
            let Some(step) = self.steps.get(spec.name.as_str()) else {
                continue;
            };

            if let Some(err) = &failure {
                note_step(run.id, &spec.name, run.mark_step_skipped(&spec.name));
                ctx.log_info(&spec.name, format!("Skipped: upstream failure ({})", err.kind));
                continue;
            }

            if let Err(e) = self.enter_phase(&mut run, step.phase()) {
                note_step(run.id, &spec.name, run.mark_step_failed(&spec.name, e.to_string()));
                ctx.log_error(&spec.name, format!("Step not started: {}", e));
                failure = Some(e);
                continue;
            }

            note_step(run.id, &spec.name, run.mark_step_running(&spec.name));
            let result = self.run_step(spec, step.as_ref(), &ctx).await;

            match result {
                Ok(()) => {
                    note_step(run.id, &spec.name, run.mark_step_succeeded(&spec.name));
                    ctx.log_info(&spec.name, "Step succeeded");
                }
                Err(e) => {
                    note_step(run.id, &spec.name, run.mark_step_failed(&spec.name, e.to_string()));
                    ctx.log_error(&spec.name, format!("Step failed: {}", e));
                    if step.degrades_on(&e) {
                        degradation = Some(e);
                    } else {
                        failure = Some(e);
                    }
                }
            }
        }

        let final_status = if failure.is_some() {
            RunStatus::Failed
        } else if degradation.is_some() {
            RunStatus::Degraded
        } else {
            RunStatus::Succeeded
        };
        if let Err(e) = run.transition(final_status) {
            error!(run_id = %run.id, "Could not finish run as {}: {}", final_status, e);
            if let Err(e) = run.transition(RunStatus::Failed) {
                error!(run_id = %run.id, "Could not mark run as failed: {}", e);
            }
        }

        let (artifact, link) = collect_artifacts(&ctx, &self.pipeline);
        if run.status == RunStatus::Degraded {
            if let Some(link) = &link {
                warn!(run_id = %run.id, url = %link.url, "Notification failed; download link kept in the report");
            }
        }

        info!(run_id = %run.id, status = %run.status, "Run finished");

        Ok(RunOutcome {
            pipeline: self.pipeline.name.clone(),
            run,
            artifact,
            link,
            error: failure.or(degradation),
            logs: log_buffer.drain(),
        })
    }

    /// Moves the run into a step's phase; steps sharing a phase stay put
    fn enter_phase(&self, run: &mut Run, phase: RunStatus) -> Result<(), StepError> {
        if run.status == phase {
            return Ok(());
        }
        run.transition(phase)
            .map_err(|e| StepError::precondition(e.to_string()))
    }

    async fn run_step(&self, spec: &StepSpec, step: &dyn Step, ctx: &RunContext) -> Result<(), StepError> {
        for slot in &spec.consumes {
            if ctx.artifact(slot).is_none() {
                return Err(StepError::precondition(format!(
                    "step '{}' needs artifact '{}' which was not produced",
                    spec.name, slot
                )));
            }
        }

        ctx.log_info(&spec.name, "Step started");
        match tokio::time::timeout(self.step_timeout, step.run(ctx)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(StepError::new(
                    ErrorKind::Timeout,
                    format!(
                        "step '{}' did not finish within {}s",
                        spec.name,
                        self.step_timeout.as_secs_f64()
                    ),
                ));
            }
        }

        for slot in &spec.produces {
            if ctx.artifact(slot).is_none() {
                return Err(StepError::precondition(format!(
                    "step '{}' finished without producing '{}'",
                    spec.name, slot
                )));
            }
        }
        Ok(())
    }
}

/// Step records only reject unknown names and out-of-order updates
fn note_step(run_id: Uuid, step: &str, result: Result<(), RunError>) {
    if let Err(e) = result {
        warn!(run_id = %run_id, step, "Could not record step state: {}", e);
    }
}

/// The object and link produced during the run, whatever slots hold them
fn collect_artifacts(
    ctx: &RunContext,
    pipeline: &ValidatedPipeline,
) -> (Option<ArtifactRef>, Option<SignedUrl>) {
    let mut object = None;
    let mut link = None;
    for slot in pipeline.steps.iter().flat_map(|s| s.produces.iter()) {
        match ctx.artifact(slot) {
            Some(Artifact::Object(o)) if object.is_none() => object = Some(o),
            Some(Artifact::Link(l)) if link.is_none() => link = Some(l),
            _ => {}
        }
    }
    (object, link)
}
