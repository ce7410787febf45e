//! Orchestration engine
//!
//! The engine is a state machine over the persisted run document. Each step
//! reads the committed run, decides the next action with [`next_action`], and
//! performs it as one atomic patch. Re-entering the engine for a run that was
//! interrupted therefore continues from the last committed stage without
//! repeating any model call.
//!
//! A stage commit writes the turn at `/conversation/{stage_index}` together
//! with the status change it implies, and, when the stage ends the run, the
//! terminal status, result, metadata and `completed_at`.

use super::stages::StageId;
use super::step_executor::StepExecutor;
use crate::error::{PipelineError, PipelineResult};
use crate::observability::PipelineMetrics;
use crate::run::{Run, RunMetadata, RunResult, RunStatus, Turn};
use crate::store::{PatchOp, RunStore, StoreError};
use crate::{run_span, stage_span};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, warn, Instrument};

/// Terminal outcome of a successful run
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(RunResult),
    Vetoed(RunResult),
}

impl RunOutcome {
    pub fn result(&self) -> &RunResult {
        match self {
            RunOutcome::Completed(r) | RunOutcome::Vetoed(r) => r,
        }
    }

    pub fn status(&self) -> RunStatus {
        match self {
            RunOutcome::Completed(_) => RunStatus::Completed,
            RunOutcome::Vetoed(_) => RunStatus::Vetoed,
        }
    }
}

/// What the engine should do next for a committed run
#[derive(Debug, Clone, PartialEq)]
pub enum NextAction {
    /// INIT: move to AGENTS_RUNNING
    MarkRunning,
    /// Run this stage with the committed turns as context
    ExecuteStage(StageId),
    /// All turns are in but the terminal write is missing
    Finalize(RunStatus),
    /// Already terminal with a result
    Done(RunOutcome),
    /// Already FAILED; carries the recorded error
    Halt(String),
}

/// Decide the next action from the committed document alone (pure function)
///
/// # Errors
///
/// Returns a description of the inconsistency when turn numbers or stage ids
/// do not follow the fixed sequence, or the status contradicts the turns.
pub fn next_action(run: &Run) -> Result<NextAction, String> {
    if run.conversation.len() > StageId::ALL.len() {
        return Err(format!(
            "conversation has {} turns, at most {} expected",
            run.conversation.len(),
            StageId::ALL.len()
        ));
    }

    for (i, turn) in run.conversation.iter().enumerate() {
        let expected = StageId::ALL[i];
        if turn.stage != expected || turn.turn_number != expected.turn_number() {
            return Err(format!(
                "turn at position {} is {} #{}, expected {} #{}",
                i + 1,
                turn.stage,
                turn.turn_number,
                expected,
                expected.turn_number()
            ));
        }
    }

    let committed = run.conversation.len();
    let vetoed = run
        .conversation
        .get(StageId::Assassin.index())
        .is_some_and(|t| t.output.vetoes());

    match run.status {
        RunStatus::Failed => Ok(NextAction::Halt(
            run.error_message
                .clone()
                .unwrap_or_else(|| "run failed".to_string()),
        )),
        RunStatus::Vetoed | RunStatus::Completed => {
            let result = run
                .result
                .clone()
                .ok_or_else(|| format!("{} run has no result", run.status))?;
            Ok(NextAction::Done(match run.status {
                RunStatus::Vetoed => RunOutcome::Vetoed(result),
                _ => RunOutcome::Completed(result),
            }))
        }
        RunStatus::Init if committed > 0 => {
            Err(format!("INIT run already has {committed} turns"))
        }
        RunStatus::Init => Ok(NextAction::MarkRunning),
        RunStatus::Synthesizing if committed <= StageId::Cost.index() => Err(format!(
            "SYNTHESIZING run has only {committed} turns"
        )),
        RunStatus::AgentsRunning | RunStatus::Synthesizing => {
            if vetoed {
                Ok(NextAction::Finalize(RunStatus::Vetoed))
            } else if committed == StageId::ALL.len() {
                Ok(NextAction::Finalize(RunStatus::Completed))
            } else {
                Ok(NextAction::ExecuteStage(StageId::ALL[committed]))
            }
        }
    }
}

pub struct PipelineEngine {
    executor: StepExecutor,
    store: Arc<dyn RunStore>,
    metrics: Arc<PipelineMetrics>,
}

impl PipelineEngine {
    pub fn new(
        executor: StepExecutor,
        store: Arc<dyn RunStore>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            executor,
            store,
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Drive a run to a terminal outcome
    ///
    /// Safe to call again for the same run: committed stages are not re-run,
    /// and a terminal run returns its stored outcome. Any error other than a
    /// missing or already-failed run is recorded on the document as FAILED.
    pub async fn run(&self, run_id: &str, idea_text: &str) -> PipelineResult<RunOutcome> {
        let span = run_span!(run_id = %run_id);
        async move {
            match self.drive(run_id, idea_text).await {
                Ok(outcome) => Ok(outcome),
                Err(e) => {
                    self.record_failure(run_id, &e).await;
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(&self, run_id: &str, idea_text: &str) -> PipelineResult<RunOutcome> {
        let mut run = self
            .store
            .read(run_id)
            .await?
            .ok_or_else(|| PipelineError::run_not_found(run_id))?;

        if run.idea_text != idea_text {
            warn!("idea text differs from the stored run, using the stored text");
        }

        let mut finalized_here = false;

        loop {
            let action = next_action(&run)
                .map_err(|message| PipelineError::invalid_checkpoint(run_id, message))?;

            match action {
                NextAction::MarkRunning => {
                    self.metrics.run_started();
                    info!("run started");
                    let ops = status_ops(&run, RunStatus::AgentsRunning, Utc::now())?;
                    run = self.store.patch_fields(run_id, &ops).await?;
                }
                NextAction::ExecuteStage(stage) => {
                    let turn = self
                        .executor
                        .execute(stage, &run.idea_text, &run.conversation)
                        .instrument(stage_span!(run_id = %run_id, stage = %stage))
                        .await?;

                    let ops = commit_ops(&run, turn, Utc::now())?;
                    finalized_here |= ops.iter().any(|op| op.path() == "/result");
                    run = self.store.patch_fields(run_id, &ops).await?;
                }
                NextAction::Finalize(status) => {
                    let ops = finalize_ops(&run, &run.conversation, status, Utc::now())?;
                    finalized_here = true;
                    run = self.store.patch_fields(run_id, &ops).await?;
                }
                NextAction::Done(outcome) => {
                    if finalized_here {
                        match outcome {
                            RunOutcome::Completed(_) => self.metrics.run_completed(),
                            RunOutcome::Vetoed(_) => self.metrics.run_vetoed(),
                        }
                        info!(status = %outcome.status(), "run finished");
                    }
                    return Ok(outcome);
                }
                NextAction::Halt(message) => {
                    return Err(PipelineError::RunFailed {
                        run_id: run_id.to_string(),
                        message,
                    });
                }
            }
        }
    }

    /// Mark the run FAILED unless it is missing or already terminal
    async fn record_failure(&self, run_id: &str, failure: &PipelineError) {
        if matches!(
            failure,
            PipelineError::RunNotFound { .. } | PipelineError::RunFailed { .. }
        ) {
            return;
        }

        let message = failure.public_message();
        error!(error = %message, "run failed");

        let current = match self.store.read(run_id).await {
            Ok(Some(run)) => run,
            Ok(None) => return,
            Err(e) => {
                error!(error = %e, "could not read run to record failure");
                return;
            }
        };
        if current.status.is_terminal() {
            return;
        }

        let ops = match failure_ops(&message, Utc::now()) {
            Ok(ops) => ops,
            Err(e) => {
                error!(error = %e, "could not encode failure patch");
                return;
            }
        };
        match self.store.patch_fields(run_id, &ops).await {
            Ok(_) => self.metrics.run_failed(),
            Err(e) => error!(error = %e, "could not record run failure"),
        }
    }
}

fn transition(run: &Run, next: RunStatus) -> PipelineResult<()> {
    if run.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(PipelineError::invalid_checkpoint(
            &run.id,
            format!("cannot move from {} to {}", run.status, next),
        ))
    }
}

fn status_ops(run: &Run, next: RunStatus, now: DateTime<Utc>) -> PipelineResult<Vec<PatchOp>> {
    transition(run, next)?;
    Ok(vec![
        PatchOp::set("/status", &next)?,
        PatchOp::set("/updated_at", &now)?,
    ])
}

fn failure_ops(message: &str, now: DateTime<Utc>) -> Result<Vec<PatchOp>, StoreError> {
    Ok(vec![
        PatchOp::set("/status", &RunStatus::Failed)?,
        PatchOp::set("/error_message", &message)?,
        PatchOp::set("/updated_at", &now)?,
    ])
}

/// Patch committing one stage's turn and everything it implies
fn commit_ops(run: &Run, turn: Turn, now: DateTime<Utc>) -> PipelineResult<Vec<PatchOp>> {
    let stage = turn.stage;
    let ends_run = turn.output.vetoes() || stage == StageId::Synthesizer;

    let mut ops = vec![PatchOp::set(
        format!("/conversation/{}", stage.index()),
        &turn,
    )?];

    if stage == StageId::Cost {
        ops.extend(status_ops(run, RunStatus::Synthesizing, now)?);
    } else {
        ops.push(PatchOp::set("/updated_at", &now)?);
    }

    if ends_run {
        let mut conversation = run.conversation.clone();
        conversation.push(turn.clone());
        let status = if turn.output.vetoes() {
            RunStatus::Vetoed
        } else {
            RunStatus::Completed
        };
        ops.extend(finalize_ops(run, &conversation, status, now)?);
    }

    Ok(ops)
}

/// Terminal write for a vetoed or completed run
fn finalize_ops(
    run: &Run,
    conversation: &[Turn],
    status: RunStatus,
    now: DateTime<Utc>,
) -> PipelineResult<Vec<PatchOp>> {
    transition(run, status)?;

    let result = match status {
        RunStatus::Vetoed => RunResult::vetoed(conversation),
        RunStatus::Completed => RunResult::completed(conversation),
        _ => None,
    }
    .ok_or_else(|| {
        PipelineError::invalid_checkpoint(&run.id, format!("conversation does not support {status}"))
    })?;

    let metadata = RunMetadata::from_conversation(conversation, run.created_at);

    Ok(vec![
        PatchOp::set("/status", &status)?,
        PatchOp::set("/result", &result)?,
        PatchOp::set("/metadata", &metadata)?,
        PatchOp::set("/completed_at", &now)?,
        PatchOp::set("/updated_at", &now)?,
    ])
}
