//! Pipeline host: accepts new runs and keeps them moving
//!
//! Every run executes on its own tokio task. On startup the host re-enters the
//! engine for each run the store reports as unfinished; the engine picks up at
//! the last committed stage.

use super::engine::{PipelineEngine, RunOutcome};
use crate::error::{PipelineError, PipelineResult};
use crate::run::{new_run_id, validate_idea_text, Run};
use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub type RunHandle = JoinHandle<PipelineResult<RunOutcome>>;

#[derive(Clone)]
pub struct PipelineHost {
    engine: Arc<PipelineEngine>,
    run_ttl_secs: u64,
}

impl PipelineHost {
    pub fn new(engine: Arc<PipelineEngine>, run_ttl_secs: u64) -> Self {
        Self {
            engine,
            run_ttl_secs,
        }
    }

    pub fn engine(&self) -> &Arc<PipelineEngine> {
        &self.engine
    }

    /// Validate and persist a new run in INIT, then start it in the background
    pub async fn submit(
        &self,
        idea_text: String,
        preset_id: Option<String>,
    ) -> PipelineResult<(Run, RunHandle)> {
        let run = self.create(idea_text, preset_id).await?;
        let handle = self.spawn(run.id.clone(), run.idea_text.clone());
        Ok((run, handle))
    }

    /// Validate and persist a new run without starting it
    pub async fn create(&self, idea_text: String, preset_id: Option<String>) -> PipelineResult<Run> {
        validate_idea_text(&idea_text).map_err(PipelineError::validation)?;

        let now = Utc::now();
        let run = Run::new(new_run_id(now), idea_text, preset_id, self.run_ttl_secs, now);
        self.engine.store().create(&run).await?;
        info!(run_id = %run.id, "run created");
        Ok(run)
    }

    /// Drive a run on a fresh task
    pub fn spawn(&self, run_id: String, idea_text: String) -> RunHandle {
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            let outcome = engine.run(&run_id, &idea_text).await;
            if let Err(e) = &outcome {
                error!(run_id = %run_id, error = %e, "run ended with error");
            }
            outcome
        })
    }

    /// Restart every unfinished run found in the store
    pub async fn resume_unfinished(&self) -> PipelineResult<Vec<RunHandle>> {
        let store = self.engine.store();
        let ids = store.list_unfinished().await?;
        if !ids.is_empty() {
            info!(count = ids.len(), "resuming unfinished runs");
        }

        let mut handles = Vec::with_capacity(ids.len());
        for run_id in ids {
            let Some(run) = store.read(&run_id).await? else {
                continue;
            };
            self.engine.metrics().run_resumed();
            handles.push(self.spawn(run.id, run.idea_text));
        }
        Ok(handles)
    }
}
