//! Mock implementations for testing
//!
//! Provides a scripted LlmProvider and a RunStore that fails on demand, so the
//! pipeline can be exercised without a model endpoint or a disk.

use super::fixtures;
use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmError, LlmProvider};
use crate::pipeline::stages::StageId;
use crate::run::Run;
use crate::store::{InMemoryRunStore, PatchOp, RunStore, StoreError};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

pub type ScriptedReply = Result<CompletionResponse, LlmError>;

/// LLM provider that answers per stage from a script
///
/// Requests are routed by the `stage` metadata tag. Each stage pops its
/// scripted replies in order; once a stage's script is empty it answers with
/// the happy-path fixture payload for that stage.
#[derive(Debug, Default)]
pub struct ScriptedLlmProvider {
    scripts: Mutex<HashMap<String, VecDeque<ScriptedReply>>>,
    calls: Mutex<HashMap<String, u32>>,
    prompts: Mutex<Vec<(String, String)>>,
    should_fail: bool,
}

impl ScriptedLlmProvider {
    /// Every stage succeeds; the synthesizer recommends PROCEED
    pub fn happy_path() -> Self {
        Self::default()
    }

    /// The assassin vetoes the idea
    pub fn with_veto() -> Self {
        Self::happy_path().script(
            StageId::Assassin,
            Ok(fixtures::completion(&fixtures::assassin_payload(true))),
        )
    }

    /// Health checks fail; completions still follow the script
    pub fn with_failed_health() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    /// Queue a reply for `stage`
    pub fn script(mut self, stage: StageId, reply: ScriptedReply) -> Self {
        self.scripts
            .get_mut()
            .entry(stage.as_str().to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Queue the same reply `times` times for `stage`
    pub fn script_n(mut self, stage: StageId, reply: ScriptedReply, times: usize) -> Self {
        for _ in 0..times {
            self = self.script(stage, reply.clone());
        }
        self
    }

    pub async fn calls(&self, stage: StageId) -> u32 {
        self.calls
            .lock()
            .await
            .get(stage.as_str())
            .copied()
            .unwrap_or(0)
    }

    pub async fn total_calls(&self) -> u32 {
        self.calls.lock().await.values().sum()
    }

    /// `(stage, user prompt)` for every request received, in order
    pub async fn prompts(&self) -> Vec<(String, String)> {
        self.prompts.lock().await.clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlmProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn available_models(&self) -> Vec<String> {
        vec!["gpt-4o-mini".to_string()]
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let stage_tag = request.metadata.get("stage").cloned().unwrap_or_default();

        *self.calls.lock().await.entry(stage_tag.clone()).or_insert(0) += 1;
        let user_prompt = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.prompts.lock().await.push((stage_tag.clone(), user_prompt));

        if let Some(reply) = self
            .scripts
            .lock()
            .await
            .get_mut(&stage_tag)
            .and_then(VecDeque::pop_front)
        {
            return reply;
        }

        let stage = StageId::parse(&stage_tag).ok_or_else(|| {
            LlmError::InvalidRequest(format!("request carries no known stage tag: {stage_tag:?}"))
        })?;
        Ok(fixtures::completion(&fixtures::payload(stage, false)))
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        if self.should_fail {
            Err(LlmError::NetworkError("Mock health check failure".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Run store whose patch number `n` (0-based) fails once with `Unavailable`
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryRunStore,
    failing_patch: Option<usize>,
    patches: AtomicUsize,
}

impl FlakyStore {
    pub fn failing_patch(n: usize) -> Self {
        Self {
            failing_patch: Some(n),
            ..Self::default()
        }
    }

    /// Patches attempted so far, failed ones included
    pub fn patch_count(&self) -> usize {
        self.patches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RunStore for FlakyStore {
    async fn create(&self, run: &Run) -> Result<(), StoreError> {
        self.inner.create(run).await
    }

    async fn read(&self, run_id: &str) -> Result<Option<Run>, StoreError> {
        self.inner.read(run_id).await
    }

    async fn patch_fields(&self, run_id: &str, ops: &[PatchOp]) -> Result<Run, StoreError> {
        let seen = self.patches.fetch_add(1, Ordering::SeqCst);
        if self.failing_patch == Some(seen) {
            return Err(StoreError::Unavailable("injected store failure".to_string()));
        }
        self.inner.patch_fields(run_id, ops).await
    }

    async fn list_unfinished(&self) -> Result<Vec<String>, StoreError> {
        self.inner.list_unfinished().await
    }
}
