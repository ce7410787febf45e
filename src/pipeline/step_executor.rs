//! Runs one stage: prompt, retried model call, validation, turn
//!
//! The executor does not write to the store. It returns the [`Turn`] and the
//! engine commits it together with any status change.

use super::prompts::{build_user_prompt, system_prompt};
use super::stages::{StageId, StageOutput};
use crate::error::{PipelineError, PipelineResult};
use crate::llm::{ModelCall, ModelCaller, ModelReply};
use crate::observability::PipelineMetrics;
use crate::retry::RetryPolicy;
use crate::run::{truncate_message, Turn};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub struct StepExecutor {
    caller: ModelCaller,
    retry: RetryPolicy,
    metrics: Arc<PipelineMetrics>,
}

impl StepExecutor {
    pub fn new(caller: ModelCaller, retry: RetryPolicy, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            caller,
            retry,
            metrics,
        }
    }

    pub fn model(&self) -> &str {
        self.caller.model()
    }

    /// Execute `stage` against the idea and the turns committed so far
    ///
    /// # Errors
    ///
    /// Returns `StageFatal` when the model call fails fatally, retries run
    /// out, or the reply does not validate.
    pub async fn execute(
        &self,
        stage: StageId,
        idea_text: &str,
        conversation: &[Turn],
    ) -> PipelineResult<Turn> {
        let call = ModelCall {
            stage: stage.as_str().to_string(),
            system_prompt: system_prompt(stage),
            user_prompt: build_user_prompt(idea_text, conversation),
            temperature: stage.temperature(),
            max_tokens: stage.max_tokens(),
        };

        let started = Instant::now();
        let metrics = &self.metrics;
        let caller = &self.caller;

        let reply = self
            .retry
            .with_retry_observed(
                |attempt| {
                    debug!(stage = %stage, attempt, "calling model");
                    caller.call(&call)
                },
                |attempt| {
                    if attempt.delay.is_some() {
                        metrics.retry_scheduled();
                    }
                },
            )
            .await;

        let outcome = reply
            .map_err(|e| PipelineError::stage_fatal(stage, e.to_string()))
            .and_then(|reply| {
                Self::build_turn(stage, conversation.len(), &reply, Utc::now())
                    .map_err(|e| PipelineError::stage_fatal(stage, e))
                    .map(|turn| (turn, reply.usage_tokens))
            });

        match outcome {
            Ok((turn, tokens)) => {
                self.metrics
                    .stage_finished(stage, started.elapsed(), true, tokens);
                info!(
                    stage = %stage,
                    turn_number = turn.turn_number,
                    tokens,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "stage completed"
                );
                Ok(turn)
            }
            Err(e) => {
                self.metrics
                    .stage_finished(stage, started.elapsed(), false, 0);
                warn!(stage = %stage, error = %e, "stage failed");
                Err(e)
            }
        }
    }

    /// Turn a model reply into a validated turn (pure function)
    pub fn build_turn(
        stage: StageId,
        prior_turns: usize,
        reply: &ModelReply,
        now: DateTime<Utc>,
    ) -> Result<Turn, String> {
        let payload = parse_payload(&reply.content)?;
        let output = StageOutput::validate(stage, &payload)?;

        let message = payload
            .get("message")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| output.fallback_message());

        Ok(Turn {
            turn_number: prior_turns as u32 + 1,
            stage,
            message: truncate_message(&message),
            output,
            model_id: reply.model.clone(),
            usage_tokens: reply.usage_tokens,
            created_at: now,
        })
    }
}

/// Parse model content as a JSON object, tolerating a markdown code fence
fn parse_payload(content: &str) -> Result<Value, String> {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let value: Value = serde_json::from_str(unfenced)
        .map_err(|e| format!("model reply is not valid JSON: {e}"))?;

    if !value.is_object() {
        return Err("model reply is not a JSON object".to_string());
    }
    Ok(value)
}
