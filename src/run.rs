//! Run documents: the persisted state of one idea evaluation
//!
//! A [`Run`] is created in `INIT`, accumulates one [`Turn`] per completed
//! stage, and ends in `VETOED`, `COMPLETED` or `FAILED`. The engine never
//! mutates a run in memory and writes it back; it issues field patches
//! against the store, so the types here are mostly data.

use crate::pipeline::stages::{StageId, StageOutput};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Maximum characters in a turn message, marker included
pub const MESSAGE_LIMIT: usize = 700;

/// Appended to messages cut at [`MESSAGE_LIMIT`]
pub const TRUNCATION_MARKER: &str = "...";

/// Default document retention: 30 days
pub const DEFAULT_RUN_TTL_SECS: u64 = 2_592_000;

/// Run lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Init,
    AgentsRunning,
    Synthesizing,
    Vetoed,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Vetoed | RunStatus::Completed | RunStatus::Failed
        )
    }

    /// Forward-only transition check. Re-asserting the current status is allowed
    /// so a redelivered write is harmless.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        use RunStatus::*;
        if self == next {
            return true;
        }
        match self {
            Init => matches!(next, AgentsRunning | Failed),
            AgentsRunning => matches!(next, Synthesizing | Vetoed | Failed),
            Synthesizing => matches!(next, Completed | Failed),
            Vetoed | Completed | Failed => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Init => "INIT",
            RunStatus::AgentsRunning => "AGENTS_RUNNING",
            RunStatus::Synthesizing => "SYNTHESIZING",
            RunStatus::Vetoed => "VETOED",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stage's committed contribution to the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTurn", into = "RawTurn")]
pub struct Turn {
    pub turn_number: u32,
    pub stage: StageId,
    pub message: String,
    pub output: StageOutput,
    pub model_id: String,
    pub usage_tokens: u32,
    pub created_at: DateTime<Utc>,
}

/// Wire shape of a turn; `structured_output` is interpreted by `stage_id`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawTurn {
    turn_number: u32,
    stage_id: StageId,
    #[serde(default)]
    stage_name: String,
    message: String,
    structured_output: Value,
    #[serde(default)]
    model_id: String,
    #[serde(default)]
    usage_tokens: u32,
    created_at: DateTime<Utc>,
}

impl TryFrom<RawTurn> for Turn {
    type Error = serde_json::Error;

    fn try_from(raw: RawTurn) -> Result<Self, Self::Error> {
        Ok(Turn {
            turn_number: raw.turn_number,
            stage: raw.stage_id,
            message: raw.message,
            output: StageOutput::decode(raw.stage_id, raw.structured_output)?,
            model_id: raw.model_id,
            usage_tokens: raw.usage_tokens,
            created_at: raw.created_at,
        })
    }
}

impl From<Turn> for RawTurn {
    fn from(turn: Turn) -> Self {
        RawTurn {
            turn_number: turn.turn_number,
            stage_id: turn.stage,
            stage_name: turn.stage.display_name().to_string(),
            message: turn.message,
            structured_output: turn.output.to_value(),
            model_id: turn.model_id,
            usage_tokens: turn.usage_tokens,
            created_at: turn.created_at,
        }
    }
}

/// Overall verdict exposed to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Stop,
    Continue,
    Conditional,
}

impl Decision {
    /// PROCEED continues, STOP stops, anything else is conditional
    pub fn from_recommendation(recommendation: &str) -> Self {
        match recommendation {
            "PROCEED" => Decision::Continue,
            "STOP" => Decision::Stop,
            _ => Decision::Conditional,
        }
    }
}

/// Terminal result of a vetoed or completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub summary: String,
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub veto_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constrained_version: Option<String>,
    #[serde(default)]
    pub open_risks: Vec<String>,
    #[serde(default)]
    pub key_risks: Vec<String>,
    #[serde(default)]
    pub key_assumptions: Vec<String>,
}

impl RunResult {
    /// Result for a run stopped at the assassin stage. `None` unless the
    /// conversation holds a vetoing third turn.
    pub fn vetoed(conversation: &[Turn]) -> Option<Self> {
        let turn = conversation.get(StageId::Assassin.index())?;
        let StageOutput::Assassin(assassin) = &turn.output else {
            return None;
        };
        if !assassin.veto {
            return None;
        }

        Some(RunResult {
            summary: turn.message.clone(),
            decision: Decision::Stop,
            veto_reason: assassin.kill_reason.clone(),
            failure_mode: assassin.failure_mode.clone(),
            recommendation: None,
            constrained_version: None,
            open_risks: Vec::new(),
            key_risks: failure_points(conversation),
            key_assumptions: refined_assumptions(conversation),
        })
    }

    /// Result for a run that reached the synthesizer
    pub fn completed(conversation: &[Turn]) -> Option<Self> {
        let turn = conversation.get(StageId::Synthesizer.index())?;
        let StageOutput::Synthesizer(synthesis) = &turn.output else {
            return None;
        };

        Some(RunResult {
            summary: turn.message.clone(),
            decision: Decision::from_recommendation(&synthesis.recommendation),
            veto_reason: None,
            failure_mode: None,
            recommendation: Some(synthesis.recommendation.clone()),
            constrained_version: Some(synthesis.constrained_version.clone()),
            open_risks: synthesis.open_risks.clone(),
            key_risks: synthesis.open_risks.clone(),
            key_assumptions: refined_assumptions(conversation),
        })
    }
}

fn refined_assumptions(conversation: &[Turn]) -> Vec<String> {
    match conversation.first().map(|t| &t.output) {
        Some(StageOutput::Refiner(refined)) => refined.assumptions.clone(),
        _ => Vec::new(),
    }
}

fn failure_points(conversation: &[Turn]) -> Vec<String> {
    match conversation.get(1).map(|t| &t.output) {
        Some(StageOutput::RealityChecker(check)) => check.failure_points.clone(),
        _ => Vec::new(),
    }
}

/// Summary figures written at finalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub stage_count: u32,
    pub veto_occurred: bool,
    pub model: String,
    pub total_tokens: u64,
    pub total_duration_ms: u64,
}

impl RunMetadata {
    pub fn from_conversation(conversation: &[Turn], started_at: DateTime<Utc>) -> Self {
        let finished_at = conversation
            .last()
            .map(|t| t.created_at)
            .unwrap_or(started_at);
        RunMetadata {
            stage_count: conversation.len() as u32,
            veto_occurred: conversation.iter().any(|t| t.output.vetoes()),
            model: conversation
                .last()
                .map(|t| t.model_id.clone())
                .unwrap_or_default(),
            total_tokens: conversation.iter().map(|t| t.usage_tokens as u64).sum(),
            total_duration_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
        }
    }
}

/// Persisted evaluation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub status: RunStatus,
    pub idea_text: String,
    pub preset_id: String,
    #[serde(default)]
    pub conversation: Vec<Turn>,
    #[serde(default)]
    pub result: Option<RunResult>,
    #[serde(default)]
    pub metadata: Option<RunMetadata>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub ttl: u64,
}

impl Run {
    pub fn new(
        id: impl Into<String>,
        idea_text: impl Into<String>,
        preset_id: Option<String>,
        ttl: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Run {
            id: id.into(),
            status: RunStatus::Init,
            idea_text: idea_text.into(),
            preset_id: preset_id.unwrap_or_else(|| "default".to_string()),
            conversation: Vec::new(),
            result: None,
            metadata: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            ttl,
        }
    }
}

/// Cut a message to [`MESSAGE_LIMIT`] characters, marker included
pub fn truncate_message(message: &str) -> String {
    truncate_to(message, MESSAGE_LIMIT)
}

/// Cut to at most `limit` characters, ending in [`TRUNCATION_MARKER`] when cut
pub fn truncate_to(message: &str, limit: usize) -> String {
    if message.chars().count() <= limit {
        return message.to_string();
    }
    let keep = limit.saturating_sub(TRUNCATION_MARKER.len());
    let mut truncated: String = message.chars().take(keep).collect();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

/// Accepted idea length in characters, inclusive
pub const IDEA_MIN_CHARS: usize = 10;
pub const IDEA_MAX_CHARS: usize = 5000;

/// Check idea text is non-blank and within the accepted length
pub fn validate_idea_text(idea_text: &str) -> Result<(), String> {
    if idea_text.trim().is_empty() {
        return Err("idea_text must not be blank".to_string());
    }
    let chars = idea_text.chars().count();
    if chars < IDEA_MIN_CHARS {
        return Err(format!(
            "idea_text must be at least {IDEA_MIN_CHARS} characters, got {chars}"
        ));
    }
    if chars > IDEA_MAX_CHARS {
        return Err(format!(
            "idea_text must be at most {IDEA_MAX_CHARS} characters, got {chars}"
        ));
    }
    Ok(())
}

/// `run_YYYY-MM-DD_xxxxxxxx`
pub fn new_run_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("run_{}_{}", now.format("%Y-%m-%d"), &suffix[..8])
}

/// `pf_` followed by a uuid
pub fn new_preflight_id() -> String {
    format!("pf_{}", Uuid::new_v4().simple())
}
