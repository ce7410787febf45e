//! Canned stage payloads, turns and runs for tests

use crate::llm::provider::{CompletionResponse, FinishReason, TokenUsage};
use crate::pipeline::stages::{StageId, StageOutput};
use crate::run::Turn;
use chrono::Utc;
use serde_json::{json, Value};

pub const SAMPLE_IDEA: &str = "A tool for busy parents";

pub fn refiner_payload() -> Value {
    json!({
        "message": "The real problem is planning meals in under five minutes.",
        "problem_statement": "Parents spend too long deciding what to cook on weeknights",
        "assumptions": ["Parents cook at home most nights", "Planning, not cooking, is the bottleneck"],
        "proposed_solution": "A weekly plan generated from a short pantry checklist"
    })
}

pub fn reality_payload() -> Value {
    json!({
        "message": "Time pressure is testable. Willingness to pay is assumed.",
        "assumptions": ["Parents will keep the pantry list current"],
        "testable_claims": ["Planning takes more than 20 minutes a week"],
        "failure_points": ["Pantry data goes stale after a week"]
    })
}

pub fn assassin_payload(veto: bool) -> Value {
    if veto {
        json!({
            "message": "Nobody updates a pantry list. The input never arrives.",
            "veto": true,
            "kill_reason": "The core input depends on a habit users do not have",
            "failure_mode": "no_real_user"
        })
    } else {
        json!({
            "message": "No fatal flaw found, though retention is a concern.",
            "veto": false
        })
    }
}

pub fn cost_payload() -> Value {
    json!({
        "message": "Cheap to build, moderate to keep fresh.",
        "implementation_cost": "Low: a form and a recipe list",
        "maintenance_cost": "Medium: recipes need curation",
        "operational_risk": "Low: no external integrations",
        "cognitive_load": "Low: one weekly checklist"
    })
}

pub fn synthesis_payload(recommendation: &str) -> Value {
    json!({
        "message": "Ship a paper-prototype checklist to ten families first.",
        "constrained_version": "A printable weekly checklist with five rotating recipes",
        "open_risks": ["Families may stop after week two"],
        "recommendation": recommendation
    })
}

/// Payload for `stage`; `veto` only affects the assassin
pub fn payload(stage: StageId, veto: bool) -> Value {
    match stage {
        StageId::Refiner => refiner_payload(),
        StageId::RealityChecker => reality_payload(),
        StageId::Assassin => assassin_payload(veto),
        StageId::Cost => cost_payload(),
        StageId::Synthesizer => synthesis_payload("PROCEED"),
    }
}

pub fn turn(stage: StageId, veto: bool) -> Turn {
    let payload = payload(stage, veto);
    let message = payload["message"].as_str().unwrap_or_default().to_string();
    Turn {
        turn_number: stage.turn_number(),
        stage,
        message,
        output: StageOutput::decode(stage, payload).expect("fixture payload decodes"),
        model_id: "gpt-4o-mini".to_string(),
        usage_tokens: 100,
        created_at: Utc::now(),
    }
}

/// The first `n` turns of a run; turn 3 vetoes when `veto` is set
pub fn turns(n: usize, veto: bool) -> Vec<Turn> {
    StageId::ALL
        .iter()
        .take(n)
        .map(|stage| turn(*stage, veto))
        .collect()
}

/// Wrap a payload the way a chat completion returns it
pub fn completion(payload: &Value) -> CompletionResponse {
    completion_text(payload.to_string())
}

pub fn completion_text(content: impl Into<String>) -> CompletionResponse {
    CompletionResponse {
        content: Some(content.into()),
        model: "gpt-4o-mini".to_string(),
        usage: TokenUsage {
            prompt_tokens: 80,
            completion_tokens: 20,
            total_tokens: 100,
        },
        finish_reason: FinishReason::Stop,
    }
}
