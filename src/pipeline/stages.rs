//! The five evaluation stages and their structured outputs
//!
//! Stage order is fixed. Each stage's model reply is a JSON object carrying a
//! `message` plus stage-specific fields; the fields are checked against a
//! JSON schema derived from the output struct before being decoded.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Identifier of one pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Refiner,
    RealityChecker,
    Assassin,
    Cost,
    Synthesizer,
}

impl StageId {
    /// Execution order
    pub const ALL: [StageId; 5] = [
        StageId::Refiner,
        StageId::RealityChecker,
        StageId::Assassin,
        StageId::Cost,
        StageId::Synthesizer,
    ];

    /// Zero-based position in the pipeline
    pub fn index(self) -> usize {
        match self {
            StageId::Refiner => 0,
            StageId::RealityChecker => 1,
            StageId::Assassin => 2,
            StageId::Cost => 3,
            StageId::Synthesizer => 4,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// 1-based turn number this stage's turn occupies
    pub fn turn_number(self) -> u32 {
        self.index() as u32 + 1
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageId::Refiner => "refiner",
            StageId::RealityChecker => "reality_checker",
            StageId::Assassin => "assassin",
            StageId::Cost => "cost",
            StageId::Synthesizer => "synthesizer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.as_str() == s)
    }

    pub fn display_name(self) -> &'static str {
        match self {
            StageId::Refiner => "Refiner",
            StageId::RealityChecker => "Reality Checker",
            StageId::Assassin => "Assassin",
            StageId::Cost => "Cost Analyst",
            StageId::Synthesizer => "Synthesizer",
        }
    }

    pub fn temperature(self) -> f32 {
        match self {
            StageId::RealityChecker => 0.3,
            _ => 0.2,
        }
    }

    pub fn max_tokens(self) -> u32 {
        match self {
            StageId::Assassin => 1500,
            _ => 2000,
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Refiner: restates the idea as a problem and a concrete solution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RefinerOutput {
    pub problem_statement: String,
    #[serde(default)]
    pub assumptions: Vec<String>,
    pub proposed_solution: String,
}

/// Reality checker: separates testable claims from hidden assumptions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RealityCheckOutput {
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub testable_claims: Vec<String>,
    #[serde(default)]
    pub failure_points: Vec<String>,
}

/// Assassin: looks for a single fatal flaw
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AssassinOutput {
    pub veto: bool,
    /// Required when `veto` is true
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill_reason: Option<String>,
    /// e.g. `no_real_user`, `technical_impossibility`, `economic_nonviability`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_mode: Option<String>,
}

/// Cost analyst: "Low/Medium/High: reason" ratings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CostOutput {
    pub implementation_cost: String,
    pub maintenance_cost: String,
    pub operational_risk: String,
    pub cognitive_load: String,
}

/// Synthesizer: constrained version and final recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SynthesisOutput {
    pub constrained_version: String,
    #[serde(default)]
    pub open_risks: Vec<String>,
    /// RESEARCH_FIRST, PROCEED, STOP or PIVOT. Other values are kept verbatim.
    pub recommendation: String,
}

/// Structured output of one stage, tagged by the stage that produced it
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    Refiner(RefinerOutput),
    RealityChecker(RealityCheckOutput),
    Assassin(AssassinOutput),
    Cost(CostOutput),
    Synthesizer(SynthesisOutput),
}

impl StageOutput {
    pub fn stage(&self) -> StageId {
        match self {
            StageOutput::Refiner(_) => StageId::Refiner,
            StageOutput::RealityChecker(_) => StageId::RealityChecker,
            StageOutput::Assassin(_) => StageId::Assassin,
            StageOutput::Cost(_) => StageId::Cost,
            StageOutput::Synthesizer(_) => StageId::Synthesizer,
        }
    }

    /// Decode a stored payload without schema checks
    pub fn decode(stage: StageId, value: Value) -> Result<Self, serde_json::Error> {
        Ok(match stage {
            StageId::Refiner => StageOutput::Refiner(serde_json::from_value(value)?),
            StageId::RealityChecker => StageOutput::RealityChecker(serde_json::from_value(value)?),
            StageId::Assassin => StageOutput::Assassin(serde_json::from_value(value)?),
            StageId::Cost => StageOutput::Cost(serde_json::from_value(value)?),
            StageId::Synthesizer => StageOutput::Synthesizer(serde_json::from_value(value)?),
        })
    }

    pub fn to_value(&self) -> Value {
        let encoded = match self {
            StageOutput::Refiner(o) => serde_json::to_value(o),
            StageOutput::RealityChecker(o) => serde_json::to_value(o),
            StageOutput::Assassin(o) => serde_json::to_value(o),
            StageOutput::Cost(o) => serde_json::to_value(o),
            StageOutput::Synthesizer(o) => serde_json::to_value(o),
        };
        // Plain structs of strings, bools and string vectors always encode.
        encoded.unwrap_or(Value::Null)
    }

    /// JSON schema for a stage's payload
    pub fn json_schema(stage: StageId) -> Result<Value, serde_json::Error> {
        let schema = match stage {
            StageId::Refiner => schemars::schema_for!(RefinerOutput),
            StageId::RealityChecker => schemars::schema_for!(RealityCheckOutput),
            StageId::Assassin => schemars::schema_for!(AssassinOutput),
            StageId::Cost => schemars::schema_for!(CostOutput),
            StageId::Synthesizer => schemars::schema_for!(SynthesisOutput),
        };
        serde_json::to_value(schema)
    }

    /// Validate a model payload against the stage schema and rules, then decode it
    ///
    /// # Errors
    ///
    /// Returns a description of every violation when:
    /// - the payload does not match the stage's JSON schema
    /// - an assassin veto comes without a `kill_reason`
    pub fn validate(stage: StageId, payload: &Value) -> Result<Self, String> {
        let schema =
            Self::json_schema(stage).map_err(|e| format!("Schema generation error: {e}"))?;
        let validator = jsonschema::validator_for(&schema)
            .map_err(|e| format!("Schema compilation error: {e}"))?;

        let error_messages: Vec<String> = validator
            .iter_errors(payload)
            .map(|e| format!("At '{}': {}", e.instance_path, e))
            .collect();
        if !error_messages.is_empty() {
            return Err(error_messages.join("; "));
        }

        let output = Self::decode(stage, payload.clone()).map_err(|e| e.to_string())?;

        if let StageOutput::Assassin(assassin) = &output {
            let has_reason = assassin
                .kill_reason
                .as_deref()
                .is_some_and(|r| !r.trim().is_empty());
            if assassin.veto && !has_reason {
                return Err("kill_reason is required when veto is true".to_string());
            }
        }

        Ok(output)
    }

    /// Whether this output terminates the pipeline
    pub fn vetoes(&self) -> bool {
        matches!(self, StageOutput::Assassin(AssassinOutput { veto: true, .. }))
    }

    /// Message used when the model omits one
    pub fn fallback_message(&self) -> String {
        match self {
            StageOutput::Refiner(o) => o.problem_statement.clone(),
            StageOutput::RealityChecker(o) => match o.failure_points.first() {
                Some(first) => format!(
                    "Identified {} failure points. Most serious: {first}",
                    o.failure_points.len()
                ),
                None => format!("Identified {} testable claims.", o.testable_claims.len()),
            },
            StageOutput::Assassin(o) => match (&o.kill_reason, o.veto) {
                (Some(reason), true) => format!("VETO: {reason}"),
                _ => "No fatal flaw found.".to_string(),
            },
            StageOutput::Cost(o) => format!(
                "Implementation: {}. Maintenance: {}. Operational risk: {}. Cognitive load: {}.",
                o.implementation_cost, o.maintenance_cost, o.operational_risk, o.cognitive_load
            ),
            StageOutput::Synthesizer(o) => format!(
                "Recommendation: {}. {}",
                o.recommendation, o.constrained_version
            ),
        }
    }
}
