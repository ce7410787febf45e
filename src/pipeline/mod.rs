//! Five-stage idea evaluation pipeline
//!
//! `stages` defines the fixed stage sequence and outputs, `step_executor`
//! runs one stage, `engine` drives a run through the stages against the store,
//! and `host` runs engines on background tasks.

pub mod engine;
pub mod host;
pub mod prompts;
pub mod stages;
pub mod step_executor;

pub use engine::{next_action, NextAction, PipelineEngine, RunOutcome};
pub use host::{PipelineHost, RunHandle};
pub use stages::{StageId, StageOutput};
pub use step_executor::StepExecutor;
