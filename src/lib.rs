//! Roundtable - multi-stage idea evaluation
//!
//! An idea is passed through a fixed panel of five model-backed stages
//! (refiner, reality checker, assassin, cost analyst, synthesizer). Each stage
//! reads the idea plus the previous stages' messages, produces a validated
//! structured output, and is committed to a persisted run document before the
//! next stage starts. The assassin can veto, which ends the run early.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use roundtable::llm::{ModelCaller, OpenAiConfig, OpenAiProvider};
//! use roundtable::observability::PipelineMetrics;
//! use roundtable::pipeline::{PipelineEngine, PipelineHost, StepExecutor};
//! use roundtable::retry::RetryPolicy;
//! use roundtable::store::InMemoryRunStore;
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = OpenAiProvider::new(OpenAiConfig {
//!     api_key: std::env::var("OPENAI_API_KEY")?,
//!     ..OpenAiConfig::default()
//! })?;
//! let metrics = Arc::new(PipelineMetrics::new());
//! let executor = StepExecutor::new(
//!     ModelCaller::new(Arc::new(provider), "gpt-4o-mini"),
//!     RetryPolicy::default(),
//!     Arc::clone(&metrics),
//! );
//! let engine = PipelineEngine::new(executor, Arc::new(InMemoryRunStore::new()), metrics);
//! let host = PipelineHost::new(Arc::new(engine), 30 * 24 * 3600);
//!
//! let (run, handle) = host
//!     .submit("A meal planner for busy parents".to_string(), None)
//!     .await?;
//! let outcome = handle.await??;
//! println!("{}: {:?}", run.id, outcome.result().decision);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod llm;
pub mod observability;
pub mod pipeline;
pub mod retry;
pub mod run;
pub mod store;
pub mod testing;

pub use config::RoundtableConfig;
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{PipelineEngine, PipelineHost, RunOutcome, StageId};
pub use run::{Decision, Run, RunResult, RunStatus, Turn};
pub use store::{FileRunStore, InMemoryRunStore, RunStore, StoreError};
