//! LLM access for the evaluation pipeline
//!
//! `provider` holds the backend-agnostic trait, `providers` the concrete HTTP
//! clients, and `caller` the narrow single-call contract the pipeline uses.

pub mod caller;
pub mod provider;
pub mod providers;

pub use caller::*;
pub use provider::*;
pub use providers::*;
