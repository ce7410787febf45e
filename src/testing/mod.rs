//! Testing utilities and mock implementations
//!
//! Scripted model replies, an injectable failing store and canned stage
//! payloads for exercising the pipeline without a model endpoint.

pub mod fixtures;
pub mod mocks;

pub use mocks::*;
