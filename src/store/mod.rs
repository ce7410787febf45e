//! Run document storage
//!
//! The engine only ever creates a run, reads it, and applies ordered field
//! patches. Both backends keep documents as JSON values and re-validate the
//! patched document as a [`Run`] before committing it.

pub mod file;
pub mod memory;
pub mod patch;

pub use file::FileRunStore;
pub use memory::InMemoryRunStore;
pub use patch::{apply_patch, PatchOp};

use crate::run::Run;
use async_trait::async_trait;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Run not found: {0}")]
    NotFound(String),
    #[error("Run already exists: {0}")]
    AlreadyExists(String),
    #[error("Invalid patch: {0}")]
    InvalidPatch(String),
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Persistence for run documents
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Store a new run. Fails with `AlreadyExists` if the id is taken.
    async fn create(&self, run: &Run) -> Result<(), StoreError>;

    async fn read(&self, run_id: &str) -> Result<Option<Run>, StoreError>;

    /// Apply `ops` atomically and return the updated run
    async fn patch_fields(&self, run_id: &str, ops: &[PatchOp]) -> Result<Run, StoreError>;

    /// Ids of runs that have not reached a terminal status
    async fn list_unfinished(&self) -> Result<Vec<String>, StoreError>;
}
