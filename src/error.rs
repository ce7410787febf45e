//! Error types for the evaluation pipeline
//!
//! Provider, store and config errors each have their own enum next to the code
//! that raises them. `PipelineError` is what the engine, host and HTTP layer
//! deal in.

use crate::store::StoreError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Top-level error for pipeline operations
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Stage {stage} failed: {message}")]
    StageFatal { stage: String, message: String },

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("Run not found: {run_id}")]
    RunNotFound { run_id: String },

    #[error("Invalid checkpoint for run {run_id}: {message}")]
    InvalidCheckpoint { run_id: String, message: String },

    #[error("Run {run_id} previously failed: {message}")]
    RunFailed { run_id: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl PipelineError {
    /// Create validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create fatal stage error
    pub fn stage_fatal<S: Into<String>>(stage: impl std::fmt::Display, message: S) -> Self {
        Self::StageFatal {
            stage: stage.to_string(),
            message: message.into(),
        }
    }

    /// Create run not found error
    pub fn run_not_found<S: Into<String>>(run_id: S) -> Self {
        Self::RunNotFound {
            run_id: run_id.into(),
        }
    }

    /// Create invalid checkpoint error
    pub fn invalid_checkpoint<S: Into<String>>(run_id: &str, message: S) -> Self {
        Self::InvalidCheckpoint {
            run_id: run_id.to_string(),
            message: message.into(),
        }
    }

    /// Message safe to persist on a run document or return to a client
    pub fn public_message(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret|authorization)[=:]\s*\S+")
        .expect("valid regex")
});

static BEARER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)bearer\s+[A-Za-z0-9._\-]+").expect("valid regex")
});

static SENSITIVE_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("valid regex")
});

const MAX_ERROR_LEN: usize = 500;

/// Redact credentials and sensitive paths, then cap at 500 characters
pub fn sanitize_error_message(message: &str) -> String {
    let sanitized = SECRET_PATTERN.replace_all(message, "${1}=***");
    let sanitized = BEARER_PATTERN.replace_all(&sanitized, "Bearer ***");
    let sanitized = SENSITIVE_PATH_PATTERN
        .replace_all(&sanitized, "/***REDACTED***/")
        .to_string();

    if sanitized.chars().count() > MAX_ERROR_LEN {
        let truncate_suffix = "...[truncated]";
        let max_content_len = MAX_ERROR_LEN - truncate_suffix.len();
        let head: String = sanitized.chars().take(max_content_len).collect();
        return format!("{head}{truncate_suffix}");
    }

    sanitized
}
