//! Observability: structured logging and pipeline metrics

pub mod logging;
pub mod metrics;

pub use logging::{init_default_logging, init_logging, parse_level, LogFormat};
pub use metrics::{MetricsSnapshot, PipelineMetrics};

// Span macros for structured logging
pub use logging::{request_span, run_span, stage_span};
