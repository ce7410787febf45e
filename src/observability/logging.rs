//! Structured logging using the tracing crate
//!
//! ## Environment Variables
//!
//! - `LOG_LEVEL`: ERROR, WARN, INFO, DEBUG or TRACE (default INFO)
//! - `LOG_FORMAT`: `json`, `pretty` or `compact` (default json)
//! - `LOG_SPANS`: `true` to emit span open/close events
//! - `RUST_LOG`: overrides filtering entirely (env_logger syntax)
//!
//! ```bash
//! LOG_FORMAT=pretty LOG_LEVEL=DEBUG roundtable serve
//! ```

use std::env;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogFormat {
    /// JSON lines for log aggregation
    Json,
    /// Multi-line, coloured, for development
    Pretty,
    /// Single-line, coloured, for terminals
    Compact,
}

impl LogFormat {
    /// Parse log format from string, defaulting to JSON
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

/// Parse a level name, defaulting to INFO
pub fn parse_level(s: &str) -> Level {
    match s.to_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" => Level::WARN,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

fn base_filter(level: Level) -> EnvFilter {
    // Dependency chatter stays at warn unless RUST_LOG says otherwise.
    ["hyper=warn", "warp=warn", "reqwest=warn", "tokio=warn"]
        .iter()
        .filter_map(|d| d.parse().ok())
        .fold(EnvFilter::new(level.to_string()), |f, d| f.add_directive(d))
}

/// Install the global subscriber. Call once, from `main`.
pub fn init_logging(level: Level, format: LogFormat, include_spans: bool) {
    let filter = match env::var("RUST_LOG") {
        Ok(rust_log) => EnvFilter::new(rust_log),
        Err(_) => base_filter(level),
    };

    let span_events = if include_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => {
            subscriber
                .with(fmt::layer().json().with_span_events(span_events))
                .init();
        }
        LogFormat::Pretty => {
            subscriber
                .with(
                    fmt::layer()
                        .pretty()
                        .with_ansi(true)
                        .with_span_events(span_events),
                )
                .init();
        }
        LogFormat::Compact => {
            subscriber
                .with(
                    fmt::layer()
                        .compact()
                        .with_ansi(true)
                        .with_target(false)
                        .with_span_events(span_events),
                )
                .init();
        }
    }
}

/// Initialize logging from `LOG_LEVEL`, `LOG_FORMAT` and `LOG_SPANS`
pub fn init_default_logging() {
    let level = parse_level(&env::var("LOG_LEVEL").unwrap_or_default());
    let format = LogFormat::parse(&env::var("LOG_FORMAT").unwrap_or_default());
    let include_spans = env::var("LOG_SPANS")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    init_logging(level, format, include_spans);
}

/// Span covering one run's pass through the engine
#[macro_export]
macro_rules! run_span {
    ($($field:tt)*) => {
        tracing::info_span!("pipeline_run", $($field)*)
    };
}

/// Span covering one stage execution
#[macro_export]
macro_rules! stage_span {
    ($($field:tt)*) => {
        tracing::info_span!("pipeline_stage", $($field)*)
    };
}

/// Span covering one HTTP request
#[macro_export]
macro_rules! request_span {
    ($($field:tt)*) => {
        tracing::info_span!("http_request", $($field)*)
    };
}

pub use {request_span, run_span, stage_span};
