//! Thread-safe pipeline metrics
//!
//! One [`PipelineMetrics`] is built in `main` and shared as an `Arc` by the
//! engine, the step executor and the HTTP layer. Counters are atomics; per
//! stage timing lives behind a mutex.

use crate::pipeline::stages::StageId;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MAX_SAMPLES: usize = 1000;

/// Counters for runs, stages and model usage
pub struct PipelineMetrics {
    runs_started: AtomicU64,
    runs_in_flight: AtomicU64,
    runs_completed: AtomicU64,
    runs_vetoed: AtomicU64,
    runs_failed: AtomicU64,
    runs_resumed: AtomicU64,
    retries: AtomicU64,
    tokens_used: AtomicU64,
    stage_stats: Mutex<BTreeMap<&'static str, StageStats>>,
    uptime_start: u64,
}

#[derive(Debug, Default)]
struct StageStats {
    invocations: u64,
    failures: u64,
    durations_ms: Vec<u64>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            runs_started: AtomicU64::new(0),
            runs_in_flight: AtomicU64::new(0),
            runs_completed: AtomicU64::new(0),
            runs_vetoed: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            runs_resumed: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            tokens_used: AtomicU64::new(0),
            stage_stats: Mutex::new(BTreeMap::new()),
            uptime_start: current_timestamp(),
        }
    }

    pub fn run_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
        self.runs_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn run_resumed(&self) {
        self.runs_resumed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn run_completed(&self) {
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
        self.leave_flight();
    }

    pub fn run_vetoed(&self) {
        self.runs_vetoed.fetch_add(1, Ordering::Relaxed);
        self.leave_flight();
    }

    pub fn run_failed(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
        self.leave_flight();
    }

    fn leave_flight(&self) {
        // A replayed terminal run may end without having been counted in.
        let _ = self
            .runs_in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn retry_scheduled(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stage_finished(&self, stage: StageId, duration: Duration, success: bool, tokens: u32) {
        self.tokens_used.fetch_add(tokens as u64, Ordering::Relaxed);
        if let Ok(mut stats) = self.stage_stats.lock() {
            let entry = stats.entry(stage.as_str()).or_default();
            entry.invocations += 1;
            if !success {
                entry.failures += 1;
            }
            entry.durations_ms.push(duration.as_millis() as u64);
            if entry.durations_ms.len() > MAX_SAMPLES {
                entry.durations_ms.remove(0);
            }
        }
    }

    /// Invocation count for one stage
    pub fn stage_invocations(&self, stage: StageId) -> u64 {
        self.stage_stats
            .lock()
            .ok()
            .and_then(|stats| stats.get(stage.as_str()).map(|s| s.invocations))
            .unwrap_or(0)
    }

    pub fn uptime_seconds(&self) -> u64 {
        current_timestamp().saturating_sub(self.uptime_start)
    }

    fn stage_snapshots(&self) -> BTreeMap<String, StageMetrics> {
        let Ok(stats) = self.stage_stats.lock() else {
            return BTreeMap::new();
        };

        stats
            .iter()
            .map(|(name, s)| {
                let mut sorted = s.durations_ms.clone();
                sorted.sort_unstable();
                let avg = if sorted.is_empty() {
                    0.0
                } else {
                    sorted.iter().sum::<u64>() as f64 / sorted.len() as f64
                };
                (
                    name.to_string(),
                    StageMetrics {
                        invocations: s.invocations,
                        failures: s.failures,
                        avg_duration_ms: avg,
                        duration_p95_ms: percentile(&sorted, 95.0),
                    },
                )
            })
            .collect()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            runs: RunMetrics {
                started: self.runs_started.load(Ordering::Relaxed),
                in_flight: self.runs_in_flight.load(Ordering::Relaxed),
                completed: self.runs_completed.load(Ordering::Relaxed),
                vetoed: self.runs_vetoed.load(Ordering::Relaxed),
                failed: self.runs_failed.load(Ordering::Relaxed),
                resumed: self.runs_resumed.load(Ordering::Relaxed),
            },
            stages: self.stage_snapshots(),
            retries: self.retries.load(Ordering::Relaxed),
            tokens_used: self.tokens_used.load(Ordering::Relaxed),
            uptime_seconds: self.uptime_seconds(),
            timestamp: current_timestamp(),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub runs: RunMetrics,
    pub stages: BTreeMap<String, StageMetrics>,
    pub retries: u64,
    pub tokens_used: u64,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct RunMetrics {
    pub started: u64,
    pub in_flight: u64,
    pub completed: u64,
    pub vetoed: u64,
    pub failed: u64,
    pub resumed: u64,
}

#[derive(Debug, Serialize)]
pub struct StageMetrics {
    pub invocations: u64,
    pub failures: u64,
    pub avg_duration_ms: f64,
    pub duration_p95_ms: f64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let index = (percentile / 100.0) * (sorted_data.len() - 1) as f64;
    let lower = sorted_data[index.floor() as usize] as f64;
    let upper = sorted_data[index.ceil() as usize] as f64;
    lower + (upper - lower) * index.fract()
}
