//! Bounded exponential backoff around external calls
//!
//! Only retryable failures (throttling, server faults, transport errors) are
//! retried. Between attempt `k` and `k + 1` the wrapper sleeps
//! `2^k * base_delay`, so with the defaults a call is tried three times with
//! 2 s and 4 s pauses. This is the only place the pipeline waits on purpose.

use crate::config::RetrySection;
use crate::llm::LlmError;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// How a failure should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Retryable,
    Fatal,
}

/// Errors that know whether another attempt could succeed
pub trait RetryClassify {
    fn classify(&self) -> FailureClass;
}

impl RetryClassify for LlmError {
    fn classify(&self) -> FailureClass {
        match self {
            LlmError::RateLimitExceeded(_)
            | LlmError::ServerError(_)
            | LlmError::NetworkError(_) => FailureClass::Retryable,
            _ => FailureClass::Fatal,
        }
    }
}

/// One failed attempt, reported to observers. Not persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryAttempt {
    /// 1-based attempt index
    pub attempt: u32,
    pub class: FailureClass,
    /// Pause before the next attempt; `None` when no further attempt follows
    pub delay: Option<Duration>,
}

/// Terminal failure of a retried call
#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("{0}")]
    Fatal(E),
    #[error("giving up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Fatal(e) | RetryError::Exhausted { last: e, .. } => e,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl From<&RetrySection> for RetryPolicy {
    fn from(section: &RetrySection) -> Self {
        Self {
            max_attempts: section.max_attempts.max(1),
            base_delay: Duration::from_millis(section.base_delay_ms),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Pause after failed attempt `attempt` (1-based): `2^attempt * base_delay`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Run `call` until it succeeds, fails fatally, or attempts run out
    pub async fn with_retry<T, E, F, Fut>(&self, call: F) -> Result<T, RetryError<E>>
    where
        E: RetryClassify + Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.with_retry_observed(call, |_| {}).await
    }

    /// Like [`with_retry`](Self::with_retry), reporting every failed attempt to `observe`
    pub async fn with_retry_observed<T, E, F, Fut, O>(
        &self,
        mut call: F,
        mut observe: O,
    ) -> Result<T, RetryError<E>>
    where
        E: RetryClassify + Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        O: FnMut(&RetryAttempt),
    {
        let mut attempt = 1;
        loop {
            let error = match call(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let class = error.classify();
            let last_attempt = attempt >= self.max_attempts;
            let delay = (class == FailureClass::Retryable && !last_attempt)
                .then(|| self.backoff_delay(attempt));

            observe(&RetryAttempt {
                attempt,
                class,
                delay,
            });

            match (class, delay) {
                (FailureClass::Fatal, _) => {
                    debug!(attempt, error = %error, "fatal failure, not retrying");
                    return Err(RetryError::Fatal(error));
                }
                (FailureClass::Retryable, None) => {
                    warn!(attempts = attempt, error = %error, "retry attempts exhausted");
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: error,
                    });
                }
                (FailureClass::Retryable, Some(delay)) => {
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retryable failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
