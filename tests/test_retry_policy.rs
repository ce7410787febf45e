//! Retry timing and classification, on tokio's paused clock

use roundtable::llm::LlmError;
use roundtable::retry::{FailureClass, RetryError, RetryPolicy};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_backoff_waits_two_then_four_seconds() {
    let policy = RetryPolicy::default();
    let calls: Mutex<Vec<Instant>> = Mutex::new(Vec::new());

    let result: Result<(), _> = policy
        .with_retry(|_| {
            calls.lock().unwrap().push(Instant::now());
            async { Err(LlmError::RateLimitExceeded("HTTP 429".to_string())) }
        })
        .await;

    let calls = calls.into_inner().unwrap();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[1] - calls[0], Duration::from_secs(2));
    assert_eq!(calls[2] - calls[1], Duration::from_secs(4));

    match result {
        Err(RetryError::Exhausted { attempts, last }) => {
            assert_eq!(attempts, 3);
            assert!(matches!(last, LlmError::RateLimitExceeded(_)));
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_fatal_error_is_not_retried() {
    let policy = RetryPolicy::default();
    let started = Instant::now();
    let mut invocations = 0;

    let result: Result<(), _> = policy
        .with_retry(|_| {
            invocations += 1;
            async { Err(LlmError::InvalidRequest("HTTP 400".to_string())) }
        })
        .await;

    assert_eq!(invocations, 1);
    assert!(matches!(result, Err(RetryError::Fatal(_))));
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_success_after_server_errors() {
    let policy = RetryPolicy::default();
    let mut observed = Vec::new();

    let result = policy
        .with_retry_observed(
            |attempt| async move {
                if attempt < 3 {
                    Err(LlmError::ServerError("HTTP 502".to_string()))
                } else {
                    Ok(attempt)
                }
            },
            |attempt| observed.push((attempt.attempt, attempt.class, attempt.delay)),
        )
        .await;

    assert_eq!(result.unwrap(), 3);
    assert_eq!(
        observed,
        vec![
            (1, FailureClass::Retryable, Some(Duration::from_secs(2))),
            (2, FailureClass::Retryable, Some(Duration::from_secs(4))),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_network_errors_are_retryable() {
    let policy = RetryPolicy::new(2, Duration::from_millis(500));
    let started = Instant::now();

    let result: Result<(), _> = policy
        .with_retry(|_| async { Err(LlmError::NetworkError("connection reset".to_string())) })
        .await;

    assert!(result.unwrap_err().is_exhausted());
    assert_eq!(started.elapsed(), Duration::from_secs(1));
}

#[test]
fn test_single_attempt_policy_never_waits() {
    let policy = RetryPolicy::new(0, Duration::from_secs(1));
    assert_eq!(policy.max_attempts, 1);
    assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
}
