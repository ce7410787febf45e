//! End-to-end pipeline behavior against scripted model replies
//!
//! Covers the happy path, early veto, fatal stage failures, persistence
//! failures, resuming from a checkpoint and concurrent runs.


use futures::future::join_all;
use roundtable::error::PipelineError;
use roundtable::llm::{LlmError, LlmProvider};
use roundtable::pipeline::{RunOutcome, StageId};
use roundtable::retry::RetryPolicy;
use roundtable::run::{Decision, RunStatus, DEFAULT_RUN_TTL_SECS};
use roundtable::store::{InMemoryRunStore, PatchOp, RunStore, StoreError};
use roundtable::testing::fixtures;
use roundtable::testing::{FlakyStore, ScriptedLlmProvider};
use roundtable::PipelineHost;
use std::sync::Arc;
use test_helpers::{engine_with, fast_retry, host_with};
use tokio_test::{assert_err, assert_ok};

const IDEA: &str = "A meal planner for busy parents";

#[tokio::test]
async fn test_happy_path_completes_with_five_turns() {
    let provider = Arc::new(ScriptedLlmProvider::happy_path());
    let (host, store) = host_with(provider.clone());

    let idea = "A tool for tired parents";
    assert_eq!(idea.chars().count(), 24);
    let (run, handle) = host.submit(idea.to_string(), None).await.unwrap();
    assert_eq!(run.status, RunStatus::Init);

    let outcome = assert_ok!(handle.await.unwrap());
    assert_eq!(outcome.status(), RunStatus::Completed);
    assert_eq!(outcome.result().decision, Decision::Continue);
    assert_eq!(outcome.result().recommendation.as_deref(), Some("PROCEED"));

    let stored = store.read(&run.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Completed);
    assert_eq!(stored.conversation.len(), 5);
    let numbers: Vec<u32> = stored.conversation.iter().map(|t| t.turn_number).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
    let stages: Vec<StageId> = stored.conversation.iter().map(|t| t.stage).collect();
    assert_eq!(stages, StageId::ALL.to_vec());

    let metadata = stored.metadata.unwrap();
    assert_eq!(metadata.stage_count, 5);
    assert!(!metadata.veto_occurred);
    assert_eq!(metadata.total_tokens, 500);
    assert!(stored.completed_at.is_some());
    assert!(stored.error_message.is_none());
    assert_eq!(provider.total_calls().await, 5);
}

#[tokio::test]
async fn test_veto_stops_before_cost_and_synthesis() {
    let provider = Arc::new(ScriptedLlmProvider::with_veto());
    let (host, store) = host_with(provider.clone());

    let (run, handle) = host.submit(IDEA.to_string(), None).await.unwrap();
    let outcome = handle.await.unwrap().unwrap();

    let RunOutcome::Vetoed(result) = outcome else {
        panic!("expected a vetoed run");
    };
    assert_eq!(result.decision, Decision::Stop);
    assert_eq!(
        result.veto_reason.as_deref(),
        Some("The core input depends on a habit users do not have")
    );
    assert_eq!(result.failure_mode.as_deref(), Some("no_real_user"));
    assert_eq!(result.key_risks, vec!["Pantry data goes stale after a week"]);

    let stored = store.read(&run.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Vetoed);
    assert_eq!(stored.conversation.len(), 3);
    assert!(stored.metadata.unwrap().veto_occurred);
    assert_eq!(provider.calls(StageId::Cost).await, 0);
    assert_eq!(provider.calls(StageId::Synthesizer).await, 0);
}

#[tokio::test]
async fn test_fatal_stage_error_marks_run_failed() {
    let provider = Arc::new(ScriptedLlmProvider::happy_path().script(
        StageId::RealityChecker,
        Err(LlmError::AuthenticationFailed("HTTP 401".to_string())),
    ));
    let (host, store) = host_with(provider.clone());

    let (run, handle) = host.submit(IDEA.to_string(), None).await.unwrap();
    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, PipelineError::StageFatal { ref stage, .. } if stage == "reality_checker"));

    let stored = store.read(&run.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Failed);
    assert_eq!(stored.conversation.len(), 1);
    assert!(stored.result.is_none());
    let message = stored.error_message.unwrap();
    assert!(message.contains("reality_checker"), "got: {message}");

    // Fatal errors are not retried
    assert_eq!(provider.calls(StageId::RealityChecker).await, 1);
    assert_eq!(provider.calls(StageId::Assassin).await, 0);
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_stage() {
    let provider = Arc::new(ScriptedLlmProvider::happy_path().script_n(
        StageId::Refiner,
        Err(LlmError::ServerError("HTTP 503".to_string())),
        3,
    ));
    let (host, store) = host_with(provider.clone());

    let (run, handle) = host.submit(IDEA.to_string(), None).await.unwrap();
    assert_err!(handle.await.unwrap());

    let stored = store.read(&run.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Failed);
    assert!(stored.conversation.is_empty());
    assert_eq!(provider.calls(StageId::Refiner).await, 3);
}

#[tokio::test]
async fn test_invalid_model_output_fails_the_stage() {
    let provider = Arc::new(ScriptedLlmProvider::happy_path().script(
        StageId::Synthesizer,
        Ok(fixtures::completion_text("I recommend you proceed.")),
    ));
    let (host, store) = host_with(provider.clone());

    let (run, handle) = host.submit(IDEA.to_string(), None).await.unwrap();
    assert!(handle.await.unwrap().is_err());

    let stored = store.read(&run.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Failed);
    assert_eq!(stored.conversation.len(), 4);
    assert!(stored.result.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_stage_recovers_after_backoff() {
    let provider = Arc::new(ScriptedLlmProvider::happy_path().script_n(
        StageId::Refiner,
        Err(LlmError::RateLimitExceeded("HTTP 429".to_string())),
        2,
    ));
    let store = Arc::new(InMemoryRunStore::new());
    let engine = engine_with(provider.clone(), store.clone(), RetryPolicy::default());
    let host = PipelineHost::new(engine.clone(), DEFAULT_RUN_TTL_SECS);

    let (run, handle) = host.submit(IDEA.to_string(), None).await.unwrap();
    let outcome = handle.await.unwrap().unwrap();
    assert_eq!(outcome.status(), RunStatus::Completed);

    assert_eq!(provider.calls(StageId::Refiner).await, 3);
    assert_eq!(engine.metrics().snapshot().retries, 2);

    let stored = store.read(&run.id).await.unwrap().unwrap();
    assert_eq!(stored.conversation.len(), 5);
    assert_eq!(stored.conversation[0].turn_number, 1);
}

#[tokio::test]
async fn test_resume_from_checkpoint_skips_committed_stages() {
    let provider = Arc::new(ScriptedLlmProvider::happy_path());
    let (host, store) = host_with(provider.clone());

    let run = host.create(IDEA.to_string(), None).await.unwrap();
    let committed = fixtures::turns(2, false);
    store
        .patch_fields(
            &run.id,
            &[
                PatchOp::set("/status", &RunStatus::AgentsRunning).unwrap(),
                PatchOp::set("/conversation/0", &committed[0]).unwrap(),
                PatchOp::set("/conversation/1", &committed[1]).unwrap(),
            ],
        )
        .await
        .unwrap();

    let outcome = host.engine().run(&run.id, IDEA).await.unwrap();
    assert_eq!(outcome.status(), RunStatus::Completed);

    assert_eq!(provider.calls(StageId::Refiner).await, 0);
    assert_eq!(provider.calls(StageId::RealityChecker).await, 0);
    assert_eq!(provider.calls(StageId::Assassin).await, 1);

    let stored = store.read(&run.id).await.unwrap().unwrap();
    assert_eq!(stored.conversation.len(), 5);
    assert_eq!(stored.conversation[0], committed[0]);
    assert_eq!(stored.conversation[1], committed[1]);
}

#[tokio::test]
async fn test_assassin_sees_earlier_messages() {
    let provider = Arc::new(ScriptedLlmProvider::happy_path());
    let (host, _store) = host_with(provider.clone());

    let (_run, handle) = host.submit(IDEA.to_string(), None).await.unwrap();
    handle.await.unwrap().unwrap();

    let prompts = provider.prompts().await;
    let (_, assassin_prompt) = prompts
        .iter()
        .find(|(stage, _)| stage == "assassin")
        .unwrap();
    assert!(assassin_prompt.contains(IDEA));
    assert!(assassin_prompt.contains("Refiner:"));
    assert!(assassin_prompt.contains("Reality Checker:"));
    assert!(!assassin_prompt.contains("Cost Analyst:"));
}

#[tokio::test]
async fn test_rerunning_finished_run_makes_no_calls() {
    let provider = Arc::new(ScriptedLlmProvider::happy_path());
    let (host, _store) = host_with(provider.clone());

    let (run, handle) = host.submit(IDEA.to_string(), None).await.unwrap();
    let first = handle.await.unwrap().unwrap();

    let second = host.engine().run(&run.id, IDEA).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(provider.total_calls().await, 5);
}

#[tokio::test]
async fn test_rerunning_failed_run_reports_failure() {
    let provider = Arc::new(ScriptedLlmProvider::happy_path().script(
        StageId::Refiner,
        Err(LlmError::InvalidRequest("HTTP 400".to_string())),
    ));
    let (host, store) = host_with(provider.clone());

    let (run, handle) = host.submit(IDEA.to_string(), None).await.unwrap();
    assert!(handle.await.unwrap().is_err());

    let err = host.engine().run(&run.id, IDEA).await.unwrap_err();
    assert!(matches!(err, PipelineError::RunFailed { .. }));
    assert_eq!(provider.calls(StageId::Refiner).await, 1);

    let stored = store.read(&run.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Failed);
}

#[tokio::test]
async fn test_unknown_run_is_not_found() {
    let provider = Arc::new(ScriptedLlmProvider::happy_path());
    let (host, _store) = host_with(provider);

    let err = host.engine().run("run_missing", IDEA).await.unwrap_err();
    assert!(matches!(err, PipelineError::RunNotFound { .. }));
}

#[tokio::test]
async fn test_store_failure_marks_run_failed() {
    let provider: Arc<dyn LlmProvider> = Arc::new(ScriptedLlmProvider::happy_path());
    // Patch 0 marks the run running, patch 1 commits the refiner, patch 2 fails
    let store = Arc::new(FlakyStore::failing_patch(2));
    let engine = engine_with(provider, store.clone(), fast_retry());
    let host = PipelineHost::new(engine, DEFAULT_RUN_TTL_SECS);

    let (run, handle) = host.submit(IDEA.to_string(), None).await.unwrap();
    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Persistence(StoreError::Unavailable(_))
    ));

    let stored = store.read(&run.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Failed);
    assert_eq!(stored.conversation.len(), 1);
    assert!(stored.result.is_none());
    assert!(stored
        .error_message
        .unwrap()
        .contains("Storage unavailable"));
}

#[tokio::test]
async fn test_invalid_idea_is_rejected_before_persisting() {
    let provider = Arc::new(ScriptedLlmProvider::happy_path());
    let (host, store) = host_with(provider.clone());

    let err = host.submit("too short".to_string(), None).await.unwrap_err();
    assert!(matches!(err, PipelineError::Validation { .. }));

    let err = host.submit("x".repeat(5001), None).await.unwrap_err();
    assert!(matches!(err, PipelineError::Validation { .. }));

    assert!(store.is_empty().await);
    assert_eq!(provider.total_calls().await, 0);
}

#[tokio::test]
async fn test_concurrent_runs_are_independent() {
    let provider = Arc::new(ScriptedLlmProvider::happy_path());
    let (host, store) = host_with(provider.clone());

    let mut handles = Vec::new();
    let mut ids = Vec::new();
    for i in 0..5 {
        let (run, handle) = host
            .submit(format!("Idea number {i} for a team of testers"), None)
            .await
            .unwrap();
        ids.push(run.id);
        handles.push(handle);
    }

    for outcome in join_all(handles).await {
        assert_eq!(outcome.unwrap().unwrap().status(), RunStatus::Completed);
    }

    assert_eq!(store.len().await, 5);
    for id in &ids {
        let stored = store.read(id).await.unwrap().unwrap();
        assert_eq!(stored.conversation.len(), 5);
        assert!(stored.conversation.iter().all(|t| t.turn_number == t.stage.turn_number()));
    }
    assert_eq!(provider.total_calls().await, 25);
}
