//! Integration tests for the OpenAI-compatible provider
//!
//! Tests behavioral contracts against a mock HTTP server:
//! - request shape and authentication for both API flavors
//! - status code classification used by the retry layer
//! - the single-call contract used by the pipeline

use roundtable::llm::provider::{
    CompletionRequest, FinishReason, LlmError, LlmProvider, Message, ResponseFormat,
};
use roundtable::llm::providers::openai::{ApiFlavor, OpenAiConfig, OpenAiProvider};
use roundtable::llm::{ModelCall, ModelCaller};
use roundtable::retry::{FailureClass, RetryClassify, RetryPolicy};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(base_url: &str) -> OpenAiConfig {
    OpenAiConfig {
        api_key: "test-api-key".to_string(),
        base_url: base_url.to_string(),
        timeout: Duration::from_secs(5),
        flavor: ApiFlavor::OpenAi,
    }
}

fn test_request() -> CompletionRequest {
    CompletionRequest {
        messages: vec![Message::system("You are a refiner."), Message::user("Idea")],
        model: "gpt-4o-mini".to_string(),
        max_tokens: Some(2000),
        temperature: Some(0.2),
        response_format: Some(ResponseFormat::Json),
        metadata: HashMap::new(),
    }
}

fn completion_body(content: &str) -> Value {
    json!({
        "id": "chatcmpl-123",
        "object": "chat.completion",
        "created": 1677652288,
        "model": "gpt-4o-mini",
        "choices": [
            {
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }
        ],
        "usage": { "prompt_tokens": 120, "completion_tokens": 80, "total_tokens": 200 }
    })
}

#[tokio::test]
async fn test_successful_completion_sends_json_mode_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer test-api-key"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "max_tokens": 2000,
            "response_format": { "type": "json_object" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("{\"veto\": false}")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new(test_config(&mock_server.uri())).unwrap();
    let response = provider.complete(test_request()).await.unwrap();

    assert_eq!(response.content.as_deref(), Some("{\"veto\": false}"));
    assert_eq!(response.usage.total_tokens, 200);
    assert_eq!(response.finish_reason, FinishReason::Stop);
}

#[tokio::test]
async fn test_azure_flavor_uses_deployment_url_and_api_key_header() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/openai/deployments/roundtable-gpt4o/chat/completions"))
        .and(query_param("api-version", "2024-06-01"))
        .and(header("api-key", "test-api-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("{}")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = OpenAiConfig {
        flavor: ApiFlavor::Azure {
            deployment: "roundtable-gpt4o".to_string(),
            api_version: "2024-06-01".to_string(),
        },
        ..test_config(&mock_server.uri())
    };
    let provider = OpenAiProvider::new(config).unwrap();
    assert_eq!(provider.name(), "azure");

    let response = provider.complete(test_request()).await.unwrap();
    assert_eq!(response.content.as_deref(), Some("{}"));
}

#[tokio::test]
async fn test_status_codes_map_to_retry_classes() {
    let cases = [
        (429, FailureClass::Retryable),
        (500, FailureClass::Retryable),
        (503, FailureClass::Retryable),
        (400, FailureClass::Fatal),
        (401, FailureClass::Fatal),
        (404, FailureClass::Fatal),
    ];

    for (status, expected) in cases {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "error": { "message": "mock failure", "type": "test" }
            })))
            .mount(&mock_server)
            .await;

        let provider = OpenAiProvider::new(test_config(&mock_server.uri())).unwrap();
        let err = provider.complete(test_request()).await.unwrap_err();
        assert_eq!(err.classify(), expected, "status {status} gave {err:?}");
    }
}

#[tokio::test]
async fn test_auth_failure_is_reported_as_such() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new(test_config(&mock_server.uri())).unwrap();
    let err = provider.complete(test_request()).await.unwrap_err();
    assert!(matches!(err, LlmError::AuthenticationFailed(_)));
}

#[tokio::test]
async fn test_provider_makes_exactly_one_request_per_call() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new(test_config(&mock_server.uri())).unwrap();
    let err = provider.complete(test_request()).await.unwrap_err();
    assert!(matches!(err, LlmError::ServerError(_)));
}

#[tokio::test]
async fn test_malformed_body_is_invalid_response() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new(test_config(&mock_server.uri())).unwrap();
    let err = provider.complete(test_request()).await.unwrap_err();
    assert!(matches!(err, LlmError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_caller_recovers_from_rate_limit_with_retry() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(completion_body("{\"veto\": false}")),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new(test_config(&mock_server.uri())).unwrap();
    let caller = ModelCaller::new(Arc::new(provider), "gpt-4o-mini");
    let call = ModelCall {
        stage: "assassin".to_string(),
        system_prompt: "You are the assassin.".to_string(),
        user_prompt: "Idea to evaluate".to_string(),
        temperature: 0.2,
        max_tokens: 1500,
    };

    let policy = RetryPolicy::new(3, Duration::from_millis(5));
    let reply = policy
        .with_retry(|_| caller.call(&call))
        .await
        .unwrap();

    assert_eq!(reply.content, "{\"veto\": false}");
    assert_eq!(reply.usage_tokens, 200);
}

#[tokio::test]
async fn test_health_check_reports_auth_failure() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new(test_config(&mock_server.uri())).unwrap();
    assert!(provider.health_check().await.is_err());
}
