//! OpenAI-compatible chat completions provider
//!
//! Talks to either the public OpenAI API or an Azure OpenAI deployment. Each
//! call is a single HTTP request; status codes are mapped onto [`LlmError`]
//! variants so the retry layer can tell throttling and server faults apart from
//! everything else.

use crate::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmError, LlmProvider, Message,
    MessageRole, ResponseFormat, TokenUsage,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Which wire dialect of the chat completions API to speak
#[derive(Debug, Clone, PartialEq)]
pub enum ApiFlavor {
    /// `{base_url}/chat/completions` with bearer auth
    OpenAi,
    /// `{base_url}/openai/deployments/{deployment}/chat/completions` with `api-key` auth
    Azure {
        deployment: String,
        api_version: String,
    },
}

/// OpenAI provider configuration
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    pub flavor: ApiFlavor,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout: Duration::from_secs(60),
            flavor: ApiFlavor::OpenAi,
        }
    }
}

/// OpenAI provider implementation
pub struct OpenAiProvider {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiProvider {
    /// Create a new OpenAI provider
    pub fn new(config: OpenAiConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::NotConfigured(
                "OpenAI API key is required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        Ok(Self { config, client })
    }

    /// Chat completions endpoint for the configured flavor (pure function)
    fn completions_url(config: &OpenAiConfig) -> String {
        let base = config.base_url.trim_end_matches('/');
        match &config.flavor {
            ApiFlavor::OpenAi => format!("{base}/chat/completions"),
            ApiFlavor::Azure {
                deployment,
                api_version,
            } => format!(
                "{base}/openai/deployments/{deployment}/chat/completions?api-version={api_version}"
            ),
        }
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.config.flavor {
            ApiFlavor::OpenAi => {
                builder.header("Authorization", format!("Bearer {}", self.config.api_key))
            }
            ApiFlavor::Azure { .. } => builder.header("api-key", &self.config.api_key),
        }
    }

    /// Estimate token count for messages (pure function)
    fn estimate_token_count(messages: &[OpenAiMessage]) -> usize {
        messages.iter().map(|m| m.content.len() / 4).sum()
    }

    /// Convert completion request to OpenAI format (pure function)
    fn convert_to_openai_request(request: &CompletionRequest) -> OpenAiCompletionRequest {
        let response_format = request.response_format.as_ref().map(|rf| match rf {
            ResponseFormat::Text => OpenAiResponseFormat {
                format_type: "text".to_string(),
            },
            ResponseFormat::Json => OpenAiResponseFormat {
                format_type: "json_object".to_string(),
            },
        });

        OpenAiCompletionRequest {
            model: request.model.clone(),
            messages: request.messages.iter().map(Self::convert_message).collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            response_format,
        }
    }

    /// Parse OpenAI completion response (pure function)
    fn parse_completion_response(
        openai_response: OpenAiCompletionResponse,
    ) -> Result<CompletionResponse, LlmError> {
        let Some(choice) = openai_response.choices.into_iter().next() else {
            return Err(LlmError::InvalidResponse(
                "No choices returned from OpenAI".to_string(),
            ));
        };

        let usage = openai_response.usage.unwrap_or_default();

        Ok(CompletionResponse {
            content: choice.message.content,
            model: openai_response.model,
            usage: TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            },
            finish_reason: FinishReason::from_api(choice.finish_reason.as_deref()),
        })
    }

    /// Map a non-success HTTP status onto a classifiable error (pure function)
    fn error_for_status(status: StatusCode, body: &str) -> LlmError {
        let detail = format!("OpenAI API error: {status} - {body}");
        match status {
            StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimitExceeded(detail),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                LlmError::AuthenticationFailed(detail)
            }
            StatusCode::NOT_FOUND => LlmError::ModelNotFound(detail),
            s if s.is_server_error() => LlmError::ServerError(detail),
            _ => LlmError::ApiError(detail),
        }
    }

    fn convert_message(message: &Message) -> OpenAiMessage {
        OpenAiMessage {
            role: match message.role {
                MessageRole::System => "system".to_string(),
                MessageRole::User => "user".to_string(),
                MessageRole::Assistant => "assistant".to_string(),
            },
            content: message.content.clone(),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        match self.config.flavor {
            ApiFlavor::OpenAi => "openai",
            ApiFlavor::Azure { .. } => "azure",
        }
    }

    fn available_models(&self) -> Vec<String> {
        match &self.config.flavor {
            ApiFlavor::Azure { deployment, .. } => vec![deployment.clone()],
            ApiFlavor::OpenAi => vec![
                "gpt-4o".to_string(),
                "gpt-4o-mini".to_string(),
                "gpt-4-turbo".to_string(),
            ],
        }
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let openai_request = Self::convert_to_openai_request(&request);
        self.log_request_info(&openai_request, request.metadata.get("stage"));

        let openai_response = self.make_api_request(&openai_request).await?;
        let response = Self::parse_completion_response(openai_response)?;
        self.log_response_info(&response);
        Ok(response)
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        let url = match &self.config.flavor {
            ApiFlavor::OpenAi => format!("{}/models", self.config.base_url.trim_end_matches('/')),
            ApiFlavor::Azure { api_version, .. } => format!(
                "{}/openai/models?api-version={api_version}",
                self.config.base_url.trim_end_matches('/')
            ),
        };

        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(LlmError::AuthenticationFailed(format!(
                "{} API health check returned {}",
                self.name(),
                response.status()
            )))
        }
    }
}

impl OpenAiProvider {
    fn log_request_info(&self, request: &OpenAiCompletionRequest, stage: Option<&String>) {
        let estimated_tokens = Self::estimate_token_count(&request.messages);
        debug!(
            stage = stage.map(String::as_str).unwrap_or("-"),
            "OpenAI request: {} messages, estimated ~{} tokens",
            request.messages.len(),
            estimated_tokens
        );

        if estimated_tokens > 120000 {
            warn!(
                "Large request detected: estimated {} tokens, may exceed model limits",
                estimated_tokens
            );
        }
    }

    /// Make single API request (impure I/O)
    async fn make_api_request(
        &self,
        openai_request: &OpenAiCompletionRequest,
    ) -> Result<OpenAiCompletionResponse, LlmError> {
        let response = self
            .authorize(self.client.post(Self::completions_url(&self.config)))
            .header("Content-Type", "application/json")
            .json(openai_request)
            .send()
            .await
            .map_err(|e| {
                let error_msg = format!(
                    "HTTP request failed: {} (is_connect: {}, is_timeout: {})",
                    e,
                    e.is_connect(),
                    e.is_timeout()
                );
                warn!("OpenAI network error details: {}", error_msg);
                LlmError::NetworkError(error_msg)
            })?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let err = Self::error_for_status(status, &error_text);
            if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                warn!("OpenAI transient failure: {}", err);
            } else {
                error!(
                    "OpenAI API client error - Status: {}, Response: {}",
                    status, error_text
                );
            }
            return Err(err);
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }

    fn log_response_info(&self, response: &CompletionResponse) {
        debug!(
            "OpenAI response: {} tokens used (prompt: {}, completion: {}), finish_reason: {:?}",
            response.usage.total_tokens,
            response.usage.prompt_tokens,
            response.usage.completion_tokens,
            response.finish_reason,
        );
    }
}

#[derive(Debug, Serialize)]
struct OpenAiCompletionRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<OpenAiResponseFormat>,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiCompletionResponse {
    model: String,
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Serialize)]
struct OpenAiResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn keyed(flavor: ApiFlavor) -> OpenAiConfig {
        OpenAiConfig {
            api_key: "test-key".to_string(),
            base_url: "https://example.openai.azure.com/".to_string(),
            flavor,
            ..Default::default()
        }
    }

    #[test]
    fn test_openai_config_default() {
        let config = OpenAiConfig::default();
        assert_eq!(config.base_url, "https://api.openai.com/v1");
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.flavor, ApiFlavor::OpenAi);
        assert!(config.api_key.is_empty());
    }

    #[test]
    fn test_openai_provider_creation_without_api_key() {
        let result = OpenAiProvider::new(OpenAiConfig::default());
        assert!(matches!(result, Err(LlmError::NotConfigured(_))));
    }

    #[test]
    fn test_provider_name_follows_flavor() {
        let openai = OpenAiProvider::new(keyed(ApiFlavor::OpenAi)).unwrap();
        let azure = OpenAiProvider::new(keyed(ApiFlavor::Azure {
            deployment: "gpt-4o".to_string(),
            api_version: "2024-06-01".to_string(),
        }))
        .unwrap();

        assert_eq!(openai.name(), "openai");
        assert_eq!(azure.name(), "azure");
        assert_eq!(azure.available_models(), vec!["gpt-4o".to_string()]);
    }

    #[test]
    fn test_completions_url() {
        assert_eq!(
            OpenAiProvider::completions_url(&keyed(ApiFlavor::OpenAi)),
            "https://example.openai.azure.com/chat/completions"
        );
        assert_eq!(
            OpenAiProvider::completions_url(&keyed(ApiFlavor::Azure {
                deployment: "eval".to_string(),
                api_version: "2024-06-01".to_string(),
            })),
            "https://example.openai.azure.com/openai/deployments/eval/chat/completions?api-version=2024-06-01"
        );
    }

    #[test]
    fn test_error_for_status_classification() {
        assert!(matches!(
            OpenAiProvider::error_for_status(StatusCode::TOO_MANY_REQUESTS, ""),
            LlmError::RateLimitExceeded(_)
        ));
        assert!(matches!(
            OpenAiProvider::error_for_status(StatusCode::BAD_GATEWAY, ""),
            LlmError::ServerError(_)
        ));
        assert!(matches!(
            OpenAiProvider::error_for_status(StatusCode::UNAUTHORIZED, ""),
            LlmError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            OpenAiProvider::error_for_status(StatusCode::BAD_REQUEST, "bad"),
            LlmError::ApiError(_)
        ));
    }

    #[test]
    fn test_openai_request_serialization() {
        let request = CompletionRequest {
            messages: vec![Message::system("sys"), Message::user("Hello")],
            model: "gpt-4o".to_string(),
            max_tokens: Some(100),
            temperature: Some(0.25),
            response_format: Some(ResponseFormat::Json),
            metadata: HashMap::new(),
        };

        let json = serde_json::to_string(&OpenAiProvider::convert_to_openai_request(&request))
            .unwrap();
        assert!(json.contains("\"model\":\"gpt-4o\""));
        assert!(json.contains("\"max_tokens\":100"));
        assert!(json.contains("\"temperature\":0.25"));
        assert!(json.contains("\"json_object\""));
    }

    #[test]
    fn test_parse_response_without_choices() {
        let response = OpenAiCompletionResponse {
            model: "gpt-4o".to_string(),
            choices: vec![],
            usage: None,
        };
        assert!(matches!(
            OpenAiProvider::parse_completion_response(response),
            Err(LlmError::InvalidResponse(_))
        ));
    }
}
