//! Single model call used by each pipeline stage
//!
//! Wraps an [`LlmProvider`] with the model name and the JSON response format,
//! and turns a completion into a [`ModelReply`]. One `call` is one external
//! request; the retry layer sits above this.

use crate::llm::provider::{CompletionRequest, LlmError, LlmProvider, Message, ResponseFormat};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Parameters for one stage call
#[derive(Debug, Clone)]
pub struct ModelCall {
    /// Stage id, forwarded as request metadata
    pub stage: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Normalized reply from the model
#[derive(Debug, Clone, PartialEq)]
pub struct ModelReply {
    pub content: String,
    pub usage_tokens: u32,
    pub model: String,
}

/// Calls one configured model through a provider
#[derive(Clone)]
pub struct ModelCaller {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl ModelCaller {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Perform exactly one completion request.
    ///
    /// An empty or missing content field is reported as `InvalidResponse`.
    pub async fn call(&self, call: &ModelCall) -> Result<ModelReply, LlmError> {
        let mut metadata = HashMap::new();
        metadata.insert("stage".to_string(), call.stage.clone());

        let request = CompletionRequest {
            messages: vec![
                Message::system(call.system_prompt.clone()),
                Message::user(call.user_prompt.clone()),
            ],
            model: self.model.clone(),
            max_tokens: Some(call.max_tokens),
            temperature: Some(call.temperature),
            response_format: Some(ResponseFormat::Json),
            metadata,
        };

        let response = self.provider.complete(request).await?;

        let content = response
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                LlmError::InvalidResponse(format!("empty response from model for {}", call.stage))
            })?;

        debug!(
            stage = %call.stage,
            tokens = response.usage.total_tokens,
            "model call completed"
        );

        Ok(ModelReply {
            content,
            usage_tokens: response.usage.total_tokens,
            model: response.model,
        })
    }
}
