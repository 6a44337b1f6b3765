//! OpenAI-compatible chat completions adapter.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Instant;

use super::{ChatRequest, ChatResponse, LlmAdapter, LlmError, ProviderOptions, Usage};

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<CompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CompletionUsage {
    #[serde(default)]
    prompt_tokens: i64,
    #[serde(default)]
    completion_tokens: i64,
    #[serde(default)]
    total_tokens: i64,
}

/// Adapter for `/chat/completions` on OpenAI or any compatible proxy.
#[derive(Debug, Clone)]
pub struct OpenAiAdapter {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    default_model: String,
}

impl OpenAiAdapter {
    /// Create an adapter; `api_key` and `base_url` can be overridden per request.
    #[must_use]
    pub fn new(
        client: Client,
        base_url: String,
        api_key: Option<String>,
        default_model: String,
    ) -> Self {
        Self {
            client,
            base_url,
            api_key,
            default_model,
        }
    }
}

#[async_trait]
impl LlmAdapter for OpenAiAdapter {
    async fn chat(
        &self,
        request: &ChatRequest,
        options: &ProviderOptions,
    ) -> Result<ChatResponse, LlmError> {
        let api_key = options
            .api_key
            .as_ref()
            .or(self.api_key.as_ref())
            .ok_or_else(|| LlmError::Configuration("OpenAI API key not configured".into()))?;

        let base_url = options
            .base_url
            .as_deref()
            .unwrap_or(&self.base_url)
            .trim_end_matches('/');

        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        tracing::debug!(model = %model, messages = request.messages.len(), "Sending chat completion");

        let start = Instant::now();
        let response = self
            .client
            .post(format!("{base_url}/chat/completions"))
            .bearer_auth(api_key)
            .json(&json!({
                "model": model,
                "messages": request.messages,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: CompletionResponse = response.json().await?;
        let duration_ms = i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX);

        let content = body
            .choices
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse)?
            .message
            .content
            .unwrap_or_default();
        let usage = body.usage.unwrap_or_default();

        Ok(ChatResponse {
            content,
            usage: Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
                duration_ms: Some(duration_ms),
            },
            model: body.model.unwrap_or(model),
            provider: "openai".to_string(),
        })
    }
}
