//! LLM adapters behind the metered AI endpoints.
//!
//! Every adapter answers a single non-streaming chat completion. The
//! [`LlmRouter`] picks one per request from the `x-llm-provider` header, the
//! configured default and demo mode.

pub mod mock;
pub mod openai;

pub use mock::MockAdapter;
pub use openai::OpenAiAdapter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ServiceConfig;

/// Error type for LLM calls.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider returned an error status.
    #[error("LLM API error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body.
        message: String,
    },

    /// The provider returned no completion.
    #[error("LLM returned no choices")]
    EmptyResponse,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instructions.
    System,
    /// End user.
    User,
    /// Model output.
    Assistant,
}

/// One chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author.
    pub role: ChatRole,
    /// Text.
    pub content: String,
}

impl ChatMessage {
    /// A system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// A chat completion request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Model override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Conversation so far.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

/// Token accounting for one completion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    /// Prompt tokens.
    pub prompt_tokens: i64,
    /// Completion tokens.
    pub completion_tokens: i64,
    /// Total tokens.
    pub total_tokens: i64,
    /// Wall-clock time of the provider call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

/// A chat completion.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    /// Reply text.
    pub content: String,
    /// Token accounting.
    pub usage: Usage,
    /// Model that answered.
    pub model: String,
    /// Adapter that answered.
    pub provider: String,
}

/// Per-request provider overrides, read from `x-llm-*` headers.
#[derive(Debug, Clone, Default)]
pub struct ProviderOptions {
    /// `openai`, `proxy` or `mock`.
    pub provider: Option<String>,
    /// API key override.
    pub api_key: Option<String>,
    /// Base URL override.
    pub base_url: Option<String>,
}

/// A chat completion backend.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Run one completion.
    async fn chat(
        &self,
        request: &ChatRequest,
        options: &ProviderOptions,
    ) -> Result<ChatResponse, LlmError>;
}

/// Chooses an adapter per request.
pub struct LlmRouter {
    openai: OpenAiAdapter,
    mock: MockAdapter,
    demo_mode: bool,
    default_provider: String,
}

impl LlmRouter {
    /// Build the router from service configuration.
    #[must_use]
    pub fn new(config: &ServiceConfig, client: reqwest::Client) -> Self {
        Self {
            openai: OpenAiAdapter::new(
                client,
                config.openai_base_url.clone(),
                config.openai_api_key.clone(),
                config.ai_default_model.clone(),
            ),
            mock: MockAdapter,
            demo_mode: config.ai_demo_mode,
            default_provider: config.ai_default_provider.clone(),
        }
    }

    /// Pick the adapter for these options.
    ///
    /// Demo mode without a caller-supplied key always answers from the mock.
    /// Unknown provider names fall back to the OpenAI-compatible adapter.
    #[must_use]
    pub fn pick(&self, options: &ProviderOptions) -> &dyn LlmAdapter {
        if self.demo_mode && options.api_key.is_none() {
            return &self.mock;
        }

        let provider = options
            .provider
            .as_deref()
            .unwrap_or(&self.default_provider);

        match provider {
            "mock" => &self.mock,
            _ => &self.openai,
        }
    }

    /// Run a completion on the picked adapter.
    pub async fn chat(
        &self,
        request: &ChatRequest,
        options: &ProviderOptions,
    ) -> Result<ChatResponse, LlmError> {
        self.pick(options).chat(request, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router(demo_mode: bool, default_provider: &str) -> LlmRouter {
        let config = ServiceConfig {
            ai_demo_mode: demo_mode,
            ai_default_provider: default_provider.into(),
            ..ServiceConfig::default()
        };
        LlmRouter::new(&config, reqwest::Client::new())
    }

    async fn provider_of(router: &LlmRouter, options: &ProviderOptions) -> String {
        let request = ChatRequest {
            model: None,
            messages: vec![ChatMessage::user("hi")],
        };
        // The mock never fails; the OpenAI adapter fails fast without a key.
        match router.chat(&request, options).await {
            Ok(response) => response.provider,
            Err(LlmError::Configuration(_)) => "openai".into(),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn demo_mode_without_key_uses_mock() {
        let router = router(true, "openai");
        let options = ProviderOptions {
            provider: Some("openai".into()),
            ..ProviderOptions::default()
        };
        assert_eq!(provider_of(&router, &options).await, "mock");
    }

    #[tokio::test]
    async fn mock_header_selects_mock() {
        let router = router(false, "openai");
        let options = ProviderOptions {
            provider: Some("mock".into()),
            ..ProviderOptions::default()
        };
        assert_eq!(provider_of(&router, &options).await, "mock");
    }

    #[tokio::test]
    async fn unknown_provider_falls_back_to_openai() {
        let router = router(false, "mock");
        let options = ProviderOptions {
            provider: Some("anthropic".into()),
            ..ProviderOptions::default()
        };
        assert_eq!(provider_of(&router, &options).await, "openai");
    }

    #[tokio::test]
    async fn default_provider_applies_without_header() {
        let router = router(false, "mock");
        assert_eq!(
            provider_of(&router, &ProviderOptions::default()).await,
            "mock"
        );
    }
}
