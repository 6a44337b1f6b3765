//! Offline adapter that echoes the last user message.

use async_trait::async_trait;

use super::{ChatRequest, ChatResponse, ChatRole, LlmAdapter, LlmError, ProviderOptions, Usage};

/// Deterministic adapter for demo mode and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockAdapter;

#[async_trait]
impl LlmAdapter for MockAdapter {
    async fn chat(
        &self,
        request: &ChatRequest,
        _options: &ProviderOptions,
    ) -> Result<ChatResponse, LlmError> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map_or("Hello from mock adapter.", |m| m.content.as_str());

        let content = format!("Mock reply: {last_user}");
        let tokens = i64::try_from(content.chars().count()).unwrap_or(i64::MAX);

        Ok(ChatResponse {
            usage: Usage {
                prompt_tokens: 0,
                completion_tokens: tokens,
                total_tokens: tokens,
                duration_ms: None,
            },
            model: request
                .model
                .clone()
                .unwrap_or_else(|| "mock-model".to_string()),
            provider: "mock".to_string(),
            content,
        })
    }
}
