//! Metered AI endpoints.
//!
//! Every handler runs the same sequence: visitor rate limit, authentication,
//! body validation, quota precheck, the paid call, best-effort telemetry,
//! then the final quota consume.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use base64::Engine;
use serde::{Deserialize, Serialize};

use meterly_core::{NewTokenUsage, QuotaCost, UserId};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::llm::{ChatMessage, ChatRequest, ProviderOptions, Usage};
use crate::rate_limit::RateLimitConfig;
use crate::response::ApiResponse;
use crate::state::AppState;

/// Characters of a downloaded file passed on to the model.
pub const FILE_PARSE_MAX_CHARS: usize = 12_000;

const SUMMARY_SYSTEM_PROMPT: &str =
    "You are a concise assistant. Summarize key points in bullet points.";

/// Chat completion result.
#[derive(Debug, Serialize)]
pub struct ChatResult {
    /// Assistant reply.
    pub content: String,
    /// Model that answered.
    pub model: String,
    /// Token accounting.
    pub usage: Usage,
}

/// Image request.
#[derive(Debug, Deserialize)]
pub struct ImageRequest {
    /// What to draw.
    #[serde(default)]
    pub prompt: Option<String>,
    /// `WIDTHxHEIGHT`, default `512x512`.
    #[serde(default)]
    pub size: Option<String>,
}

/// Image result.
#[derive(Debug, Serialize)]
pub struct ImageResult {
    /// Data URL of the rendered image.
    pub url: String,
}

/// What to do with a parsed file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileTask {
    /// Summarize with the model.
    #[default]
    Summarize,
    /// Return the raw text.
    ExtractText,
}

/// File-parse request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileParseRequest {
    /// Object key under the file store.
    #[serde(default)]
    pub file_key: Option<String>,
    /// Task, default `summarize`.
    #[serde(default)]
    pub task: FileTask,
    /// Model override.
    #[serde(default)]
    pub model: Option<String>,
}

/// File-parse result; which fields are set depends on the task.
#[derive(Debug, Serialize)]
pub struct FileParseResult {
    /// Extracted text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Model summary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Token accounting for the summary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Chat completion, 1 credit.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    auth: Option<AuthUser>,
    headers: HeaderMap,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<ChatResult>>, ApiError> {
    state
        .rate_limiter
        .enforce(&headers, &RateLimitConfig::CHAT)
        .await?;
    let auth = auth.ok_or(ApiError::Unauthorized)?;

    let Json(request) = body.map_err(|_| ApiError::BadRequest("ai.invalid_request"))?;
    if request.messages.is_empty() {
        return Err(ApiError::BadRequest("ai.invalid_request"));
    }

    state.quota.check(&auth.user_id, QuotaCost::TEXT).await?;

    let options = provider_options(&headers);
    let response = state.llm.chat(&request, &options).await?;

    record_usage(
        &state,
        auth.user_id,
        &options,
        &response.provider,
        Some(&response.model),
        &response.usage,
        "chat",
    )
    .await;

    state
        .quota
        .consume(&auth.user_id, QuotaCost::TEXT)
        .await
        .map_err(ApiError::ConsumeFailed)?;

    Ok(ApiResponse::ok(ChatResult {
        content: response.content,
        model: response.model,
        usage: response.usage,
    }))
}

/// Image generation, 3 credits. Renders the prompt into an SVG placeholder.
pub async fn image(
    State(state): State<Arc<AppState>>,
    auth: Option<AuthUser>,
    headers: HeaderMap,
    body: Result<Json<ImageRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<ImageResult>>, ApiError> {
    state
        .rate_limiter
        .enforce(&headers, &RateLimitConfig::IMAGE)
        .await?;
    let auth = auth.ok_or(ApiError::Unauthorized)?;

    let Json(request) = body.map_err(|_| ApiError::BadRequest("ai.invalid_request"))?;
    let prompt = request
        .prompt
        .filter(|p| !p.is_empty())
        .ok_or(ApiError::BadRequest("ai.invalid_request"))?;

    state.quota.check(&auth.user_id, QuotaCost::IMAGE).await?;

    let provider = header_value(&headers, "x-llm-provider").unwrap_or_else(|| "mock".to_string());
    let (width, height) = parse_size(request.size.as_deref());
    let url = svg_data_url(&prompt, width, height);

    let telemetry = NewTokenUsage {
        user_id: auth.user_id,
        provider,
        model: Some("image-gen".to_string()),
        prompt_tokens: 0,
        completion_tokens: 0,
        total_tokens: 0,
        duration_ms: 0,
        request_id: None,
        endpoint: "image".to_string(),
    };
    if let Err(e) = state.store.record_token_usage(&telemetry).await {
        tracing::error!(user_id = %auth.user_id, error = %e, "Failed to record image usage");
    }

    state
        .quota
        .consume(&auth.user_id, QuotaCost::IMAGE)
        .await
        .map_err(ApiError::ConsumeFailed)?;

    Ok(ApiResponse::ok(ImageResult { url }))
}

/// Download a stored file and extract or summarize it, 1 credit.
pub async fn file_parse(
    State(state): State<Arc<AppState>>,
    auth: Option<AuthUser>,
    headers: HeaderMap,
    body: Result<Json<FileParseRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<FileParseResult>>, ApiError> {
    state
        .rate_limiter
        .enforce(&headers, &RateLimitConfig::FILE_PARSE)
        .await?;
    let auth = auth.ok_or(ApiError::Unauthorized)?;

    let Json(request) = body.map_err(|_| ApiError::BadRequest("ai.invalid_request"))?;
    let file_key = request
        .file_key
        .filter(|k| !k.is_empty())
        .ok_or(ApiError::BadRequest("ai.invalid_request"))?;

    state.quota.check(&auth.user_id, QuotaCost::TEXT).await?;

    let raw = download(&state, &file_key).await?;
    let text: String = raw.chars().take(FILE_PARSE_MAX_CHARS).collect();

    if request.task == FileTask::ExtractText {
        state
            .quota
            .consume(&auth.user_id, QuotaCost::TEXT)
            .await
            .map_err(ApiError::ConsumeFailed)?;
        return Ok(ApiResponse::ok(FileParseResult {
            text: Some(text),
            summary: None,
            usage: None,
        }));
    }

    let options = provider_options(&headers);
    let chat_request = ChatRequest {
        model: request.model,
        messages: vec![
            ChatMessage::system(SUMMARY_SYSTEM_PROMPT),
            ChatMessage::user(format!("Summarize the following content:\n\n{text}")),
        ],
    };
    let response = state.llm.chat(&chat_request, &options).await?;

    record_usage(
        &state,
        auth.user_id,
        &options,
        &response.provider,
        Some(&response.model),
        &response.usage,
        "file-parse",
    )
    .await;

    state
        .quota
        .consume(&auth.user_id, QuotaCost::TEXT)
        .await
        .map_err(ApiError::ConsumeFailed)?;

    Ok(ApiResponse::ok(FileParseResult {
        text: None,
        summary: Some(response.content),
        usage: Some(response.usage),
    }))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn provider_options(headers: &HeaderMap) -> ProviderOptions {
    ProviderOptions {
        provider: header_value(headers, "x-llm-provider"),
        api_key: header_value(headers, "x-llm-api-key"),
        base_url: header_value(headers, "x-llm-base-url"),
    }
}

async fn record_usage(
    state: &AppState,
    user_id: UserId,
    options: &ProviderOptions,
    provider: &str,
    model: Option<&str>,
    usage: &Usage,
    endpoint: &str,
) {
    let provider = if provider.is_empty() {
        options.provider.as_deref().unwrap_or("openai")
    } else {
        provider
    };

    let row = NewTokenUsage {
        user_id,
        provider: provider.to_string(),
        model: model.map(str::to_string),
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
        duration_ms: usage.duration_ms.unwrap_or(0),
        request_id: None,
        endpoint: endpoint.to_string(),
    };

    if let Err(e) = state.store.record_token_usage(&row).await {
        tracing::error!(user_id = %user_id, endpoint, error = %e, "Failed to record token usage");
    }
}

async fn download(state: &AppState, file_key: &str) -> Result<String, ApiError> {
    let base = state.config.file_base_url.as_deref().ok_or_else(|| {
        tracing::warn!("FILE_BASE_URL not configured");
        ApiError::BadRequest("files.download_failed")
    })?;
    let url = format!("{}/{}", base.trim_end_matches('/'), file_key.trim_start_matches('/'));

    let response = state.http.get(&url).send().await.map_err(|e| {
        tracing::warn!(file_key = %file_key, error = %e, "File download failed");
        ApiError::BadRequest("files.download_failed")
    })?;

    if !response.status().is_success() {
        tracing::warn!(file_key = %file_key, status = %response.status(), "File download failed");
        return Err(ApiError::BadRequest("files.download_failed"));
    }

    response.text().await.map_err(|e| {
        tracing::warn!(file_key = %file_key, error = %e, "File body unreadable");
        ApiError::BadRequest("files.download_failed")
    })
}

fn parse_size(size: Option<&str>) -> (u32, u32) {
    let mut parts = size.unwrap_or("512x512").split('x');
    let mut next = || parts.next().and_then(|s| s.trim().parse::<u32>().ok()).unwrap_or(512);
    let width = next();
    let height = next();
    (width, height)
}

fn svg_data_url(prompt: &str, width: u32, height: u32) -> String {
    let escaped = prompt
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");
    let svg = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{width}\" height=\"{height}\">\
         <rect width=\"100%\" height=\"100%\" fill=\"#f3f4f6\"/>\
         <text x=\"50%\" y=\"50%\" dominant-baseline=\"middle\" text-anchor=\"middle\" \
         font-size=\"20\" fill=\"#111827\" font-family=\"system-ui, sans-serif\">{escaped}</text></svg>"
    );
    format!(
        "data:image/svg+xml;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(svg)
    )
}
