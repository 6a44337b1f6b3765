//! API error types and responses.
//!
//! Clients receive a taxonomy key (`quota.exceeded`, `payment.signature_invalid`,
//! ...) rather than prose; internal detail is logged and never rendered.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use meterly_core::QuotaError;
use meterly_store::StoreError;

use crate::creem::CreemError;
use crate::llm::LlmError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No resolvable user identity.
    #[error("unauthorized")]
    Unauthorized,

    /// The webhook signature header is absent.
    #[error("missing webhook signature")]
    MissingSignature,

    /// A webhook or redirect signature did not verify.
    #[error("invalid signature")]
    InvalidSignature,

    /// Required redirect parameters are absent.
    #[error("missing parameters")]
    MissingParams,

    /// Malformed input, identified by its taxonomy key.
    #[error("bad request: {0}")]
    BadRequest(&'static str),

    /// A referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(&'static str),

    /// The resource already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The quota precheck rejected the operation.
    #[error("quota rejected: {}", .0.key())]
    QuotaRejected(QuotaError),

    /// The final consume failed after the paid work completed.
    #[error("quota consume failed: {}", .0.key())]
    ConsumeFailed(QuotaError),

    /// Visitor rate limit exceeded.
    #[error("rate limited, retry after {retry_after_seconds}s")]
    RateLimited {
        /// Requests allowed per window.
        limit: u32,
        /// Seconds until the window resets.
        retry_after_seconds: u64,
        /// Unix time (seconds) when the window resets.
        reset_at: i64,
    },

    /// Unexpected failure; `key` is rendered, `message` only logged.
    #[error("{key}: {message}")]
    Internal {
        /// Client-facing taxonomy key.
        key: &'static str,
        /// Internal detail.
        message: String,
    },
}

impl ApiError {
    /// An internal error rendered under `key`.
    pub fn internal(key: &'static str, message: impl Into<String>) -> Self {
        Self::Internal {
            key,
            message: message.into(),
        }
    }

    /// The taxonomy key rendered for this error.
    #[must_use]
    pub fn key(&self) -> &'static str {
        match self {
            Self::Unauthorized => "auth.unauthorized",
            Self::MissingSignature => "payment.missing_signature",
            Self::InvalidSignature => "payment.signature_invalid",
            Self::MissingParams => "payment.missing_params",
            Self::BadRequest(key) | Self::NotFound(key) | Self::Internal { key, .. } => key,
            Self::Conflict(_) => "conflict",
            Self::QuotaRejected(err) | Self::ConsumeFailed(err) => err.key(),
            Self::RateLimited { .. } => "rate_limit.exceeded",
        }
    }

    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized | Self::InvalidSignature => StatusCode::UNAUTHORIZED,
            Self::MissingSignature | Self::MissingParams | Self::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::QuotaRejected(_) => StatusCode::PAYMENT_REQUIRED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::ConsumeFailed(_) | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON error envelope.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    error: &'static str,
    code: u16,
    timestamp: i64,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        match &self {
            Self::Internal { key, message } => {
                tracing::error!(key = %key, error = %message, "Internal server error");
            }
            Self::ConsumeFailed(err) => {
                tracing::error!(key = %err.key(), "Quota consume failed after paid work");
            }
            _ => tracing::debug!(status = %status, key = %self.key(), "Request rejected"),
        }

        let body = ErrorResponse {
            success: false,
            error: self.key(),
            code: status.as_u16(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        };

        let mut response = (status, Json(body)).into_response();

        if let Self::RateLimited {
            limit,
            retry_after_seconds,
            reset_at,
        } = self
        {
            let headers = response.headers_mut();
            headers.insert("retry-after", HeaderValue::from(retry_after_seconds));
            headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
            headers.insert("x-ratelimit-remaining", HeaderValue::from(0u32));
            headers.insert("x-ratelimit-reset", HeaderValue::from(reset_at));
        }

        response
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => Self::Conflict(msg),
            other => Self::internal("internal_error", other.to_string()),
        }
    }
}

impl From<CreemError> for ApiError {
    fn from(err: CreemError) -> Self {
        Self::internal("payment.provider_error", err.to_string())
    }
}

impl From<LlmError> for ApiError {
    fn from(err: LlmError) -> Self {
        Self::internal("ai.provider_error", err.to_string())
    }
}

impl From<QuotaError> for ApiError {
    fn from(err: QuotaError) -> Self {
        Self::QuotaRejected(err)
    }
}
