//! Success envelope.

use axum::Json;
use serde::Serialize;

/// `{ success: true, data, message?, timestamp }`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    /// Always `true`.
    pub success: bool,
    /// Payload.
    pub data: T,
    /// Optional translation key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
    /// Unix time in milliseconds.
    pub timestamp: i64,
}

impl<T: Serialize> ApiResponse<T> {
    /// Wrap `data` in the success envelope.
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
            message: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
        })
    }
}

/// Result of a subscription action (subscribe, cancel).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    /// Whether the action succeeded.
    pub success: bool,
    /// Translation key.
    pub message: &'static str,
    /// Provider checkout page, for paid subscribes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
}

impl ActionResult {
    /// A successful action without a redirect.
    #[must_use]
    pub fn done(message: &'static str) -> Self {
        Self {
            success: true,
            message,
            redirect_url: None,
        }
    }
}
