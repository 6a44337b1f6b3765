//! Creem webhook handler.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use crate::creem::{CreemError, WebhookEvent};
use crate::error::ApiError;
use crate::reconciler::EventOutcome;
use crate::response::ApiResponse;
use crate::state::AppState;

/// Header carrying the HMAC-SHA256 of the raw body.
pub const SIGNATURE_HEADER: &str = "creem-signature";

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was processed.
    pub received: bool,
}

/// Handle Creem webhooks.
///
/// The signature is checked over the raw body before anything is parsed,
/// so a rejected delivery never touches the store. Handler failures return
/// 500 and Creem redelivers the event.
pub async fn creem_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<ApiResponse<WebhookResponse>>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::MissingSignature)?;

    let creem = state.creem.as_ref().ok_or_else(|| {
        ApiError::internal("payment.webhook_error", "Creem not configured")
    })?;

    creem
        .verify_webhook_signature(&body, signature)
        .map_err(|e| match e {
            CreemError::InvalidSignature => {
                tracing::warn!("Invalid Creem webhook signature");
                ApiError::InvalidSignature
            }
            other => ApiError::internal("payment.webhook_error", other.to_string()),
        })?;

    let event: WebhookEvent = serde_json::from_str(&body).map_err(|e| {
        tracing::error!(error = %e, "Unparseable Creem webhook body");
        ApiError::internal("payment.webhook_error", e.to_string())
    })?;

    tracing::info!(
        event_type = %event.event_type,
        event_id = ?event.id,
        "Received Creem webhook"
    );

    match state.reconciler.handle_event(&event).await {
        Ok(EventOutcome::Applied) => {
            tracing::debug!(event_type = %event.event_type, "Webhook applied");
        }
        Ok(EventOutcome::Ignored) => {
            tracing::debug!(event_type = %event.event_type, "Webhook ignored");
        }
        Err(e) => {
            tracing::error!(
                event_type = %event.event_type,
                event_id = ?event.id,
                error = %e,
                "Webhook handling failed"
            );
            return Err(ApiError::internal("payment.webhook_error", e.to_string()));
        }
    }

    Ok(ApiResponse::ok(WebhookResponse { received: true }))
}
