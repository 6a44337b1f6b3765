//! Account management handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use meterly_core::{UsageSummary, User};
use meterly_store::Store;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::handlers::payment::{current_subscription, SubscriptionData};
use crate::provisioning::provision_free_tier;
use crate::response::ApiResponse;
use crate::state::AppState;

/// Account response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    /// User ID.
    pub user_id: String,
    /// Email, if known.
    pub email: Option<String>,
    /// Display name, if known.
    pub name: Option<String>,
    /// Current subscription.
    pub subscription: SubscriptionData,
    /// Current usage period, if any.
    pub usage: Option<UsageSummary>,
    /// Created timestamp.
    pub created_at: String,
}

/// Create account request (optional fields for metadata).
#[derive(Debug, Default, Deserialize)]
pub struct CreateAccountRequest {
    /// Optional email.
    pub email: Option<String>,
    /// Optional display name.
    pub name: Option<String>,
}

/// Register the authenticated user and grant the free tier.
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<CreateAccountRequest>,
) -> Result<Json<ApiResponse<AccountResponse>>, ApiError> {
    if state.store.get_user(&auth.user_id).await?.is_some() {
        return Err(ApiError::Conflict("Account already exists".into()));
    }

    let user = User {
        id: auth.user_id,
        email: body.email,
        name: body.name,
        created_at: Utc::now(),
    };
    state.store.put_user(&user).await?;

    provision_free_tier(state.store.as_ref(), auth.user_id, None).await?;

    tracing::info!(user_id = %auth.user_id, "Account created");

    Ok(ApiResponse::ok(account_response(state.store.as_ref(), &auth, user).await?))
}

/// Get the current user's account.
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<ApiResponse<AccountResponse>>, ApiError> {
    let user = state
        .store
        .get_user(&auth.user_id)
        .await?
        .ok_or(ApiError::NotFound("auth.user_not_found"))?;

    Ok(ApiResponse::ok(account_response(state.store.as_ref(), &auth, user).await?))
}

async fn account_response(
    store: &dyn Store,
    auth: &AuthUser,
    user: User,
) -> Result<AccountResponse, ApiError> {
    let subscription = current_subscription(store, auth).await?;
    let usage = store
        .latest_usage_by_reset_date(&auth.user_id)
        .await?
        .as_ref()
        .map(UsageSummary::from);

    Ok(AccountResponse {
        user_id: user.id.to_string(),
        email: user.email,
        name: user.name,
        subscription,
        usage,
        created_at: user.created_at.to_rfc3339(),
    })
}
