//! Payment handlers: subscribe, checkout redirect, cancel and read views.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use meterly_core::{
    checkout_request_id, BillingError, BillingHistoryEntry, NewCheckoutSession, PlanTier,
    Subscription, UsageSummary, CHECKOUT_PENDING,
};
use meterly_store::Store;

use crate::auth::AuthUser;
use crate::creem::{
    CheckoutCustomer, CheckoutMetadata, CreateCheckoutRequest, Expandable, RedirectParams,
};
use crate::error::ApiError;
use crate::response::{ActionResult, ApiResponse};
use crate::state::AppState;

/// Header carrying the UI locale for the success redirect.
const LOCALE_HEADER: &str = "x-locale";

/// Subscribe request.
#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    /// `free`, `premium` or `ultimate`.
    pub plan: String,
}

/// Client view of a subscription.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionData {
    /// Row id, empty for the implicit free plan.
    pub id: String,
    /// Provider subscription id, empty for the implicit free plan.
    pub subscription_id: String,
    /// Owning user.
    pub user_id: String,
    /// Plan tier.
    pub plan: String,
    /// Status.
    pub status: String,
    /// Start date.
    pub start_date: DateTime<Utc>,
    /// End date.
    pub end_date: Option<DateTime<Utc>>,
    /// Whether the plan stops at period end.
    pub cancel_at_period_end: bool,
    /// Trial end.
    pub trial_end_date: Option<DateTime<Utc>>,
    /// Billing provider.
    pub provider: Option<String>,
    /// Price in minor units.
    pub price: i64,
    /// Currency.
    pub currency: String,
    /// Billing interval.
    pub interval: String,
}

impl From<&Subscription> for SubscriptionData {
    fn from(sub: &Subscription) -> Self {
        Self {
            id: sub.id.to_string(),
            subscription_id: sub.subscription_id.clone(),
            user_id: sub.user_id.to_string(),
            plan: sub
                .plan_id
                .clone()
                .unwrap_or_else(|| PlanTier::Free.as_str().to_string()),
            status: sub.status.to_string(),
            start_date: sub.start_date,
            end_date: sub.end_date,
            cancel_at_period_end: sub.cancel_at_period_end,
            trial_end_date: sub.trial_end_date,
            provider: sub.provider.clone(),
            price: sub.price,
            currency: sub.currency.clone(),
            interval: sub.interval.clone(),
        }
    }
}

impl SubscriptionData {
    /// The free plan reported to users without any subscription row.
    #[must_use]
    pub fn implicit_free(user_id: &str) -> Self {
        Self {
            id: String::new(),
            subscription_id: String::new(),
            user_id: user_id.to_string(),
            plan: PlanTier::Free.as_str().to_string(),
            status: "active".to_string(),
            start_date: Utc::now(),
            end_date: None,
            cancel_at_period_end: false,
            trial_end_date: None,
            provider: None,
            price: 0,
            currency: "USD".to_string(),
            interval: "month".to_string(),
        }
    }
}

/// Client view of a billing history row.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingHistoryItem {
    /// Row id.
    pub id: i64,
    /// Provider subscription id.
    pub subscription_id: Option<String>,
    /// Amount in minor units.
    pub amount: i64,
    /// Currency.
    pub currency: String,
    /// Payment status.
    pub status: String,
    /// Description.
    pub description: String,
    /// Payment method.
    pub payment_method: String,
    /// Invoice link.
    pub invoice_url: Option<String>,
    /// Receipt link.
    pub receipt_url: Option<String>,
    /// Billing type.
    pub billing_type: Option<String>,
    /// Billing period.
    pub billing_period: Option<String>,
    /// When the payment was recorded.
    pub created_at: DateTime<Utc>,
}

impl From<BillingHistoryEntry> for BillingHistoryItem {
    fn from(entry: BillingHistoryEntry) -> Self {
        Self {
            id: entry.id,
            subscription_id: entry.subscription_id,
            amount: entry.amount,
            currency: entry.currency,
            status: entry.status,
            description: entry.description,
            payment_method: entry.payment_method,
            invoice_url: entry.invoice_url,
            receipt_url: entry.receipt_url,
            billing_type: entry.billing_type,
            billing_period: entry.billing_period,
            created_at: entry.created_at,
        }
    }
}

/// A bare translation key.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    /// Translation key.
    pub message: &'static str,
}

/// Start a subscription.
///
/// The free plan needs no checkout; paid plans get a Creem checkout page.
pub async fn subscribe(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    headers: HeaderMap,
    body: Result<Json<SubscribeRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<ActionResult>>, ApiError> {
    let Json(body) = body.map_err(|_| ApiError::BadRequest("payment.invalid_plan"))?;
    let tier: PlanTier = body
        .plan
        .parse()
        .map_err(|_| ApiError::BadRequest("payment.invalid_plan"))?;

    if !tier.is_paid() {
        return Ok(ApiResponse::ok(ActionResult::done("payment.free_plan_success")));
    }

    let user = state
        .store
        .get_user(&auth.user_id)
        .await?
        .ok_or(ApiError::NotFound("auth.user_not_found"))?;

    let creem = state
        .creem
        .as_ref()
        .ok_or_else(|| ApiError::internal("payment.subscribe_failed", "Creem not configured"))?;

    let product_id = state.product_id_for(tier).ok_or_else(|| {
        ApiError::internal(
            "payment.subscribe_failed",
            format!("no product configured for {}", tier.as_str()),
        )
    })?;

    let locale = headers
        .get(LOCALE_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or("en");
    let success_url = format!(
        "{}/{locale}/subscription",
        state.config.base_url.trim_end_matches('/')
    );
    let request_id = checkout_request_id(&auth.user_id, Utc::now());

    let request = CreateCheckoutRequest {
        product_id: product_id.to_string(),
        request_id: request_id.clone(),
        success_url,
        metadata: CheckoutMetadata {
            user_id: Some(auth.user_id.to_string()),
            email: user.email.clone(),
            name: Some(
                user.name
                    .clone()
                    .unwrap_or_else(|| "Unknown User".to_string()),
            ),
            plan: Some(tier.as_str().to_string()),
        },
        customer: CheckoutCustomer {
            email: user.email.clone(),
        },
    };

    let checkout = creem
        .create_checkout(&request)
        .await
        .map_err(|e| ApiError::internal("payment.subscribe_failed", e.to_string()))?;

    state
        .store
        .insert_checkout_session(&NewCheckoutSession {
            user_id: auth.user_id,
            request_id: request_id.clone(),
            checkout_url: checkout.checkout_url.clone(),
            checkout_id: Some(checkout.id.clone()),
            product_id: Some(product_id.to_string()),
            status: CHECKOUT_PENDING.to_string(),
        })
        .await?;

    tracing::info!(
        user_id = %auth.user_id,
        request_id = %request_id,
        checkout_id = %checkout.id,
        plan = %tier.as_str(),
        "Checkout initiated"
    );

    Ok(ApiResponse::ok(ActionResult {
        success: true,
        message: "payment.checkout_initiated",
        redirect_url: checkout.checkout_url,
    }))
}

/// Handle the signed redirect Creem sends after a successful checkout.
///
/// If the webhook has not been processed yet, the checkout is completed here.
///
/// `request_id`, `signature` and `checkout_id` are all required; any of them
/// missing is `payment.missing_params`. `checkout_id` is the key used to
/// fetch the checkout from Creem, so there is nothing to confirm without it.
pub async fn checkout_success(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RedirectParams>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let (Some(request_id), Some(signature), Some(checkout_id)) = (
        params.request_id.as_deref(),
        params.signature.as_deref(),
        params.checkout_id.as_deref(),
    ) else {
        return Err(ApiError::MissingParams);
    };

    let creem = state
        .creem
        .as_ref()
        .ok_or_else(|| ApiError::internal("payment.checkout_failed", "Creem not configured"))?;

    creem
        .verify_redirect_signature(&params, signature)
        .map_err(|_| {
            tracing::warn!(request_id = %request_id, "Invalid checkout redirect signature");
            ApiError::InvalidSignature
        })?;

    let checkout = creem.get_checkout(checkout_id).await?;

    let subscription_id = checkout
        .subscription
        .as_ref()
        .and_then(Expandable::object)
        .map(|s| s.id.clone())
        .ok_or(ApiError::BadRequest("payment.subscription_missing"))?;

    if state.store.subscription_exists(&subscription_id).await? {
        tracing::debug!(subscription_id = %subscription_id, "Subscription already recorded");
    } else {
        state
            .reconciler
            .checkout_completed(&checkout)
            .await
            .map_err(|e| ApiError::internal("payment.checkout_failed", e.to_string()))?;
    }

    Ok(ApiResponse::ok(MessageResponse {
        message: "payment.checkout_success",
    }))
}

/// Cancel the current paid subscription now and fall back to the free tier.
pub async fn cancel_subscription(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<ApiResponse<ActionResult>>, ApiError> {
    let creem = state
        .creem
        .as_ref()
        .ok_or_else(|| ApiError::internal("payment.cancel_failed", "Creem not configured"))?;

    let outcome = state
        .reconciler
        .cancel_now(creem, auth.user_id)
        .await
        .map_err(|e| match e {
            BillingError::SubscriptionNotFound { .. } => {
                ApiError::NotFound("payment.subscription_not_found")
            }
            other => ApiError::internal("payment.cancel_failed", other.to_string()),
        })?;

    tracing::info!(
        user_id = %auth.user_id,
        provider_status = %outcome.provider_status,
        carried_credits = ?outcome.carried_credits,
        "Subscription cancel handled"
    );

    Ok(ApiResponse::ok(ActionResult::done("payment.cancel_success")))
}

/// Get the current subscription.
pub async fn get_subscription(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<ApiResponse<SubscriptionData>>, ApiError> {
    let data = current_subscription(state.store.as_ref(), &auth).await?;
    Ok(ApiResponse::ok(data))
}

pub(crate) async fn current_subscription(
    store: &dyn Store,
    auth: &AuthUser,
) -> Result<SubscriptionData, ApiError> {
    Ok(store
        .latest_subscription(&auth.user_id)
        .await?
        .as_ref()
        .map_or_else(
            || SubscriptionData::implicit_free(&auth.user_id.to_string()),
            SubscriptionData::from,
        ))
}

/// Get the usage summary for the ledger with the latest reset date.
pub async fn get_usage(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<ApiResponse<UsageSummary>>, ApiError> {
    let ledger = state
        .store
        .latest_usage_by_reset_date(&auth.user_id)
        .await?
        .ok_or(ApiError::NotFound("payment.usage_not_found"))?;

    Ok(ApiResponse::ok(UsageSummary::from(&ledger)))
}

/// List billing history, oldest first.
pub async fn billing_history(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<ApiResponse<Vec<BillingHistoryItem>>>, ApiError> {
    let entries = state.store.list_billing_history(&auth.user_id).await?;
    Ok(ApiResponse::ok(
        entries.into_iter().map(BillingHistoryItem::from).collect(),
    ))
}
