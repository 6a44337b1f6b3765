//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{accounts, ai, health, payment, webhooks};
use crate::state::AppState;

/// Maximum concurrent requests for the metered AI endpoints.
const AI_MAX_CONCURRENT_REQUESTS: usize = 20;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Accounts (JWT auth)
/// - `POST /api/accounts` - Register and grant the free tier
/// - `GET /api/accounts/me` - Current account
///
/// ## Payment
/// - `POST /api/payment/webhook` - Creem webhooks (signature verification)
/// - `GET /api/payment/subscription/success` - Signed checkout redirect
/// - `POST /api/payment/subscribe` - Start a subscription (JWT)
/// - `POST /api/payment/cancel-subscription` - Cancel now (JWT)
/// - `GET /api/payment/subscription` - Current subscription (JWT)
/// - `GET /api/payment/usage` - Current usage (JWT)
/// - `GET /api/payment/billing-history` - Billing history (JWT)
///
/// ## AI (JWT auth, visitor rate limit, metered)
/// - `POST /api/ai/chat`
/// - `POST /api/ai/image`
/// - `POST /api/ai/file-parse`
pub fn create_router(state: AppState) -> Router {
    create_router_with_state(Arc::new(state))
}

/// Like [`create_router`], for callers that keep their own handle on the state.
pub fn create_router_with_state(state: Arc<AppState>) -> Router {
    let cors = build_cors_layer(&state.config.cors_origins);
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;
    let payment_timeout_seconds = state.config.payment_timeout_seconds;

    // Routes that call Creem get the longer timeout.
    let payment_routes = Router::new()
        .route("/webhook", post(webhooks::creem_webhook))
        .route("/subscribe", post(payment::subscribe))
        .route("/subscription", get(payment::get_subscription))
        .route("/subscription/success", get(payment::checkout_success))
        .route("/cancel-subscription", post(payment::cancel_subscription))
        .route("/usage", get(payment::get_usage))
        .route("/billing-history", get(payment::billing_history))
        .layer(TimeoutLayer::new(Duration::from_secs(payment_timeout_seconds)));

    let ai_routes = Router::new()
        .route("/chat", post(ai::chat))
        .route("/image", post(ai::image))
        .route("/file-parse", post(ai::file_parse))
        .layer(ConcurrencyLimitLayer::new(AI_MAX_CONCURRENT_REQUESTS))
        .layer(TimeoutLayer::new(Duration::from_secs(request_timeout_seconds)));

    let api_routes = Router::new()
        .route("/accounts", post(accounts::create_account))
        .route("/accounts/me", get(accounts::get_account))
        .nest("/payment", payment_routes)
        .nest("/ai", ai_routes)
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        .route("/health", get(health::health))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
