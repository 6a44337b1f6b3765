//! Meterly HTTP API Service.
//!
//! This crate provides the HTTP API for meterly, including:
//!
//! - Account registration with a free-tier grant
//! - Creem checkout, redirect confirmation and cancellation
//! - Creem webhook reconciliation
//! - Credit-metered AI endpoints (chat, image, file parsing)
//!
//! # Authentication
//!
//! End users present an HS256 session JWT. Deployments behind an
//! authenticating proxy may instead trust the `x-user-id` header.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)]

pub mod auth;
pub mod config;
pub mod creem;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod llm;
pub mod provisioning;
pub mod quota;
pub mod rate_limit;
pub mod reconciler;
pub mod response;
pub mod routes;
pub mod state;

pub use config::ServiceConfig;
pub use creem::{CreemClient, CreemError};
pub use error::ApiError;
pub use llm::{LlmAdapter, LlmRouter};
pub use quota::QuotaGate;
pub use reconciler::Reconciler;
pub use routes::{create_router, create_router_with_state};
pub use state::AppState;
