//! Authentication extractors.
//!
//! A request identifies its user in one of two ways:
//!
//! - `Authorization: Bearer <jwt>`, an HS256 session token whose `sub` is the
//!   user id, checked against `AUTH_JWT_SECRET`
//! - `x-user-id: <uuid>`, accepted only when `TRUST_USER_HEADER` is set
//!   because a fronting proxy has already authenticated the caller

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use meterly_core::UserId;

use crate::error::ApiError;
use crate::state::AppState;

/// Header a trusted proxy uses to pass the authenticated user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// An authenticated user.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The user ID.
    pub user_id: UserId,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if let Some(token) = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
        {
            let claims = validate_jwt(token, state)?;
            let user_id = claims.sub.parse::<UserId>().map_err(|_| {
                tracing::debug!(sub = %claims.sub, "JWT subject is not a user id");
                ApiError::Unauthorized
            })?;
            return Ok(Self { user_id });
        }

        if state.config.trust_user_header {
            if let Some(user_id) = parts
                .headers
                .get(USER_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<UserId>().ok())
            {
                return Ok(Self { user_id });
            }
        }

        Err(ApiError::Unauthorized)
    }
}

/// Session token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (user ID).
    pub sub: String,
    /// Expiration time.
    pub exp: i64,
    /// Issued at.
    #[serde(default)]
    pub iat: Option<i64>,
}

fn validate_jwt(token: &str, state: &AppState) -> Result<JwtClaims, ApiError> {
    let Some(secret) = state.config.auth_jwt_secret.as_deref() else {
        tracing::debug!("Bearer token presented but AUTH_JWT_SECRET is not set");
        return Err(ApiError::Unauthorized);
    };

    let validation = Validation::new(Algorithm::HS256);

    decode::<JwtClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::debug!(error = %e, "JWT validation failed");
        ApiError::Unauthorized
    })
}
