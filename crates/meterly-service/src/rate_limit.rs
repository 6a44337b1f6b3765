//! Fixed-window rate limiting keyed by anonymous visitor id.
//!
//! Callers identify themselves with the `X-Visitor-ID` header. Requests
//! without it are not limited.

use axum::http::HeaderMap;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::error::ApiError;

/// Header carrying the visitor id.
pub const VISITOR_HEADER: &str = "x-visitor-id";

/// Limit for one route family.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Bucket name, so route families do not share counters.
    pub scope: &'static str,
    /// Requests allowed per window.
    pub limit: u32,
    /// Window length.
    pub window: Duration,
}

impl RateLimitConfig {
    /// `POST /api/ai/chat`: 20 per hour.
    pub const CHAT: Self = Self::hourly("chat", 20);
    /// `POST /api/ai/image`: 10 per hour.
    pub const IMAGE: Self = Self::hourly("image", 10);
    /// `POST /api/ai/file-parse`: 20 per hour.
    pub const FILE_PARSE: Self = Self::hourly("file-parse", 20);

    const fn hourly(scope: &'static str, limit: u32) -> Self {
        Self {
            scope,
            limit,
            window: Duration::from_secs(60 * 60),
        }
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Requests left in the window.
    pub remaining: u32,
    /// Unix time in milliseconds when the window resets.
    pub reset_at_ms: i64,
    /// Seconds to wait, rounded up; set only when rejected.
    pub retry_after_seconds: Option<u64>,
}

/// In-process fixed-window limiter.
#[derive(Debug, Default)]
pub struct VisitorRateLimiter {
    /// `scope:visitor` -> (count, reset at ms)
    windows: RwLock<HashMap<String, (u32, i64)>>,
}

impl VisitorRateLimiter {
    /// Create an empty limiter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request from `visitor_id` at `now_ms`.
    pub async fn check_at(
        &self,
        visitor_id: &str,
        config: &RateLimitConfig,
        now_ms: i64,
    ) -> RateLimitResult {
        let window_ms = i64::try_from(config.window.as_millis()).unwrap_or(i64::MAX);
        let key = format!("{}:{visitor_id}", config.scope);

        let mut windows = self.windows.write().await;
        let entry = windows.entry(key).or_insert((0, now_ms));

        if entry.1 <= now_ms {
            *entry = (1, now_ms.saturating_add(window_ms));
        } else {
            entry.0 = entry.0.saturating_add(1);
        }

        let (count, reset_at_ms) = *entry;
        let allowed = count <= config.limit;

        let retry_after_seconds = if allowed {
            None
        } else {
            let wait_ms = u64::try_from(reset_at_ms - now_ms).unwrap_or(0);
            Some(wait_ms.div_ceil(1000))
        };

        RateLimitResult {
            allowed,
            remaining: config.limit.saturating_sub(count),
            reset_at_ms,
            retry_after_seconds,
        }
    }

    /// Check the request's visitor against `config`.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::RateLimited` when the window is exhausted.
    pub async fn enforce(&self, headers: &HeaderMap, config: &RateLimitConfig) -> Result<(), ApiError> {
        let Some(visitor_id) = headers
            .get(VISITOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
        else {
            tracing::debug!(scope = config.scope, "No visitor id, skipping rate limit");
            return Ok(());
        };

        let result = self
            .check_at(visitor_id, config, chrono::Utc::now().timestamp_millis())
            .await;

        if result.allowed {
            return Ok(());
        }

        tracing::warn!(
            visitor_id = %visitor_id,
            scope = config.scope,
            limit = config.limit,
            "Visitor rate limit exceeded"
        );

        Err(ApiError::RateLimited {
            limit: config.limit,
            retry_after_seconds: result.retry_after_seconds.unwrap_or(0),
            reset_at: result.reset_at_ms.div_euclid(1000)
                + i64::from(result.reset_at_ms.rem_euclid(1000) != 0),
        })
    }

    /// Drop windows that have already reset.
    pub async fn cleanup(&self, now_ms: i64) {
        self.windows.write().await.retain(|_, (_, reset)| *reset > now_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST: RateLimitConfig = RateLimitConfig {
        scope: "test",
        limit: 2,
        window: Duration::from_secs(10),
    };

    #[tokio::test]
    async fn allows_up_to_limit_then_rejects() {
        let limiter = VisitorRateLimiter::new();

        let first = limiter.check_at("v1", &TEST, 0).await;
        assert!(first.allowed);
        assert_eq!(first.remaining, 1);
        assert_eq!(first.reset_at_ms, 10_000);

        assert!(limiter.check_at("v1", &TEST, 1_000).await.allowed);

        let third = limiter.check_at("v1", &TEST, 2_500).await;
        assert!(!third.allowed);
        assert_eq!(third.remaining, 0);
        assert_eq!(third.retry_after_seconds, Some(8));
    }

    #[tokio::test]
    async fn window_resets_after_expiry() {
        let limiter = VisitorRateLimiter::new();
        for t in [0, 1, 2] {
            limiter.check_at("v1", &TEST, t).await;
        }

        let after = limiter.check_at("v1", &TEST, 10_000).await;
        assert!(after.allowed);
        assert_eq!(after.remaining, 1);
        assert_eq!(after.reset_at_ms, 20_000);
    }

    #[tokio::test]
    async fn visitors_and_scopes_are_independent() {
        let limiter = VisitorRateLimiter::new();
        let other_scope = RateLimitConfig { scope: "other", ..TEST };

        for t in [0, 1, 2] {
            limiter.check_at("v1", &TEST, t).await;
        }

        assert!(limiter.check_at("v2", &TEST, 3).await.allowed);
        assert!(limiter.check_at("v1", &other_scope, 3).await.allowed);
    }

    #[tokio::test]
    async fn missing_header_skips_check() {
        let limiter = VisitorRateLimiter::new();
        let zero = RateLimitConfig { limit: 0, ..TEST };
        assert!(limiter.enforce(&HeaderMap::new(), &zero).await.is_ok());
    }

    #[tokio::test]
    async fn enforce_rejects_with_rate_limited() {
        let limiter = VisitorRateLimiter::new();
        let zero = RateLimitConfig { limit: 0, ..TEST };
        let mut headers = HeaderMap::new();
        headers.insert(VISITOR_HEADER, "v1".parse().unwrap());

        let err = limiter.enforce(&headers, &zero).await.unwrap_err();
        assert!(matches!(err, ApiError::RateLimited { limit: 0, retry_after_seconds: 10, .. }));
    }

    #[tokio::test]
    async fn cleanup_drops_expired_windows() {
        let limiter = VisitorRateLimiter::new();
        limiter.check_at("v1", &TEST, 0).await;
        limiter.cleanup(20_000).await;
        assert!(limiter.windows.read().await.is_empty());
    }
}
