//! Application state.

use std::sync::Arc;
use std::time::Duration;

use meterly_core::{ConsumeGuard, Plan, PlanTier};
use meterly_store::Store;

use crate::config::ServiceConfig;
use crate::creem::CreemClient;
use crate::llm::LlmRouter;
use crate::quota::QuotaGate;
use crate::rate_limit::VisitorRateLimiter;
use crate::reconciler::Reconciler;

/// Application state shared across handlers.
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Creem client for checkout and cancellation (optional).
    pub creem: Option<Arc<CreemClient>>,

    /// Credit gate for metered endpoints.
    pub quota: QuotaGate,

    /// Payment event reconciler.
    pub reconciler: Reconciler,

    /// LLM adapter selection.
    pub llm: LlmRouter,

    /// Per-visitor request limiter.
    pub rate_limiter: VisitorRateLimiter,

    /// Outbound HTTP client for file downloads.
    pub http: reqwest::Client,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        let creem = config.creem_api_key.as_ref().and_then(|key| {
            match CreemClient::new(
                &config.creem_api_endpoint,
                key,
                config.creem_webhook_secret.clone(),
            ) {
                Ok(client) => {
                    tracing::info!(endpoint = %config.creem_api_endpoint, "Creem integration enabled");
                    Some(Arc::new(client))
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create Creem client");
                    None
                }
            }
        });

        if creem.is_none() {
            tracing::warn!("Creem not configured - webhooks and paid checkout will not be available");
        }

        let guard = if config.quota_strict_consume {
            ConsumeGuard::WithinTotal
        } else {
            ConsumeGuard::Unchecked
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        if config.ai_demo_mode {
            tracing::info!("AI demo mode enabled - requests without an API key use the mock adapter");
        }

        Self {
            quota: QuotaGate::new(store.clone(), guard),
            reconciler: Reconciler::new(store.clone()),
            llm: LlmRouter::new(&config, http.clone()),
            rate_limiter: VisitorRateLimiter::new(),
            store,
            config,
            creem,
            http,
        }
    }

    /// Register the configured paid tiers in the plan catalog.
    pub async fn seed_plans(&self) -> meterly_store::Result<()> {
        let tiers = [
            (
                PlanTier::Premium,
                &self.config.premium_product_id,
                self.config.premium_credits,
            ),
            (
                PlanTier::Ultimate,
                &self.config.ultimate_product_id,
                self.config.ultimate_credits,
            ),
        ];

        for (tier, product_id, credits) in tiers {
            let Some(product_id) = product_id else {
                tracing::warn!(tier = %tier.as_str(), "No Creem product configured for tier");
                continue;
            };
            self.store
                .upsert_plan(&Plan::for_tier(tier, product_id.as_str(), credits))
                .await?;
            tracing::info!(tier = %tier.as_str(), product_id = %product_id, credits, "Plan registered");
        }

        Ok(())
    }

    /// The Creem product sold for a paid tier.
    #[must_use]
    pub fn product_id_for(&self, tier: PlanTier) -> Option<&str> {
        match tier {
            PlanTier::Free => None,
            PlanTier::Premium => self.config.premium_product_id.as_deref(),
            PlanTier::Ultimate => self.config.ultimate_product_id.as_deref(),
        }
    }

    /// Check if Creem is configured.
    #[must_use]
    pub fn has_creem(&self) -> bool {
        self.creem.is_some()
    }
}
