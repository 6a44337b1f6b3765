//! Error types for meterly.

use crate::ids::IdError;
use crate::plan::UnknownPlanTier;
use crate::quota::QuotaError;
use crate::subscription::UnknownStatus;

/// Result type for meterly domain operations.
pub type Result<T> = std::result::Result<T, BillingError>;

/// Errors that can occur in meterly domain operations.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// Quota gate rejection.
    #[error(transparent)]
    Quota(#[from] QuotaError),

    /// No plan is registered for a provider product.
    #[error("plan not found for product: {product_id}")]
    PlanNotFound {
        /// The product id that was looked up.
        product_id: String,
    },

    /// No subscription matched.
    #[error("subscription not found: {subscription_id}")]
    SubscriptionNotFound {
        /// The subscription id that was looked up.
        subscription_id: String,
    },

    /// A provider event is missing a field the handler needs.
    #[error("malformed provider event: {0}")]
    MalformedEvent(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// Unknown plan tier.
    #[error(transparent)]
    UnknownPlan(#[from] UnknownPlanTier),

    /// Unknown subscription status.
    #[error(transparent)]
    UnknownStatus(#[from] UnknownStatus),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// External service error (payment provider, LLM).
    #[error("external service error: {service} - {message}")]
    ExternalService {
        /// The service that failed.
        service: String,
        /// Error message.
        message: String,
    },
}
