//! Subscription records.
//!
//! Rows are never deleted. The lifecycle is carried entirely by
//! [`SubscriptionStatus`]: a free-tier row per signup or cancel-now, a paid row
//! per provider subscription, and status transitions driven by webhooks.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::free_subscription_id;
use crate::plan::{PlanTier, FREE_PROVIDER};
use crate::UserId;

/// A stored subscription row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Local row id.
    pub id: i64,

    /// Owning user.
    pub user_id: UserId,

    /// Plan tier name (`free`, `premium`, `ultimate`).
    pub plan_id: Option<String>,

    /// Provider-assigned subscription id (or `free_<millis>`).
    pub subscription_id: String,

    /// Provider product id.
    pub product_id: String,

    /// Current status.
    pub status: SubscriptionStatus,

    /// When the subscription started.
    pub start_date: DateTime<Utc>,

    /// When the subscription ended, if it has.
    pub end_date: Option<DateTime<Utc>>,

    /// Whether the subscription ends at the close of the current period.
    pub cancel_at_period_end: bool,

    /// End of the trial, if any.
    pub trial_end_date: Option<DateTime<Utc>>,

    /// Provider name (`free`, `creem`).
    pub provider: Option<String>,

    /// Price in minor currency units.
    pub price: i64,

    /// ISO currency code.
    pub currency: String,

    /// Billing interval label.
    pub interval: String,

    /// Row creation time.
    pub created_at: DateTime<Utc>,

    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Whether this row belongs to the free tier.
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.plan_id.as_deref() == Some(PlanTier::Free.as_str())
    }
}

/// Values for inserting a subscription row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSubscription {
    /// Owning user.
    pub user_id: UserId,
    /// Plan tier name.
    pub plan_id: Option<String>,
    /// Provider-assigned subscription id.
    pub subscription_id: String,
    /// Provider product id.
    pub product_id: String,
    /// Initial status.
    pub status: SubscriptionStatus,
    /// Start date.
    pub start_date: DateTime<Utc>,
    /// Provider name.
    pub provider: String,
    /// Price in minor currency units.
    pub price: i64,
    /// ISO currency code.
    pub currency: String,
    /// Billing interval label.
    pub interval: String,
}

impl NewSubscription {
    /// The synthetic free-tier subscription created at signup or cancel-now.
    #[must_use]
    pub fn free(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            plan_id: Some(PlanTier::Free.as_str().to_string()),
            subscription_id: free_subscription_id(now),
            product_id: PlanTier::Free.as_str().to_string(),
            status: SubscriptionStatus::Active,
            start_date: now,
            provider: FREE_PROVIDER.to_string(),
            price: 0,
            currency: "USD".to_string(),
            interval: "month".to_string(),
        }
    }
}

/// Status of a subscription.
///
/// `Active`, `Canceled` and `Expired` are the states meterly drives itself;
/// the remaining variants are provider states that `subscription.paid` may
/// carry and that are stored as reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Subscription is active.
    Active,

    /// Subscription is in a trial period.
    Trialing,

    /// Payment failed, subscription is past due.
    PastDue,

    /// Subscription is paused by the provider.
    Paused,

    /// Subscription was cancelled (credits stay usable until period end).
    Canceled,

    /// Subscription expired at the provider.
    Expired,
}

impl SubscriptionStatus {
    /// Get the status as stored in the `status` column.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Trialing => "trialing",
            Self::PastDue => "past_due",
            Self::Paused => "paused",
            Self::Canceled => "canceled",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "trialing" => Ok(Self::Trialing),
            "past_due" | "unpaid" => Ok(Self::PastDue),
            "paused" => Ok(Self::Paused),
            "canceled" | "cancelled" => Ok(Self::Canceled),
            "expired" => Ok(Self::Expired),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Returned when a status string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown subscription status: {0}")]
pub struct UnknownStatus(pub String);
