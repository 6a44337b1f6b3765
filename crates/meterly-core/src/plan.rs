//! Plan tiers and the plan catalog.
//!
//! A plan tier is what the user picks on the subscribe form. A [`Plan`] is the
//! catalog row keyed by the provider's product id; the webhook reconciler
//! reads the credit allotment for a new billing period from it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

/// Credits granted to a brand-new free-tier ledger.
pub const FREE_PLAN_CREDITS: i64 = 100;

/// Bonus credits added on top of the leftover balance on cancel-now.
pub const CANCEL_BONUS_CREDITS: i64 = 100;

/// Default credit allotment for the premium tier when not configured.
pub const DEFAULT_PREMIUM_CREDITS: i64 = 1000;

/// Default credit allotment for the ultimate tier when not configured.
pub const DEFAULT_ULTIMATE_CREDITS: i64 = 5000;

/// Provider name recorded on free-tier subscriptions.
pub const FREE_PROVIDER: &str = "free";

/// Provider name recorded on paid subscriptions.
pub const CREEM_PROVIDER: &str = "creem";

/// Subscription tiers a user can choose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    /// Free tier: provisioned at signup, no provider involvement.
    Free,

    /// Premium paid tier.
    Premium,

    /// Ultimate paid tier.
    Ultimate,
}

impl PlanTier {
    /// Get the tier name as stored in `plan_id` columns.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Premium => "premium",
            Self::Ultimate => "ultimate",
        }
    }

    /// Whether subscribing to this tier goes through the payment provider.
    #[must_use]
    pub const fn is_paid(&self) -> bool {
        !matches!(self, Self::Free)
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanTier {
    type Err = UnknownPlanTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Self::Free),
            "premium" => Ok(Self::Premium),
            "ultimate" => Ok(Self::Ultimate),
            other => Err(UnknownPlanTier(other.to_string())),
        }
    }
}

/// Returned when a plan tier string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown plan tier: {0}")]
pub struct UnknownPlanTier(pub String);

/// A plan catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Catalog id (the tier name for seeded plans).
    pub id: String,

    /// Provider product id; the lookup key used by the reconciler.
    pub product_id: String,

    /// Display name.
    pub name: String,

    /// Price in minor currency units.
    pub price: i64,

    /// ISO currency code.
    pub currency: String,

    /// Billing interval label (e.g. "month").
    pub interval: String,

    /// Marketing description.
    pub description: String,

    /// Credits granted per billing period.
    pub credits: i64,

    /// Feature bullet points.
    pub features: Vec<String>,

    /// When the catalog entry was created.
    pub created_at: DateTime<Utc>,
}

impl Plan {
    /// Build a catalog entry for a paid tier.
    #[must_use]
    pub fn for_tier(tier: PlanTier, product_id: impl Into<String>, credits: i64) -> Self {
        let name = match tier {
            PlanTier::Free => "Free",
            PlanTier::Premium => "Premium",
            PlanTier::Ultimate => "Ultimate",
        };
        Self {
            id: tier.as_str().to_string(),
            product_id: product_id.into(),
            name: name.to_string(),
            price: 0,
            currency: "USD".to_string(),
            interval: "month".to_string(),
            description: format!("{name} plan with {credits} credits per period"),
            credits,
            features: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_parses_known_names() {
        assert_eq!("free".parse::<PlanTier>().unwrap(), PlanTier::Free);
        assert_eq!("premium".parse::<PlanTier>().unwrap(), PlanTier::Premium);
        assert_eq!("ultimate".parse::<PlanTier>().unwrap(), PlanTier::Ultimate);
    }

    #[test]
    fn tier_rejects_unknown_names() {
        let err = "flex".parse::<PlanTier>().unwrap_err();
        assert_eq!(err, UnknownPlanTier("flex".into()));
    }

    #[test]
    fn only_free_skips_provider() {
        assert!(!PlanTier::Free.is_paid());
        assert!(PlanTier::Premium.is_paid());
        assert!(PlanTier::Ultimate.is_paid());
    }

    #[test]
    fn tier_serde_is_snake_case() {
        let json = serde_json::to_string(&PlanTier::Premium).unwrap();
        assert_eq!(json, "\"premium\"");
    }

    #[test]
    fn plan_for_tier_uses_tier_as_id() {
        let plan = Plan::for_tier(PlanTier::Ultimate, "prod_u", 5000);
        assert_eq!(plan.id, "ultimate");
        assert_eq!(plan.product_id, "prod_u");
        assert_eq!(plan.credits, 5000);
    }
}
