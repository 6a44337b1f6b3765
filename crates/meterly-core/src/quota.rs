//! Credit cost table and quota decisions.
//!
//! The cost table is fixed: a text operation costs 1 credit, an image
//! operation 3. [`evaluate`] is the pure part of the quota gate; the
//! service layer pairs it with the store's atomic consume.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::usage::UsageLedger;

/// Credits charged for one text operation.
pub const TEXT_CREDIT_COST: i64 = 1;

/// Credits charged for one image operation.
pub const IMAGE_CREDIT_COST: i64 = 3;

/// The credits a metered operation will consume, split by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QuotaCost {
    /// Credits attributed to text.
    pub text: i64,
    /// Credits attributed to images.
    pub image: i64,
}

impl QuotaCost {
    /// Cost of one text operation.
    pub const TEXT: Self = Self {
        text: TEXT_CREDIT_COST,
        image: 0,
    };

    /// Cost of one image operation.
    pub const IMAGE: Self = Self {
        text: 0,
        image: IMAGE_CREDIT_COST,
    };

    /// Cost from the operation flags; both flags add up.
    #[must_use]
    pub const fn from_flags(text: bool, image: bool) -> Self {
        Self {
            text: if text { TEXT_CREDIT_COST } else { 0 },
            image: if image { IMAGE_CREDIT_COST } else { 0 },
        }
    }

    /// Total credits.
    #[must_use]
    pub const fn credits(&self) -> i64 {
        self.text + self.image
    }
}

/// How the store applies a consume mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumeGuard {
    /// Increment unconditionally; two racing requests can both pass the
    /// precheck and push `credit_used` past `credit_total`.
    #[default]
    Unchecked,

    /// Increment only while `credit_used + cost <= credit_total`; a zero-row
    /// result means another request won the race.
    WithinTotal,
}

/// Quota rejections, surfaced to clients as translation keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QuotaError {
    /// No ledger row exists for the user.
    #[error("no usage ledger for user")]
    NotFound,

    /// The most recent ledger's period has elapsed.
    #[error("usage period expired")]
    Expired,

    /// Not enough credit left for the operation.
    #[error("credit quota exceeded")]
    Exceeded,

    /// The consume mutation failed in storage.
    #[error("failed to record credit consumption")]
    ConsumeFailed,
}

impl QuotaError {
    /// The client-facing taxonomy key.
    #[must_use]
    pub const fn key(&self) -> &'static str {
        match self {
            Self::NotFound => "quota.notFound",
            Self::Expired => "quota.expired",
            Self::Exceeded => "quota.exceeded",
            Self::ConsumeFailed => "quota.consumeFailed",
        }
    }
}

/// Decide whether `cost` may be consumed from the user's current ledger.
///
/// Checks run in order: missing ledger, expired period, insufficient credit.
///
/// # Errors
///
/// Returns the first [`QuotaError`] that applies.
pub fn evaluate(
    ledger: Option<&UsageLedger>,
    cost: QuotaCost,
    now: DateTime<Utc>,
) -> Result<&UsageLedger, QuotaError> {
    let ledger = ledger.ok_or(QuotaError::NotFound)?;

    if ledger.is_expired_at(now) {
        return Err(QuotaError::Expired);
    }

    if !ledger.can_afford(cost.credits()) {
        return Err(QuotaError::Exceeded);
    }

    Ok(ledger)
}
