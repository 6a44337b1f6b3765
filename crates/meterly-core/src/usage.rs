//! Usage ledger rows and token telemetry.
//!
//! A ledger row covers one billing period. Rollover never resets a row in
//! place: a new period is a new row, and the "current" ledger is the most
//! recently created one.

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

/// A usage ledger row (one per billing period).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageLedger {
    /// Local row id.
    pub id: i64,

    /// Owning user.
    pub user_id: UserId,

    /// Subscription id this period belongs to (by value, not a foreign key).
    pub subscription_id: String,

    /// Credits available in this period.
    pub credit_total: i64,

    /// Credits consumed in this period.
    pub credit_used: i64,

    /// Credits consumed by text operations.
    pub text_used: i64,

    /// Credits consumed by image operations.
    pub image_used: i64,

    /// Start of the period.
    pub current_period_start_date: Option<DateTime<Utc>>,

    /// End of the period; past this instant the ledger is expired.
    pub current_period_end_date: Option<DateTime<Utc>>,

    /// When the credits are next replenished.
    pub reset_date: Option<DateTime<Utc>>,

    /// Row creation time.
    pub created_at: DateTime<Utc>,

    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl UsageLedger {
    /// Credits left in this period (never negative).
    #[must_use]
    pub fn remaining_credits(&self) -> i64 {
        (self.credit_total - self.credit_used).max(0)
    }

    /// Whether the period ended strictly before `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.current_period_end_date.is_some_and(|end| now > end)
    }

    /// Whether `credits` more can be consumed without exceeding the total.
    #[must_use]
    pub fn can_afford(&self, credits: i64) -> bool {
        self.credit_used + credits <= self.credit_total
    }
}

/// Values for inserting a ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUsageLedger {
    /// Owning user.
    pub user_id: UserId,
    /// Subscription id this period belongs to.
    pub subscription_id: String,
    /// Credits available in the period.
    pub credit_total: i64,
    /// Start of the period.
    pub current_period_start_date: Option<DateTime<Utc>>,
    /// End of the period.
    pub current_period_end_date: Option<DateTime<Utc>>,
    /// Reset date.
    pub reset_date: Option<DateTime<Utc>>,
}

impl NewUsageLedger {
    /// A free-tier ledger running for one calendar month from `now`.
    #[must_use]
    pub fn free(
        user_id: UserId,
        subscription_id: impl Into<String>,
        credit_total: i64,
        now: DateTime<Utc>,
    ) -> Self {
        let period_end = one_month_after(now);
        Self {
            user_id,
            subscription_id: subscription_id.into(),
            credit_total,
            current_period_start_date: Some(now),
            current_period_end_date: Some(period_end),
            reset_date: Some(period_end),
        }
    }

    /// A paid ledger whose bounds come from the provider's billing period.
    #[must_use]
    pub fn paid(
        user_id: UserId,
        subscription_id: impl Into<String>,
        credit_total: i64,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            subscription_id: subscription_id.into(),
            credit_total,
            current_period_start_date: Some(period_start),
            current_period_end_date: Some(period_end),
            reset_date: Some(period_end),
        }
    }
}

/// Same day next calendar month, clamped to the month's last day.
#[must_use]
pub fn one_month_after(at: DateTime<Utc>) -> DateTime<Utc> {
    at.checked_add_months(Months::new(1))
        .unwrap_or_else(|| at + Duration::days(30))
}

/// Client-facing view of the current ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    /// Owning user.
    pub user_id: UserId,
    /// Credits available in the period.
    pub credit_total: i64,
    /// Credits consumed.
    pub credit_used: i64,
    /// Credits left.
    pub credit_remaining: i64,
    /// Consumed share of the total, rounded percent.
    pub credit_usage_percentage: i64,
    /// Text consumption.
    pub text_usage: UsageBreakdown,
    /// Image consumption.
    pub image_usage: UsageBreakdown,
    /// Next reset.
    pub reset_date: Option<DateTime<Utc>>,
}

/// Per-kind consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageBreakdown {
    /// Credits consumed by this kind.
    pub used: i64,
    /// Share of the total, rounded percent.
    pub usage_percentage: i64,
}

impl From<&UsageLedger> for UsageSummary {
    fn from(ledger: &UsageLedger) -> Self {
        let total = ledger.credit_total;
        Self {
            user_id: ledger.user_id,
            credit_total: total,
            credit_used: ledger.credit_used,
            credit_remaining: ledger.credit_total - ledger.credit_used,
            credit_usage_percentage: percentage(ledger.credit_used, total),
            text_usage: UsageBreakdown {
                used: ledger.text_used,
                usage_percentage: percentage(ledger.text_used, total),
            },
            image_usage: UsageBreakdown {
                used: ledger.image_used,
                usage_percentage: percentage(ledger.image_used, total),
            },
            reset_date: ledger.reset_date,
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn percentage(used: i64, total: i64) -> i64 {
    if total <= 0 {
        return 0;
    }
    ((used as f64 / total as f64) * 100.0).round() as i64
}

/// Best-effort LLM token telemetry for one metered call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTokenUsage {
    /// Calling user.
    pub user_id: UserId,
    /// Adapter that served the call.
    pub provider: String,
    /// Model name, if known.
    pub model: Option<String>,
    /// Prompt tokens.
    pub prompt_tokens: i64,
    /// Completion tokens.
    pub completion_tokens: i64,
    /// Total tokens.
    pub total_tokens: i64,
    /// Wall time of the upstream call in milliseconds.
    pub duration_ms: i64,
    /// Upstream request id, if any.
    pub request_id: Option<String>,
    /// Metered endpoint name (`chat`, `image`, `file-parse`).
    pub endpoint: String,
}

/// A stored telemetry row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Local row id.
    pub id: i64,
    /// The recorded values.
    #[serde(flatten)]
    pub usage: NewTokenUsage,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
}
