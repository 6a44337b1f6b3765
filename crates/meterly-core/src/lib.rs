//! Core types for meterly.
//!
//! This crate holds the domain model shared by the store and the service:
//!
//! - **Identifiers**: `UserId`, synthetic free-tier and checkout ids
//! - **Plans**: `PlanTier`, `Plan`
//! - **Subscriptions**: `Subscription`, `SubscriptionStatus`
//! - **Usage**: `UsageLedger` (one row per billing period), token telemetry
//! - **Quota**: the credit cost table and the quota decision
//! - **Billing**: billing history, checkout sessions, customers
//!
//! # Credits
//!
//! A text operation costs 1 credit and an image operation 3. Free-tier users
//! start with 100 credits per month; paid tiers get the allotment of their
//! catalog plan for each billing period the provider reports as paid.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod billing;
pub mod error;
pub mod ids;
pub mod plan;
pub mod quota;
pub mod subscription;
pub mod usage;

pub use billing::{
    BillingHistoryEntry, CheckoutCompletion, CheckoutSession, Customer, CustomerUpsert,
    NewBillingEntry, NewCheckoutSession, User, CHECKOUT_PENDING,
};
pub use error::{BillingError, Result};
pub use ids::{
    checkout_request_id, free_subscription_id, is_free_subscription_id, IdError, UserId,
    FREE_SUBSCRIPTION_PREFIX,
};
pub use plan::{
    Plan, PlanTier, UnknownPlanTier, CANCEL_BONUS_CREDITS, CREEM_PROVIDER,
    DEFAULT_PREMIUM_CREDITS, DEFAULT_ULTIMATE_CREDITS, FREE_PLAN_CREDITS, FREE_PROVIDER,
};
pub use quota::{ConsumeGuard, QuotaCost, QuotaError, IMAGE_CREDIT_COST, TEXT_CREDIT_COST};
pub use subscription::{NewSubscription, Subscription, SubscriptionStatus, UnknownStatus};
pub use usage::{
    NewTokenUsage, NewUsageLedger, TokenUsage, UsageBreakdown, UsageLedger, UsageSummary,
};
