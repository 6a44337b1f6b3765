//! Storage layer for meterly.
//!
//! This crate persists users, plans, subscriptions, usage ledgers, billing
//! history, checkout sessions, customer links and LLM token telemetry.
//!
//! # Backends
//!
//! - [`PgStore`]: PostgreSQL via `sqlx`, schema managed by the embedded
//!   migrations in `migrations/`
//! - [`MemoryStore`]: a mutex-guarded in-process store for tests and local runs
//!
//! # Ordering
//!
//! "Latest" always means highest `created_at`, ties broken by the highest row
//! id, so two rows written in the same instant still have a stable order.
//!
//! # Example
//!
//! ```no_run
//! use meterly_core::{NewSubscription, NewUsageLedger, UserId, FREE_PLAN_CREDITS};
//! use meterly_store::{MemoryStore, Store};
//!
//! # async fn run() -> meterly_store::Result<()> {
//! let store = MemoryStore::new();
//! let user_id = UserId::generate();
//! let now = chrono::Utc::now();
//!
//! let subscription = NewSubscription::free(user_id, now);
//! let ledger = NewUsageLedger::free(user_id, &subscription.subscription_id, FREE_PLAN_CREDITS, now);
//! store.provision_free_tier(&subscription, &ledger).await?;
//!
//! let current = store.latest_usage(&user_id).await?;
//! assert!(current.is_some());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
pub mod postgres;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use meterly_core::{
    BillingHistoryEntry, CheckoutCompletion, CheckoutSession, ConsumeGuard, Customer,
    CustomerUpsert, NewBillingEntry, NewCheckoutSession, NewSubscription, NewTokenUsage,
    NewUsageLedger, Plan, QuotaCost, Subscription, SubscriptionStatus, TokenUsage, UsageLedger,
    User, UserId,
};

/// Everything a `subscription.paid` event writes, applied as one unit.
#[derive(Debug, Clone)]
pub struct SubscriptionPayment {
    /// Paying user.
    pub user_id: UserId,
    /// Provider subscription id.
    pub subscription_id: String,
    /// Billing history row to append.
    pub billing: NewBillingEntry,
    /// Subscription to insert when none exists yet for `(user_id, subscription_id)`.
    pub subscription: NewSubscription,
    /// Status to set when the subscription already exists.
    pub status: SubscriptionStatus,
    /// Ledger for the newly paid period.
    pub ledger: NewUsageLedger,
    /// Instant used to close open free ledgers.
    pub now: DateTime<Utc>,
}

/// What [`Store::record_subscription_payment`] wrote.
#[derive(Debug, Clone)]
pub struct PaymentRecord {
    /// The inserted or updated subscription.
    pub subscription: Subscription,
    /// `true` when the subscription already existed (a renewal).
    pub renewal: bool,
    /// The appended billing history row.
    pub billing_entry: BillingHistoryEntry,
    /// The new usage ledger.
    pub ledger: UsageLedger,
    /// Active free subscriptions that were canceled.
    pub demoted_free_subscriptions: u64,
    /// Open free ledgers whose period was closed.
    pub closed_free_ledgers: u64,
}

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different
/// implementations (PostgreSQL, in-memory for testing).
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // Users
    // =========================================================================

    /// Insert a user.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if the id or email is taken.
    async fn put_user(&self, user: &User) -> Result<()>;

    /// Get a user by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>>;

    // =========================================================================
    // Plans
    // =========================================================================

    /// Insert or replace a catalog plan, keyed by plan id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn upsert_plan(&self, plan: &Plan) -> Result<()>;

    /// Find the plan sold under a provider product id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn find_plan_by_product_id(&self, product_id: &str) -> Result<Option<Plan>>;

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Insert a subscription row.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_subscription(&self, subscription: &NewSubscription) -> Result<Subscription>;

    /// Find a user's subscription by provider id (latest by start date).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn find_subscription(
        &self,
        user_id: &UserId,
        subscription_id: &str,
    ) -> Result<Option<Subscription>>;

    /// Whether any local row carries this provider subscription id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn subscription_exists(&self, subscription_id: &str) -> Result<bool>;

    /// Set the status of every row with this provider subscription id.
    ///
    /// Returns the number of rows changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn set_subscription_status(
        &self,
        subscription_id: &str,
        status: SubscriptionStatus,
    ) -> Result<u64>;

    /// The user's most recently created subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn latest_subscription(&self, user_id: &UserId) -> Result<Option<Subscription>>;

    /// The user's most recently created subscription with status `active`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn latest_active_subscription(&self, user_id: &UserId)
        -> Result<Option<Subscription>>;

    /// All of a user's subscriptions, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_subscriptions(&self, user_id: &UserId) -> Result<Vec<Subscription>>;

    // =========================================================================
    // Usage ledgers
    // =========================================================================

    /// Insert a usage ledger with zero consumption.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_usage(&self, ledger: &NewUsageLedger) -> Result<UsageLedger>;

    /// The user's current ledger (latest by creation time).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn latest_usage(&self, user_id: &UserId) -> Result<Option<UsageLedger>>;

    /// The user's ledger with the latest reset date, for display.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn latest_usage_by_reset_date(&self, user_id: &UserId) -> Result<Option<UsageLedger>>;

    /// All of a user's ledgers, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_usage(&self, user_id: &UserId) -> Result<Vec<UsageLedger>>;

    /// Apply a consume mutation to one ledger row as a single atomic update.
    ///
    /// Returns the number of rows changed; with [`ConsumeGuard::WithinTotal`]
    /// a zero means the row lacked the credit.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn consume_credits(&self, ledger_id: i64, cost: QuotaCost, guard: ConsumeGuard)
        -> Result<u64>;

    // =========================================================================
    // Compound operations
    // =========================================================================

    /// Insert a free subscription and its ledger together.
    ///
    /// # Errors
    ///
    /// Returns an error if either insert fails; nothing is written in that case.
    async fn provision_free_tier(
        &self,
        subscription: &NewSubscription,
        ledger: &NewUsageLedger,
    ) -> Result<(Subscription, UsageLedger)>;

    /// Apply a paid period: billing row, subscription insert or status
    /// update, free-tier demotion, free ledger closure and the new ledger.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails; nothing is written in that case.
    async fn record_subscription_payment(
        &self,
        payment: &SubscriptionPayment,
    ) -> Result<PaymentRecord>;

    // =========================================================================
    // Billing history
    // =========================================================================

    /// A user's billing history, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_billing_history(&self, user_id: &UserId) -> Result<Vec<BillingHistoryEntry>>;

    // =========================================================================
    // Checkout sessions and customers
    // =========================================================================

    /// Record a checkout started by the subscribe action.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_checkout_session(
        &self,
        session: &NewCheckoutSession,
    ) -> Result<CheckoutSession>;

    /// Fill in provider ids on the checkout with this request id.
    ///
    /// Returns the number of rows changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn complete_checkout_session(
        &self,
        request_id: &str,
        completion: &CheckoutCompletion,
    ) -> Result<u64>;

    /// Get the checkout with this request id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_checkout_session(&self, request_id: &str) -> Result<Option<CheckoutSession>>;

    /// Insert a customer link or refresh the one keyed by
    /// `(provider, customer_id)`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if the user already has a different
    /// customer with this provider.
    async fn upsert_customer(&self, customer: &CustomerUpsert) -> Result<Customer>;

    /// Find a customer link by provider id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn find_customer(&self, provider: &str, customer_id: &str) -> Result<Option<Customer>>;

    // =========================================================================
    // Token telemetry
    // =========================================================================

    /// Append an LLM token usage row.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn record_token_usage(&self, usage: &NewTokenUsage) -> Result<TokenUsage>;

    /// A user's token usage rows, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_token_usage(&self, user_id: &UserId) -> Result<Vec<TokenUsage>>;
}
