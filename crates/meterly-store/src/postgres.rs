//! PostgreSQL storage implementation.
//!
//! Queries are plain runtime `sqlx` queries mapped through `FromRow` row
//! structs, so the crate builds without a live database. Compound operations
//! run inside one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};

use meterly_core::{
    BillingHistoryEntry, CheckoutCompletion, CheckoutSession, ConsumeGuard, Customer,
    CustomerUpsert, NewCheckoutSession, NewSubscription, NewTokenUsage, NewUsageLedger, Plan,
    PlanTier, QuotaCost, Subscription, SubscriptionStatus, TokenUsage, UsageLedger, User, UserId,
    FREE_SUBSCRIPTION_PREFIX,
};

use crate::error::{Result, StoreError};
use crate::{PaymentRecord, Store, SubscriptionPayment};

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, plan_id, subscription_id, product_id, status, \
     start_date, end_date, cancel_at_period_end, trial_end_date, provider, price, currency, \
     interval, created_at, updated_at";

const USAGE_COLUMNS: &str = "id, user_id, subscription_id, credit_total, credit_used, text_used, \
     image_used, current_period_start_date, current_period_end_date, reset_date, created_at, \
     updated_at";

const BILLING_COLUMNS: &str = "id, user_id, subscription_id, amount, currency, status, \
     description, payment_method, invoice_url, receipt_url, billing_type, billing_period, \
     created_at";

const CHECKOUT_COLUMNS: &str = "id, user_id, request_id, checkout_url, checkout_id, order_id, \
     customer_id, subscription_id, product_id, status, created_at, updated_at";

const CUSTOMER_COLUMNS: &str = "id, user_id, provider, customer_id, customer_email, \
     customer_name, country, metadata, is_active, created_at, updated_at";

const TOKEN_USAGE_COLUMNS: &str = "id, user_id, provider, model, prompt_tokens, \
     completion_tokens, total_tokens, duration, request_id, endpoint, created_at";

// =============================================================================
// Row types
// =============================================================================

#[derive(sqlx::FromRow)]
struct UserRow {
    id: uuid::Uuid,
    email: Option<String>,
    name: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: UserId::from_uuid(row.id),
            email: row.email,
            name: row.name,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PlanRow {
    id: String,
    product_id: String,
    name: String,
    price: i64,
    currency: String,
    interval: String,
    description: String,
    credits: i64,
    features: Json<Vec<String>>,
    created_at: DateTime<Utc>,
}

impl From<PlanRow> for Plan {
    fn from(row: PlanRow) -> Self {
        Self {
            id: row.id,
            product_id: row.product_id,
            name: row.name,
            price: row.price,
            currency: row.currency,
            interval: row.interval,
            description: row.description,
            credits: row.credits,
            features: row.features.0,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    id: i64,
    user_id: uuid::Uuid,
    plan_id: Option<String>,
    subscription_id: String,
    product_id: String,
    status: String,
    start_date: DateTime<Utc>,
    end_date: Option<DateTime<Utc>>,
    cancel_at_period_end: bool,
    trial_end_date: Option<DateTime<Utc>>,
    provider: Option<String>,
    price: i64,
    currency: String,
    interval: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = StoreError;

    fn try_from(row: SubscriptionRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            user_id: UserId::from_uuid(row.user_id),
            plan_id: row.plan_id,
            subscription_id: row.subscription_id,
            product_id: row.product_id,
            status: row.status.parse()?,
            start_date: row.start_date,
            end_date: row.end_date,
            cancel_at_period_end: row.cancel_at_period_end,
            trial_end_date: row.trial_end_date,
            provider: row.provider,
            price: row.price,
            currency: row.currency,
            interval: row.interval,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UsageRow {
    id: i64,
    user_id: uuid::Uuid,
    subscription_id: String,
    credit_total: i64,
    credit_used: i64,
    text_used: i64,
    image_used: i64,
    current_period_start_date: Option<DateTime<Utc>>,
    current_period_end_date: Option<DateTime<Utc>>,
    reset_date: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UsageRow> for UsageLedger {
    fn from(row: UsageRow) -> Self {
        Self {
            id: row.id,
            user_id: UserId::from_uuid(row.user_id),
            subscription_id: row.subscription_id,
            credit_total: row.credit_total,
            credit_used: row.credit_used,
            text_used: row.text_used,
            image_used: row.image_used,
            current_period_start_date: row.current_period_start_date,
            current_period_end_date: row.current_period_end_date,
            reset_date: row.reset_date,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct BillingRow {
    id: i64,
    user_id: uuid::Uuid,
    subscription_id: Option<String>,
    amount: i64,
    currency: String,
    status: String,
    description: String,
    payment_method: String,
    invoice_url: Option<String>,
    receipt_url: Option<String>,
    billing_type: Option<String>,
    billing_period: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<BillingRow> for BillingHistoryEntry {
    fn from(row: BillingRow) -> Self {
        Self {
            id: row.id,
            user_id: UserId::from_uuid(row.user_id),
            subscription_id: row.subscription_id,
            amount: row.amount,
            currency: row.currency,
            status: row.status,
            description: row.description,
            payment_method: row.payment_method,
            invoice_url: row.invoice_url,
            receipt_url: row.receipt_url,
            billing_type: row.billing_type,
            billing_period: row.billing_period,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CheckoutRow {
    id: i64,
    user_id: uuid::Uuid,
    request_id: String,
    checkout_url: Option<String>,
    checkout_id: Option<String>,
    order_id: Option<String>,
    customer_id: Option<String>,
    subscription_id: Option<String>,
    product_id: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CheckoutRow> for CheckoutSession {
    fn from(row: CheckoutRow) -> Self {
        Self {
            id: row.id,
            user_id: UserId::from_uuid(row.user_id),
            request_id: row.request_id,
            checkout_url: row.checkout_url,
            checkout_id: row.checkout_id,
            order_id: row.order_id,
            customer_id: row.customer_id,
            subscription_id: row.subscription_id,
            product_id: row.product_id,
            status: row.status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CustomerRow {
    id: i64,
    user_id: uuid::Uuid,
    provider: String,
    customer_id: String,
    customer_email: Option<String>,
    customer_name: Option<String>,
    country: Option<String>,
    metadata: Json<serde_json::Value>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CustomerRow> for Customer {
    fn from(row: CustomerRow) -> Self {
        Self {
            id: row.id,
            user_id: UserId::from_uuid(row.user_id),
            provider: row.provider,
            customer_id: row.customer_id,
            customer_email: row.customer_email,
            customer_name: row.customer_name,
            country: row.country,
            metadata: row.metadata.0,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TokenUsageRow {
    id: i64,
    user_id: uuid::Uuid,
    provider: String,
    model: Option<String>,
    prompt_tokens: i64,
    completion_tokens: i64,
    total_tokens: i64,
    duration: i64,
    request_id: Option<String>,
    endpoint: String,
    created_at: DateTime<Utc>,
}

impl From<TokenUsageRow> for TokenUsage {
    fn from(row: TokenUsageRow) -> Self {
        Self {
            id: row.id,
            usage: NewTokenUsage {
                user_id: UserId::from_uuid(row.user_id),
                provider: row.provider,
                model: row.model,
                prompt_tokens: row.prompt_tokens,
                completion_tokens: row.completion_tokens,
                total_tokens: row.total_tokens,
                duration_ms: row.duration,
                request_id: row.request_id,
                endpoint: row.endpoint,
            },
            created_at: row.created_at,
        }
    }
}

// =============================================================================
// Store
// =============================================================================

/// PostgreSQL-backed storage implementation.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to the database and apply pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or a migration fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!(max_connections, "PostgreSQL store ready");

        Ok(Self { pool })
    }

    /// Wrap an existing pool without running migrations.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_subscription_in(
        tx: &mut Transaction<'_, Postgres>,
        new: &NewSubscription,
    ) -> Result<Subscription> {
        let sql = format!(
            "INSERT INTO subscriptions \
             (user_id, plan_id, subscription_id, product_id, status, start_date, provider, \
              price, currency, interval) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {SUBSCRIPTION_COLUMNS}"
        );
        sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(new.user_id.as_uuid())
            .bind(&new.plan_id)
            .bind(&new.subscription_id)
            .bind(&new.product_id)
            .bind(new.status.as_str())
            .bind(new.start_date)
            .bind(&new.provider)
            .bind(new.price)
            .bind(&new.currency)
            .bind(&new.interval)
            .fetch_one(&mut **tx)
            .await?
            .try_into()
    }

    async fn insert_usage_in(
        tx: &mut Transaction<'_, Postgres>,
        new: &NewUsageLedger,
    ) -> Result<UsageLedger> {
        let sql = format!(
            "INSERT INTO usage_data \
             (user_id, subscription_id, credit_total, current_period_start_date, \
              current_period_end_date, reset_date) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {USAGE_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, UsageRow>(&sql)
            .bind(new.user_id.as_uuid())
            .bind(&new.subscription_id)
            .bind(new.credit_total)
            .bind(new.current_period_start_date)
            .bind(new.current_period_end_date)
            .bind(new.reset_date)
            .fetch_one(&mut **tx)
            .await?
            .into())
    }

    async fn fetch_subscription(&self, sql: &str, user_id: &UserId) -> Result<Option<Subscription>> {
        sqlx::query_as::<_, SubscriptionRow>(sql)
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(Subscription::try_from)
            .transpose()
    }

    async fn fetch_usage(&self, sql: &str, user_id: &UserId) -> Result<Option<UsageLedger>> {
        Ok(sqlx::query_as::<_, UsageRow>(sql)
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(Into::into))
    }
}

#[async_trait]
impl Store for PgStore {
    // =========================================================================
    // Users
    // =========================================================================

    async fn put_user(&self, user: &User) -> Result<()> {
        sqlx::query("INSERT INTO users (id, email, name, created_at) VALUES ($1, $2, $3, $4)")
            .bind(user.id.as_uuid())
            .bind(&user.email)
            .bind(&user.name)
            .bind(user.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>> {
        Ok(sqlx::query_as::<_, UserRow>(
            "SELECT id, email, name, created_at FROM users WHERE id = $1",
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(Into::into))
    }

    // =========================================================================
    // Plans
    // =========================================================================

    async fn upsert_plan(&self, plan: &Plan) -> Result<()> {
        sqlx::query(
            "INSERT INTO plans \
             (id, product_id, name, price, currency, interval, description, credits, features) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (id) DO UPDATE SET \
             product_id = EXCLUDED.product_id, name = EXCLUDED.name, price = EXCLUDED.price, \
             currency = EXCLUDED.currency, interval = EXCLUDED.interval, \
             description = EXCLUDED.description, credits = EXCLUDED.credits, \
             features = EXCLUDED.features, updated_at = now()",
        )
        .bind(&plan.id)
        .bind(&plan.product_id)
        .bind(&plan.name)
        .bind(plan.price)
        .bind(&plan.currency)
        .bind(&plan.interval)
        .bind(&plan.description)
        .bind(plan.credits)
        .bind(Json(&plan.features))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_plan_by_product_id(&self, product_id: &str) -> Result<Option<Plan>> {
        Ok(sqlx::query_as::<_, PlanRow>(
            "SELECT id, product_id, name, price, currency, interval, description, credits, \
             features, created_at FROM plans WHERE product_id = $1 AND deleted_at IS NULL",
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Into::into))
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    async fn insert_subscription(&self, subscription: &NewSubscription) -> Result<Subscription> {
        let mut tx = self.pool.begin().await?;
        let row = Self::insert_subscription_in(&mut tx, subscription).await?;
        tx.commit().await?;
        Ok(row)
    }

    async fn find_subscription(
        &self,
        user_id: &UserId,
        subscription_id: &str,
    ) -> Result<Option<Subscription>> {
        let sql = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
             WHERE user_id = $1 AND subscription_id = $2 \
             ORDER BY start_date DESC, id DESC LIMIT 1"
        );
        sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(user_id.as_uuid())
            .bind(subscription_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Subscription::try_from)
            .transpose()
    }

    async fn subscription_exists(&self, subscription_id: &str) -> Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM subscriptions WHERE subscription_id = $1)",
        )
        .bind(subscription_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn set_subscription_status(
        &self,
        subscription_id: &str,
        status: SubscriptionStatus,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE subscriptions SET status = $2, updated_at = now() WHERE subscription_id = $1",
        )
        .bind(subscription_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn latest_subscription(&self, user_id: &UserId) -> Result<Option<Subscription>> {
        let sql = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT 1"
        );
        self.fetch_subscription(&sql, user_id).await
    }

    async fn latest_active_subscription(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Subscription>> {
        let sql = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
             WHERE user_id = $1 AND status = 'active' \
             ORDER BY created_at DESC, id DESC LIMIT 1"
        );
        self.fetch_subscription(&sql, user_id).await
    }

    async fn list_subscriptions(&self, user_id: &UserId) -> Result<Vec<Subscription>> {
        let sql = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = $1 \
             ORDER BY created_at, id"
        );
        sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(user_id.as_uuid())
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Subscription::try_from)
            .collect()
    }

    // =========================================================================
    // Usage ledgers
    // =========================================================================

    async fn insert_usage(&self, ledger: &NewUsageLedger) -> Result<UsageLedger> {
        let mut tx = self.pool.begin().await?;
        let row = Self::insert_usage_in(&mut tx, ledger).await?;
        tx.commit().await?;
        Ok(row)
    }

    async fn latest_usage(&self, user_id: &UserId) -> Result<Option<UsageLedger>> {
        let sql = format!(
            "SELECT {USAGE_COLUMNS} FROM usage_data WHERE user_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT 1"
        );
        self.fetch_usage(&sql, user_id).await
    }

    async fn latest_usage_by_reset_date(&self, user_id: &UserId) -> Result<Option<UsageLedger>> {
        let sql = format!(
            "SELECT {USAGE_COLUMNS} FROM usage_data WHERE user_id = $1 \
             ORDER BY reset_date DESC NULLS LAST, created_at DESC, id DESC LIMIT 1"
        );
        self.fetch_usage(&sql, user_id).await
    }

    async fn list_usage(&self, user_id: &UserId) -> Result<Vec<UsageLedger>> {
        let sql = format!(
            "SELECT {USAGE_COLUMNS} FROM usage_data WHERE user_id = $1 ORDER BY created_at, id"
        );
        Ok(sqlx::query_as::<_, UsageRow>(&sql)
            .bind(user_id.as_uuid())
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    async fn consume_credits(
        &self,
        ledger_id: i64,
        cost: QuotaCost,
        guard: ConsumeGuard,
    ) -> Result<u64> {
        let sql = match guard {
            ConsumeGuard::Unchecked => {
                "UPDATE usage_data SET credit_used = credit_used + $2 + $3, \
                 text_used = text_used + $2, image_used = image_used + $3, updated_at = now() \
                 WHERE id = $1"
            }
            ConsumeGuard::WithinTotal => {
                "UPDATE usage_data SET credit_used = credit_used + $2 + $3, \
                 text_used = text_used + $2, image_used = image_used + $3, updated_at = now() \
                 WHERE id = $1 AND credit_used + $2 + $3 <= credit_total"
            }
        };
        let result = sqlx::query(sql)
            .bind(ledger_id)
            .bind(cost.text)
            .bind(cost.image)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // =========================================================================
    // Compound operations
    // =========================================================================

    async fn provision_free_tier(
        &self,
        subscription: &NewSubscription,
        ledger: &NewUsageLedger,
    ) -> Result<(Subscription, UsageLedger)> {
        let mut tx = self.pool.begin().await?;
        let sub = Self::insert_subscription_in(&mut tx, subscription).await?;
        let usage = Self::insert_usage_in(&mut tx, ledger).await?;
        tx.commit().await?;
        Ok((sub, usage))
    }

    async fn record_subscription_payment(
        &self,
        payment: &SubscriptionPayment,
    ) -> Result<PaymentRecord> {
        let mut tx = self.pool.begin().await?;
        let user = payment.user_id.as_uuid();

        let sql = format!(
            "INSERT INTO billing_history \
             (user_id, subscription_id, amount, currency, status, description, payment_method, \
              billing_type, billing_period) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {BILLING_COLUMNS}"
        );
        let billing_entry: BillingHistoryEntry = sqlx::query_as::<_, BillingRow>(&sql)
            .bind(payment.billing.user_id.as_uuid())
            .bind(&payment.billing.subscription_id)
            .bind(payment.billing.amount)
            .bind(&payment.billing.currency)
            .bind(&payment.billing.status)
            .bind(&payment.billing.description)
            .bind(&payment.billing.payment_method)
            .bind(&payment.billing.billing_type)
            .bind(&payment.billing.billing_period)
            .fetch_one(&mut *tx)
            .await?
            .into();

        let sql = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
             WHERE user_id = $1 AND subscription_id = $2 \
             ORDER BY start_date DESC, id DESC LIMIT 1 FOR UPDATE"
        );
        let existing = sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(user)
            .bind(&payment.subscription_id)
            .fetch_optional(&mut *tx)
            .await?;
        let renewal = existing.is_some();

        let subscription: Subscription = if renewal {
            let sql = format!(
                "UPDATE subscriptions SET status = $2, updated_at = now() \
                 WHERE subscription_id = $1 RETURNING {SUBSCRIPTION_COLUMNS}"
            );
            let rows = sqlx::query_as::<_, SubscriptionRow>(&sql)
                .bind(&payment.subscription_id)
                .bind(payment.status.as_str())
                .fetch_all(&mut *tx)
                .await?;
            rows.into_iter()
                .filter(|r| r.user_id == *user)
                .max_by_key(|r| (r.start_date, r.id))
                .ok_or_else(|| StoreError::NotFound {
                    entity: "subscription",
                    id: payment.subscription_id.clone(),
                })?
                .try_into()?
        } else {
            Self::insert_subscription_in(&mut tx, &payment.subscription).await?
        };

        let demoted_free_subscriptions = sqlx::query(
            "UPDATE subscriptions SET status = 'canceled', updated_at = now() \
             WHERE user_id = $1 AND status = 'active' AND plan_id = $2",
        )
        .bind(user)
        .bind(PlanTier::Free.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let closed_free_ledgers = sqlx::query(
            "UPDATE usage_data SET current_period_end_date = $2, updated_at = now() \
             WHERE user_id = $1 AND current_period_end_date >= $2 AND subscription_id LIKE $3",
        )
        .bind(user)
        .bind(payment.now)
        .bind(format!("{FREE_SUBSCRIPTION_PREFIX}%"))
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let ledger = Self::insert_usage_in(&mut tx, &payment.ledger).await?;

        tx.commit().await?;

        Ok(PaymentRecord {
            subscription,
            renewal,
            billing_entry,
            ledger,
            demoted_free_subscriptions,
            closed_free_ledgers,
        })
    }

    // =========================================================================
    // Billing history
    // =========================================================================

    async fn list_billing_history(&self, user_id: &UserId) -> Result<Vec<BillingHistoryEntry>> {
        let sql = format!(
            "SELECT {BILLING_COLUMNS} FROM billing_history WHERE user_id = $1 \
             ORDER BY created_at, id"
        );
        Ok(sqlx::query_as::<_, BillingRow>(&sql)
            .bind(user_id.as_uuid())
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    // =========================================================================
    // Checkout sessions and customers
    // =========================================================================

    async fn insert_checkout_session(
        &self,
        session: &NewCheckoutSession,
    ) -> Result<CheckoutSession> {
        let sql = format!(
            "INSERT INTO checkout_sessions \
             (user_id, request_id, checkout_url, checkout_id, product_id, status) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {CHECKOUT_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, CheckoutRow>(&sql)
            .bind(session.user_id.as_uuid())
            .bind(&session.request_id)
            .bind(&session.checkout_url)
            .bind(&session.checkout_id)
            .bind(&session.product_id)
            .bind(&session.status)
            .fetch_one(&self.pool)
            .await?
            .into())
    }

    async fn complete_checkout_session(
        &self,
        request_id: &str,
        completion: &CheckoutCompletion,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE checkout_sessions SET status = $2, checkout_id = $3, order_id = $4, \
             customer_id = $5, subscription_id = $6, product_id = $7, updated_at = now() \
             WHERE request_id = $1",
        )
        .bind(request_id)
        .bind(&completion.status)
        .bind(&completion.checkout_id)
        .bind(&completion.order_id)
        .bind(&completion.customer_id)
        .bind(&completion.subscription_id)
        .bind(&completion.product_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn get_checkout_session(&self, request_id: &str) -> Result<Option<CheckoutSession>> {
        let sql = format!(
            "SELECT {CHECKOUT_COLUMNS} FROM checkout_sessions WHERE request_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT 1"
        );
        Ok(sqlx::query_as::<_, CheckoutRow>(&sql)
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Into::into))
    }

    async fn upsert_customer(&self, customer: &CustomerUpsert) -> Result<Customer> {
        let sql = format!(
            "INSERT INTO customers \
             (user_id, provider, customer_id, customer_email, customer_name, country, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (provider, customer_id) DO UPDATE SET \
             customer_email = EXCLUDED.customer_email, customer_name = EXCLUDED.customer_name, \
             metadata = EXCLUDED.metadata, is_active = true, updated_at = now() \
             RETURNING {CUSTOMER_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, CustomerRow>(&sql)
            .bind(customer.user_id.as_uuid())
            .bind(&customer.provider)
            .bind(&customer.customer_id)
            .bind(&customer.customer_email)
            .bind(&customer.customer_name)
            .bind(&customer.country)
            .bind(Json(&customer.metadata))
            .fetch_one(&self.pool)
            .await?
            .into())
    }

    async fn find_customer(&self, provider: &str, customer_id: &str) -> Result<Option<Customer>> {
        let sql = format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE provider = $1 AND customer_id = $2"
        );
        Ok(sqlx::query_as::<_, CustomerRow>(&sql)
            .bind(provider)
            .bind(customer_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Into::into))
    }

    // =========================================================================
    // Token telemetry
    // =========================================================================

    async fn record_token_usage(&self, usage: &NewTokenUsage) -> Result<TokenUsage> {
        let sql = format!(
            "INSERT INTO llm_token_usage \
             (user_id, provider, model, prompt_tokens, completion_tokens, total_tokens, \
              duration, request_id, endpoint) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {TOKEN_USAGE_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, TokenUsageRow>(&sql)
            .bind(usage.user_id.as_uuid())
            .bind(&usage.provider)
            .bind(&usage.model)
            .bind(usage.prompt_tokens)
            .bind(usage.completion_tokens)
            .bind(usage.total_tokens)
            .bind(usage.duration_ms)
            .bind(&usage.request_id)
            .bind(&usage.endpoint)
            .fetch_one(&self.pool)
            .await?
            .into())
    }

    async fn list_token_usage(&self, user_id: &UserId) -> Result<Vec<TokenUsage>> {
        let sql = format!(
            "SELECT {TOKEN_USAGE_COLUMNS} FROM llm_token_usage WHERE user_id = $1 \
             ORDER BY created_at, id"
        );
        Ok(sqlx::query_as::<_, TokenUsageRow>(&sql)
            .bind(user_id.as_uuid())
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Into::into)
            .collect())
    }
}
