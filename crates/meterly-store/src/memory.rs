//! In-memory storage implementation.
//!
//! All tables live behind one `tokio::sync::Mutex`, so every trait method,
//! compound operations included, observes and mutates a consistent snapshot.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use meterly_core::{
    BillingHistoryEntry, CheckoutCompletion, CheckoutSession, ConsumeGuard, Customer,
    CustomerUpsert, NewCheckoutSession, NewSubscription, NewTokenUsage, NewUsageLedger, Plan,
    PlanTier, QuotaCost, Subscription, SubscriptionStatus, TokenUsage, UsageLedger, User, UserId,
    is_free_subscription_id,
};

use crate::error::{Result, StoreError};
use crate::{PaymentRecord, Store, SubscriptionPayment};

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, User>,
    plans: HashMap<String, Plan>,
    subscriptions: Vec<Subscription>,
    usage: Vec<UsageLedger>,
    billing: Vec<BillingHistoryEntry>,
    checkouts: Vec<CheckoutSession>,
    customers: Vec<Customer>,
    token_usage: Vec<TokenUsage>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_subscription(&mut self, new: &NewSubscription) -> Subscription {
        let now = Utc::now();
        let row = Subscription {
            id: self.next_id(),
            user_id: new.user_id,
            plan_id: new.plan_id.clone(),
            subscription_id: new.subscription_id.clone(),
            product_id: new.product_id.clone(),
            status: new.status,
            start_date: new.start_date,
            end_date: None,
            cancel_at_period_end: false,
            trial_end_date: None,
            provider: Some(new.provider.clone()),
            price: new.price,
            currency: new.currency.clone(),
            interval: new.interval.clone(),
            created_at: now,
            updated_at: now,
        };
        self.subscriptions.push(row.clone());
        row
    }

    fn insert_usage(&mut self, new: &NewUsageLedger) -> UsageLedger {
        let now = Utc::now();
        let row = UsageLedger {
            id: self.next_id(),
            user_id: new.user_id,
            subscription_id: new.subscription_id.clone(),
            credit_total: new.credit_total,
            credit_used: 0,
            text_used: 0,
            image_used: 0,
            current_period_start_date: new.current_period_start_date,
            current_period_end_date: new.current_period_end_date,
            reset_date: new.reset_date,
            created_at: now,
            updated_at: now,
        };
        self.usage.push(row.clone());
        row
    }

    fn set_subscription_status(&mut self, subscription_id: &str, status: SubscriptionStatus) -> u64 {
        let now = Utc::now();
        let mut changed = 0;
        for row in self
            .subscriptions
            .iter_mut()
            .filter(|s| s.subscription_id == subscription_id)
        {
            row.status = status;
            row.updated_at = now;
            changed += 1;
        }
        changed
    }

    fn find_subscription(&self, user_id: &UserId, subscription_id: &str) -> Option<Subscription> {
        self.subscriptions
            .iter()
            .filter(|s| s.user_id == *user_id && s.subscription_id == subscription_id)
            .max_by_key(|s| (s.start_date, s.id))
            .cloned()
    }
}

/// In-memory store for tests and database-less local runs.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    // =========================================================================
    // Users
    // =========================================================================

    async fn put_user(&self, user: &User) -> Result<()> {
        let mut t = self.tables.lock().await;
        if t.users.contains_key(&user.id) {
            return Err(StoreError::Conflict(format!("user {} exists", user.id)));
        }
        if user.email.is_some() && t.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict("email already registered".to_string()));
        }
        t.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>> {
        Ok(self.tables.lock().await.users.get(user_id).cloned())
    }

    // =========================================================================
    // Plans
    // =========================================================================

    async fn upsert_plan(&self, plan: &Plan) -> Result<()> {
        self.tables
            .lock()
            .await
            .plans
            .insert(plan.id.clone(), plan.clone());
        Ok(())
    }

    async fn find_plan_by_product_id(&self, product_id: &str) -> Result<Option<Plan>> {
        Ok(self
            .tables
            .lock()
            .await
            .plans
            .values()
            .find(|p| p.product_id == product_id)
            .cloned())
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    async fn insert_subscription(&self, subscription: &NewSubscription) -> Result<Subscription> {
        Ok(self.tables.lock().await.insert_subscription(subscription))
    }

    async fn find_subscription(
        &self,
        user_id: &UserId,
        subscription_id: &str,
    ) -> Result<Option<Subscription>> {
        Ok(self
            .tables
            .lock()
            .await
            .find_subscription(user_id, subscription_id))
    }

    async fn subscription_exists(&self, subscription_id: &str) -> Result<bool> {
        Ok(self
            .tables
            .lock()
            .await
            .subscriptions
            .iter()
            .any(|s| s.subscription_id == subscription_id))
    }

    async fn set_subscription_status(
        &self,
        subscription_id: &str,
        status: SubscriptionStatus,
    ) -> Result<u64> {
        Ok(self
            .tables
            .lock()
            .await
            .set_subscription_status(subscription_id, status))
    }

    async fn latest_subscription(&self, user_id: &UserId) -> Result<Option<Subscription>> {
        Ok(self
            .tables
            .lock()
            .await
            .subscriptions
            .iter()
            .filter(|s| s.user_id == *user_id)
            .max_by_key(|s| (s.created_at, s.id))
            .cloned())
    }

    async fn latest_active_subscription(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Subscription>> {
        Ok(self
            .tables
            .lock()
            .await
            .subscriptions
            .iter()
            .filter(|s| s.user_id == *user_id && s.status == SubscriptionStatus::Active)
            .max_by_key(|s| (s.created_at, s.id))
            .cloned())
    }

    async fn list_subscriptions(&self, user_id: &UserId) -> Result<Vec<Subscription>> {
        Ok(self
            .tables
            .lock()
            .await
            .subscriptions
            .iter()
            .filter(|s| s.user_id == *user_id)
            .cloned()
            .collect())
    }

    // =========================================================================
    // Usage ledgers
    // =========================================================================

    async fn insert_usage(&self, ledger: &NewUsageLedger) -> Result<UsageLedger> {
        Ok(self.tables.lock().await.insert_usage(ledger))
    }

    async fn latest_usage(&self, user_id: &UserId) -> Result<Option<UsageLedger>> {
        Ok(self
            .tables
            .lock()
            .await
            .usage
            .iter()
            .filter(|u| u.user_id == *user_id)
            .max_by_key(|u| (u.created_at, u.id))
            .cloned())
    }

    async fn latest_usage_by_reset_date(&self, user_id: &UserId) -> Result<Option<UsageLedger>> {
        Ok(self
            .tables
            .lock()
            .await
            .usage
            .iter()
            .filter(|u| u.user_id == *user_id)
            .max_by_key(|u| (u.reset_date, u.created_at, u.id))
            .cloned())
    }

    async fn list_usage(&self, user_id: &UserId) -> Result<Vec<UsageLedger>> {
        Ok(self
            .tables
            .lock()
            .await
            .usage
            .iter()
            .filter(|u| u.user_id == *user_id)
            .cloned()
            .collect())
    }

    async fn consume_credits(
        &self,
        ledger_id: i64,
        cost: QuotaCost,
        guard: ConsumeGuard,
    ) -> Result<u64> {
        let mut t = self.tables.lock().await;
        let Some(row) = t.usage.iter_mut().find(|u| u.id == ledger_id) else {
            return Ok(0);
        };
        if guard == ConsumeGuard::WithinTotal && !row.can_afford(cost.credits()) {
            return Ok(0);
        }
        row.credit_used += cost.credits();
        row.text_used += cost.text;
        row.image_used += cost.image;
        row.updated_at = Utc::now();
        Ok(1)
    }

    // =========================================================================
    // Compound operations
    // =========================================================================

    async fn provision_free_tier(
        &self,
        subscription: &NewSubscription,
        ledger: &NewUsageLedger,
    ) -> Result<(Subscription, UsageLedger)> {
        let mut t = self.tables.lock().await;
        let sub = t.insert_subscription(subscription);
        let usage = t.insert_usage(ledger);
        Ok((sub, usage))
    }

    async fn record_subscription_payment(
        &self,
        payment: &SubscriptionPayment,
    ) -> Result<PaymentRecord> {
        let mut t = self.tables.lock().await;
        let now = payment.now;

        let billing_entry = BillingHistoryEntry {
            id: t.next_id(),
            user_id: payment.billing.user_id,
            subscription_id: payment.billing.subscription_id.clone(),
            amount: payment.billing.amount,
            currency: payment.billing.currency.clone(),
            status: payment.billing.status.clone(),
            description: payment.billing.description.clone(),
            payment_method: payment.billing.payment_method.clone(),
            invoice_url: None,
            receipt_url: None,
            billing_type: payment.billing.billing_type.clone(),
            billing_period: payment.billing.billing_period.clone(),
            created_at: Utc::now(),
        };
        t.billing.push(billing_entry.clone());

        let renewal = t
            .find_subscription(&payment.user_id, &payment.subscription_id)
            .is_some();
        let subscription = if renewal {
            t.set_subscription_status(&payment.subscription_id, payment.status);
            t.find_subscription(&payment.user_id, &payment.subscription_id)
                .ok_or_else(|| StoreError::NotFound {
                    entity: "subscription",
                    id: payment.subscription_id.clone(),
                })?
        } else {
            t.insert_subscription(&payment.subscription)
        };

        let mut demoted_free_subscriptions = 0;
        for row in t.subscriptions.iter_mut().filter(|s| {
            s.user_id == payment.user_id
                && s.status == SubscriptionStatus::Active
                && s.plan_id.as_deref() == Some(PlanTier::Free.as_str())
        }) {
            row.status = SubscriptionStatus::Canceled;
            row.updated_at = now;
            demoted_free_subscriptions += 1;
        }

        let mut closed_free_ledgers = 0;
        for row in t.usage.iter_mut().filter(|u| {
            u.user_id == payment.user_id
                && is_free_subscription_id(&u.subscription_id)
                && u.current_period_end_date.is_some_and(|end| end >= now)
        }) {
            row.current_period_end_date = Some(now);
            row.updated_at = now;
            closed_free_ledgers += 1;
        }

        let ledger = t.insert_usage(&payment.ledger);

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
        Ok(self
            .tables
            .lock()
            .await
            .billing
            .iter()
            .filter(|b| b.user_id == *user_id)
            .cloned()
            .collect())
    }

    // =========================================================================
    // Checkout sessions and customers
    // =========================================================================

    async fn insert_checkout_session(
        &self,
        session: &NewCheckoutSession,
    ) -> Result<CheckoutSession> {
        let mut t = self.tables.lock().await;
        let now = Utc::now();
        let row = CheckoutSession {
            id: t.next_id(),
            user_id: session.user_id,
            request_id: session.request_id.clone(),
            checkout_url: session.checkout_url.clone(),
            checkout_id: session.checkout_id.clone(),
            order_id: None,
            customer_id: None,
            subscription_id: None,
            product_id: session.product_id.clone(),
            status: session.status.clone(),
            created_at: now,
            updated_at: now,
        };
        t.checkouts.push(row.clone());
        Ok(row)
    }

    async fn complete_checkout_session(
        &self,
        request_id: &str,
        completion: &CheckoutCompletion,
    ) -> Result<u64> {
        let mut t = self.tables.lock().await;
        let now = Utc::now();
        let mut changed = 0;
        for row in t.checkouts.iter_mut().filter(|c| c.request_id == request_id) {
            row.status.clone_from(&completion.status);
            row.checkout_id.clone_from(&completion.checkout_id);
            row.order_id.clone_from(&completion.order_id);
            row.customer_id.clone_from(&completion.customer_id);
            row.subscription_id.clone_from(&completion.subscription_id);
            row.product_id.clone_from(&completion.product_id);
            row.updated_at = now;
            changed += 1;
        }
        Ok(changed)
    }

    async fn get_checkout_session(&self, request_id: &str) -> Result<Option<CheckoutSession>> {
        Ok(self
            .tables
            .lock()
            .await
            .checkouts
            .iter()
            .filter(|c| c.request_id == request_id)
            .max_by_key(|c| (c.created_at, c.id))
            .cloned())
    }

    async fn upsert_customer(&self, customer: &CustomerUpsert) -> Result<Customer> {
        let mut t = self.tables.lock().await;
        let now = Utc::now();

        if let Some(row) = t
            .customers
            .iter_mut()
            .find(|c| c.provider == customer.provider && c.customer_id == customer.customer_id)
        {
            row.customer_email.clone_from(&customer.customer_email);
            row.customer_name.clone_from(&customer.customer_name);
            row.metadata = customer.metadata.clone();
            row.is_active = true;
            row.updated_at = now;
            return Ok(row.clone());
        }

        if t
            .customers
            .iter()
            .any(|c| c.user_id == customer.user_id && c.provider == customer.provider)
        {
            return Err(StoreError::Conflict(format!(
                "user {} already linked to a {} customer",
                customer.user_id, customer.provider
            )));
        }

        let row = Customer {
            id: t.next_id(),
            user_id: customer.user_id,
            provider: customer.provider.clone(),
            customer_id: customer.customer_id.clone(),
            customer_email: customer.customer_email.clone(),
            customer_name: customer.customer_name.clone(),
            country: customer.country.clone(),
            metadata: customer.metadata.clone(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        t.customers.push(row.clone());
        Ok(row)
    }

    async fn find_customer(&self, provider: &str, customer_id: &str) -> Result<Option<Customer>> {
        Ok(self
            .tables
            .lock()
            .await
            .customers
            .iter()
            .find(|c| c.provider == provider && c.customer_id == customer_id)
            .cloned())
    }

    // =========================================================================
    // Token telemetry
    // =========================================================================

    async fn record_token_usage(&self, usage: &NewTokenUsage) -> Result<TokenUsage> {
        let mut t = self.tables.lock().await;
        let row = TokenUsage {
            id: t.next_id(),
            usage: usage.clone(),
            created_at: Utc::now(),
        };
        t.token_usage.push(row.clone());
        Ok(row)
    }

    async fn list_token_usage(&self, user_id: &UserId) -> Result<Vec<TokenUsage>> {
        Ok(self
            .tables
            .lock()
            .await
            .token_usage
            .iter()
            .filter(|u| u.usage.user_id == *user_id)
            .cloned()
            .collect())
    }
}
