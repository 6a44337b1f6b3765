//! Webhook reconciler: turns Creem events into local subscription state.
//!
//! | Event | Effect |
//! |---|---|
//! | `checkout.completed` | checkout session filled in, customer linked |
//! | `subscription.paid` | billing row, subscription insert or refresh, free tier superseded, new ledger |
//! | `subscription.canceled` | status `canceled`, ledger untouched |
//! | `subscription.expired` | status `expired` |
//!
//! Replaying `subscription.paid` appends another billing row and another
//! ledger; nothing is keyed on the provider's event id.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;

use meterly_core::{
    BillingError, CheckoutCompletion, CustomerUpsert, NewBillingEntry, NewSubscription,
    NewUsageLedger, SubscriptionStatus, UserId, CANCEL_BONUS_CREDITS, CREEM_PROVIDER,
};
use meterly_store::{PaymentRecord, Store, SubscriptionPayment};

use crate::creem::{self, CheckoutMetadata, CreemClient, Expandable, WebhookEvent};
use crate::provisioning::provision_free_tier;

/// Interval recorded on a paid subscription when the product has no
/// billing period.
const DEFAULT_PAID_INTERVAL: &str = "3 months";

/// What a webhook delivery did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// The event changed local state.
    Applied,
    /// The event was recognised and skipped, or soft-failed.
    Ignored,
}

/// Result of a cancel-now request.
#[derive(Debug, Clone)]
pub struct CancelOutcome {
    /// Provider status after the cancel call.
    pub provider_status: String,
    /// Credits granted to the replacement free ledger, when one was created.
    pub carried_credits: Option<i64>,
}

/// Applies provider events and user-initiated cancellation to the store.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn Store>,
}

impl Reconciler {
    /// Create a reconciler over `store`.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Dispatch a verified webhook event.
    pub async fn handle_event(&self, event: &WebhookEvent) -> Result<EventOutcome, BillingError> {
        tracing::info!(
            event_type = %event.event_type,
            event_id = ?event.id,
            "Processing Creem webhook"
        );

        match event.event_type.as_str() {
            "checkout.completed" => {
                // Failures are logged and acknowledged, never redelivered.
                let result = match parse_object::<creem::Checkout>(event) {
                    Ok(checkout) => self.checkout_completed(&checkout).await,
                    Err(e) => Err(e),
                };
                result.or_else(|e| {
                    tracing::error!(event_id = ?event.id, error = %e, "checkout.completed failed");
                    Ok(EventOutcome::Ignored)
                })
            }
            "subscription.paid" => {
                let subscription: creem::Subscription = parse_object(event)?;
                self.subscription_paid(&subscription).await?;
                Ok(EventOutcome::Applied)
            }
            "subscription.canceled" => {
                let subscription: creem::Subscription = parse_object(event)?;
                self.set_status(&subscription.id, SubscriptionStatus::Canceled)
                    .await
            }
            "subscription.expired" => {
                let subscription: creem::Subscription = parse_object(event)?;
                self.set_status(&subscription.id, SubscriptionStatus::Expired)
                    .await
            }
            "subscription.active" => {
                tracing::info!(object = %event.object, "subscription.active received");
                Ok(EventOutcome::Ignored)
            }
            "refund.created" | "subscription.update" | "subscription.trialing" => {
                Ok(EventOutcome::Ignored)
            }
            other => {
                tracing::debug!(event_type = %other, "Unprocessed event type");
                Ok(EventOutcome::Ignored)
            }
        }
    }

    /// Fill in the checkout session and link the Creem customer.
    ///
    /// A checkout without a `userId` in its metadata is logged and skipped.
    pub async fn checkout_completed(
        &self,
        checkout: &creem::Checkout,
    ) -> Result<EventOutcome, BillingError> {
        let metadata = checkout.metadata();

        let Some(user_id) = metadata
            .user_id
            .as_deref()
            .and_then(|id| UserId::from_str(id).ok())
        else {
            tracing::error!(checkout_id = %checkout.id, "Checkout has no usable user id");
            return Ok(EventOutcome::Ignored);
        };

        let customer_id = checkout.customer.as_ref().map(|c| c.id().to_string());

        if let Some(request_id) = checkout.request_id.as_deref() {
            let completion = CheckoutCompletion {
                status: checkout
                    .status
                    .clone()
                    .unwrap_or_else(|| "completed".to_string()),
                checkout_id: Some(checkout.id.clone()),
                order_id: checkout.order.as_ref().map(|o| o.id().to_string()),
                customer_id: customer_id.clone(),
                subscription_id: checkout.subscription.as_ref().map(|s| s.id().to_string()),
                product_id: checkout.product.as_ref().map(|p| p.id().to_string()),
            };

            let updated = self
                .store
                .complete_checkout_session(request_id, &completion)
                .await?;
            if updated == 0 {
                tracing::warn!(request_id = %request_id, "No checkout session for request id");
            }
        }

        match customer_id {
            Some(customer_id) => {
                let country = checkout
                    .customer
                    .as_ref()
                    .and_then(Expandable::object)
                    .and_then(|c| c.country.clone());

                self.store
                    .upsert_customer(&CustomerUpsert {
                        user_id,
                        provider: CREEM_PROVIDER.to_string(),
                        customer_id,
                        customer_email: metadata.email,
                        customer_name: metadata.name,
                        country,
                        metadata: checkout.metadata.clone(),
                    })
                    .await?;
            }
            None => tracing::warn!(checkout_id = %checkout.id, "Checkout has no customer"),
        }

        tracing::info!(user_id = %user_id, checkout_id = %checkout.id, "Checkout completed");
        Ok(EventOutcome::Applied)
    }

    /// Record a paid period as one unit of work.
    pub async fn subscription_paid(
        &self,
        subscription: &creem::Subscription,
    ) -> Result<PaymentRecord, BillingError> {
        let metadata = CheckoutMetadata::from_value(&subscription.metadata);
        let user_id = metadata
            .user_id
            .as_deref()
            .ok_or_else(|| malformed(&subscription.id, "metadata.userId"))?
            .parse::<UserId>()?;

        let product = subscription
            .product
            .as_ref()
            .and_then(Expandable::object)
            .ok_or_else(|| malformed(&subscription.id, "product"))?;

        let (Some(period_start), Some(period_end)) = (
            subscription.current_period_start_date,
            subscription.current_period_end_date,
        ) else {
            return Err(malformed(&subscription.id, "current period dates"));
        };

        let status = self
            .resolve_status(&user_id, &subscription.id, &subscription.status)
            .await?;

        let plan = self
            .store
            .find_plan_by_product_id(&product.id)
            .await?
            .ok_or_else(|| BillingError::PlanNotFound {
                product_id: product.id.clone(),
            })?;

        let now = Utc::now();
        let payment = SubscriptionPayment {
            user_id,
            subscription_id: subscription.id.clone(),
            billing: NewBillingEntry {
                user_id,
                subscription_id: Some(subscription.id.clone()),
                amount: product.price,
                currency: product.currency.clone(),
                status: product.status.clone().unwrap_or_default(),
                description: product.description.clone().unwrap_or_default(),
                payment_method: subscription.collection_method.clone().unwrap_or_default(),
                billing_type: product.billing_type.clone(),
                billing_period: product.billing_period.clone(),
            },
            subscription: NewSubscription {
                user_id,
                plan_id: metadata.plan.clone(),
                subscription_id: subscription.id.clone(),
                product_id: product.id.clone(),
                status,
                start_date: now,
                provider: CREEM_PROVIDER.to_string(),
                price: product.price,
                currency: product.currency.clone(),
                interval: product
                    .billing_period
                    .clone()
                    .unwrap_or_else(|| DEFAULT_PAID_INTERVAL.to_string()),
            },
            status,
            ledger: NewUsageLedger::paid(
                user_id,
                subscription.id.clone(),
                plan.credits,
                period_start,
                period_end,
            ),
            now,
        };

        let record = self.store.record_subscription_payment(&payment).await?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription.id,
            renewal = record.renewal,
            credits = record.ledger.credit_total,
            demoted_free = record.demoted_free_subscriptions,
            closed_free_ledgers = record.closed_free_ledgers,
            "Subscription payment recorded"
        );

        Ok(record)
    }

    /// Parse the provider's status, keeping the stored one (or `active` for
    /// a first payment) when Creem reports a status meterly does not model.
    async fn resolve_status(
        &self,
        user_id: &UserId,
        subscription_id: &str,
        reported: &str,
    ) -> Result<SubscriptionStatus, BillingError> {
        match SubscriptionStatus::from_str(reported) {
            Ok(status) => Ok(status),
            Err(unknown) => {
                let kept = self
                    .store
                    .find_subscription(user_id, subscription_id)
                    .await?
                    .map_or(SubscriptionStatus::Active, |s| s.status);
                tracing::warn!(
                    subscription_id = %subscription_id,
                    error = %unknown,
                    kept = %kept,
                    "Unrecognised provider status"
                );
                Ok(kept)
            }
        }
    }

    async fn set_status(
        &self,
        subscription_id: &str,
        status: SubscriptionStatus,
    ) -> Result<EventOutcome, BillingError> {
        let updated = self
            .store
            .set_subscription_status(subscription_id, status)
            .await?;

        if updated == 0 {
            tracing::warn!(subscription_id = %subscription_id, status = %status, "No local subscription to update");
            return Ok(EventOutcome::Ignored);
        }

        tracing::info!(subscription_id = %subscription_id, status = %status, "Subscription status updated");
        Ok(EventOutcome::Applied)
    }

    /// Cancel the user's latest active subscription at Creem right away.
    ///
    /// When Creem confirms `canceled`, the unused balance of the current
    /// ledger plus a bonus is carried into a fresh free-tier ledger.
    pub async fn cancel_now(
        &self,
        creem: &CreemClient,
        user_id: UserId,
    ) -> Result<CancelOutcome, BillingError> {
        let subscription = self
            .store
            .latest_active_subscription(&user_id)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound {
                subscription_id: format!("active subscription for {user_id}"),
            })?;

        let response = creem
            .cancel_subscription(&subscription.subscription_id)
            .await
            .map_err(|e| BillingError::ExternalService {
                service: "creem".into(),
                message: e.to_string(),
            })?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription.subscription_id,
            provider_status = %response.status,
            "Cancel requested at Creem"
        );

        if response.status != "canceled" {
            return Ok(CancelOutcome {
                provider_status: response.status,
                carried_credits: None,
            });
        }

        let carried = self
            .store
            .latest_usage(&user_id)
            .await?
            .map_or(CANCEL_BONUS_CREDITS, |ledger| {
                ledger.credit_total - ledger.credit_used + CANCEL_BONUS_CREDITS
            });

        provision_free_tier(self.store.as_ref(), user_id, Some(carried)).await?;

        Ok(CancelOutcome {
            provider_status: response.status,
            carried_credits: Some(carried),
        })
    }
}

fn parse_object<T: serde::de::DeserializeOwned>(event: &WebhookEvent) -> Result<T, BillingError> {
    serde_json::from_value(event.object.clone()).map_err(|e| {
        BillingError::MalformedEvent(format!("{} payload: {e}", event.event_type))
    })
}

fn malformed(subscription_id: &str, field: &str) -> BillingError {
    BillingError::MalformedEvent(format!("subscription {subscription_id} is missing {field}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use meterly_core::{NewCheckoutSession, Plan, PlanTier, CHECKOUT_PENDING};
    use meterly_store::MemoryStore;
    use serde_json::json;

    async fn setup() -> (Arc<MemoryStore>, Reconciler, UserId) {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_plan(&Plan::for_tier(PlanTier::Premium, "prod_premium", 500))
            .await
            .unwrap();
        let reconciler = Reconciler::new(store.clone());
        (store, reconciler, UserId::generate())
    }

    fn paid_event(user_id: UserId) -> WebhookEvent {
        let now = Utc::now();
        serde_json::from_value(json!({
            "id": "evt_1",
            "eventType": "subscription.paid",
            "object": {
                "id": "sub_1",
                "status": "active",
                "collection_method": "charge_automatically",
                "current_period_start_date": now,
                "current_period_end_date": now + Duration::days(30),
                "metadata": {"userId": user_id.to_string(), "plan": "premium"},
                "product": {
                    "id": "prod_premium",
                    "price": 900,
                    "currency": "USD",
                    "status": "active",
                    "billing_type": "recurring",
                    "billing_period": "every-month"
                }
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn paid_event_creates_subscription_and_ledger() {
        let (store, reconciler, user_id) = setup().await;

        let outcome = reconciler.handle_event(&paid_event(user_id)).await.unwrap();
        assert_eq!(outcome, EventOutcome::Applied);

        let sub = store.latest_subscription(&user_id).await.unwrap().unwrap();
        assert_eq!(sub.subscription_id, "sub_1");
        assert_eq!(sub.plan_id.as_deref(), Some("premium"));
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.price, 900);

        let ledger = store.latest_usage(&user_id).await.unwrap().unwrap();
        assert_eq!(ledger.credit_total, 500);

        let history = store.list_billing_history(&user_id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].payment_method, "charge_automatically");
    }

    #[tokio::test]
    async fn paid_event_supersedes_free_tier() {
        let (store, reconciler, user_id) = setup().await;
        provision_free_tier(store.as_ref(), user_id, None).await.unwrap();

        reconciler.handle_event(&paid_event(user_id)).await.unwrap();

        let subs = store.list_subscriptions(&user_id).await.unwrap();
        let free = subs.iter().find(|s| s.is_free()).unwrap();
        assert_eq!(free.status, SubscriptionStatus::Canceled);

        let ledgers = store.list_usage(&user_id).await.unwrap();
        let free_ledger = ledgers.iter().find(|l| l.subscription_id.starts_with("free_")).unwrap();
        assert!(free_ledger.current_period_end_date.unwrap() <= Utc::now());

        let current = store.latest_usage(&user_id).await.unwrap().unwrap();
        assert_eq!(current.subscription_id, "sub_1");
        assert_eq!(current.credit_total, 500);
    }

    #[tokio::test]
    async fn replayed_payment_duplicates_history_and_ledgers() {
        let (store, reconciler, user_id) = setup().await;
        let event = paid_event(user_id);

        reconciler.handle_event(&event).await.unwrap();
        reconciler.handle_event(&event).await.unwrap();

        assert_eq!(store.list_subscriptions(&user_id).await.unwrap().len(), 1);
        assert_eq!(store.list_billing_history(&user_id).await.unwrap().len(), 2);
        assert_eq!(store.list_usage(&user_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unrecognised_status_keeps_stored_status() {
        let (store, reconciler, user_id) = setup().await;
        let mut first = paid_event(user_id);
        first.object["status"] = json!("scheduled_cancel");

        reconciler.handle_event(&first).await.unwrap();
        let sub = store.latest_subscription(&user_id).await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);

        store
            .set_subscription_status("sub_1", SubscriptionStatus::PastDue)
            .await
            .unwrap();
        reconciler.handle_event(&first).await.unwrap();

        let sub = store.latest_subscription(&user_id).await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::PastDue);
        assert_eq!(store.list_billing_history(&user_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn expired_free_ledger_is_left_alone() {
        let (store, reconciler, user_id) = setup().await;
        let long_ago = Utc::now() - Duration::days(60);
        let free = store
            .insert_usage(&NewUsageLedger::free(user_id, "free_1", 100, long_ago))
            .await
            .unwrap();
        let original_end = free.current_period_end_date;

        reconciler.handle_event(&paid_event(user_id)).await.unwrap();

        let ledgers = store.list_usage(&user_id).await.unwrap();
        let free = ledgers.iter().find(|l| l.id == free.id).unwrap();
        assert_eq!(free.current_period_end_date, original_end);
    }

    #[tokio::test]
    async fn unknown_product_fails_without_writes() {
        let (store, reconciler, user_id) = setup().await;
        let mut event = paid_event(user_id);
        event.object["product"]["id"] = json!("prod_unknown");

        let err = reconciler.handle_event(&event).await.unwrap_err();
        assert!(matches!(err, BillingError::PlanNotFound { .. }));
        assert!(store.list_billing_history(&user_id).await.unwrap().is_empty());
        assert!(store.latest_subscription(&user_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_and_expire_set_status_only() {
        let (store, reconciler, user_id) = setup().await;
        reconciler.handle_event(&paid_event(user_id)).await.unwrap();

        let canceled: WebhookEvent = serde_json::from_value(json!({
            "eventType": "subscription.canceled",
            "object": {"id": "sub_1", "status": "canceled"}
        }))
        .unwrap();
        reconciler.handle_event(&canceled).await.unwrap();

        let sub = store.latest_subscription(&user_id).await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Canceled);
        assert_eq!(store.list_usage(&user_id).await.unwrap().len(), 1);

        let expired: WebhookEvent = serde_json::from_value(json!({
            "eventType": "subscription.expired",
            "object": {"id": "sub_1"}
        }))
        .unwrap();
        reconciler.handle_event(&expired).await.unwrap();

        let sub = store.latest_subscription(&user_id).await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Expired);
    }

    #[tokio::test]
    async fn checkout_completed_links_customer_and_session() {
        let (store, reconciler, user_id) = setup().await;
        store
            .insert_checkout_session(&NewCheckoutSession {
                user_id,
                request_id: "req_1".into(),
                checkout_url: Some("https://checkout".into()),
                checkout_id: Some("ch_1".into()),
                product_id: Some("prod_premium".into()),
                status: CHECKOUT_PENDING.into(),
            })
            .await
            .unwrap();

        let event: WebhookEvent = serde_json::from_value(json!({
            "eventType": "checkout.completed",
            "object": {
                "id": "ch_1",
                "request_id": "req_1",
                "status": "completed",
                "order": {"id": "ord_1"},
                "customer": {"id": "cust_1", "country": "NL"},
                "subscription": {"id": "sub_1"},
                "product": {"id": "prod_premium"},
                "metadata": {"userId": user_id.to_string(), "email": "a@b.c", "name": "Ada"}
            }
        }))
        .unwrap();

        assert_eq!(reconciler.handle_event(&event).await.unwrap(), EventOutcome::Applied);

        let session = store.get_checkout_session("req_1").await.unwrap().unwrap();
        assert_eq!(session.status, "completed");
        assert_eq!(session.order_id.as_deref(), Some("ord_1"));
        assert_eq!(session.subscription_id.as_deref(), Some("sub_1"));

        let customer = store.find_customer("creem", "cust_1").await.unwrap().unwrap();
        assert_eq!(customer.user_id, user_id);
        assert_eq!(customer.country.as_deref(), Some("NL"));
        assert_eq!(customer.customer_email.as_deref(), Some("a@b.c"));
    }

    #[tokio::test]
    async fn malformed_checkout_is_acknowledged() {
        let (_store, reconciler, _) = setup().await;
        let event: WebhookEvent = serde_json::from_value(json!({
            "eventType": "checkout.completed",
            "object": {"customer": 42}
        }))
        .unwrap();

        assert_eq!(reconciler.handle_event(&event).await.unwrap(), EventOutcome::Ignored);
    }

    #[tokio::test]
    async fn checkout_without_user_id_is_skipped() {
        let (_store, reconciler, _) = setup().await;
        let event: WebhookEvent = serde_json::from_value(json!({
            "eventType": "checkout.completed",
            "object": {"id": "ch_1", "customer": {"id": "cust_1"}}
        }))
        .unwrap();

        assert_eq!(reconciler.handle_event(&event).await.unwrap(), EventOutcome::Ignored);
    }

    #[tokio::test]
    async fn unrecognised_events_are_ignored() {
        let (_store, reconciler, _) = setup().await;
        for event_type in ["subscription.active", "refund.created", "dispute.created"] {
            let event: WebhookEvent =
                serde_json::from_value(json!({"eventType": event_type, "object": {}})).unwrap();
            assert_eq!(reconciler.handle_event(&event).await.unwrap(), EventOutcome::Ignored);
        }
    }
}
