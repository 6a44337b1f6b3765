//! Free-tier provisioning.

use chrono::Utc;

use meterly_core::{
    NewSubscription, NewUsageLedger, Subscription, UsageLedger, UserId, FREE_PLAN_CREDITS,
};
use meterly_store::Store;

/// Grant the free tier: an active `free_<millis>` subscription plus a ledger
/// of `credits` (default 100) running for one calendar month.
pub async fn provision_free_tier(
    store: &dyn Store,
    user_id: UserId,
    credits: Option<i64>,
) -> meterly_store::Result<(Subscription, UsageLedger)> {
    let now = Utc::now();
    let credit_total = credits.unwrap_or(FREE_PLAN_CREDITS);

    let subscription = NewSubscription::free(user_id, now);
    let ledger = NewUsageLedger::free(user_id, &subscription.subscription_id, credit_total, now);

    let (subscription, ledger) = store.provision_free_tier(&subscription, &ledger).await?;

    tracing::info!(
        user_id = %user_id,
        subscription_id = %subscription.subscription_id,
        credits = credit_total,
        "Provisioned free tier"
    );

    Ok((subscription, ledger))
}

#[cfg(test)]
mod tests {
    use super::*;
    use meterly_core::{is_free_subscription_id, SubscriptionStatus, FREE_PROVIDER};
    use meterly_store::MemoryStore;

    #[tokio::test]
    async fn default_grant_is_one_hundred_credits() {
        let store = MemoryStore::new();
        let user_id = UserId::generate();

        let (sub, ledger) = provision_free_tier(&store, user_id, None).await.unwrap();

        assert!(is_free_subscription_id(&sub.subscription_id));
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.plan_id.as_deref(), Some("free"));
        assert_eq!(sub.provider.as_deref(), Some(FREE_PROVIDER));
        assert_eq!(ledger.credit_total, 100);
        assert_eq!(ledger.credit_used, 0);
        assert_eq!(ledger.subscription_id, sub.subscription_id);
        assert_eq!(ledger.reset_date, ledger.current_period_end_date);
        assert!(ledger.current_period_end_date > ledger.current_period_start_date);
    }

    #[tokio::test]
    async fn carried_over_credits_are_used() {
        let store = MemoryStore::new();
        let (_, ledger) = provision_free_tier(&store, UserId::generate(), Some(400))
            .await
            .unwrap();
        assert_eq!(ledger.credit_total, 400);
    }
}
