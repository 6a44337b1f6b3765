//! Quota gate for metered operations.
//!
//! Metered endpoints call [`QuotaGate::check`] before the paid work and
//! [`QuotaGate::consume`] after it succeeds. Both read the user's most
//! recently created ledger; only `consume` writes.

use std::sync::Arc;

use chrono::Utc;

use meterly_core::quota::evaluate;
use meterly_core::{ConsumeGuard, QuotaCost, QuotaError, UserId};
use meterly_store::Store;

/// Credit check and consumption against the usage ledger.
#[derive(Clone)]
pub struct QuotaGate {
    store: Arc<dyn Store>,
    guard: ConsumeGuard,
}

impl QuotaGate {
    /// Create a gate; `guard` decides whether consumption may overdraw.
    pub fn new(store: Arc<dyn Store>, guard: ConsumeGuard) -> Self {
        Self { store, guard }
    }

    /// Check and, unless `check_only`, consume `cost` from the user's
    /// current ledger.
    ///
    /// Storage failures are reported as [`QuotaError::ConsumeFailed`].
    pub async fn consume_quota(
        &self,
        user_id: &UserId,
        check_only: bool,
        cost: QuotaCost,
    ) -> Result<(), QuotaError> {
        let current = self.store.latest_usage(user_id).await.map_err(|e| {
            tracing::error!(user_id = %user_id, error = %e, "Failed to load usage ledger");
            QuotaError::ConsumeFailed
        })?;

        let ledger = evaluate(current.as_ref(), cost, Utc::now())?;

        if check_only {
            return Ok(());
        }

        match self.store.consume_credits(ledger.id, cost, self.guard).await {
            Ok(0) if self.guard == ConsumeGuard::WithinTotal => {
                tracing::debug!(user_id = %user_id, ledger_id = ledger.id, "Lost consume race");
                Err(QuotaError::Exceeded)
            }
            Ok(0) => {
                tracing::error!(user_id = %user_id, ledger_id = ledger.id, "Ledger vanished before consume");
                Err(QuotaError::ConsumeFailed)
            }
            Ok(_) => {
                tracing::debug!(
                    user_id = %user_id,
                    ledger_id = ledger.id,
                    credits = cost.credits(),
                    "Consumed credits"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Failed to consume credits");
                Err(QuotaError::ConsumeFailed)
            }
        }
    }

    /// Precheck without mutating the ledger.
    pub async fn check(&self, user_id: &UserId, cost: QuotaCost) -> Result<(), QuotaError> {
        self.consume_quota(user_id, true, cost).await
    }

    /// Consume after the paid operation succeeded.
    pub async fn consume(&self, user_id: &UserId, cost: QuotaCost) -> Result<(), QuotaError> {
        self.consume_quota(user_id, false, cost).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use meterly_core::{NewUsageLedger, UsageLedger};
    use meterly_store::MemoryStore;

    async fn setup(total: i64, used: i64, expired: bool) -> (Arc<MemoryStore>, UserId) {
        let store = Arc::new(MemoryStore::new());
        let user_id = UserId::generate();
        let now = Utc::now();
        let end = if expired {
            now - Duration::days(1)
        } else {
            now + Duration::days(30)
        };

        let ledger = store
            .insert_usage(&NewUsageLedger::paid(user_id, "sub_1", total, now - Duration::days(30), end))
            .await
            .unwrap();
        if used > 0 {
            store
                .consume_credits(ledger.id, QuotaCost { text: used, image: 0 }, ConsumeGuard::Unchecked)
                .await
                .unwrap();
        }
        (store, user_id)
    }

    async fn current(store: &MemoryStore, user_id: &UserId) -> UsageLedger {
        store.latest_usage(user_id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn consumption_is_the_sum_of_costs() {
        let (store, user_id) = setup(100, 0, false).await;
        let gate = QuotaGate::new(store.clone(), ConsumeGuard::Unchecked);

        gate.consume(&user_id, QuotaCost::TEXT).await.unwrap();
        gate.consume(&user_id, QuotaCost::IMAGE).await.unwrap();
        gate.consume(&user_id, QuotaCost::TEXT).await.unwrap();

        let ledger = current(&store, &user_id).await;
        assert_eq!(ledger.credit_used, 5);
        assert_eq!(ledger.text_used, 2);
        assert_eq!(ledger.image_used, 3);
    }

    #[tokio::test]
    async fn precheck_never_mutates() {
        let (store, user_id) = setup(10, 9, false).await;
        let gate = QuotaGate::new(store.clone(), ConsumeGuard::Unchecked);

        gate.check(&user_id, QuotaCost::TEXT).await.unwrap();
        assert_eq!(gate.check(&user_id, QuotaCost::IMAGE).await, Err(QuotaError::Exceeded));

        let ledger = current(&store, &user_id).await;
        assert_eq!(ledger.credit_used, 9);
        assert_eq!(ledger.text_used, 9);
        assert_eq!(ledger.image_used, 0);
    }

    #[tokio::test]
    async fn exceeded_boundary() {
        let (store, user_id) = setup(10, 9, false).await;
        let gate = QuotaGate::new(store.clone(), ConsumeGuard::Unchecked);

        gate.consume(&user_id, QuotaCost::TEXT).await.unwrap();
        assert_eq!(current(&store, &user_id).await.credit_used, 10);

        assert_eq!(gate.consume(&user_id, QuotaCost::TEXT).await, Err(QuotaError::Exceeded));
        assert_eq!(current(&store, &user_id).await.credit_used, 10);
    }

    #[tokio::test]
    async fn expired_period_blocks_both_paths() {
        let (store, user_id) = setup(100, 0, true).await;
        let gate = QuotaGate::new(store.clone(), ConsumeGuard::Unchecked);

        assert_eq!(gate.check(&user_id, QuotaCost::TEXT).await, Err(QuotaError::Expired));
        assert_eq!(gate.consume(&user_id, QuotaCost::TEXT).await, Err(QuotaError::Expired));
        assert_eq!(current(&store, &user_id).await.credit_used, 0);
    }

    #[tokio::test]
    async fn missing_ledger_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let gate = QuotaGate::new(store, ConsumeGuard::Unchecked);

        assert_eq!(
            gate.check(&UserId::generate(), QuotaCost::TEXT).await,
            Err(QuotaError::NotFound)
        );
    }

    #[tokio::test]
    async fn strict_guard_stops_racing_consumers() {
        let (store, user_id) = setup(1, 0, false).await;
        let gate = QuotaGate::new(store.clone(), ConsumeGuard::WithinTotal);

        // Both pass the precheck before either consumes.
        gate.check(&user_id, QuotaCost::TEXT).await.unwrap();
        gate.check(&user_id, QuotaCost::TEXT).await.unwrap();

        let ledger_id = current(&store, &user_id).await.id;
        assert_eq!(
            store
                .consume_credits(ledger_id, QuotaCost::TEXT, ConsumeGuard::WithinTotal)
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .consume_credits(ledger_id, QuotaCost::TEXT, ConsumeGuard::WithinTotal)
                .await
                .unwrap(),
            0
        );
        assert_eq!(current(&store, &user_id).await.credit_used, 1);
    }

    #[tokio::test]
    async fn concurrent_consumers_can_overdraw_when_unchecked() {
        let (store, user_id) = setup(1, 0, false).await;
        let gate = QuotaGate::new(store.clone(), ConsumeGuard::Unchecked);

        gate.check(&user_id, QuotaCost::TEXT).await.unwrap();
        gate.check(&user_id, QuotaCost::TEXT).await.unwrap();

        let ledger_id = current(&store, &user_id).await.id;
        for _ in 0..2 {
            store
                .consume_credits(ledger_id, QuotaCost::TEXT, ConsumeGuard::Unchecked)
                .await
                .unwrap();
        }
        assert_eq!(current(&store, &user_id).await.credit_used, 2);
    }
}
