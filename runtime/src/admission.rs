//! Synchronous admission decision.
//!
//! The gate pre-generates the order id, then hands everything to one atomic
//! store operation that checks the window, the purchase record and the stock,
//! and on success decrements, records and enqueues in the same step. The gate
//! never reads state and writes it back from application code.

use crate::id::IdGenerator;
use crate::metrics::AdmissionMetrics;
use seckill_core::environment::Clock;
use seckill_core::providers::{AdmissionStore, CounterService};
use seckill_core::{
    Admission, AdmissionRequest, AdmissionStatus, CustomerId, OrderIntent, Rejection, Result,
    SeckillError, VoucherId,
};

/// Id namespace used for order ids.
pub const ORDER_ID_NAMESPACE: &str = "order";

/// Admission gate for flash-sale requests.
#[derive(Debug, Clone)]
pub struct AdmissionGate<S, C, K> {
    store: S,
    ids: IdGenerator<C, K>,
}

impl<S, C, K> AdmissionGate<S, C, K>
where
    S: AdmissionStore,
    C: CounterService,
    K: Clock,
{
    /// Create a gate over `store`, issuing ids from `ids`.
    #[must_use]
    pub const fn new(store: S, ids: IdGenerator<C, K>) -> Self {
        Self { store, ids }
    }

    /// Decide whether `customer_id` may buy one unit of `voucher_id`.
    ///
    /// Rejections are values, not errors, and leave stock and the purchase
    /// record untouched. On admission the order intent is already on the queue
    /// when this returns.
    ///
    /// # Errors
    ///
    /// - [`SeckillError::Unavailable`] if the store or counter is unreachable
    /// - [`SeckillError::SaleNotFound`] if the sale was never published
    /// - id generation errors from [`IdGenerator::next_id_at`]
    pub async fn admit(&self, voucher_id: VoucherId, customer_id: CustomerId) -> Result<Admission> {
        let now = self.ids.clock().now();

        let order_id = match self.ids.next_id_at(ORDER_ID_NAMESPACE, now).await {
            Ok(id) => id,
            Err(error) => {
                AdmissionMetrics::record_error();
                tracing::error!(
                    voucher_id = %voucher_id,
                    customer_id = %customer_id,
                    error = %error,
                    "Failed to generate order id"
                );
                return Err(error);
            }
        };

        let request = AdmissionRequest {
            intent: OrderIntent {
                order_id,
                customer_id,
                voucher_id,
                created_at: now,
            },
            now,
        };

        let status = match self.store.try_admit(&request).await {
            Ok(status) => status,
            Err(error) => {
                AdmissionMetrics::record_error();
                tracing::error!(
                    voucher_id = %voucher_id,
                    customer_id = %customer_id,
                    error = %error,
                    "Admission script failed"
                );
                return Err(error);
            }
        };
        AdmissionMetrics::record(status);

        let admission = match status {
            AdmissionStatus::Admitted => Admission::Admitted(order_id),
            AdmissionStatus::OutOfStock => Admission::Rejected(Rejection::OutOfStock),
            AdmissionStatus::DuplicatePurchase => Admission::Rejected(Rejection::DuplicatePurchase),
            AdmissionStatus::NotStarted => Admission::Rejected(Rejection::NotStarted),
            AdmissionStatus::Ended => Admission::Rejected(Rejection::Ended),
            AdmissionStatus::SaleNotFound => {
                tracing::warn!(voucher_id = %voucher_id, "Admission for unpublished sale");
                return Err(SeckillError::SaleNotFound {
                    voucher_id: voucher_id.get(),
                });
            }
        };

        match admission {
            Admission::Admitted(order_id) => tracing::debug!(
                voucher_id = %voucher_id,
                customer_id = %customer_id,
                order_id = %order_id,
                "Admitted"
            ),
            Admission::Rejected(reason) => tracing::debug!(
                voucher_id = %voucher_id,
                customer_id = %customer_id,
                reason = %reason,
                "Rejected"
            ),
        }

        Ok(admission)
    }

    /// Remaining shared-store stock for a voucher.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Unavailable`] on store failure.
    pub async fn remaining_stock(&self, voucher_id: VoucherId) -> Result<Option<i64>> {
        self.store.remaining_stock(voucher_id).await
    }

    /// Whether the customer has been admitted for the voucher.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Unavailable`] on store failure.
    pub async fn has_purchased(&self, voucher_id: VoucherId, customer_id: CustomerId) -> Result<bool> {
        self.store.has_purchased(voucher_id, customer_id).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use seckill_core::providers::AdmissionStore;
    use seckill_testing::fixtures::{open_sale, sale_between};
    use seckill_testing::{InMemorySeckillStore, ManualClock, test_clock};

    type TestGate = AdmissionGate<InMemorySeckillStore, InMemorySeckillStore, ManualClock>;

    fn gate(store: &InMemorySeckillStore, clock: &ManualClock) -> TestGate {
        AdmissionGate::new(store.clone(), IdGenerator::new(store.clone(), clock.clone()))
    }

    #[tokio::test]
    async fn admits_then_rejects_duplicate_even_with_stock_left() {
        let store = InMemorySeckillStore::new();
        let clock = ManualClock::new(test_clock().now());
        store.publish_sale(&open_sale(1, 10, clock.now())).await.unwrap();
        let gate = gate(&store, &clock);

        let first = gate.admit(VoucherId::new(1), CustomerId::new(7)).await.unwrap();
        assert!(first.is_admitted());

        for _ in 0..3 {
            let again = gate.admit(VoucherId::new(1), CustomerId::new(7)).await.unwrap();
            assert_eq!(again, Admission::Rejected(Rejection::DuplicatePurchase));
        }
        assert_eq!(gate.remaining_stock(VoucherId::new(1)).await.unwrap(), Some(9));
        assert_eq!(store.entries().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn enqueued_intent_carries_the_returned_order_id() {
        let store = InMemorySeckillStore::new();
        let clock = ManualClock::new(test_clock().now());
        store.publish_sale(&open_sale(1, 1, clock.now())).await.unwrap();
        let gate = gate(&store, &clock);

        let order_id = gate
            .admit(VoucherId::new(1), CustomerId::new(7))
            .await
            .unwrap()
            .order_id()
            .unwrap();

        let entries = store.entries().unwrap();
        let intent = entries[0].decode().unwrap();
        assert_eq!(intent.order_id, order_id);
        assert_eq!(intent.customer_id, CustomerId::new(7));
        assert_eq!(intent.created_at, clock.now());
    }

    #[tokio::test]
    async fn window_is_enforced_without_touching_state() {
        let store = InMemorySeckillStore::new();
        let start = test_clock().now();
        let clock = ManualClock::new(start - Duration::seconds(1));
        store
            .publish_sale(&sale_between(1, 5, start, start + Duration::hours(1)))
            .await
            .unwrap();
        let gate = gate(&store, &clock);

        let early = gate.admit(VoucherId::new(1), CustomerId::new(7)).await.unwrap();
        assert_eq!(early, Admission::Rejected(Rejection::NotStarted));

        clock.set(start);
        assert!(gate.admit(VoucherId::new(1), CustomerId::new(8)).await.unwrap().is_admitted());

        clock.set(start + Duration::hours(1) + Duration::seconds(1));
        let late = gate.admit(VoucherId::new(1), CustomerId::new(9)).await.unwrap();
        assert_eq!(late, Admission::Rejected(Rejection::Ended));

        assert_eq!(gate.remaining_stock(VoucherId::new(1)).await.unwrap(), Some(4));
        assert!(!gate.has_purchased(VoucherId::new(1), CustomerId::new(7)).await.unwrap());
        assert!(!gate.has_purchased(VoucherId::new(1), CustomerId::new(9)).await.unwrap());
    }

    #[tokio::test]
    async fn unpublished_sale_is_an_error() {
        let store = InMemorySeckillStore::new();
        let clock = ManualClock::new(test_clock().now());
        let gate = gate(&store, &clock);

        let err = gate.admit(VoucherId::new(404), CustomerId::new(1)).await.unwrap_err();
        assert_eq!(err, SeckillError::SaleNotFound { voucher_id: 404 });
    }

    #[tokio::test]
    async fn store_outage_surfaces_as_unavailable() {
        let store = InMemorySeckillStore::new();
        let clock = ManualClock::new(test_clock().now());
        store.publish_sale(&open_sale(1, 1, clock.now())).await.unwrap();
        let gate = gate(&store, &clock);

        store.set_available(false);
        let err = gate.admit(VoucherId::new(1), CustomerId::new(1)).await.unwrap_err();
        assert!(err.is_transient());

        store.set_available(true);
        assert_eq!(gate.remaining_stock(VoucherId::new(1)).await.unwrap(), Some(1));
    }
}
