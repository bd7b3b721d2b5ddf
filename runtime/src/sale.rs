//! Sale setup: durable row first, then the shared-store snapshot.

use seckill_core::providers::{AdmissionStore, OrderRepository};
use seckill_core::{Result, SeckillError, SeckillSale};

/// Registers flash sales in both stores.
#[derive(Debug, Clone)]
pub struct SaleRegistrar<R, S> {
    repository: R,
    store: S,
}

impl<R: OrderRepository, S: AdmissionStore> SaleRegistrar<R, S> {
    /// Create a registrar writing to `repository` and `store`.
    #[must_use]
    pub const fn new(repository: R, store: S) -> Self {
        Self { repository, store }
    }

    /// Write the durable sale row, then publish stock and window to the shared store.
    ///
    /// Re-registering a voucher resets both its durable stock and its snapshot.
    ///
    /// # Errors
    ///
    /// - [`SeckillError::InvalidSale`] if the window ends before it begins
    /// - [`SeckillError::Database`] if the durable write fails (nothing is published)
    /// - [`SeckillError::Unavailable`] if publishing the snapshot fails
    pub async fn register_sale(&self, sale: &SeckillSale) -> Result<()> {
        if sale.window.end < sale.window.begin {
            return Err(SeckillError::InvalidSale(format!(
                "voucher {} ends at {} before it begins at {}",
                sale.voucher_id, sale.window.end, sale.window.begin
            )));
        }

        self.repository.register_sale(sale).await?;
        self.store.publish_sale(sale).await?;

        tracing::info!(
            voucher_id = %sale.voucher_id,
            stock = sale.stock,
            begin = %sale.window.begin,
            end = %sale.window.end,
            "Sale registered"
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use seckill_core::VoucherId;
    use seckill_core::environment::Clock;
    use seckill_testing::fixtures::{open_sale, sale_between};
    use seckill_testing::{InMemoryOrderRepository, InMemorySeckillStore, test_clock};

    #[tokio::test]
    async fn publishes_to_both_stores() {
        let repo = InMemoryOrderRepository::new();
        let store = InMemorySeckillStore::new();
        let registrar = SaleRegistrar::new(repo.clone(), store.clone());

        registrar.register_sale(&open_sale(3, 100, test_clock().now())).await.unwrap();

        assert_eq!(repo.remaining_stock(VoucherId::new(3)).await.unwrap(), Some(100));
        assert_eq!(store.remaining_stock(VoucherId::new(3)).await.unwrap(), Some(100));
    }

    #[tokio::test]
    async fn rejects_inverted_window() {
        let repo = InMemoryOrderRepository::new();
        let store = InMemorySeckillStore::new();
        let registrar = SaleRegistrar::new(repo.clone(), store.clone());
        let now = test_clock().now();

        let err = registrar
            .register_sale(&sale_between(3, 1, now, now - Duration::minutes(1)))
            .await
            .unwrap_err();

        assert!(matches!(err, SeckillError::InvalidSale(_)));
        assert_eq!(repo.remaining_stock(VoucherId::new(3)).await.unwrap(), None);
        assert_eq!(store.remaining_stock(VoucherId::new(3)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn store_outage_is_reported() {
        let store = InMemorySeckillStore::new();
        store.set_available(false);
        let registrar = SaleRegistrar::new(InMemoryOrderRepository::new(), store);

        let err = registrar
            .register_sale(&open_sale(3, 1, test_clock().now()))
            .await
            .unwrap_err();
        assert!(matches!(err, SeckillError::Unavailable(_)));
    }
}
