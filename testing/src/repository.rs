//! In-memory relational store for tests.

use seckill_core::providers::{CreateOrderOutcome, OrderRepository};
use seckill_core::{
    CustomerId, OrderId, PersistedOrder, Result, SeckillError, SeckillSale, VoucherId,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// In-memory order repository.
///
/// Mirrors the transactional contract of the `PostgreSQL` repository: the
/// guarded stock decrement and the insert either both happen or neither does.
///
/// Use [`fail_next_creates`](Self::fail_next_creates) to inject transient
/// database failures, e.g. to leave queue entries pending for recovery tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderRepository {
    state: Arc<Mutex<RepoState>>,
    failing_creates: Arc<AtomicU32>,
}

#[derive(Debug, Default)]
struct RepoState {
    stock: HashMap<VoucherId, i64>,
    orders: HashMap<OrderId, PersistedOrder>,
}

impl InMemoryOrderRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls to `create_order` fail with a database error.
    pub fn fail_next_creates(&self, count: u32) {
        self.failing_creates.store(count, Ordering::SeqCst);
    }

    /// All persisted orders, sorted by id.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Database`] if the state mutex is poisoned.
    pub fn orders(&self) -> Result<Vec<PersistedOrder>> {
        let mut orders: Vec<_> = self.lock_state()?.orders.values().copied().collect();
        orders.sort_by_key(|order| order.order_id);
        Ok(orders)
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, RepoState>> {
        self.state
            .lock()
            .map_err(|_| SeckillError::Database("Mutex lock failed".into()))
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl OrderRepository for InMemoryOrderRepository {
    async fn register_sale(&self, sale: &SeckillSale) -> Result<()> {
        let mut state = self.lock_state()?;
        state.stock.insert(sale.voucher_id, i64::from(sale.stock));
        Ok(())
    }

    async fn find_order(
        &self,
        customer_id: CustomerId,
        voucher_id: VoucherId,
    ) -> Result<Option<PersistedOrder>> {
        Ok(self
            .lock_state()?
            .orders
            .values()
            .find(|order| order.customer_id == customer_id && order.voucher_id == voucher_id)
            .copied())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<PersistedOrder>> {
        Ok(self.lock_state()?.orders.get(&order_id).copied())
    }

    async fn create_order(&self, order: &PersistedOrder) -> Result<CreateOrderOutcome> {
        if self.take_injected_failure() {
            return Err(SeckillError::Database("injected failure".into()));
        }

        let mut state = self.lock_state()?;

        let duplicate = state.orders.contains_key(&order.order_id)
            || state.orders.values().any(|existing| {
                existing.customer_id == order.customer_id && existing.voucher_id == order.voucher_id
            });
        if duplicate {
            return Ok(CreateOrderOutcome::AlreadyExists);
        }

        match state.stock.get_mut(&order.voucher_id) {
            Some(stock) if *stock > 0 => *stock -= 1,
            _ => return Ok(CreateOrderOutcome::StockExhausted),
        }
        state.orders.insert(order.order_id, *order);

        tracing::debug!(order_id = %order.order_id, "Mock persisted order");
        Ok(CreateOrderOutcome::Created)
    }

    async fn remaining_stock(&self, voucher_id: VoucherId) -> Result<Option<i64>> {
        Ok(self.lock_state()?.stock.get(&voucher_id).copied())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fixtures::open_sale;
    use crate::test_clock;
    use seckill_core::OrderStatus;
    use seckill_core::environment::Clock;

    fn order(id: u64, customer: u64) -> PersistedOrder {
        PersistedOrder {
            order_id: OrderId::new(id),
            customer_id: CustomerId::new(customer),
            voucher_id: VoucherId::new(1),
            status: OrderStatus::Unpaid,
            created_at: test_clock().now(),
        }
    }

    #[tokio::test]
    async fn create_is_guarded_by_stock_and_uniqueness() {
        let repo = InMemoryOrderRepository::new();
        repo.register_sale(&open_sale(1, 1, test_clock().now())).await.unwrap();

        assert_eq!(repo.create_order(&order(10, 1)).await.unwrap(), CreateOrderOutcome::Created);
        assert_eq!(
            repo.create_order(&order(10, 1)).await.unwrap(),
            CreateOrderOutcome::AlreadyExists
        );
        assert_eq!(
            repo.create_order(&order(11, 2)).await.unwrap(),
            CreateOrderOutcome::StockExhausted
        );
        assert_eq!(repo.remaining_stock(VoucherId::new(1)).await.unwrap(), Some(0));
        assert_eq!(repo.orders().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn injected_failures_leave_state_untouched() {
        let repo = InMemoryOrderRepository::new();
        repo.register_sale(&open_sale(1, 5, test_clock().now())).await.unwrap();
        repo.fail_next_creates(1);

        assert!(matches!(
            repo.create_order(&order(10, 1)).await,
            Err(SeckillError::Database(_))
        ));
        assert_eq!(repo.remaining_stock(VoucherId::new(1)).await.unwrap(), Some(5));
        assert_eq!(repo.create_order(&order(10, 1)).await.unwrap(), CreateOrderOutcome::Created);
    }
}
