//! Durable order persistence.
//!
//! Each queue entry is persisted under a per-customer lease lock so the
//! "does this customer already have an order" check and the insert cannot race
//! with another persister handling a redelivery of the same customer's entry.
//!
//! Acknowledgement rules:
//!
//! | outcome                         | ack? |
//! |---------------------------------|------|
//! | order created                   | yes  |
//! | order already existed           | yes  |
//! | durable stock exhausted         | yes  |
//! | entry undecodable (poison)      | yes  |
//! | lock held / store or DB failure | no   |

use crate::metrics::PersisterMetrics;
use seckill_core::keys;
use seckill_core::providers::{CreateOrderOutcome, DistributedMutex, OrderQueue, OrderRepository};
use seckill_core::{OrderIntent, PersistedOrder, QueueEntry, Result, SeckillError};
use std::time::Duration;

/// Persister configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersisterConfig {
    /// Consumer group on the order queue.
    pub group: String,
    /// Lease for the per-customer lock.
    pub lock_lease: Duration,
}

impl Default for PersisterConfig {
    fn default() -> Self {
        Self {
            group: "g1".to_string(),
            lock_lease: Duration::from_secs(30),
        }
    }
}

impl PersisterConfig {
    /// Set the consumer group.
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// Set the lock lease.
    #[must_use]
    pub const fn with_lock_lease(mut self, lease: Duration) -> Self {
        self.lock_lease = lease;
        self
    }
}

/// Terminal result of handling one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// A new order was written.
    Persisted,
    /// The order already existed; nothing was written.
    AlreadyPersisted,
    /// The durable stock guard refused the decrement; nothing was written.
    StockExhausted,
    /// The entry could not be decoded and was dropped.
    Poisoned,
}

/// Writes admitted orders to the relational store.
#[derive(Debug)]
pub struct OrderPersister<Q, M, R> {
    queue: Q,
    mutex: M,
    repository: R,
    config: PersisterConfig,
}

impl<Q, M, R> OrderPersister<Q, M, R>
where
    Q: OrderQueue,
    M: DistributedMutex,
    R: OrderRepository,
{
    /// Create a persister.
    #[must_use]
    pub const fn new(queue: Q, mutex: M, repository: R, config: PersisterConfig) -> Self {
        Self {
            queue,
            mutex,
            repository,
            config,
        }
    }

    /// The queue this persister drains.
    #[must_use]
    pub const fn queue(&self) -> &Q {
        &self.queue
    }

    /// The repository orders are written to.
    #[must_use]
    pub const fn repository(&self) -> &R {
        &self.repository
    }

    /// Persister configuration.
    #[must_use]
    pub const fn config(&self) -> &PersisterConfig {
        &self.config
    }

    /// Decode, persist and acknowledge one delivered entry.
    ///
    /// # Errors
    ///
    /// Any error means the entry was *not* acknowledged and stays pending:
    /// [`SeckillError::LockTimeout`] when another persister holds the customer's
    /// lock, [`SeckillError::Unavailable`] / [`SeckillError::Database`] on
    /// infrastructure failures.
    pub async fn handle_entry(&self, entry: &QueueEntry) -> Result<PersistOutcome> {
        let outcome = match entry.decode() {
            Ok(intent) => self.persist(&intent).await?,
            Err(error) => {
                PersisterMetrics::record_poison();
                tracing::error!(entry_id = %entry.id, error = %error, "Dropping undecodable entry");
                PersistOutcome::Poisoned
            }
        };

        self.queue.ack(&self.config.group, &entry.id).await?;
        Ok(outcome)
    }

    /// Persist one intent under the customer's lock. Does not acknowledge.
    ///
    /// Idempotent: replaying an intent whose order exists is a no-op.
    ///
    /// # Errors
    ///
    /// [`SeckillError::LockTimeout`] if the lock is held; store and database
    /// errors otherwise.
    pub async fn persist(&self, intent: &OrderIntent) -> Result<PersistOutcome> {
        let key = keys::order_lock_key(intent.customer_id);

        let Some(lease) = self.mutex.try_acquire(&key, self.config.lock_lease).await? else {
            PersisterMetrics::record_lock_contention();
            tracing::warn!(
                order_id = %intent.order_id,
                customer_id = %intent.customer_id,
                "Customer lock held, leaving entry pending"
            );
            return Err(SeckillError::LockTimeout { key });
        };

        let result = self.persist_locked(intent).await;

        match self.mutex.release(&lease).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                key = %lease.key,
                "Lock lease expired before release"
            ),
            Err(error) => tracing::warn!(
                key = %lease.key,
                error = %error,
                "Failed to release lock, it will expire"
            ),
        }

        result
    }

    async fn persist_locked(&self, intent: &OrderIntent) -> Result<PersistOutcome> {
        if let Some(existing) = self
            .repository
            .find_order(intent.customer_id, intent.voucher_id)
            .await?
        {
            PersisterMetrics::record_replay();
            tracing::debug!(
                order_id = %intent.order_id,
                existing_order_id = %existing.order_id,
                "Order already persisted"
            );
            return Ok(PersistOutcome::AlreadyPersisted);
        }

        let order = PersistedOrder::from_intent(intent);
        match self.repository.create_order(&order).await? {
            CreateOrderOutcome::Created => {
                PersisterMetrics::record_persisted();
                tracing::info!(
                    order_id = %order.order_id,
                    customer_id = %order.customer_id,
                    voucher_id = %order.voucher_id,
                    "Order persisted"
                );
                Ok(PersistOutcome::Persisted)
            }
            CreateOrderOutcome::AlreadyExists => {
                PersisterMetrics::record_replay();
                tracing::debug!(order_id = %order.order_id, "Order already persisted");
                Ok(PersistOutcome::AlreadyPersisted)
            }
            CreateOrderOutcome::StockExhausted => {
                PersisterMetrics::record_stock_exhausted();
                tracing::error!(
                    order_id = %order.order_id,
                    customer_id = %order.customer_id,
                    voucher_id = %order.voucher_id,
                    "Durable stock exhausted for an admitted order"
                );
                Ok(PersistOutcome::StockExhausted)
            }
        }
    }
}
