//! Provider traits implemented by the storage backends.
//!
//! The runtime is generic over these traits. Production wiring uses the Redis
//! and `PostgreSQL` crates; tests use `seckill-testing`.
//!
//! All futures are `Send` so components can run on spawned tokio tasks.

use crate::error::Result;
use crate::types::{
    AdmissionRequest, AdmissionStatus, CustomerId, OrderId, PersistedOrder, SeckillSale,
    VoucherId,
};
use crate::wire::{EntryId, QueueEntry};
use std::time::Duration;

/// Atomic increment-and-get counters in the shared store.
pub trait CounterService: Send + Sync {
    /// Increment `key` by one and return the new value.
    ///
    /// A missing key counts from zero, so the first call returns 1.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Unavailable`](crate::SeckillError::Unavailable) if the
    /// store cannot be reached.
    fn increment(&self, key: &str) -> impl std::future::Future<Output = Result<u64>> + Send;
}

/// The shared in-memory store holding stock, purchase records and sale windows.
///
/// # Atomicity
///
/// [`try_admit`](AdmissionStore::try_admit) must execute the window check, the
/// duplicate check, the stock check, the decrement, the purchase record insert and
/// the queue append as one indivisible step. Implementations must never split it
/// into read-then-write round trips.
pub trait AdmissionStore: Send + Sync {
    /// Copy a sale's stock and window into the shared store.
    ///
    /// Overwrites any previous snapshot for the voucher and clears its purchase record.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Unavailable`](crate::SeckillError::Unavailable) on store failure.
    fn publish_sale(&self, sale: &SeckillSale)
    -> impl std::future::Future<Output = Result<()>> + Send;

    /// Run the atomic admission step.
    ///
    /// # Returns
    ///
    /// The status code of the decision. Only [`AdmissionStatus::Admitted`] mutates state.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Unavailable`](crate::SeckillError::Unavailable) on store
    /// failure; nothing is mutated in that case.
    fn try_admit(
        &self,
        request: &AdmissionRequest,
    ) -> impl std::future::Future<Output = Result<AdmissionStatus>> + Send;

    /// Remaining shared-store stock, or `None` when no snapshot exists.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Unavailable`](crate::SeckillError::Unavailable) on store failure.
    fn remaining_stock(
        &self,
        voucher_id: VoucherId,
    ) -> impl std::future::Future<Output = Result<Option<i64>>> + Send;

    /// Whether the customer is in the voucher's purchase record.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Unavailable`](crate::SeckillError::Unavailable) on store failure.
    fn has_purchased(
        &self,
        voucher_id: VoucherId,
        customer_id: CustomerId,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;
}

/// Durable, ordered log with consumer groups.
///
/// Delivery is at-least-once: an entry handed to a consumer stays pending for
/// that consumer until [`ack`](OrderQueue::ack)ed, and is returned again by
/// [`read_pending`](OrderQueue::read_pending) after a restart.
pub trait OrderQueue: Send + Sync {
    /// Create the consumer group at the start of the log if it does not exist.
    ///
    /// Idempotent. Creates the log itself when missing.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Unavailable`](crate::SeckillError::Unavailable) on queue failure.
    fn ensure_group(&self, group: &str) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Append an entry, returning its id.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Unavailable`](crate::SeckillError::Unavailable) on queue failure.
    fn push(
        &self,
        intent: &crate::types::OrderIntent,
    ) -> impl std::future::Future<Output = Result<EntryId>> + Send;

    /// Deliver the next never-delivered entry to `consumer`, waiting up to `block`.
    ///
    /// Returns `None` when nothing arrived in time.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Unavailable`](crate::SeckillError::Unavailable) on queue failure.
    fn read_next(
        &self,
        group: &str,
        consumer: &str,
        block: Duration,
    ) -> impl std::future::Future<Output = Result<Option<QueueEntry>>> + Send;

    /// Acknowledge an entry, removing it from the pending list.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Unavailable`](crate::SeckillError::Unavailable) on queue failure.
    fn ack(
        &self,
        group: &str,
        entry_id: &EntryId,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Up to `count` entries delivered to `consumer` but not yet acknowledged, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Unavailable`](crate::SeckillError::Unavailable) on queue failure.
    fn read_pending(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> impl std::future::Future<Output = Result<Vec<QueueEntry>>> + Send;
}

/// Proof of holding a distributed lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    /// Lock key.
    pub key: String,
    /// Owner token; release only succeeds while the stored token matches.
    pub token: String,
    /// Lease duration after which the lock expires on its own.
    pub ttl: Duration,
}

/// Named, TTL-bounded mutual exclusion across processes.
pub trait DistributedMutex: Send + Sync {
    /// Try to take the lock without waiting.
    ///
    /// Returns `None` when someone else holds it.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Unavailable`](crate::SeckillError::Unavailable) on store failure.
    fn try_acquire(
        &self,
        key: &str,
        lease: Duration,
    ) -> impl std::future::Future<Output = Result<Option<Lease>>> + Send;

    /// Release the lock if `lease` still owns it.
    ///
    /// Returns `false` when the lock had expired or was taken over.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Unavailable`](crate::SeckillError::Unavailable) on store failure.
    fn release(&self, lease: &Lease) -> impl std::future::Future<Output = Result<bool>> + Send;
}

/// Outcome of the transactional order insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOrderOutcome {
    /// Durable stock decremented and order inserted.
    Created,
    /// The guarded decrement found no stock; nothing was written.
    StockExhausted,
    /// An order for this (customer, voucher) or this id already exists; nothing was written.
    AlreadyExists,
}

/// Relational store of sales and persisted orders.
pub trait OrderRepository: Send + Sync {
    /// Insert or replace the durable sale row.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Database`](crate::SeckillError::Database) on failure.
    fn register_sale(&self, sale: &SeckillSale)
    -> impl std::future::Future<Output = Result<()>> + Send;

    /// Find the order a customer holds for a voucher.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Database`](crate::SeckillError::Database) on failure.
    fn find_order(
        &self,
        customer_id: CustomerId,
        voucher_id: VoucherId,
    ) -> impl std::future::Future<Output = Result<Option<PersistedOrder>>> + Send;

    /// Look up an order by id.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Database`](crate::SeckillError::Database) on failure.
    fn get_order(
        &self,
        order_id: OrderId,
    ) -> impl std::future::Future<Output = Result<Option<PersistedOrder>>> + Send;

    /// Decrement durable stock guarded by `stock > 0` and insert the order, in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Database`](crate::SeckillError::Database) on failure; the
    /// transaction is rolled back.
    fn create_order(
        &self,
        order: &PersistedOrder,
    ) -> impl std::future::Future<Output = Result<CreateOrderOutcome>> + Send;

    /// Durable remaining stock, or `None` when the sale row is missing.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Database`](crate::SeckillError::Database) on failure.
    fn remaining_stock(
        &self,
        voucher_id: VoucherId,
    ) -> impl std::future::Future<Output = Result<Option<i64>>> + Send;
}
