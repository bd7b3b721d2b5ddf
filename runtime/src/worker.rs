//! Background persister workers.
//!
//! Each worker is one named consumer in the queue's consumer group:
//!
//! ```text
//! ensure_group (retried)
//! recovery: drain own pending list
//! loop {
//!     stop if shutdown signalled
//!     read_next (bounded block)
//!         empty  -> loop
//!         entry  -> persist + ack; on error -> recovery
//!         error  -> recovery
//! }
//! ```
//!
//! The blocking read is never cancelled mid-flight; shutdown is observed when
//! it returns, so the worst-case stop latency is one block timeout.

use crate::backoff::{BackoffPolicy, retry_with_backoff};
use crate::metrics::WorkerMetrics;
use crate::persister::{OrderPersister, PersistOutcome};
use crate::recovery::RecoveryScanner;
use seckill_core::{Result, SeckillError};
use seckill_core::providers::{DistributedMutex, OrderQueue, OrderRepository};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Worker configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Consumer name within the group.
    pub consumer: String,
    /// Maximum time one `read_next` blocks.
    pub block: Duration,
    /// Pending entries read per recovery pass.
    pub pending_batch: usize,
    /// Backoff for group bootstrap.
    pub bootstrap_backoff: BackoffPolicy,
    /// Backoff between failing recovery passes.
    pub recovery_backoff: BackoffPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            consumer: "c1".to_string(),
            block: Duration::from_millis(2000),
            pending_batch: 10,
            bootstrap_backoff: BackoffPolicy::builder()
                .max_retries(10)
                .initial_delay(Duration::from_millis(100))
                .max_delay(Duration::from_secs(5))
                .build(),
            recovery_backoff: BackoffPolicy::default(),
        }
    }
}

impl WorkerConfig {
    /// Set the consumer name.
    #[must_use]
    pub fn with_consumer(mut self, consumer: impl Into<String>) -> Self {
        self.consumer = consumer.into();
        self
    }

    /// Set the read block timeout.
    #[must_use]
    pub const fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    /// Set the recovery batch size.
    #[must_use]
    pub const fn with_pending_batch(mut self, batch: usize) -> Self {
        self.pending_batch = batch;
        self
    }

    /// Set the recovery backoff.
    #[must_use]
    pub fn with_recovery_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.recovery_backoff = backoff;
        self
    }

    /// Set the group bootstrap backoff.
    #[must_use]
    pub fn with_bootstrap_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.bootstrap_backoff = backoff;
        self
    }
}

/// Counters reported when a worker stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Entries handled and acknowledged by the main loop.
    pub processed: usize,
    /// Entries handled and acknowledged by recovery.
    pub recovered: usize,
    /// Main-loop errors (each followed by a recovery drain).
    pub errors: usize,
}

/// One persister consumer.
pub struct PersisterWorker<Q, M, R> {
    persister: Arc<OrderPersister<Q, M, R>>,
    config: WorkerConfig,
}

impl<Q, M, R> PersisterWorker<Q, M, R>
where
    Q: OrderQueue + 'static,
    M: DistributedMutex + 'static,
    R: OrderRepository + 'static,
{
    /// Create a worker sharing `persister`.
    #[must_use]
    pub const fn new(persister: Arc<OrderPersister<Q, M, R>>, config: WorkerConfig) -> Self {
        Self { persister, config }
    }

    /// Run until `shutdown` turns `true`.
    ///
    /// # Errors
    ///
    /// Returns the last error if the consumer group cannot be created within
    /// the bootstrap backoff budget. All later failures are handled by recovery.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<WorkerStats> {
        let consumer = self.config.consumer.as_str();
        let group = self.persister.config().group.as_str();
        let queue = self.persister.queue();

        retry_with_backoff(&self.config.bootstrap_backoff, || queue.ensure_group(group)).await?;
        tracing::info!(consumer, group, "Persister worker started");

        let scanner = RecoveryScanner::new(self.config.recovery_backoff.clone(), self.config.pending_batch);
        let mut stats = WorkerStats::default();
        stats.recovered += scanner.drain(&self.persister, consumer, &shutdown).await.redriven;

        loop {
            let stop = *shutdown.borrow();
            if stop {
                break;
            }

            let failed = match queue.read_next(group, consumer, self.config.block).await {
                Ok(None) => false,
                Ok(Some(entry)) => match self.persister.handle_entry(&entry).await {
                    Ok(outcome) => {
                        stats.processed += 1;
                        if outcome == PersistOutcome::StockExhausted {
                            tracing::warn!(consumer, entry_id = %entry.id, "Entry acknowledged without an order");
                        }
                        false
                    }
                    Err(error) => {
                        tracing::warn!(consumer, entry_id = %entry.id, error = %error, "Entry left pending");
                        true
                    }
                },
                Err(error) => {
                    tracing::error!(consumer, error = %error, "Failed to read from order queue");
                    true
                }
            };

            if failed {
                stats.errors += 1;
                WorkerMetrics::record_error();
                stats.recovered += scanner.drain(&self.persister, consumer, &shutdown).await.redriven;
            }
        }

        tracing::info!(
            consumer,
            processed = stats.processed,
            recovered = stats.recovered,
            errors = stats.errors,
            "Persister worker stopped"
        );
        Ok(stats)
    }

    /// Spawn the worker on the tokio runtime.
    #[must_use]
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> WorkerHandle {
        let consumer = self.config.consumer.clone();
        let join = tokio::spawn(self.run(shutdown));
        WorkerHandle { consumer, join }
    }
}

/// Handle to a spawned worker.
#[derive(Debug)]
pub struct WorkerHandle {
    consumer: String,
    join: JoinHandle<Result<WorkerStats>>,
}

impl WorkerHandle {
    /// Consumer name of the worker.
    #[must_use]
    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// Wait for the worker to stop.
    ///
    /// # Errors
    ///
    /// Returns the worker's own error, or [`SeckillError::WorkerFailed`]
    /// if the task panicked or was cancelled.
    pub async fn join(self) -> Result<WorkerStats> {
        self.join.await.map_err(|e| SeckillError::WorkerFailed {
            consumer: self.consumer,
            reason: e.to_string(),
        })?
    }
}

/// Spawn `count` workers named `{base.consumer}-{i}` sharing one persister.
///
/// With `count == 1` the consumer name is used unchanged.
#[must_use]
pub fn spawn_pool<Q, M, R>(
    persister: &Arc<OrderPersister<Q, M, R>>,
    base: &WorkerConfig,
    count: usize,
    shutdown: &watch::Receiver<bool>,
) -> Vec<WorkerHandle>
where
    Q: OrderQueue + 'static,
    M: DistributedMutex + 'static,
    R: OrderRepository + 'static,
{
    let count = count.max(1);
    (0..count)
        .map(|i| {
            let consumer = if count == 1 {
                base.consumer.clone()
            } else {
                format!("{}-{i}", base.consumer)
            };
            let config = base.clone().with_consumer(consumer);
            PersisterWorker::new(Arc::clone(persister), config).spawn(shutdown.clone())
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::persister::PersisterConfig;
    use seckill_core::environment::Clock;
    use seckill_core::{CustomerId, OrderId, OrderIntent, VoucherId};
    use seckill_testing::fixtures::open_sale;
    use seckill_testing::{InMemoryOrderRepository, InMemorySeckillStore, test_clock};

    fn intent(order: u64, customer: u64) -> OrderIntent {
        OrderIntent {
            order_id: OrderId::new(order),
            customer_id: CustomerId::new(customer),
            voucher_id: VoucherId::new(1),
            created_at: test_clock().now(),
        }
    }

    async fn setup() -> (
        InMemorySeckillStore,
        InMemoryOrderRepository,
        Arc<OrderPersister<InMemorySeckillStore, InMemorySeckillStore, InMemoryOrderRepository>>,
    ) {
        let store = InMemorySeckillStore::new();
        let repo = InMemoryOrderRepository::new();
        repo.register_sale(&open_sale(1, 10, test_clock().now())).await.unwrap();
        let persister = Arc::new(OrderPersister::new(
            store.clone(),
            store.clone(),
            repo.clone(),
            PersisterConfig::default(),
        ));
        (store, repo, persister)
    }

    fn fast_config() -> WorkerConfig {
        WorkerConfig::default().with_block(Duration::from_millis(20))
    }

    async fn wait_for_orders(repo: &InMemoryOrderRepository, count: usize) {
        for _ in 0..200 {
            if repo.orders().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} orders, found {}", repo.orders().unwrap().len());
    }

    #[tokio::test]
    async fn worker_creates_group_and_persists() {
        let (store, repo, persister) = setup().await;
        let (tx, rx) = watch::channel(false);

        let handle = PersisterWorker::new(persister, fast_config()).spawn(rx);
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.push(&intent(100, 1)).await.unwrap();
        store.push(&intent(101, 2)).await.unwrap();
        wait_for_orders(&repo, 2).await;

        tx.send(true).unwrap();
        let stats = handle.join().await.unwrap();
        assert_eq!(stats.processed, 2);
        assert_eq!(store.pending_count("g1").unwrap(), 0);
    }

    #[tokio::test]
    async fn worker_stops_within_one_block() {
        let (_store, _repo, persister) = setup().await;
        let (tx, rx) = watch::channel(false);

        let handle = PersisterWorker::new(persister, fast_config()).spawn(rx);
        tx.send(true).unwrap();

        let stats = tokio::time::timeout(Duration::from_secs(1), handle.join())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats, WorkerStats::default());
    }

    #[tokio::test]
    async fn failed_entry_is_recovered_by_the_same_worker() {
        let (store, repo, persister) = setup().await;
        repo.fail_next_creates(2);
        let (tx, rx) = watch::channel(false);

        let config = fast_config().with_recovery_backoff(
            BackoffPolicy::builder().initial_delay(Duration::from_millis(1)).build(),
        );
        let handle = PersisterWorker::new(persister, config).spawn(rx);
        store.push(&intent(100, 1)).await.unwrap();
        wait_for_orders(&repo, 1).await;

        tx.send(true).unwrap();
        let stats = handle.join().await.unwrap();
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.recovered, 1);
        assert_eq!(store.pending_count("g1").unwrap(), 0);
    }

    #[tokio::test]
    async fn pool_names_consumers_and_shares_the_work() {
        let (store, repo, persister) = setup().await;
        let (tx, rx) = watch::channel(false);

        let handles = spawn_pool(&persister, &fast_config(), 3, &rx);
        let names: Vec<_> = handles.iter().map(|h| h.consumer().to_string()).collect();
        assert_eq!(names, ["c1-0", "c1-1", "c1-2"]);

        tokio::time::sleep(Duration::from_millis(10)).await;
        for n in 0..9 {
            store.push(&intent(100 + n, n)).await.unwrap();
        }
        wait_for_orders(&repo, 9).await;

        tx.send(true).unwrap();
        let mut processed = 0;
        for handle in handles {
            processed += handle.join().await.unwrap().processed;
        }
        assert_eq!(processed, 9);
    }

    #[tokio::test]
    async fn bootstrap_gives_up_when_store_stays_down() {
        let (store, _repo, persister) = setup().await;
        store.set_available(false);
        let (_tx, rx) = watch::channel(false);

        let config = fast_config().with_bootstrap_backoff(
            BackoffPolicy::builder()
                .max_retries(2)
                .initial_delay(Duration::from_millis(1))
                .build(),
        );
        let err = PersisterWorker::new(persister, config).run(rx).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn worker_recreates_a_lost_group() {
        let (store, repo, persister) = setup().await;
        let (tx, rx) = watch::channel(false);

        let config = fast_config().with_recovery_backoff(
            BackoffPolicy::builder().initial_delay(Duration::from_millis(1)).build(),
        );
        let handle = PersisterWorker::new(persister, config).spawn(rx);
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.drop_group("g1").unwrap();
        store.push(&intent(100, 1)).await.unwrap();
        wait_for_orders(&repo, 1).await;

        tx.send(true).unwrap();
        let stats = handle.join().await.unwrap();
        assert!(stats.errors >= 1);
        assert_eq!(store.pending_count("g1").unwrap(), 0);
    }

    async fn explode() -> Result<WorkerStats> {
        panic!("persister blew up")
    }

    #[tokio::test]
    async fn panicked_worker_is_reported_as_worker_failure() {
        let handle = WorkerHandle {
            consumer: "c1-0".to_string(),
            join: tokio::spawn(explode()),
        };

        let err = handle.join().await.unwrap_err();
        assert!(matches!(err, SeckillError::WorkerFailed { ref consumer, .. } if consumer == "c1-0"));
        assert!(!err.is_transient());
    }
}
