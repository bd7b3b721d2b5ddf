//! Redrive of delivered-but-unacknowledged entries.
//!
//! After a crash, or after the main loop hits an error, the consumer's pending
//! list can hold entries nobody will deliver again. The scanner reads them
//! oldest first and runs each through the persister until the list is empty.
//! A failed pending read also re-creates the consumer group, which is gone if
//! the store restarted without persistence.

use crate::backoff::BackoffPolicy;
use crate::metrics::WorkerMetrics;
use crate::persister::OrderPersister;
use seckill_core::providers::{DistributedMutex, OrderQueue, OrderRepository};
use tokio::sync::watch;

/// Summary of one [`RecoveryScanner::drain`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Entries handled and acknowledged.
    pub redriven: usize,
    /// Passes over the pending list, including the final empty read.
    pub passes: usize,
    /// Passes that stopped on an error.
    pub failed_passes: usize,
    /// Whether shutdown interrupted the drain before the list was empty.
    pub interrupted: bool,
}

/// Drains a consumer's pending list.
#[derive(Debug, Clone)]
pub struct RecoveryScanner {
    backoff: BackoffPolicy,
    batch: usize,
}

impl RecoveryScanner {
    /// Create a scanner reading up to `batch` pending entries per pass.
    #[must_use]
    pub fn new(backoff: BackoffPolicy, batch: usize) -> Self {
        Self {
            backoff,
            batch: batch.max(1),
        }
    }

    /// Redrive `consumer`'s pending entries until none remain or shutdown is signalled.
    ///
    /// A pass stops at the first failing entry so order is preserved; the next
    /// pass starts after a backoff delay that grows while passes keep failing.
    pub async fn drain<Q, M, R>(
        &self,
        persister: &OrderPersister<Q, M, R>,
        consumer: &str,
        shutdown: &watch::Receiver<bool>,
    ) -> RecoveryReport
    where
        Q: OrderQueue,
        M: DistributedMutex,
        R: OrderRepository,
    {
        let group = persister.config().group.as_str();
        let mut report = RecoveryReport::default();
        let mut consecutive_failures = 0usize;

        loop {
            let stop = *shutdown.borrow();
            if stop {
                report.interrupted = true;
                break;
            }

            report.passes += 1;
            let failed = match persister.queue().read_pending(group, consumer, self.batch).await {
                Ok(entries) if entries.is_empty() => {
                    WorkerMetrics::record_recovery_pass(false);
                    break;
                }
                Ok(entries) => {
                    let mut failed = false;
                    for entry in &entries {
                        match persister.handle_entry(entry).await {
                            Ok(_) => report.redriven += 1,
                            Err(error) => {
                                tracing::warn!(
                                    consumer,
                                    entry_id = %entry.id,
                                    error = %error,
                                    "Pending entry failed, will retry"
                                );
                                failed = true;
                                break;
                            }
                        }
                    }
                    failed
                }
                Err(error) => {
                    tracing::error!(consumer, error = %error, "Failed to read pending entries");
                    // A store restarted without persistence has lost the group.
                    if let Err(error) = persister.queue().ensure_group(group).await {
                        tracing::warn!(consumer, group, error = %error, "Failed to recreate consumer group");
                    }
                    true
                }
            };
            WorkerMetrics::record_recovery_pass(failed);

            if failed {
                report.failed_passes += 1;
                let delay = self.backoff.delay_for_attempt(consecutive_failures);
                consecutive_failures += 1;

                let mut shutdown = shutdown.clone();
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    Ok(()) = shutdown.changed() => {}
                }
            } else {
                consecutive_failures = 0;
            }
        }

        if report.redriven > 0 || report.failed_passes > 0 {
            tracing::info!(
                consumer,
                redriven = report.redriven,
                failed_passes = report.failed_passes,
                interrupted = report.interrupted,
                "Recovery finished"
            );
        }
        report
    }
}
