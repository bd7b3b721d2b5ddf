//! In-memory shared store for tests.

use seckill_core::providers::{AdmissionStore, CounterService, DistributedMutex, Lease, OrderQueue};
use seckill_core::{
    AdmissionRequest, AdmissionStatus, CustomerId, EntryId, OrderIntent, QueueEntry, Result,
    SaleWindow, SeckillError, SeckillSale, VoucherId,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// In-memory stand-in for the shared key-value store and its stream.
///
/// Implements [`AdmissionStore`], [`CounterService`], [`DistributedMutex`] and
/// [`OrderQueue`] over one mutex, so the admission step is indivisible just like
/// the Lua script. Clones share state.
///
/// Lock leases expire on the tokio clock, so `#[tokio::test(start_paused = true)]`
/// tests can expire them with `tokio::time::advance`.
#[derive(Debug, Clone, Default)]
pub struct InMemorySeckillStore {
    state: Arc<Mutex<State>>,
    appended: Arc<Notify>,
    unavailable: Arc<AtomicBool>,
}

#[derive(Debug, Default)]
struct State {
    stock: HashMap<VoucherId, i64>,
    windows: HashMap<VoucherId, SaleWindow>,
    purchases: HashMap<VoucherId, HashSet<CustomerId>>,
    counters: HashMap<String, u64>,
    locks: HashMap<String, (String, Instant)>,
    log: Vec<QueueEntry>,
    groups: HashMap<String, Group>,
}

#[derive(Debug, Default)]
struct Group {
    /// Index of the next never-delivered entry.
    cursor: usize,
    /// Delivered, unacknowledged entries: (log index, consumer).
    pending: Vec<(usize, String)>,
}

impl State {
    fn append(&mut self, intent: &OrderIntent) -> EntryId {
        let id = EntryId::new(format!("{}-0", self.log.len() + 1));
        self.log.push(QueueEntry::from_intent(id.clone(), intent));
        id
    }

    fn group_mut(&mut self, group: &str) -> Result<&mut Group> {
        self.groups.get_mut(group).ok_or_else(|| {
            SeckillError::Unavailable(format!("NOGROUP no such consumer group {group}"))
        })
    }
}

impl InMemorySeckillStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the store becoming unreachable (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Every entry ever appended to the log, in order.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Unavailable`] if the state mutex is poisoned.
    pub fn entries(&self) -> Result<Vec<QueueEntry>> {
        Ok(self.lock_state()?.log.clone())
    }

    /// Number of entries pending (delivered, unacknowledged) in `group`.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Unavailable`] if the group does not exist.
    pub fn pending_count(&self, group: &str) -> Result<usize> {
        let mut state = self.lock_state()?;
        Ok(state.group_mut(group)?.pending.len())
    }

    /// Forget a consumer group and its pending list, as a store restarted
    /// without persistence would.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Unavailable`] if the state mutex is poisoned.
    pub fn drop_group(&self, group: &str) -> Result<()> {
        self.lock_state()?.groups.remove(group);
        Ok(())
    }

    /// Append a raw field map, bypassing admission (for poison-entry tests).
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Unavailable`] if the state mutex is poisoned.
    pub fn push_raw(&self, fields: HashMap<String, String>) -> Result<EntryId> {
        let id = {
            let mut state = self.lock_state()?;
            let id = EntryId::new(format!("{}-0", state.log.len() + 1));
            state.log.push(QueueEntry {
                id: id.clone(),
                fields,
            });
            id
        };
        self.appended.notify_waiters();
        Ok(id)
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, State>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SeckillError::Unavailable("in-memory store offline".into()));
        }
        self.state
            .lock()
            .map_err(|_| SeckillError::Unavailable("Mutex lock failed".into()))
    }

    fn try_deliver(&self, group: &str, consumer: &str) -> Result<Option<QueueEntry>> {
        let mut state = self.lock_state()?;
        let log_len = state.log.len();
        let entry_group = state.group_mut(group)?;
        if entry_group.cursor >= log_len {
            return Ok(None);
        }
        let index = entry_group.cursor;
        entry_group.cursor += 1;
        entry_group.pending.push((index, consumer.to_string()));
        Ok(state.log.get(index).cloned())
    }
}

impl CounterService for InMemorySeckillStore {
    async fn increment(&self, key: &str) -> Result<u64> {
        let mut state = self.lock_state()?;
        let counter = state.counters.entry(key.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}

impl AdmissionStore for InMemorySeckillStore {
    async fn publish_sale(&self, sale: &SeckillSale) -> Result<()> {
        let mut state = self.lock_state()?;
        state.stock.insert(sale.voucher_id, i64::from(sale.stock));
        state.windows.insert(sale.voucher_id, sale.window);
        state.purchases.remove(&sale.voucher_id);
        Ok(())
    }

    async fn try_admit(&self, request: &AdmissionRequest) -> Result<AdmissionStatus> {
        let intent = request.intent;
        let voucher_id = intent.voucher_id;

        let status = {
            let mut state = self.lock_state()?;

            let (Some(&window), Some(&stock)) =
                (state.windows.get(&voucher_id), state.stock.get(&voucher_id))
            else {
                return Ok(AdmissionStatus::SaleNotFound);
            };

            if request.now < window.begin {
                AdmissionStatus::NotStarted
            } else if request.now > window.end {
                AdmissionStatus::Ended
            } else if state
                .purchases
                .get(&voucher_id)
                .is_some_and(|buyers| buyers.contains(&intent.customer_id))
            {
                AdmissionStatus::DuplicatePurchase
            } else if stock <= 0 {
                AdmissionStatus::OutOfStock
            } else {
                state.stock.insert(voucher_id, stock - 1);
                state
                    .purchases
                    .entry(voucher_id)
                    .or_default()
                    .insert(intent.customer_id);
                state.append(&intent);
                AdmissionStatus::Admitted
            }
        };

        if status == AdmissionStatus::Admitted {
            self.appended.notify_waiters();
        }
        Ok(status)
    }

    async fn remaining_stock(&self, voucher_id: VoucherId) -> Result<Option<i64>> {
        Ok(self.lock_state()?.stock.get(&voucher_id).copied())
    }

    async fn has_purchased(&self, voucher_id: VoucherId, customer_id: CustomerId) -> Result<bool> {
        Ok(self
            .lock_state()?
            .purchases
            .get(&voucher_id)
            .is_some_and(|buyers| buyers.contains(&customer_id)))
    }
}

impl DistributedMutex for InMemorySeckillStore {
    async fn try_acquire(&self, key: &str, lease: Duration) -> Result<Option<Lease>> {
        let mut state = self.lock_state()?;
        let now = Instant::now();

        if let Some((_, expires_at)) = state.locks.get(key) {
            if *expires_at > now {
                return Ok(None);
            }
        }

        let token = uuid::Uuid::new_v4().to_string();
        state
            .locks
            .insert(key.to_string(), (token.clone(), now + lease));
        Ok(Some(Lease {
            key: key.to_string(),
            token,
            ttl: lease,
        }))
    }

    async fn release(&self, lease: &Lease) -> Result<bool> {
        let mut state = self.lock_state()?;
        let owned = state
            .locks
            .get(&lease.key)
            .is_some_and(|(token, expires_at)| *token == lease.token && *expires_at > Instant::now());
        if owned {
            state.locks.remove(&lease.key);
        }
        Ok(owned)
    }
}

impl OrderQueue for InMemorySeckillStore {
    async fn ensure_group(&self, group: &str) -> Result<()> {
        self.lock_state()?
            .groups
            .entry(group.to_string())
            .or_default();
        Ok(())
    }

    async fn push(&self, intent: &OrderIntent) -> Result<EntryId> {
        let id = self.lock_state()?.append(intent);
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn read_next(
        &self,
        group: &str,
        consumer: &str,
        block: Duration,
    ) -> Result<Option<QueueEntry>> {
        let deadline = Instant::now() + block;
        loop {
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(entry) = self.try_deliver(group, consumer)? {
                return Ok(Some(entry));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, group: &str, entry_id: &EntryId) -> Result<()> {
        let mut state = self.lock_state()?;
        let index = state
            .log
            .iter()
            .position(|entry| entry.id == *entry_id);
        let entry_group = state.group_mut(group)?;
        if let Some(index) = index {
            entry_group.pending.retain(|(pending, _)| *pending != index);
        }
        Ok(())
    }

    async fn read_pending(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<QueueEntry>> {
        let mut state = self.lock_state()?;
        let mut indices: Vec<usize> = state
            .group_mut(group)?
            .pending
            .iter()
            .filter(|(_, owner)| owner == consumer)
            .map(|(index, _)| *index)
            .collect();
        indices.sort_unstable();
        Ok(indices
            .into_iter()
            .take(count)
            .filter_map(|index| state.log.get(index).cloned())
            .collect())
    }
}
