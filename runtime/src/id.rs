//! Globally unique, roughly time-ordered order ids.
//!
//! Layout of the 64-bit id:
//!
//! ```text
//! | 32 bits: seconds since 2022-01-01T00:00:00Z | 32 bits: daily sequence |
//! ```
//!
//! The sequence comes from an atomic increment on `icr:{namespace}:{yyyyMMdd}`
//! in the shared store, so every process draws from the same counter.

use chrono::{DateTime, Utc};
use seckill_core::environment::Clock;
use seckill_core::keys;
use seckill_core::providers::CounterService;
use seckill_core::{OrderId, Result, SeckillError};

/// Id epoch: 2022-01-01T00:00:00Z in Unix seconds.
pub const EPOCH_SECONDS: i64 = 1_640_995_200;

/// Width of the sequence part.
pub const SEQUENCE_BITS: u32 = 32;

/// Combine a timestamp (seconds since [`EPOCH_SECONDS`]) and a sequence into an id.
#[must_use]
pub const fn compose(timestamp: u32, sequence: u32) -> u64 {
    ((timestamp as u64) << SEQUENCE_BITS) | sequence as u64
}

/// Seconds-since-epoch part of an id.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn timestamp_of(id: u64) -> u32 {
    (id >> SEQUENCE_BITS) as u32
}

/// Sequence part of an id.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn sequence_of(id: u64) -> u32 {
    id as u32
}

/// Id generator backed by a shared counter.
///
/// # Example
///
/// ```ignore
/// let ids = IdGenerator::new(redis_store.clone(), SystemClock);
/// let order_id = ids.next_id("order").await?;
/// ```
#[derive(Debug, Clone)]
pub struct IdGenerator<C, K> {
    counter: C,
    clock: K,
}

impl<C: CounterService, K: Clock> IdGenerator<C, K> {
    /// Create a generator over `counter`, reading time from `clock`.
    #[must_use]
    pub const fn new(counter: C, clock: K) -> Self {
        Self { counter, clock }
    }

    /// The clock this generator stamps ids with.
    #[must_use]
    pub const fn clock(&self) -> &K {
        &self.clock
    }

    /// Next id in `namespace`, stamped with the current time.
    ///
    /// # Errors
    ///
    /// - [`SeckillError::Unavailable`] if the counter service is unreachable
    /// - [`SeckillError::InvalidClock`] if the clock reads before the epoch
    /// - [`SeckillError::SequenceExhausted`] if today's sequence no longer fits 32 bits
    pub async fn next_id(&self, namespace: &str) -> Result<OrderId> {
        self.next_id_at(namespace, self.clock.now()).await
    }

    /// Next id in `namespace`, stamped with `now`.
    ///
    /// One counter round trip; no local fallback is ever substituted.
    ///
    /// # Errors
    ///
    /// Same as [`next_id`](Self::next_id).
    pub async fn next_id_at(&self, namespace: &str, now: DateTime<Utc>) -> Result<OrderId> {
        let timestamp = epoch_seconds(now)?;
        let key = keys::id_counter_key(namespace, now);
        let sequence = self.counter.increment(&key).await?;
        let sequence = u32::try_from(sequence).map_err(|_| {
            tracing::error!(namespace, key = %key, sequence, "Daily id sequence exhausted");
            SeckillError::SequenceExhausted {
                namespace: namespace.to_string(),
            }
        })?;

        Ok(OrderId::new(compose(timestamp, sequence)))
    }
}

fn epoch_seconds(now: DateTime<Utc>) -> Result<u32> {
    u32::try_from(now.timestamp() - EPOCH_SECONDS)
        .map_err(|_| SeckillError::InvalidClock(now.to_rfc3339()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;
    use seckill_core::providers::CounterService;
    use seckill_testing::{InMemorySeckillStore, ManualClock, test_clock};
    use std::collections::HashSet;

    #[test]
    fn layout_matches_epoch() {
        let at = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 10).unwrap();
        assert_eq!(epoch_seconds(at).unwrap(), 10);
        assert_eq!(compose(10, 3), (10 << 32) | 3);
    }

    #[tokio::test]
    async fn ids_are_distinct_and_increasing_within_a_second() {
        let store = InMemorySeckillStore::new();
        let ids = IdGenerator::new(store, test_clock());

        let mut previous = 0;
        let mut seen = HashSet::new();
        for _ in 0..100 {
            let id = ids.next_id("order").await.unwrap().get();
            assert!(id > previous);
            assert!(seen.insert(id));
            previous = id;
        }
        assert_eq!(sequence_of(previous), 100);
    }

    #[tokio::test]
    async fn sequence_restarts_each_day_but_timestamp_dominates() {
        let store = InMemorySeckillStore::new();
        let clock = ManualClock::new(test_clock().now());
        let ids = IdGenerator::new(store, clock.clone());

        let before = ids.next_id("order").await.unwrap().get();
        ids.next_id("order").await.unwrap();
        clock.advance(Duration::days(1));
        let after = ids.next_id("order").await.unwrap().get();

        assert_eq!(sequence_of(after), 1);
        assert!(after > before);
    }

    #[tokio::test]
    async fn namespaces_use_separate_counters() {
        let store = InMemorySeckillStore::new();
        let ids = IdGenerator::new(store.clone(), test_clock());

        ids.next_id("order").await.unwrap();
        let refund = ids.next_id("refund").await.unwrap();
        assert_eq!(sequence_of(refund.get()), 1);
        assert_eq!(store.increment("icr:order:20250101").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn clock_before_epoch_is_rejected() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2021, 12, 31, 23, 59, 59).unwrap());
        let ids = IdGenerator::new(InMemorySeckillStore::new(), clock);
        assert!(matches!(
            ids.next_id("order").await,
            Err(SeckillError::InvalidClock(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_counter_has_no_fallback() {
        let store = InMemorySeckillStore::new();
        store.set_available(false);
        let ids = IdGenerator::new(store, test_clock());
        assert!(matches!(
            ids.next_id("order").await,
            Err(SeckillError::Unavailable(_))
        ));
    }

    proptest! {
        #[test]
        fn compose_splits_back(timestamp in any::<u32>(), sequence in any::<u32>()) {
            let id = compose(timestamp, sequence);
            prop_assert_eq!(timestamp_of(id), timestamp);
            prop_assert_eq!(sequence_of(id), sequence);
        }

        #[test]
        fn later_second_always_sorts_after(
            timestamp in 0u32..u32::MAX,
            early_seq in any::<u32>(),
            late_seq in any::<u32>(),
        ) {
            prop_assert!(compose(timestamp + 1, late_seq) > compose(timestamp, early_seq));
        }

        #[test]
        fn non_decreasing_time_gives_non_decreasing_ids(
            offsets in proptest::collection::vec(0i64..86_400 * 3, 1..40),
        ) {
            let mut offsets = offsets;
            offsets.sort_unstable();
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let clock = ManualClock::new(test_clock().now());
                let ids = IdGenerator::new(InMemorySeckillStore::new(), clock.clone());
                let mut previous = 0u64;
                for offset in offsets {
                    clock.set(test_clock().now() + Duration::seconds(offset));
                    let id = ids.next_id("order").await.unwrap().get();
                    assert!(id > previous);
                    previous = id;
                }
            });
        }
    }
}
