//! # Seckill Testing
//!
//! Testing utilities for the flash-sale pipeline.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - [`InMemorySeckillStore`]: shared store, counter, lease lock and consumer-group queue
//! - [`InMemoryOrderRepository`]: relational store with failure injection
//!
//! ## Example
//!
//! ```ignore
//! use seckill_testing::{InMemoryOrderRepository, InMemorySeckillStore, test_clock};
//!
//! #[tokio::test]
//! async fn admits_one_buyer() {
//!     let store = InMemorySeckillStore::new();
//!     let gate = AdmissionGate::new(store.clone(), IdGenerator::new(store, test_clock()));
//!     // ...
//! }
//! ```

mod repository;
mod store;

pub use repository::InMemoryOrderRepository;
pub use store::InMemorySeckillStore;

use chrono::{DateTime, Utc};
use seckill_core::environment::Clock;

/// Mock implementations of Environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use seckill_testing::mocks::FixedClock;
    /// use seckill_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can hold one handle and move the
    /// clock seen by the component under test.
    ///
    /// ```
    /// use seckill_testing::mocks::ManualClock;
    /// use seckill_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let start = Utc::now();
    /// let clock = ManualClock::new(start);
    /// clock.advance(Duration::seconds(5));
    /// assert_eq!(clock.now(), start + Duration::seconds(5));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock reading `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Jump to `time` (may go backwards).
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }

        /// Move forward by `delta`.
        pub fn advance(&self, delta: chrono::Duration) {
            let mut guard = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *guard += delta;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Builders for common test fixtures.
pub mod fixtures {
    use chrono::{DateTime, Duration, Utc};
    use seckill_core::{SaleWindow, SeckillSale, VoucherId};

    /// A sale for `voucher_id` with `stock` units, open one hour either side of `now`.
    #[must_use]
    pub fn open_sale(voucher_id: u64, stock: u32, now: DateTime<Utc>) -> SeckillSale {
        SeckillSale {
            voucher_id: VoucherId::new(voucher_id),
            stock,
            window: SaleWindow {
                begin: now - Duration::hours(1),
                end: now + Duration::hours(1),
            },
        }
    }

    /// A sale whose window is `[begin, end]`.
    #[must_use]
    pub const fn sale_between(
        voucher_id: u64,
        stock: u32,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> SeckillSale {
        SeckillSale {
            voucher_id: VoucherId::new(voucher_id),
            stock,
            window: SaleWindow { begin, end },
        }
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, test_clock};
