//! # Seckill Core
//!
//! Core types and provider traits for the flash-sale order admission pipeline.
//!
//! A flash sale ("seckill") sells a fixed stock of discount vouchers inside a short
//! time window. Requests arrive in bursts far larger than the stock, so the pipeline
//! splits into a fast synchronous admission decision and a deferred durable write:
//!
//! ```text
//! request ──► AdmissionGate ──► response (order id | rejection)
//!                  │
//!                  │ atomic: window + dedup + stock + enqueue
//!                  ▼
//!             OrderQueue (consumer group, at-least-once)
//!                  │
//!                  ▼
//!          OrderPersister ──(per-customer lease)──► relational store
//!                  ▲
//!                  └── RecoveryScanner (pending entries)
//! ```
//!
//! This crate holds only the vocabulary shared by every layer:
//!
//! - [`types`]: identifiers, sale definitions, intents and persisted orders
//! - [`wire`]: the flat field map carried on the queue
//! - [`error`]: the [`SeckillError`] taxonomy
//! - [`keys`]: shared-store key layout
//! - [`providers`]: traits implemented by the Redis, `PostgreSQL` and in-memory backends
//! - [`environment`]: the [`Clock`](environment::Clock) abstraction
//!
//! The decision logic lives in `seckill-runtime`.

pub mod error;
pub mod keys;
pub mod providers;
pub mod types;
pub mod wire;

pub use error::{Result, SeckillError};
pub use types::{
    Admission, AdmissionRequest, AdmissionStatus, CustomerId, OrderId, OrderIntent,
    OrderStatus, PersistedOrder, Rejection, SaleWindow, SeckillSale, VoucherId,
};
pub use wire::{EntryId, QueueEntry};

/// Environment module - dependency injection traits.
///
/// Everything that reads wall-clock time goes through [`Clock`](environment::Clock)
/// so that window checks and id timestamps are deterministic under test.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use seckill_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = clock.now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
        fn now(&self) -> DateTime<Utc> {
            (**self).now()
        }
    }
}
