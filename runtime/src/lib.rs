//! # Seckill Runtime
//!
//! Decision and persistence logic for the flash-sale pipeline, generic over
//! the provider traits in `seckill-core`.
//!
//! ## Core Components
//!
//! - **[`IdGenerator`]**: 64-bit time-ordered ids from a shared daily counter
//! - **[`AdmissionGate`]**: the synchronous, atomic admission decision
//! - **[`SaleRegistrar`]**: publishes a sale to the durable and shared stores
//! - **[`OrderPersister`]**: lock-guarded, idempotent durable write per queue entry
//! - **[`RecoveryScanner`]**: redrives a consumer's pending entries
//! - **[`PersisterWorker`]**: the background consumer loop tying them together
//!
//! ## Example
//!
//! ```ignore
//! use seckill_runtime::{AdmissionGate, IdGenerator};
//! use seckill_core::environment::SystemClock;
//!
//! let gate = AdmissionGate::new(store.clone(), IdGenerator::new(store, SystemClock));
//!
//! match gate.admit(voucher_id, customer_id).await? {
//!     Admission::Admitted(order_id) => respond_ok(order_id),
//!     Admission::Rejected(reason) => respond_rejected(reason),
//! }
//! ```

pub mod admission;
pub mod backoff;
pub mod id;
pub mod metrics;
pub mod persister;
pub mod recovery;
pub mod sale;
pub mod worker;

pub use admission::AdmissionGate;
pub use backoff::BackoffPolicy;
pub use id::IdGenerator;
pub use persister::{OrderPersister, PersistOutcome, PersisterConfig};
pub use recovery::{RecoveryReport, RecoveryScanner};
pub use sale::SaleRegistrar;
pub use worker::{PersisterWorker, WorkerConfig, WorkerHandle, WorkerStats, spawn_pool};
