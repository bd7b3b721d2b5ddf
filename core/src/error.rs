//! Error types for the admission and persistence pipeline.
//!
//! User-facing refusals (`NotStarted`, `Ended`, `OutOfStock`, `DuplicatePurchase`) are
//! not errors; they are [`Rejection`](crate::types::Rejection) values returned from
//! admission. Everything here is an infrastructure or data failure.

use thiserror::Error;

/// Result type alias for seckill operations.
pub type Result<T> = std::result::Result<T, SeckillError>;

/// Error taxonomy for the seckill pipeline.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SeckillError {
    // ═══════════════════════════════════════════════════════════
    // Infrastructure
    // ═══════════════════════════════════════════════════════════

    /// Shared store, counter service or queue unreachable.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Relational store failure.
    #[error("Database error: {0}")]
    Database(String),

    // ═══════════════════════════════════════════════════════════
    // Admission
    // ═══════════════════════════════════════════════════════════

    /// The sale snapshot is missing from the shared store.
    #[error("Sale not found: voucher {voucher_id}")]
    SaleNotFound {
        /// Voucher that has no snapshot.
        voucher_id: u64,
    },

    /// Sale definition rejected at registration.
    #[error("Invalid sale: {0}")]
    InvalidSale(String),

    // ═══════════════════════════════════════════════════════════
    // Persistence
    // ═══════════════════════════════════════════════════════════

    /// The per-customer lock is held by another persister.
    #[error("Lock not acquired: {key}")]
    LockTimeout {
        /// Lock key that was contended.
        key: String,
    },

    /// A queue entry could not be decoded into an order intent.
    #[error("Malformed queue entry {entry_id}: {reason}")]
    MalformedEntry {
        /// Queue entry id.
        entry_id: String,
        /// What was wrong with it.
        reason: String,
    },

    // ═══════════════════════════════════════════════════════════
    // Id generation
    // ═══════════════════════════════════════════════════════════

    /// The clock reads earlier than the id epoch.
    #[error("Clock is before the id epoch: {0}")]
    InvalidClock(String),

    /// The daily sequence no longer fits in 32 bits.
    #[error("Daily id sequence exhausted for namespace {namespace}")]
    SequenceExhausted {
        /// Namespace whose counter overflowed.
        namespace: String,
    },

    // ═══════════════════════════════════════════════════════════
    // Workers
    // ═══════════════════════════════════════════════════════════

    /// A background worker task panicked or was cancelled.
    #[error("Worker {consumer} did not finish: {reason}")]
    WorkerFailed {
        /// Consumer name of the worker.
        consumer: String,
        /// Panic or cancellation message.
        reason: String,
    },

    // ═══════════════════════════════════════════════════════════
    // Configuration
    // ═══════════════════════════════════════════════════════════

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl SeckillError {
    /// Whether retrying the same operation later can succeed.
    ///
    /// Used by the persister to decide between leaving an entry pending
    /// (transient) and treating it as terminal.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::Database(_) | Self::LockTimeout { .. }
        )
    }
}
