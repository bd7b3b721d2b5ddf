//! Prometheus metrics for the admission and persistence pipeline.
//!
//! Recording goes through the `metrics` facade, so library code is a no-op
//! until a binary installs an exporter with [`MetricsServer`].
//!
//! # Example
//!
//! ```rust,no_run
//! use seckill_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use seckill_core::{AdmissionStatus, Rejection};
use std::net::SocketAddr;
use thiserror::Error;

/// Admission attempts, labelled by `outcome`.
pub const ADMISSIONS_TOTAL: &str = "seckill_admissions_total";
/// Orders written to the relational store.
pub const ORDERS_PERSISTED_TOTAL: &str = "seckill_orders_persisted_total";
/// Entries whose order already existed (redelivery).
pub const IDEMPOTENT_REPLAYS_TOTAL: &str = "seckill_idempotent_replays_total";
/// Entries acknowledged because the durable stock ran out.
pub const DURABLE_STOCK_EXHAUSTED_TOTAL: &str = "seckill_durable_stock_exhausted_total";
/// Entries acknowledged because they could not be decoded.
pub const POISON_ENTRIES_TOTAL: &str = "seckill_poison_entries_total";
/// Per-customer lock acquisitions that found the lock held.
pub const LOCK_CONTENTION_TOTAL: &str = "seckill_lock_contention_total";
/// Recovery passes over the pending list, labelled by `result`.
pub const RECOVERY_PASSES_TOTAL: &str = "seckill_recovery_passes_total";
/// Main-loop errors that triggered recovery.
pub const WORKER_ERRORS_TOTAL: &str = "seckill_worker_errors_total";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build or install the exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server bound to `addr` once started.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the global recorder and start the HTTP listener.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Install`] if the exporter cannot be built or a
    /// different recorder is already installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .build()
            .map_err(|e| MetricsError::Install(e.to_string()))?;
        let handle = recorder.handle();

        metrics::set_global_recorder(recorder).map_err(|e| MetricsError::Install(e.to_string()))?;
        register_metrics();

        tokio::spawn(async move {
            if let Err(error) = exporter.await {
                tracing::error!(error = ?error, "Metrics exporter stopped");
            }
        });

        self.handle = Some(handle);
        tracing::info!(
            addr = %self.addr,
            "Metrics server started - available at http://{}/metrics",
            self.addr
        );
        Ok(())
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!(ADMISSIONS_TOTAL, "Admission attempts by outcome");
    describe_counter!(ORDERS_PERSISTED_TOTAL, "Orders written to the relational store");
    describe_counter!(IDEMPOTENT_REPLAYS_TOTAL, "Redelivered entries whose order already existed");
    describe_counter!(
        DURABLE_STOCK_EXHAUSTED_TOTAL,
        "Entries acknowledged because durable stock was exhausted"
    );
    describe_counter!(POISON_ENTRIES_TOTAL, "Undecodable entries acknowledged and dropped");
    describe_counter!(LOCK_CONTENTION_TOTAL, "Per-customer lock acquisitions that found the lock held");
    describe_counter!(RECOVERY_PASSES_TOTAL, "Recovery passes over the pending list");
    describe_counter!(WORKER_ERRORS_TOTAL, "Main-loop errors that triggered recovery");
}

/// Admission metrics recorder.
pub struct AdmissionMetrics;

impl AdmissionMetrics {
    /// Record one admission decision.
    pub fn record(status: AdmissionStatus) {
        counter!(ADMISSIONS_TOTAL, "outcome" => outcome_label(status)).increment(1);
    }

    /// Record an admission that failed before a decision was made.
    pub fn record_error() {
        counter!(ADMISSIONS_TOTAL, "outcome" => "error").increment(1);
    }
}

const fn outcome_label(status: AdmissionStatus) -> &'static str {
    match status {
        AdmissionStatus::Admitted => "admitted",
        AdmissionStatus::OutOfStock => rejection_label(Rejection::OutOfStock),
        AdmissionStatus::DuplicatePurchase => rejection_label(Rejection::DuplicatePurchase),
        AdmissionStatus::NotStarted => rejection_label(Rejection::NotStarted),
        AdmissionStatus::Ended => rejection_label(Rejection::Ended),
        AdmissionStatus::SaleNotFound => "sale_not_found",
    }
}

const fn rejection_label(rejection: Rejection) -> &'static str {
    match rejection {
        Rejection::NotStarted => "not_started",
        Rejection::Ended => "ended",
        Rejection::OutOfStock => "out_of_stock",
        Rejection::DuplicatePurchase => "duplicate",
    }
}

/// Persister metrics recorder.
pub struct PersisterMetrics;

impl PersisterMetrics {
    /// Record a newly persisted order.
    pub fn record_persisted() {
        counter!(ORDERS_PERSISTED_TOTAL).increment(1);
    }

    /// Record a redelivered entry whose order already existed.
    pub fn record_replay() {
        counter!(IDEMPOTENT_REPLAYS_TOTAL).increment(1);
    }

    /// Record an entry dropped because durable stock was exhausted.
    pub fn record_stock_exhausted() {
        counter!(DURABLE_STOCK_EXHAUSTED_TOTAL).increment(1);
    }

    /// Record an undecodable entry.
    pub fn record_poison() {
        counter!(POISON_ENTRIES_TOTAL).increment(1);
    }

    /// Record a lock held by someone else.
    pub fn record_lock_contention() {
        counter!(LOCK_CONTENTION_TOTAL).increment(1);
    }
}

/// Worker and recovery metrics recorder.
pub struct WorkerMetrics;

impl WorkerMetrics {
    /// Record a recovery pass; `failed` when it stopped on an error.
    pub fn record_recovery_pass(failed: bool) {
        let result = if failed { "failed" } else { "ok" };
        counter!(RECOVERY_PASSES_TOTAL, "result" => result).increment(1);
    }

    /// Record a main-loop error.
    pub fn record_error() {
        counter!(WORKER_ERRORS_TOTAL).increment(1);
    }
}
