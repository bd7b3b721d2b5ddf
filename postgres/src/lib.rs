//! `PostgreSQL` order repository for the flash-sale pipeline.
//!
//! Holds the durable side of a sale: the `seckill_vouchers` row whose stock is
//! decremented once per persisted order, and the `voucher_orders` table whose
//! `(customer_id, voucher_id)` uniqueness is the final guard against double
//! purchases.
//!
//! Queries use runtime-checked `sqlx::query` so the crate builds without a
//! database; schema changes go through `migrations/`.
//!
//! # Example
//!
//! ```ignore
//! use seckill_postgres::PostgresOrderRepository;
//!
//! let repo = PostgresOrderRepository::new(pool);
//! repo.migrate().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod repository;

pub use repository::PostgresOrderRepository;
