//! # Seckill Redis
//!
//! Redis backends for the flash-sale pipeline.
//!
//! - [`RedisSeckillStore`]: the atomic admission script, daily id counters and
//!   per-customer lease locks
//! - [`RedisOrderQueue`]: the order stream and its consumer group
//!
//! ## Key layout
//!
//! | Key | Type | Contents |
//! |-----|------|----------|
//! | `seckill:stock:{voucher}` | string | remaining stock |
//! | `seckill:window:{voucher}` | hash | `begin`, `end` in epoch millis |
//! | `seckill:order:{voucher}` | set | admitted customer ids |
//! | `icr:{namespace}:{yyyyMMdd}` | string | daily id sequence |
//! | `lock:order:{customer}` | string | lease owner token |
//! | `stream.orders` | stream | admitted intents |
//!
//! ## Example
//!
//! ```no_run
//! use seckill_redis::{RedisOrderQueue, RedisSeckillStore};
//!
//! # async fn example() -> seckill_core::Result<()> {
//! let store = RedisSeckillStore::new("redis://127.0.0.1:6379").await?;
//! let queue = RedisOrderQueue::with_stream("redis://127.0.0.1:6379", store.stream()).await?;
//! # Ok(())
//! # }
//! ```

mod queue;
mod store;

pub use queue::RedisOrderQueue;
pub use store::{DEFAULT_STREAM, RedisSeckillStore};
