//! Redis-backed admission store, id counter and lease lock.
//!
//! # Admission
//!
//! The admission step runs as one Lua script so the checks and the writes happen in
//! a single server-side step. No other command interleaves with a running script,
//! so concurrent buyers can never oversell or double-buy.
//!
//! Redis does not undo earlier writes when a script command fails, so the stream
//! append runs first. The stock and purchase-set keys were already read by the
//! checks; the append is the only write that can still fail on a mistyped key.
//!
//! # Locks
//!
//! `SET key token NX PX ttl`, released by a compare-and-delete script so a
//! persister whose lease already expired cannot free a lock someone else now owns.

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use seckill_core::keys::{purchase_key, stock_key, window_key};
use seckill_core::providers::{AdmissionStore, CounterService, DistributedMutex, Lease};
use seckill_core::{
    AdmissionRequest, AdmissionStatus, CustomerId, Result, SeckillError, SeckillSale, VoucherId,
};
use std::time::Duration;

/// Default stream that admitted intents are appended to.
pub const DEFAULT_STREAM: &str = "stream.orders";

/// KEYS: window, stock, purchase set, stream.
/// ARGV: now (epoch millis), customer id, then the intent's field/value pairs.
const ADMIT_SCRIPT: &str = r"
    local stock = redis.call('GET', KEYS[2])
    if not stock then
        return 5
    end
    local window = redis.call('HMGET', KEYS[1], 'begin', 'end')
    if not window[1] or not window[2] then
        return 5
    end

    local now = tonumber(ARGV[1])
    if now < tonumber(window[1]) then
        return 3
    end
    if now > tonumber(window[2]) then
        return 4
    end

    if redis.call('SISMEMBER', KEYS[3], ARGV[2]) == 1 then
        return 2
    end
    if tonumber(stock) <= 0 then
        return 1
    end

    redis.call('XADD', KEYS[4], '*', unpack(ARGV, 3))
    redis.call('DECR', KEYS[2])
    redis.call('SADD', KEYS[3], ARGV[2])
    return 0
";

const RELEASE_SCRIPT: &str = r"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    end
    return 0
";

/// Redis implementation of [`AdmissionStore`], [`CounterService`] and [`DistributedMutex`].
///
/// Cheap to clone; clones share the connection manager.
#[derive(Clone)]
pub struct RedisSeckillStore {
    conn_manager: ConnectionManager,
    stream: String,
    admit_script: Script,
    release_script: Script,
}

impl RedisSeckillStore {
    /// Connect to Redis, appending admitted intents to [`DEFAULT_STREAM`].
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Unavailable`] if the connection cannot be established.
    pub async fn new(redis_url: &str) -> Result<Self> {
        Self::with_stream(redis_url, DEFAULT_STREAM).await
    }

    /// Connect to Redis, appending admitted intents to `stream`.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Unavailable`] if the connection cannot be established.
    pub async fn with_stream(redis_url: &str, stream: impl Into<String>) -> Result<Self> {
        let conn_manager = connect(redis_url).await?;
        Ok(Self::from_manager(conn_manager, stream))
    }

    /// Build from an existing connection manager.
    #[must_use]
    pub fn from_manager(conn_manager: ConnectionManager, stream: impl Into<String>) -> Self {
        Self {
            conn_manager,
            stream: stream.into(),
            admit_script: Script::new(ADMIT_SCRIPT),
            release_script: Script::new(RELEASE_SCRIPT),
        }
    }

    /// Stream that admitted intents are appended to.
    #[must_use]
    pub fn stream(&self) -> &str {
        &self.stream
    }
}

/// Open a client and wrap it in a reconnecting connection manager.
async fn connect(redis_url: &str) -> Result<ConnectionManager> {
    manage(open_client(redis_url)?).await
}

pub(crate) fn open_client(redis_url: &str) -> Result<Client> {
    Client::open(redis_url)
        .map_err(|e| SeckillError::Unavailable(format!("Failed to create Redis client: {e}")))
}

/// Each call opens a new underlying connection.
pub(crate) async fn manage(client: Client) -> Result<ConnectionManager> {
    ConnectionManager::new(client).await.map_err(|e| {
        SeckillError::Unavailable(format!("Failed to create Redis connection manager: {e}"))
    })
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl CounterService for RedisSeckillStore {
    async fn increment(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn_manager.clone();
        conn.incr(key, 1u64)
            .await
            .map_err(|e| SeckillError::Unavailable(format!("Failed to increment {key}: {e}")))
    }
}

impl AdmissionStore for RedisSeckillStore {
    async fn publish_sale(&self, sale: &SeckillSale) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let voucher_id = sale.voucher_id;

        let _: () = redis::pipe()
            .atomic()
            .set(stock_key(voucher_id), sale.stock)
            .ignore()
            .del(window_key(voucher_id))
            .ignore()
            .hset_multiple(
                window_key(voucher_id),
                &[
                    ("begin", sale.window.begin.timestamp_millis()),
                    ("end", sale.window.end.timestamp_millis()),
                ],
            )
            .ignore()
            .del(purchase_key(voucher_id))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                SeckillError::Unavailable(format!("Failed to publish sale {voucher_id}: {e}"))
            })?;

        tracing::info!(
            voucher_id = %voucher_id,
            stock = sale.stock,
            "Published sale snapshot to Redis"
        );
        Ok(())
    }

    async fn try_admit(&self, request: &AdmissionRequest) -> Result<AdmissionStatus> {
        let mut conn = self.conn_manager.clone();
        let intent = &request.intent;

        let mut invocation = self.admit_script.prepare_invoke();
        invocation
            .key(window_key(intent.voucher_id))
            .key(stock_key(intent.voucher_id))
            .key(purchase_key(intent.voucher_id))
            .key(&self.stream)
            .arg(request.now.timestamp_millis())
            .arg(intent.customer_id.get());
        for (field, value) in intent.to_fields() {
            invocation.arg(field).arg(value);
        }

        let code: i64 = invocation.invoke_async(&mut conn).await.map_err(|e| {
            SeckillError::Unavailable(format!("Failed to run admission script: {e}"))
        })?;

        AdmissionStatus::from_code(code).ok_or_else(|| {
            SeckillError::Unavailable(format!("Admission script returned unknown status {code}"))
        })
    }

    async fn remaining_stock(&self, voucher_id: VoucherId) -> Result<Option<i64>> {
        let mut conn = self.conn_manager.clone();
        conn.get(stock_key(voucher_id)).await.map_err(|e| {
            SeckillError::Unavailable(format!("Failed to read stock for {voucher_id}: {e}"))
        })
    }

    async fn has_purchased(&self, voucher_id: VoucherId, customer_id: CustomerId) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        conn.sismember(purchase_key(voucher_id), customer_id.get())
            .await
            .map_err(|e| {
                SeckillError::Unavailable(format!(
                    "Failed to check purchase record for {voucher_id}: {e}"
                ))
            })
    }
}

impl DistributedMutex for RedisSeckillStore {
    async fn try_acquire(&self, key: &str, lease: Duration) -> Result<Option<Lease>> {
        let mut conn = self.conn_manager.clone();
        let token = uuid::Uuid::new_v4().to_string();

        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(millis(lease).max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| SeckillError::Unavailable(format!("Failed to acquire lock {key}: {e}")))?;

        Ok(reply.map(|_| Lease {
            key: key.to_string(),
            token,
            ttl: lease,
        }))
    }

    async fn release(&self, lease: &Lease) -> Result<bool> {
        let mut conn = self.conn_manager.clone();

        let deleted: i64 = self
            .release_script
            .key(&lease.key)
            .arg(&lease.token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                SeckillError::Unavailable(format!("Failed to release lock {}: {e}", lease.key))
            })?;

        Ok(deleted == 1)
    }
}
