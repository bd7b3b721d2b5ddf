//! Redis Streams implementation of [`OrderQueue`].
//!
//! Intents are appended by the admission script (or [`push`](OrderQueue::push)) and
//! consumed through a consumer group. `XREADGROUP ... >` hands out new entries;
//! `XREADGROUP ... 0` replays the calling consumer's pending list.
//!
//! A blocking `XREADGROUP` stalls every later command on its connection until it
//! returns. Blocking reads therefore go over a dedicated connection per consumer
//! name; appends, acks and pending reads share one non-blocking connection.

use crate::store::{DEFAULT_STREAM, manage, open_client};
use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client, RedisError, Value};
use seckill_core::providers::OrderQueue;
use seckill_core::{EntryId, OrderIntent, QueueEntry, Result, SeckillError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Consumer-group queue over a single Redis stream.
///
/// Cheap to clone; clones share the connections, including the per-consumer
/// blocking-read connections.
#[derive(Clone)]
pub struct RedisOrderQueue {
    client: Client,
    conn_manager: ConnectionManager,
    readers: Arc<Mutex<HashMap<String, ConnectionManager>>>,
    stream: String,
}

impl RedisOrderQueue {
    /// Connect to Redis and consume [`DEFAULT_STREAM`].
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Unavailable`] if the connection cannot be established.
    pub async fn new(redis_url: &str) -> Result<Self> {
        Self::with_stream(redis_url, DEFAULT_STREAM).await
    }

    /// Connect to Redis and consume `stream`.
    ///
    /// # Errors
    ///
    /// Returns [`SeckillError::Unavailable`] if the connection cannot be established.
    pub async fn with_stream(redis_url: &str, stream: impl Into<String>) -> Result<Self> {
        let client = open_client(redis_url)?;
        Ok(Self {
            conn_manager: manage(client.clone()).await?,
            client,
            readers: Arc::new(Mutex::new(HashMap::new())),
            stream: stream.into(),
        })
    }

    /// Stream being consumed.
    #[must_use]
    pub fn stream(&self) -> &str {
        &self.stream
    }

    fn lock_readers(&self) -> Result<MutexGuard<'_, HashMap<String, ConnectionManager>>> {
        self.readers
            .lock()
            .map_err(|_| SeckillError::Unavailable("Mutex lock failed".into()))
    }

    /// Connection reserved for `consumer`'s blocking reads, opened on first use.
    async fn reader(&self, consumer: &str) -> Result<ConnectionManager> {
        let cached = self.lock_readers()?.get(consumer).cloned();
        if let Some(conn) = cached {
            return Ok(conn);
        }

        let conn = manage(self.client.clone()).await?;
        tracing::debug!(stream = %self.stream, consumer, "Opened blocking read connection");
        Ok(self
            .lock_readers()?
            .entry(consumer.to_string())
            .or_insert(conn)
            .clone())
    }

    async fn read_group(
        &self,
        mut conn: ConnectionManager,
        group: &str,
        consumer: &str,
        start: &str,
        options: StreamReadOptions,
    ) -> Result<Vec<QueueEntry>> {
        let options = options.group(group, consumer);

        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.stream], &[start], &options)
            .await
            .map_err(|e| unavailable("read from", &self.stream, &e))?;

        Ok(reply
            .into_iter()
            .flat_map(|reply| reply.keys)
            .flat_map(|key| key.ids)
            .map(to_entry)
            .collect())
    }
}

fn unavailable(action: &str, stream: &str, error: &RedisError) -> SeckillError {
    SeckillError::Unavailable(format!("Failed to {action} stream {stream}: {error}"))
}

/// Flatten a stream entry into string fields.
///
/// Values that are not strings are dropped; the entry then fails to decode and is
/// handled as poison by the persister. Entries trimmed from the stream come back
/// with no fields at all.
fn to_entry(entry: StreamId) -> QueueEntry {
    let fields: HashMap<String, String> = entry
        .map
        .iter()
        .filter_map(|(field, value)| match value {
            Value::Nil => None,
            other => redis::from_redis_value::<String>(other)
                .ok()
                .map(|text| (field.clone(), text)),
        })
        .collect();

    QueueEntry {
        id: EntryId::new(entry.id),
        fields,
    }
}

/// `BLOCK 0` waits forever, so sub-millisecond blocks round up to 1ms.
fn block_millis(block: Duration) -> usize {
    usize::try_from(block.as_millis())
        .unwrap_or(usize::MAX)
        .max(1)
}

impl OrderQueue for RedisOrderQueue {
    async fn ensure_group(&self, group: &str) -> Result<()> {
        let mut conn = self.conn_manager.clone();

        let created: redis::RedisResult<()> =
            conn.xgroup_create_mkstream(&self.stream, group, "0").await;

        match created {
            Ok(()) => {
                tracing::info!(stream = %self.stream, group, "Created consumer group");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(unavailable("create group on", &self.stream, &e)),
        }
    }

    async fn push(&self, intent: &OrderIntent) -> Result<EntryId> {
        let mut conn = self.conn_manager.clone();
        let id: String = conn
            .xadd(&self.stream, "*", &intent.to_fields())
            .await
            .map_err(|e| unavailable("append to", &self.stream, &e))?;
        Ok(EntryId::new(id))
    }

    async fn read_next(
        &self,
        group: &str,
        consumer: &str,
        block: Duration,
    ) -> Result<Option<QueueEntry>> {
        let options = StreamReadOptions::default()
            .count(1)
            .block(block_millis(block));
        let conn = self.reader(consumer).await?;
        let entries = self.read_group(conn, group, consumer, ">", options).await?;
        Ok(entries.into_iter().next())
    }

    async fn ack(&self, group: &str, entry_id: &EntryId) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: i64 = conn
            .xack(&self.stream, group, &[entry_id.as_str()])
            .await
            .map_err(|e| unavailable("acknowledge on", &self.stream, &e))?;
        Ok(())
    }

    async fn read_pending(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<QueueEntry>> {
        let options = StreamReadOptions::default().count(count.max(1));
        self.read_group(self.conn_manager.clone(), group, consumer, "0", options)
            .await
    }
}
