//! Integration tests for the Redis backends using testcontainers.
//!
//! # Requirements
//!
//! Docker must be running. Run with `cargo test -p seckill-redis -- --ignored`.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use redis::AsyncCommands;
use seckill_core::providers::{AdmissionStore, CounterService, DistributedMutex, OrderQueue};
use seckill_core::{
    AdmissionRequest, AdmissionStatus, CustomerId, OrderId, OrderIntent, SaleWindow, SeckillError,
    SeckillSale, VoucherId,
};
use seckill_redis::{RedisOrderQueue, RedisSeckillStore};
use seckill_runtime::{AdmissionGate, IdGenerator};
use seckill_testing::FixedClock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use testcontainers::ContainerAsync;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::redis::{REDIS_PORT, Redis};

async fn setup_redis(stream: &str) -> (ContainerAsync<Redis>, RedisSeckillStore, RedisOrderQueue) {
    let (container, url) = start_redis().await;
    let (store, queue) = connect_backends(&url, stream).await;
    (container, store, queue)
}

async fn start_redis() -> (ContainerAsync<Redis>, String) {
    let container = Redis::default()
        .start()
        .await
        .expect("Failed to start redis container");
    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(REDIS_PORT)
        .await
        .expect("Failed to get redis port");
    (container, format!("redis://{host}:{port}"))
}

async fn connect_backends(url: &str, stream: &str) -> (RedisSeckillStore, RedisOrderQueue) {
    for attempt in 1..=30 {
        if let Ok(store) = RedisSeckillStore::with_stream(url, stream).await {
            let queue = RedisOrderQueue::with_stream(url, stream)
                .await
                .expect("Failed to connect queue");
            return (store, queue);
        }
        assert!(attempt != 30, "Redis failed to become ready");
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    unreachable!()
}

fn sale(voucher: u64, stock: u32) -> SeckillSale {
    let begin = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    SeckillSale {
        voucher_id: VoucherId::new(voucher),
        stock,
        window: SaleWindow::new(begin, begin + ChronoDuration::hours(1)).unwrap(),
    }
}

fn request(order: u64, customer: u64, voucher: u64, minutes: i64) -> AdmissionRequest {
    let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + ChronoDuration::minutes(minutes);
    AdmissionRequest {
        intent: OrderIntent {
            order_id: OrderId::new(order),
            customer_id: CustomerId::new(customer),
            voucher_id: VoucherId::new(voucher),
            created_at: now,
        },
        now,
    }
}

#[tokio::test]
#[ignore] // Requires Docker
async fn admission_script_checks_window_duplicates_and_stock() {
    let (_container, store, _queue) = setup_redis("stream.orders").await;
    store.publish_sale(&sale(1, 1)).await.expect("publish");

    assert_eq!(
        store.try_admit(&request(1, 1, 1, -1)).await.unwrap(),
        AdmissionStatus::NotStarted
    );
    assert_eq!(
        store.try_admit(&request(2, 1, 1, 61)).await.unwrap(),
        AdmissionStatus::Ended
    );
    assert_eq!(
        store.try_admit(&request(3, 1, 1, 10)).await.unwrap(),
        AdmissionStatus::Admitted
    );
    assert_eq!(
        store.try_admit(&request(4, 1, 1, 10)).await.unwrap(),
        AdmissionStatus::DuplicatePurchase
    );
    assert_eq!(
        store.try_admit(&request(5, 2, 1, 10)).await.unwrap(),
        AdmissionStatus::OutOfStock
    );
    assert_eq!(
        store.try_admit(&request(6, 2, 99, 10)).await.unwrap(),
        AdmissionStatus::SaleNotFound
    );

    assert_eq!(store.remaining_stock(VoucherId::new(1)).await.unwrap(), Some(0));
    assert!(store.has_purchased(VoucherId::new(1), CustomerId::new(1)).await.unwrap());
    assert!(!store.has_purchased(VoucherId::new(1), CustomerId::new(2)).await.unwrap());
}

#[tokio::test]
#[ignore] // Requires Docker
async fn failed_enqueue_leaves_stock_and_purchases_untouched() {
    let (_container, url) = start_redis().await;
    let (store, _queue) = connect_backends(&url, "stream.orders").await;
    store.publish_sale(&sale(1, 1)).await.expect("publish");

    let mut raw = redis::Client::open(url.as_str())
        .unwrap()
        .get_multiplexed_async_connection()
        .await
        .unwrap();
    let _: () = raw.set("stream.orders", "not-a-stream").await.unwrap();

    assert!(matches!(
        store.try_admit(&request(1, 1, 1, 10)).await,
        Err(SeckillError::Unavailable(_))
    ));
    assert_eq!(store.remaining_stock(VoucherId::new(1)).await.unwrap(), Some(1));
    assert!(!store.has_purchased(VoucherId::new(1), CustomerId::new(1)).await.unwrap());

    let _: () = raw.del("stream.orders").await.unwrap();
    assert_eq!(
        store.try_admit(&request(2, 1, 1, 10)).await.unwrap(),
        AdmissionStatus::Admitted,
        "the customer can retry once the stream is writable"
    );
    assert_eq!(store.remaining_stock(VoucherId::new(1)).await.unwrap(), Some(0));
}

#[tokio::test]
#[ignore] // Requires Docker
async fn blocked_reader_does_not_stall_other_consumers() {
    let (_container, _store, queue) = setup_redis("stream.orders").await;
    queue.ensure_group("g1").await.expect("group");

    let idle = queue.clone();
    let blocked = tokio::spawn(async move {
        idle.read_next("g1", "c2", Duration::from_secs(3)).await
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = Instant::now();
    let id = queue.push(&request(1, 1, 1, 5).intent).await.unwrap();
    assert!(queue.read_pending("g1", "c1", 10).await.unwrap().is_empty());
    let entry = match queue
        .read_next("g1", "c1", Duration::from_millis(100))
        .await
        .unwrap()
    {
        Some(entry) => entry,
        // The blocked consumer was woken by the append and took the entry.
        None => blocked.await.unwrap().unwrap().expect("entry delivered"),
    };
    queue.ack("g1", &entry.id).await.unwrap();
    assert_eq!(entry.id, id);
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "commands waited {:?} behind a blocking read",
        started.elapsed()
    );
}

#[tokio::test]
#[ignore] // Requires Docker
async fn concurrent_admissions_never_oversell() {
    let (_container, store, queue) = setup_redis("stream.orders").await;
    store.publish_sale(&sale(1, 25)).await.expect("publish");
    queue.ensure_group("g1").await.expect("group");

    let clock = FixedClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 30, 0).unwrap());
    let gate = Arc::new(AdmissionGate::new(
        store.clone(),
        IdGenerator::new(store.clone(), clock),
    ));

    let tasks: Vec<_> = (0..200)
        .map(|customer| {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.admit(VoucherId::new(1), CustomerId::new(customer)).await })
        })
        .collect();
    let mut admitted = 0;
    for task in tasks {
        if task.await.unwrap().unwrap().is_admitted() {
            admitted += 1;
        }
    }

    assert_eq!(admitted, 25);
    assert_eq!(store.remaining_stock(VoucherId::new(1)).await.unwrap(), Some(0));
    assert_eq!(
        queue.read_pending("g1", "c1", 100).await.unwrap().len(),
        0,
        "nothing delivered yet"
    );

    let mut delivered = 0;
    while let Some(entry) = queue
        .read_next("g1", "c1", Duration::from_millis(50))
        .await
        .unwrap()
    {
        let intent = entry.decode().expect("well-formed entry");
        assert_eq!(intent.voucher_id, VoucherId::new(1));
        delivered += 1;
    }
    assert_eq!(delivered, 25);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn pending_entries_are_replayed_until_acknowledged() {
    let (_container, _store, queue) = setup_redis("stream.test").await;
    queue.ensure_group("g1").await.expect("group");
    queue.ensure_group("g1").await.expect("group creation is idempotent");

    let intent = request(10, 7, 1, 5).intent;
    let id = queue.push(&intent).await.unwrap();

    let entry = queue
        .read_next("g1", "c1", Duration::from_millis(100))
        .await
        .unwrap()
        .expect("entry delivered");
    assert_eq!(entry.id, id);
    assert_eq!(entry.decode().unwrap(), intent);

    assert!(
        queue
            .read_next("g1", "c1", Duration::from_millis(50))
            .await
            .unwrap()
            .is_none()
    );

    let pending = queue.read_pending("g1", "c1", 10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, id);
    assert!(queue.read_pending("g1", "c2", 10).await.unwrap().is_empty());

    queue.ack("g1", &id).await.unwrap();
    assert!(queue.read_pending("g1", "c1", 10).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore] // Requires Docker
async fn lease_lock_is_exclusive_and_owner_checked() {
    let (_container, store, _queue) = setup_redis("stream.orders").await;

    let lease = store
        .try_acquire("lock:order:1", Duration::from_secs(10))
        .await
        .unwrap()
        .expect("lock is free");
    assert!(
        store
            .try_acquire("lock:order:1", Duration::from_secs(10))
            .await
            .unwrap()
            .is_none()
    );

    let mut stale = lease.clone();
    stale.token = "someone-else".to_string();
    assert!(!store.release(&stale).await.unwrap());
    assert!(store.release(&lease).await.unwrap());

    let short = store
        .try_acquire("lock:order:2", Duration::from_millis(50))
        .await
        .unwrap()
        .expect("lock is free");
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!store.release(&short).await.unwrap());
}

#[tokio::test]
#[ignore] // Requires Docker
async fn counters_increment_from_one() {
    let (_container, store, _queue) = setup_redis("stream.orders").await;
    assert_eq!(store.increment("icr:order:20250101").await.unwrap(), 1);
    assert_eq!(store.increment("icr:order:20250101").await.unwrap(), 2);
    assert_eq!(store.increment("icr:order:20250102").await.unwrap(), 1);
}
