//! Integration tests for the retention sweep against a live Redis instance.
//!
//! Requires a running Redis instance. Set REDIS_URL to enable these tests.
//! Default: redis://127.0.0.1:6379
//!
//! Run with: REDIS_URL=redis://localhost:6379 cargo test --package nbus-retention

use std::sync::Arc;

use nbus_core::{NotificationEntity, Transport, TypeRegistry};
use nbus_redis::{RedisTransport, RedisTransportConfig};
use nbus_retention::{DistributedLock, Sweeper, SweeperConfig};
use nbus_statestore::InMemoryStateStore;
use tokio_util::sync::CancellationToken;

fn redis_url() -> Option<String> {
    std::env::var("REDIS_URL").ok()
}

fn test_stream(name: &str) -> String {
    format!("nbus:test:retention:{name}:{}", ulid::Ulid::new())
}

async fn cleanup_stream(stream: &str) {
    let url = redis_url().unwrap();
    let client = redis::Client::open(url.as_str()).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let _: Result<(), _> = redis::cmd("DEL").arg(stream).query_async(&mut conn).await;
}

#[tokio::test]
async fn second_instance_cannot_acquire_an_already_held_lock() {
    if redis_url().is_none() {
        return;
    }
    let url = redis_url().unwrap();
    let key = format!("nbus:test:lock:{}", ulid::Ulid::new());

    let first = DistributedLock::new(&url, key.clone(), std::time::Duration::from_secs(30)).await.unwrap();
    let second = DistributedLock::new(&url, key.clone(), std::time::Duration::from_secs(30)).await.unwrap();

    assert!(first.acquire().await.unwrap());
    assert!(!second.acquire().await.unwrap(), "a second instance must not acquire a held lock");

    first.release().await.unwrap();
    assert!(second.acquire().await.unwrap(), "lock must be acquirable again once released");
}

#[tokio::test]
async fn sweep_trims_a_stream_past_its_configured_max_length() {
    if redis_url().is_none() {
        return;
    }
    let url = redis_url().unwrap();
    let stream = test_stream("sweep");

    let registry = Arc::new(TypeRegistry::builder().default_stream(&stream).build());
    let state_store = Arc::new(InMemoryStateStore::new());
    let transport: Arc<dyn Transport> = Arc::new(
        RedisTransport::connect(
            RedisTransportConfig {
                url: url.clone(),
                default_stream_name: stream.clone(),
                max_stream_length: 3,
                ..RedisTransportConfig::default()
            },
            state_store,
            registry,
        )
        .await
        .unwrap(),
    );
    transport.ensure_stream(&stream).await.unwrap();

    let cancel = CancellationToken::new();
    for _ in 0..10 {
        let mut e = NotificationEntity::new("order.status", "created");
        e.stamp_if_unset();
        transport.notify(e, cancel.clone()).await.unwrap();
    }

    let sweeper = Sweeper::new(
        transport,
        SweeperConfig {
            redis_url: url,
            lock_key: format!("nbus:test:retention:lock:{}", ulid::Ulid::new()),
            streams: vec![stream.clone()],
            ..SweeperConfig::default()
        },
    );

    let report = sweeper.run_once().await.unwrap();
    assert!(report.lock_acquired);
    assert_eq!(report.streams_swept, 1);

    cleanup_stream(&stream).await;
}

#[tokio::test]
async fn sweep_is_skipped_while_another_instance_holds_the_lock() {
    if redis_url().is_none() {
        return;
    }
    let url = redis_url().unwrap();
    let stream = test_stream("skip");
    let lock_key = format!("nbus:test:retention:lock:{}", ulid::Ulid::new());

    let registry = Arc::new(TypeRegistry::builder().default_stream(&stream).build());
    let state_store = Arc::new(InMemoryStateStore::new());
    let transport: Arc<dyn Transport> = Arc::new(
        RedisTransport::connect(
            RedisTransportConfig {
                url: url.clone(),
                default_stream_name: stream.clone(),
                ..RedisTransportConfig::default()
            },
            state_store,
            registry,
        )
        .await
        .unwrap(),
    );

    let holder = DistributedLock::new(&url, lock_key.clone(), std::time::Duration::from_secs(30)).await.unwrap();
    assert!(holder.acquire().await.unwrap());

    let sweeper = Sweeper::new(
        transport,
        SweeperConfig {
            redis_url: url,
            lock_key,
            streams: vec![stream.clone()],
            ..SweeperConfig::default()
        },
    );
    let report = sweeper.run_once().await.unwrap();
    assert!(!report.lock_acquired);
    assert_eq!(report.streams_swept, 0);

    holder.release().await.unwrap();
    cleanup_stream(&stream).await;
}
