//! End-to-end tests for the composite bus wired purely over in-process
//! transports (no external services required).

use std::sync::Arc;
use std::time::Duration;

use nbus_bus::{CompositeEmitter, CompositeReceiver, DedupCache, DedupCacheConfig};
use nbus_core::{MemoryTransport, MemoryTransportConfig, NotificationEntity, Transport};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn dual_transport_dedup_scenario() {
    // The same notification id delivered by two transports reaches a
    // subscriber exactly once.
    let a: Arc<dyn Transport> = Arc::new(MemoryTransport::new(MemoryTransportConfig::default()));
    let b: Arc<dyn Transport> = Arc::new(MemoryTransport::new(MemoryTransportConfig::default()));
    let emitter = CompositeEmitter::new(vec![a.clone(), b.clone()]);
    let dedup = Arc::new(DedupCache::new(DedupCacheConfig::default()));
    let receiver = CompositeReceiver::new(vec![a, b], dedup);

    let cancel = CancellationToken::new();
    let mut stream = receiver.receive(vec!["a".to_string()], cancel.clone()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut entity = NotificationEntity::new("order.status", "created").with_tags(["a"]);
    entity.notification_id = "n1".to_string();

    // Both underlying transports see the entity under the same composite
    // emitter call, simulating in-process + durable delivery of one event.
    emitter.notify(entity.clone(), cancel.clone()).await.unwrap();

    let first = stream.next().await.expect("expected one delivery");
    assert_eq!(first.notification_id, "n1");

    let second = tokio::time::timeout(Duration::from_millis(200), stream.next()).await;
    assert!(second.is_err(), "duplicate delivery must be suppressed");
}

#[tokio::test]
async fn tag_filter_miss_scenario() {
    // A subscriber filtering on "y" never sees an entity tagged only "x".
    let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new(MemoryTransportConfig::default()));
    let emitter = CompositeEmitter::new(vec![transport.clone()]);
    let dedup = Arc::new(DedupCache::new(DedupCacheConfig::default()));
    let receiver = CompositeReceiver::new(vec![transport], dedup);

    let cancel = CancellationToken::new();
    let mut stream = receiver.receive(vec!["y".to_string()], cancel.clone()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut entity = NotificationEntity::new("order.status", "created").with_tags(["x"]);
    entity.notification_id = "n2".to_string();
    emitter.notify(entity, cancel.clone()).await.unwrap();

    let result = tokio::time::timeout(Duration::from_millis(200), stream.next()).await;
    assert!(result.is_err(), "tag mismatch must never reach the subscriber");
}

#[tokio::test]
async fn empty_tag_filter_passes_everything() {
    let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new(MemoryTransportConfig::default()));
    let emitter = CompositeEmitter::new(vec![transport.clone()]);
    let dedup = Arc::new(DedupCache::new(DedupCacheConfig::default()));
    let receiver = CompositeReceiver::new(vec![transport], dedup);

    let cancel = CancellationToken::new();
    let mut stream = receiver.receive(vec![], cancel.clone()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut entity = NotificationEntity::new("order.status", "created").with_tags(["whatever"]);
    entity.notification_id = "n3".to_string();
    emitter.notify(entity, cancel.clone()).await.unwrap();

    let got = tokio::time::timeout(Duration::from_millis(200), stream.next())
        .await
        .expect("timed out")
        .expect("stream ended");
    assert_eq!(got.notification_id, "n3");
}
