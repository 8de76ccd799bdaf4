use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};

use futures::stream::{self, StreamExt};
use nbus_core::{NotificationEntity, Transport, TransportError};
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tokio_stream::Stream;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use crate::dedup::DedupCache;

pub type Entities = Pin<Box<dyn Stream<Item = NotificationEntity> + Send>>;
pub type TypedEntities<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// Per-subscription multicast buffer.
const CHANNEL_CAPACITY: usize = 20_000;

/// A live merged+deduplicated view for one tag-filter key. Subscribers hold
/// a clone of the `Arc`; once the last clone drops, `Drop` cancels the
/// background merge task and the cache entry is torn down.
struct MulticastEntry {
    sender: broadcast::Sender<NotificationEntity>,
    cancel: CancellationToken,
}

impl Drop for MulticastEntry {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Composite receiver: merges every transport's `receive` stream,
/// deduplicates centrally, and multicasts the result — one shared,
/// ref-counted observable per distinct sorted tag-set.
pub struct CompositeReceiver {
    transports: Vec<Arc<dyn Transport>>,
    dedup: Arc<DedupCache>,
    multicast: Mutex<HashMap<String, Weak<MulticastEntry>>>,
}

impl CompositeReceiver {
    pub fn new(transports: Vec<Arc<dyn Transport>>, dedup: Arc<DedupCache>) -> Self {
        Self {
            transports,
            dedup,
            multicast: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to the shared, deduplicated multicast for this exact tag
    /// filter, spinning it up on first use. The returned stream ends when
    /// `cancel` fires, but `cancel` only ever affects this one subscriber —
    /// the shared multicast itself tears down solely once its last
    /// subscriber has dropped (see [`MulticastEntry`]'s `Drop` impl).
    pub async fn receive(&self, tags: Vec<String>, cancel: CancellationToken) -> Entities {
        let key = cache_key(&tags);
        let entry = self.entry_for(key, tags);

        let rx = entry.sender.subscribe();
        let stream = BroadcastStream::new(rx).filter_map(move |item| {
            let _keep_alive = &entry;
            async move {
                match item {
                    Ok(entity) => Some(entity),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "composite subscriber lagged, messages dropped");
                        None
                    }
                }
            }
        });
        Box::pin(stream.take_until(cancel.cancelled_owned()))
    }

    /// The same shared, deduplicated multicast as [`Self::receive`],
    /// decoding each entity's payload into `T`. An entity whose payload
    /// doesn't decode as `T` is logged and dropped rather than ending the
    /// stream.
    pub async fn receive_typed<T>(&self, tags: Vec<String>, cancel: CancellationToken) -> TypedEntities<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let stream = self.receive(tags, cancel).await;
        let typed = stream.filter_map(|entity| async move {
            match serde_json::from_value::<T>(entity.payload.clone()) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(notification_type = %entity.notification_type, "payload failed to decode to requested type: {e}");
                    None
                }
            }
        });
        Box::pin(typed)
    }

    /// First caller for a given tag-filter key spins up the shared merge
    /// task; later callers for the same key just attach to it. The task's
    /// own `CancellationToken` is independent of any individual subscriber —
    /// only `MulticastEntry`'s `Drop` (last `Arc` clone going away) stops it.
    fn entry_for(&self, key: String, tags: Vec<String>) -> Arc<MulticastEntry> {
        let mut multicast = self.multicast.lock().unwrap();
        if let Some(existing) = multicast.get(&key).and_then(Weak::upgrade) {
            return existing;
        }

        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let entry = Arc::new(MulticastEntry { sender, cancel: cancel.clone() });

        self.spawn_merge(tags, entry.sender.clone(), cancel);
        multicast.insert(key, Arc::downgrade(&entry));
        entry
    }

    fn spawn_merge(&self, tags: Vec<String>, sender: broadcast::Sender<NotificationEntity>, cancel: CancellationToken) {
        let transports = self.transports.clone();
        let dedup = self.dedup.clone();

        tokio::spawn(async move {
            let substreams = stream::iter(transports).then({
                let tags = tags.clone();
                let cancel = cancel.clone();
                move |transport| {
                    let tags = tags.clone();
                    let cancel = cancel.clone();
                    async move {
                        match transport.receive(tags, cancel).await {
                            Ok(s) => s,
                            Err(e) => {
                                tracing::warn!("transport failed to subscribe, treating as empty: {e}");
                                Box::pin(stream::empty()) as Entities
                            }
                        }
                    }
                }
            });

            let merged = substreams.collect::<Vec<_>>().await;
            let mut merged = stream::select_all(merged);

            loop {
                tokio::select! {
                    item = merged.next() => {
                        let Some(entity) = item else { break };
                        if dedup.check_and_insert(&entity.notification_id) {
                            let _ = sender.send(entity);
                        }
                    }
                    () = cancel.cancelled() => break,
                }
            }
        });
    }
}

/// The sorted, deterministic tag-set string used as the multicast cache key.
fn cache_key(tags: &[String]) -> String {
    let mut sorted = tags.to_vec();
    sorted.sort();
    sorted.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use nbus_core::{MemoryTransport, MemoryTransportConfig};

    #[tokio::test]
    async fn dedup_collapses_same_id_across_transports() {
        let a = Arc::new(MemoryTransport::new(MemoryTransportConfig::default()));
        let b = Arc::new(MemoryTransport::new(MemoryTransportConfig::default()));
        let dedup = Arc::new(DedupCache::new(crate::DedupCacheConfig::default()));
        let receiver = CompositeReceiver::new(vec![a.clone(), b.clone()], dedup);

        let cancel = CancellationToken::new();
        let mut stream = receiver.receive(vec!["a".to_string()], cancel.clone()).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut entity = NotificationEntity::new("x", "y").with_tags(["a"]);
        entity.stamp_if_unset();
        a.notify(entity.clone(), cancel.clone()).await.unwrap();
        b.notify(entity.clone(), cancel.clone()).await.unwrap();

        let first = stream.next().await.unwrap();
        assert_eq!(first.notification_id, entity.notification_id);

        let second = tokio::time::timeout(std::time::Duration::from_millis(200), stream.next()).await;
        assert!(second.is_err(), "duplicate entity should not reach the subscriber");
    }

    #[tokio::test]
    async fn tag_mismatch_never_reaches_subscriber() {
        let a = Arc::new(MemoryTransport::new(MemoryTransportConfig::default()));
        let dedup = Arc::new(DedupCache::new(crate::DedupCacheConfig::default()));
        let receiver = CompositeReceiver::new(vec![a.clone()], dedup);

        let cancel = CancellationToken::new();
        let mut stream = receiver.receive(vec!["y".to_string()], cancel.clone()).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut entity = NotificationEntity::new("x", "y").with_tags(["x"]);
        entity.stamp_if_unset();
        a.notify(entity, cancel.clone()).await.unwrap();

        let result = tokio::time::timeout(std::time::Duration::from_millis(200), stream.next()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn one_subscribers_cancellation_does_not_tear_down_peers_on_the_same_filter() {
        let a = Arc::new(MemoryTransport::new(MemoryTransportConfig::default()));
        let dedup = Arc::new(DedupCache::new(crate::DedupCacheConfig::default()));
        let receiver = CompositeReceiver::new(vec![a.clone()], dedup);

        let first_cancel = CancellationToken::new();
        let mut first = receiver.receive(vec!["a".to_string()], first_cancel.clone()).await;

        let second_cancel = CancellationToken::new();
        let mut second = receiver.receive(vec!["a".to_string()], second_cancel).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        // The first subscriber unsubscribes by cancelling its own token.
        first_cancel.cancel();
        assert!(first.next().await.is_none());

        // The second subscriber, sharing the same tag-filter multicast,
        // must still receive entities afterward.
        let notify_cancel = CancellationToken::new();
        let mut entity = NotificationEntity::new("x", "y").with_tags(["a"]);
        entity.stamp_if_unset();
        a.notify(entity.clone(), notify_cancel).await.unwrap();

        let received = tokio::time::timeout(std::time::Duration::from_millis(200), second.next())
            .await
            .expect("second subscriber should still be receiving")
            .expect("stream should still yield the entity");
        assert_eq!(received.notification_id, entity.notification_id);
    }

    #[tokio::test]
    async fn receive_typed_decodes_payload_and_drops_undecodable_entries() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct OrderCreated {
            order_id: String,
        }

        let a = Arc::new(MemoryTransport::new(MemoryTransportConfig::default()));
        let dedup = Arc::new(DedupCache::new(crate::DedupCacheConfig::default()));
        let receiver = CompositeReceiver::new(vec![a.clone()], dedup);

        let cancel = CancellationToken::new();
        let mut stream = receiver.receive_typed::<OrderCreated>(vec![], cancel.clone()).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut bad = NotificationEntity::new("order.created", "bad payload").with_payload(serde_json::json!({"unexpected": true}));
        bad.stamp_if_unset();
        a.notify(bad, cancel.clone()).await.unwrap();

        let mut good = NotificationEntity::new("order.created", "good payload").with_payload(serde_json::json!({"order_id": "abc-123"}));
        good.stamp_if_unset();
        a.notify(good, cancel.clone()).await.unwrap();

        let decoded = stream.next().await.expect("expected the decodable entry to survive");
        assert_eq!(decoded, OrderCreated { order_id: "abc-123".to_string() });
    }
}
