use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use crate::entity::NotificationEntity;
use crate::error::TransportError;
use crate::health::HealthStatus;
use crate::transport::{ReceiveStream, Transport};

/// In-process emitter/receiver: a process-wide hot broadcast channel.
/// Emit is non-blocking and never waits on subscribers; a subscriber that
/// falls behind the channel's capacity misses the messages it couldn't keep
/// up with rather than blocking the producer (`broadcast::error::Lagged`
/// entries are dropped silently, matching the "never buffer for a slow
/// subscriber" contract).
///
/// `receive` is cold: every call opens a fresh subscription starting from
/// the moment of the call, never replaying history.
pub struct MemoryTransport {
    sender: broadcast::Sender<NotificationEntity>,
    closed: AtomicBool,
}

#[derive(Debug, Clone, Copy)]
pub struct MemoryTransportConfig {
    /// Channel capacity (default 20,000).
    pub channel_capacity: usize,
}

impl Default for MemoryTransportConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 20_000,
        }
    }
}

impl MemoryTransport {
    pub fn new(config: MemoryTransportConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            sender,
            closed: AtomicBool::new(false),
        }
    }

    fn check_closed(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Other("transport is closed".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(MemoryTransportConfig::default())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn notify(
        &self,
        entity: NotificationEntity,
        _cancel: CancellationToken,
    ) -> Result<(), TransportError> {
        self.check_closed()?;
        // A send with zero subscribers is not an error: the entity simply
        // has no one to reach yet.
        let _ = self.sender.send(entity);
        Ok(())
    }

    async fn receive(
        &self,
        tags: Vec<String>,
        cancel: CancellationToken,
    ) -> Result<ReceiveStream, TransportError> {
        self.check_closed()?;
        let rx = self.sender.subscribe();
        let stream = BroadcastStream::new(rx)
            .take_until(async move { cancel.cancelled().await })
            .filter_map(move |item| match item {
                Ok(entity) if entity.matches_tags(&tags) => Some(entity),
                Ok(_) => None,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "in-process subscriber lagged, messages dropped");
                    None
                }
            });
        Ok(Box::pin(stream))
    }

    async fn ensure_stream(&self, _stream: &str) -> Result<(), TransportError> {
        // No durable backing store; nothing to provision.
        Ok(())
    }

    async fn trim_stream(&self, _stream: &str) -> Result<u64, TransportError> {
        Ok(0)
    }

    async fn ping(&self) -> Result<HealthStatus, TransportError> {
        let start = Instant::now();
        self.check_closed()?;
        Ok(HealthStatus::from_ping(start.elapsed().min(Duration::from_millis(1))))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
