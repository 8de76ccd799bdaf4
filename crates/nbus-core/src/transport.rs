use std::pin::Pin;

use async_trait::async_trait;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

use crate::entity::NotificationEntity;
use crate::error::TransportError;
use crate::health::HealthStatus;

/// A cold, restartable stream of entities: each call to `receive` opens a
/// fresh subscription rather than replaying a shared one. The composite
/// receiver (nbus-bus) is what turns this into the hot, ref-counted
/// multicast subscribers actually see.
pub type ReceiveStream = Pin<Box<dyn Stream<Item = NotificationEntity> + Send>>;

/// A concrete delivery mechanism: in-process broadcast or a durable
/// streaming backend. Transports never deduplicate or apply tag filters
/// beyond what `receive` is asked for up front — that is the composite
/// receiver's job.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `entity` to this transport. Callers are expected to have
    /// already stamped `notification_id`/`timestamp`.
    async fn notify(
        &self,
        entity: NotificationEntity,
        cancel: CancellationToken,
    ) -> Result<(), TransportError>;

    /// Any-match tag filter applied as entities are produced. Empty `tags`
    /// passes everything.
    async fn receive(
        &self,
        tags: Vec<String>,
        cancel: CancellationToken,
    ) -> Result<ReceiveStream, TransportError>;

    /// Ensure a stream (and whatever consumer-group bookkeeping a durable
    /// backend needs) exists before the transport starts serving. A no-op
    /// for transports with no durable backing store.
    async fn ensure_stream(&self, stream: &str) -> Result<(), TransportError>;

    /// Trim a stream per its configured retention. Returns the number of
    /// entries removed; `0` for backends with no native trimming need.
    async fn trim_stream(&self, stream: &str) -> Result<u64, TransportError>;

    async fn ping(&self) -> Result<HealthStatus, TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}
