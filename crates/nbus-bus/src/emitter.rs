use std::sync::Arc;

use futures::future::join_all;
use nbus_core::{NotificationEntity, Transport, TransportError};
use tokio_util::sync::CancellationToken;

/// Fan-out emitter: dispatches one entity to every configured transport
/// concurrently. A failing transport never prevents dispatch to the others —
/// failures are collected and surfaced together once every dispatch has
/// settled.
pub struct CompositeEmitter {
    transports: Vec<Arc<dyn Transport>>,
}

impl CompositeEmitter {
    pub fn new(transports: Vec<Arc<dyn Transport>>) -> Self {
        Self { transports }
    }

    pub async fn notify(&self, mut entity: NotificationEntity, cancel: CancellationToken) -> Result<(), TransportError> {
        entity.stamp_if_unset();

        let dispatches = self.transports.iter().map(|transport| {
            let entity = entity.clone();
            let cancel = cancel.clone();
            async move { transport.notify(entity, cancel).await }
        });

        let results = tokio::select! {
            results = join_all(dispatches) => results,
            () = cancel.cancelled() => return Err(TransportError::Cancelled),
        };

        let failures: Vec<TransportError> = results.into_iter().filter_map(Result::err).collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(TransportError::Composite {
                total: self.transports.len(),
                failures,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nbus_core::{MemoryTransport, MemoryTransportConfig};

    struct AlwaysFails;

    #[async_trait::async_trait]
    impl Transport for AlwaysFails {
        async fn notify(&self, _entity: NotificationEntity, _cancel: CancellationToken) -> Result<(), TransportError> {
            Err(TransportError::Other("nope".to_string()))
        }
        async fn receive(
            &self,
            _tags: Vec<String>,
            _cancel: CancellationToken,
        ) -> Result<nbus_core::ReceiveStream, TransportError> {
            unimplemented!()
        }
        async fn ensure_stream(&self, _stream: &str) -> Result<(), TransportError> {
            Ok(())
        }
        async fn trim_stream(&self, _stream: &str) -> Result<u64, TransportError> {
            Ok(0)
        }
        async fn ping(&self) -> Result<nbus_core::HealthStatus, TransportError> {
            Ok(nbus_core::HealthStatus::Healthy)
        }
        async fn close(&self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn stamps_missing_id_before_dispatch() {
        let transport = Arc::new(MemoryTransport::new(MemoryTransportConfig::default()));
        let emitter = CompositeEmitter::new(vec![transport]);
        let entity = NotificationEntity::new("x", "y");
        assert!(entity.notification_id.is_empty());
        emitter.notify(entity, CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn one_failing_transport_does_not_block_the_others() {
        let memory = Arc::new(MemoryTransport::new(MemoryTransportConfig::default()));
        let failing: Arc<dyn Transport> = Arc::new(AlwaysFails);
        let emitter = CompositeEmitter::new(vec![memory.clone(), failing]);

        let cancel = CancellationToken::new();
        let mut stream = memory.receive(vec![], cancel.clone()).await.unwrap();

        let entity = NotificationEntity::new("x", "y");
        let result = emitter.notify(entity, cancel).await;

        assert!(matches!(result, Err(TransportError::Composite { total: 2, .. })));
        use tokio_stream::StreamExt;
        assert!(stream.next().await.is_some());
    }
}
