use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use nbus_core::{HealthStatus, NotificationEntity, ReceiveStream, Transport, TransportError, TypeRegistry};
use nbus_statestore::StateStore;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::config::RedisTransportConfig;
use crate::consumer::{ConsumerParams, run_consumer_loop};
use crate::error::map_redis_err;
use crate::init::{ensure_consumer_group, set_stream_ttl};
use crate::publisher::Publisher;

/// Durable streaming transport backed by Redis Streams. `notify` publishes
/// through [`Publisher`]; `receive` spins up a dedicated consumer-group
/// loop reading every declared stream so each independent subscription
/// gets its own full view rather than competing for entries with others.
pub struct RedisTransport {
    conn: redis::aio::ConnectionManager,
    state_store: Arc<dyn StateStore>,
    registry: Arc<TypeRegistry>,
    config: RedisTransportConfig,
    publisher: Publisher,
    closed: AtomicBool,
}

impl RedisTransport {
    pub async fn connect(
        config: RedisTransportConfig,
        state_store: Arc<dyn StateStore>,
        registry: Arc<TypeRegistry>,
    ) -> Result<Self, TransportError> {
        let client = redis::Client::open(config.url.clone()).map_err(map_redis_err)?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(map_redis_err)?;
        let publisher = Publisher::new(conn.clone(), state_store.clone(), registry.clone(), config.clone());
        Ok(Self {
            conn,
            state_store,
            registry,
            config,
            publisher,
            closed: AtomicBool::new(false),
        })
    }

    fn check_closed(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Other("transport is closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for RedisTransport {
    async fn notify(&self, entity: NotificationEntity, _cancel: CancellationToken) -> Result<(), TransportError> {
        self.check_closed()?;
        self.publisher.publish(entity).await
    }

    /// Opens an independent, unnamed consumer group scoped to this one call
    /// so that two concurrent subscriptions each see every entry rather than
    /// splitting delivery the way two consumers in the same group would.
    async fn receive(&self, tags: Vec<String>, cancel: CancellationToken) -> Result<ReceiveStream, TransportError> {
        self.check_closed()?;
        let streams: Vec<String> = self.registry.declared_streams().into_iter().collect();
        let group = format!("{}:recv:{}", self.config.consumer_group, ulid::Ulid::new());
        let consumer_name = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "nbus".to_string());

        let (tx, rx) = mpsc::channel(self.config.batch_size.max(1) as usize);
        let params = ConsumerParams {
            conn: self.conn.clone(),
            streams,
            group,
            consumer_name,
            tags,
            registry: self.registry.clone(),
            state_store: self.state_store.clone(),
            config: self.config.clone(),
            sender: tx,
            cancel,
        };
        tokio::spawn(run_consumer_loop(params));

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn ensure_stream(&self, stream: &str) -> Result<(), TransportError> {
        self.check_closed()?;
        let mut conn = self.conn.clone();
        let cancel = CancellationToken::new();
        ensure_consumer_group(&mut conn, stream, &self.config.consumer_group, &self.config, &cancel).await?;
        set_stream_ttl(&mut conn, stream, self.config.stream_ttl).await
    }

    async fn trim_stream(&self, stream: &str) -> Result<u64, TransportError> {
        self.check_closed()?;
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("XTRIM");
        cmd.arg(stream).arg("MAXLEN");
        if self.config.use_approximate_trimming {
            cmd.arg("~");
        }
        cmd.arg(self.config.max_stream_length);
        cmd.query_async::<i64>(&mut conn)
            .await
            .map(|n| n.max(0) as u64)
            .map_err(map_redis_err)
    }

    async fn ping(&self) -> Result<HealthStatus, TransportError> {
        self.check_closed()?;
        let mut conn = self.conn.clone();
        let start = Instant::now();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(map_redis_err)?;
        Ok(HealthStatus::from_ping(start.elapsed()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
