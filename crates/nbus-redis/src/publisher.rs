use std::sync::Arc;

use nbus_core::{NotificationEntity, RetryPolicy, TransportError, TypeRegistry};
use nbus_statestore::{StateStore, StoredValue};

use crate::config::RedisTransportConfig;
use crate::error::{map_redis_err, map_store_err};
use crate::wire::StreamEntry;

/// Durable transport publisher. Resolves per-type storage mode
/// (updateable key-overwrite, stream-only, or default out-of-line), appends
/// the stream entry, then applies retention (trim + TTL refresh).
pub struct Publisher {
    conn: redis::aio::ConnectionManager,
    state_store: Arc<dyn StateStore>,
    registry: Arc<TypeRegistry>,
    config: RedisTransportConfig,
    retry: RetryPolicy,
}

impl Publisher {
    pub fn new(
        conn: redis::aio::ConnectionManager,
        state_store: Arc<dyn StateStore>,
        registry: Arc<TypeRegistry>,
        config: RedisTransportConfig,
    ) -> Self {
        let retry = RetryPolicy::new(config.retry_delay);
        Self {
            conn,
            state_store,
            registry,
            config,
            retry,
        }
    }

    pub async fn publish(&self, entity: NotificationEntity) -> Result<(), TransportError> {
        let conn = self.conn.clone();
        self.retry.execute(|| self.publish_once(conn.clone(), &entity)).await
    }

    async fn publish_once(
        &self,
        mut conn: redis::aio::ConnectionManager,
        entity: &NotificationEntity,
    ) -> Result<(), TransportError> {
        let stream = self.registry.stream_for(&entity.notification_type).to_string();

        let wire = if let Some(cfg) = self.registry.updateable_config(&entity.notification_type)
            && let Some(key) = (cfg.update_key_extractor)(entity).filter(|k| !k.is_empty())
        {
            let sequence = (cfg.sequence_extractor)(entity);
            let value = StoredValue {
                sequence,
                payload: entity.payload.clone(),
            };
            let ttl = Some(self.config.message_ttl);
            let written = if sequence.is_some() {
                self.state_store
                    .compare_and_swap_sequence(&key, value, ttl)
                    .await
                    .map_err(map_store_err)?
            } else {
                self.state_store.put(&key, value, ttl).await.map_err(map_store_err)?;
                true
            };
            if !written {
                tracing::debug!(key, ?sequence, "update dropped: stale sequence");
                return Ok(());
            }
            StreamEntry::from_entity(entity, Some(key), sequence)
        } else if self.registry.is_stream_only(&entity.notification_type) {
            StreamEntry::from_entity(entity, None, None)
        } else {
            // Default: out-of-line storage under a fresh per-notification key,
            // never overwritten.
            let key = format!("{stream}:msg:{}", entity.notification_id);
            self.state_store
                .put(
                    &key,
                    StoredValue {
                        sequence: None,
                        payload: entity.payload.clone(),
                    },
                    Some(self.config.message_ttl),
                )
                .await
                .map_err(map_store_err)?;
            StreamEntry::from_entity(entity, Some(key), None)
        };

        self.append(&mut conn, &stream, &wire).await?;
        self.apply_retention(&mut conn, &stream).await?;
        Ok(())
    }

    async fn append(
        &self,
        conn: &mut redis::aio::ConnectionManager,
        stream: &str,
        entry: &StreamEntry,
    ) -> Result<(), TransportError> {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream).arg("*");
        for (field, value) in entry.to_fields() {
            cmd.arg(field).arg(value);
        }
        cmd.query_async::<String>(conn)
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?;
        Ok(())
    }

    async fn apply_retention(
        &self,
        conn: &mut redis::aio::ConnectionManager,
        stream: &str,
    ) -> Result<(), TransportError> {
        let mut cmd = redis::cmd("XTRIM");
        cmd.arg(stream).arg("MAXLEN");
        if self.config.use_approximate_trimming {
            cmd.arg("~");
        }
        cmd.arg(self.config.max_stream_length);
        cmd.query_async::<i64>(conn).await.map_err(map_redis_err)?;

        if !self.config.stream_ttl.is_zero() {
            redis::cmd("EXPIRE")
                .arg(stream)
                .arg(self.config.stream_ttl.as_secs() as i64)
                .query_async::<()>(conn)
                .await
                .map_err(map_redis_err)?;
        }
        Ok(())
    }
}
