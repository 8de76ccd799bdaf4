use std::sync::Arc;

use nbus_core::{NotificationEntity, TypeRegistry};
use nbus_statestore::StateStore;
use redis::streams::StreamReadReply;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::RedisTransportConfig;
use crate::error::is_timeout_nil;
use crate::init::ensure_consumer_group;
use crate::wire::StreamEntry;

pub(crate) struct ConsumerParams {
    pub conn: redis::aio::ConnectionManager,
    pub streams: Vec<String>,
    pub group: String,
    pub consumer_name: String,
    pub tags: Vec<String>,
    pub registry: Arc<TypeRegistry>,
    pub state_store: Arc<dyn StateStore>,
    pub config: RedisTransportConfig,
    pub sender: mpsc::Sender<NotificationEntity>,
    pub cancel: CancellationToken,
}

/// Durable transport receiver: per-`(stream, group, consumer)` loop.
/// Block-reads across every declared stream in one `XREADGROUP`, decodes
/// each entry through the type registry, emits it to the transport's local
/// channel, and acknowledges it. Decode failures are logged and acked
/// (never retried); connection errors back off by `error_recovery_delay`
/// and resume.
pub(crate) async fn run_consumer_loop(mut p: ConsumerParams) {
    for stream in &p.streams {
        if let Err(e) = ensure_consumer_group(&mut p.conn, stream, &p.group, &p.config, &p.cancel).await {
            tracing::error!(stream, group = %p.group, "failed to initialize consumer group: {e}");
            return;
        }
    }

    loop {
        if p.cancel.is_cancelled() {
            break;
        }

        let result: Result<StreamReadReply, redis::RedisError> = {
            let mut cmd = redis::cmd("XREADGROUP");
            cmd.arg("GROUP")
                .arg(&p.group)
                .arg(&p.consumer_name)
                .arg("COUNT")
                .arg(p.config.batch_size)
                .arg("BLOCK")
                .arg(p.config.xreadgroup_block.as_millis() as u64)
                .arg("STREAMS");
            for stream in &p.streams {
                cmd.arg(stream);
            }
            for _ in &p.streams {
                cmd.arg(">");
            }
            cmd.query_async(&mut p.conn).await
        };

        match result {
            Ok(reply) => {
                for key in &reply.keys {
                    for entry in &key.ids {
                        process_entry(&p, &key.key, &entry.id, entry).await;
                    }
                }
            }
            Err(e) => {
                if !is_timeout_nil(&e) {
                    tracing::warn!("XREADGROUP error, backing off: {e}");
                    tokio::select! {
                        () = tokio::time::sleep(p.config.error_recovery_delay) => {}
                        () = p.cancel.cancelled() => break,
                    }
                }
            }
        }
    }
}

const WIRE_FIELDS: &[&str] = &[
    "Type",
    "Payload",
    "NotificationId",
    "Timestamp",
    "Sequence",
    "UpdateKey",
    "GroupId",
    "Level",
    "Message",
    "Tags",
];

async fn process_entry(p: &ConsumerParams, stream: &str, entry_id: &str, entry: &redis::streams::StreamId) {
    let fields: std::collections::HashMap<String, String> = WIRE_FIELDS
        .iter()
        .filter_map(|&field| entry.get::<String>(field).map(|v| (field.to_string(), v)))
        .collect();

    let wire = match StreamEntry::from_fields(&fields) {
        Ok(wire) => wire,
        Err(e) => {
            tracing::warn!(stream, entry_id, raw = ?fields, "failed to decode stream entry, acking without retry: {e}");
            ack(&p.conn, stream, &p.group, entry_id).await;
            return;
        }
    };

    let raw_payload = if let Some(inline) = wire.payload.clone() {
        inline
    } else if let Some(key) = wire.update_key.clone() {
        match p.state_store.get(&key).await {
            Ok(Some(stored)) => stored.payload,
            Ok(None) => serde_json::Value::Null,
            Err(e) => {
                tracing::warn!(key, "failed to fetch companion key value: {e}");
                serde_json::Value::Null
            }
        }
    } else {
        serde_json::Value::Null
    };

    let entity = wire.into_entity(&p.registry, raw_payload);

    if entity.matches_tags(&p.tags) {
        let _ = p.sender.send(entity).await;
    }

    ack(&p.conn, stream, &p.group, entry_id).await;
}

async fn ack(conn: &redis::aio::ConnectionManager, stream: &str, group: &str, entry_id: &str) {
    let mut conn = conn.clone();
    if let Err(e) = redis::cmd("XACK")
        .arg(stream)
        .arg(group)
        .arg(entry_id)
        .query_async::<i64>(&mut conn)
        .await
    {
        tracing::warn!(stream, group, entry_id, "failed to ack entry: {e}");
    }
}
