use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use nbus_statestore::{StateStore, StateStoreError, StoredValue};

use crate::error::map_redis_err;

/// Only overwrites `sequence`/`payload` if `cur` (the stored sequence) is
/// absent or strictly less than the incoming sequence. Mirrors the
/// equality-based compare-and-swap used elsewhere in the stack, generalized
/// to an ordering comparison since updateable notifications overwrite by
/// "highest sequence wins", not "matches expected value".
const CAS_SEQUENCE_SCRIPT: &str = r#"
local cur = redis.call('HGET', KEYS[1], 'sequence')
if cur == false or tonumber(ARGV[1]) > tonumber(cur) then
    redis.call('HSET', KEYS[1], 'sequence', ARGV[1], 'payload', ARGV[2])
    if tonumber(ARGV[3]) > 0 then
        redis.call('PEXPIRE', KEYS[1], ARGV[3])
    end
    return 1
else
    return 0
end
"#;

#[derive(Debug, Clone)]
pub struct RedisStateStoreConfig {
    pub url: String,
}

impl Default for RedisStateStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

pub struct RedisStateStore {
    conn: redis::aio::ConnectionManager,
    closed: AtomicBool,
}

impl RedisStateStore {
    pub async fn connect(config: RedisStateStoreConfig) -> Result<Self, StateStoreError> {
        let client =
            redis::Client::open(config.url.as_str()).map_err(|e| StateStoreError::Connection(e.to_string()))?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| StateStoreError::Connection(e.to_string()))?;
        Ok(Self {
            conn,
            closed: AtomicBool::new(false),
        })
    }

    fn check_closed(&self) -> Result<(), StateStoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StateStoreError::Other("store is closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StateStoreError> {
        self.check_closed()?;
        let mut conn = self.conn.clone();
        let fields: std::collections::HashMap<String, String> = redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)?;

        if fields.is_empty() {
            return Ok(None);
        }

        let sequence = fields.get("sequence").and_then(|s| s.parse::<i64>().ok());
        let payload = match fields.get("payload") {
            Some(raw) => serde_json::from_str(raw)?,
            None => serde_json::Value::Null,
        };
        Ok(Some(StoredValue { sequence, payload }))
    }

    async fn put(
        &self,
        key: &str,
        value: StoredValue,
        ttl: Option<Duration>,
    ) -> Result<(), StateStoreError> {
        self.check_closed()?;
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(&value.payload)?;

        let mut cmd = redis::cmd("HSET");
        cmd.arg(key).arg("payload").arg(&payload);
        if let Some(seq) = value.sequence {
            cmd.arg("sequence").arg(seq);
        }
        cmd.query_async::<()>(&mut conn).await.map_err(map_redis_err)?;

        if let Some(ttl) = ttl {
            redis::cmd("PEXPIRE")
                .arg(key)
                .arg(ttl.as_millis() as i64)
                .query_async::<()>(&mut conn)
                .await
                .map_err(map_redis_err)?;
        }
        Ok(())
    }

    async fn compare_and_swap_sequence(
        &self,
        key: &str,
        value: StoredValue,
        ttl: Option<Duration>,
    ) -> Result<bool, StateStoreError> {
        self.check_closed()?;
        let Some(sequence) = value.sequence else {
            // No ordering to compare against: behave like an unconditional put.
            self.put(key, value, ttl).await?;
            return Ok(true);
        };

        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(&value.payload)?;
        let ttl_ms = ttl.map(|d| d.as_millis() as i64).unwrap_or(0);

        let wrote: i32 = redis::Script::new(CAS_SEQUENCE_SCRIPT)
            .key(key)
            .arg(sequence)
            .arg(&payload)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_err)?;
        Ok(wrote == 1)
    }

    async fn delete(&self, key: &str) -> Result<(), StateStoreError> {
        self.check_closed()?;
        let mut conn = self.conn.clone();
        redis::cmd("DEL").arg(key).query_async::<()>(&mut conn).await.map_err(map_redis_err)?;
        Ok(())
    }

    async fn ping(&self) -> Result<bool, StateStoreError> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await.map_err(map_redis_err)?;
        Ok(pong == "PONG")
    }

    async fn close(&self) -> Result<(), StateStoreError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
