use std::time::{Duration, Instant};

use nbus_core::TransportError;
use tokio_util::sync::CancellationToken;

use crate::config::RedisTransportConfig;
use crate::error::map_redis_err;

/// Stream initializer: ensure a stream and its consumer group exist
/// before the transport starts serving. Up to `max_init_retries` attempts,
/// bounded by an overall `initialization_timeout` deadline, linear backoff
/// `retry_delay * attempt`. Exhaustion is a `PermanentTransportError`-class
/// failure — callers must refuse to start serving.
pub async fn ensure_consumer_group(
    conn: &mut redis::aio::ConnectionManager,
    stream: &str,
    group: &str,
    config: &RedisTransportConfig,
    cancel: &CancellationToken,
) -> Result<(), TransportError> {
    let deadline = Instant::now() + config.initialization_timeout;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match try_create_group(conn, stream, group).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt >= config.max_init_retries || Instant::now() >= deadline => {
                return Err(TransportError::InitializationFailed(format!(
                    "failed to initialize stream '{stream}' group '{group}' after {attempt} attempts: {e}"
                )));
            }
            Err(e) => {
                let delay = config.retry_delay * attempt;
                tracing::warn!(
                    stream,
                    group,
                    attempt,
                    ?delay,
                    "stream initialization attempt failed, retrying: {e}"
                );
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = cancel.cancelled() => return Err(TransportError::Cancelled),
                }
            }
        }
    }
}

async fn try_create_group(
    conn: &mut redis::aio::ConnectionManager,
    stream: &str,
    group: &str,
) -> Result<(), TransportError> {
    let result: Result<String, redis::RedisError> = redis::cmd("XGROUP")
        .arg("CREATE")
        .arg(stream)
        .arg(group)
        .arg("$")
        .arg("MKSTREAM")
        .query_async(conn)
        .await;

    match result {
        Ok(_) => Ok(()),
        // BUSYGROUP means the group already exists — this counts as success.
        Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
        Err(e) => Err(map_redis_err(e)),
    }
}

/// Apply a key-expire to the stream; a no-op when `ttl` is zero.
pub async fn set_stream_ttl(
    conn: &mut redis::aio::ConnectionManager,
    stream: &str,
    ttl: Duration,
) -> Result<(), TransportError> {
    if ttl.is_zero() {
        return Ok(());
    }
    redis::cmd("EXPIRE")
        .arg(stream)
        .arg(ttl.as_secs() as i64)
        .query_async::<()>(conn)
        .await
        .map_err(map_redis_err)?;
    Ok(())
}
