use nbus_core::TransportError;
use nbus_statestore::StateStoreError;

pub(crate) fn map_store_err(e: StateStoreError) -> TransportError {
    match e {
        StateStoreError::Connection(msg) => TransportError::Connection(msg),
        StateStoreError::Serialization(err) => TransportError::Serialization(err),
        StateStoreError::Other(msg) => TransportError::Other(msg),
    }
}

#[allow(clippy::needless_pass_by_value)]
pub(crate) fn map_redis_err(e: redis::RedisError) -> TransportError {
    use redis::ErrorKind;
    match e.kind() {
        ErrorKind::IoError | ErrorKind::AuthenticationFailed => TransportError::Connection(e.to_string()),
        ErrorKind::TypeError => TransportError::Other(format!("redis type error: {e}")),
        _ => TransportError::Other(e.to_string()),
    }
}

/// Check if a redis error is the "nil" response from a blocking XREADGROUP timeout.
pub(crate) fn is_timeout_nil(e: &redis::RedisError) -> bool {
    matches!(e.kind(), redis::ErrorKind::TypeError)
}
