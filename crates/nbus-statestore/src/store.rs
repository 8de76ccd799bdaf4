use std::time::Duration;

use async_trait::async_trait;

use crate::error::StateStoreError;

/// The durable publisher's update-key value: the latest payload plus the
/// sequence it was written under, when the type configures a sequence
/// extractor.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredValue {
    pub sequence: Option<i64>,
    pub payload: serde_json::Value,
}

/// KV state store backing the update-key mode of the durable publisher:
/// one key per logical entity, overwritten in place as newer writes arrive.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StateStoreError>;

    /// Unconditional overwrite, used when no sequence extractor is
    /// configured for the type (last-writer-wins by arrival order).
    async fn put(
        &self,
        key: &str,
        value: StoredValue,
        ttl: Option<Duration>,
    ) -> Result<(), StateStoreError>;

    /// Write `value` iff no value is stored yet for `key`, or the stored
    /// value's sequence is strictly less than `value.sequence`. Returns
    /// whether the write took effect. Must be atomic: concurrent callers
    /// racing on the same key never both "win".
    async fn compare_and_swap_sequence(
        &self,
        key: &str,
        value: StoredValue,
        ttl: Option<Duration>,
    ) -> Result<bool, StateStoreError>;

    async fn delete(&self, key: &str) -> Result<(), StateStoreError>;

    async fn ping(&self) -> Result<bool, StateStoreError>;

    async fn close(&self) -> Result<(), StateStoreError>;
}
