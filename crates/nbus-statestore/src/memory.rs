use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StateStoreError;
use crate::store::{StateStore, StoredValue};

/// In-memory `StateStore`, used by tests that exercise update-key overwrite
/// semantics without a live Redis instance.
#[derive(Default)]
pub struct InMemoryStateStore {
    entries: Mutex<HashMap<String, StoredValue>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StateStoreError> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn put(
        &self,
        key: &str,
        value: StoredValue,
        _ttl: Option<Duration>,
    ) -> Result<(), StateStoreError> {
        self.entries.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    async fn compare_and_swap_sequence(
        &self,
        key: &str,
        value: StoredValue,
        _ttl: Option<Duration>,
    ) -> Result<bool, StateStoreError> {
        let mut entries = self.entries.lock().unwrap();
        let should_write = match entries.get(key) {
            Some(existing) => value.sequence > existing.sequence,
            None => true,
        };
        if should_write {
            entries.insert(key.to_string(), value);
        }
        Ok(should_write)
    }

    async fn delete(&self, key: &str) -> Result<(), StateStoreError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<bool, StateStoreError> {
        Ok(true)
    }

    async fn close(&self) -> Result<(), StateStoreError> {
        Ok(())
    }
}
