//! In-process durable storage.
//!
//! Holds serialized records behind a lock, mirroring the shape of the
//! Redis hash so the same wire format is exercised. Useful for tests
//! and for deployments that can tolerate losing windows on restart.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::{DurableStore, decode_records};
use crate::error::StorageError;
use crate::record::QuotaRecord;

/// In-process implementation of [`DurableStore`].
///
/// Cloning shares the underlying map, so a store handed to two engine
/// instances behaves like a single external backend.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Take the write lock, stalling every store operation until the
    /// guard is dropped.
    #[cfg(test)]
    pub(crate) async fn hold_write(&self) -> tokio::sync::RwLockWriteGuard<'_, HashMap<String, String>> {
        self.entries.write().await
    }
}

impl DurableStore for MemoryStore {
    async fn load_all(&self) -> Result<HashMap<String, QuotaRecord>, StorageError> {
        let entries = self.entries.read().await;
        Ok(decode_records(entries.iter().map(|(k, v)| (k.clone(), v.clone()))))
    }

    async fn persist(&self, key: &str, record: &QuotaRecord) -> Result<(), StorageError> {
        let value = serde_json::to_string(record)?;
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn persist_all(&self, records: &HashMap<String, QuotaRecord>) -> Result<(), StorageError> {
        let mut entries = self.entries.write().await;

        for (key, record) in records {
            let value = serde_json::to_string(record)?;
            entries.insert(key.clone(), value);
        }

        Ok(())
    }

    async fn remove(&self, keys: &[String]) -> Result<(), StorageError> {
        let mut entries = self.entries.write().await;

        for key in keys {
            entries.remove(key);
        }

        Ok(())
    }
}
