//! Durable storage backends for quota records.

use std::collections::HashMap;

use crate::error::StorageError;
use crate::record::QuotaRecord;

pub mod memory;
pub mod redis;
mod redis_pool;

pub use memory::MemoryStore;
pub use redis::RedisStore;

/// Trait for durable quota record storage.
///
/// The durable tier is only consulted off the request path: a bulk read
/// at startup, opportunistic per-consume mirroring, and bulk write-back
/// at sweep and shutdown time.
#[allow(async_fn_in_trait)]
pub trait DurableStore: Send + Sync {
    /// Read every stored record, keyed by identity.
    async fn load_all(&self) -> Result<HashMap<String, QuotaRecord>, StorageError>;

    /// Write a single record.
    async fn persist(&self, key: &str, record: &QuotaRecord) -> Result<(), StorageError>;

    /// Write a batch of records.
    async fn persist_all(&self, records: &HashMap<String, QuotaRecord>) -> Result<(), StorageError>;

    /// Delete the records for the given identities.
    async fn remove(&self, keys: &[String]) -> Result<(), StorageError>;
}

/// Decode serialized records, skipping entries that fail to parse.
///
/// A corrupt entry only loses that one identity's window; it must not
/// fail the whole startup load.
fn decode_records(raw: impl IntoIterator<Item = (String, String)>) -> HashMap<String, QuotaRecord> {
    let mut records = HashMap::new();

    for (key, value) in raw {
        match serde_json::from_str::<QuotaRecord>(&value) {
            Ok(record) => {
                records.insert(key, record);
            }
            Err(err) => {
                log::warn!("Skipping corrupt quota record for {key}: {err}");
            }
        }
    }

    records
}
