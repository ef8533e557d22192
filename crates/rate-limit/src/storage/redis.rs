//! Redis-backed durable storage.
//!
//! All records live in a single hash: `identity key -> JSON record`.
//! The hash is read in bulk with `HGETALL` at startup and written back
//! with multi-field `HSET` at sweep/shutdown time.

use std::collections::HashMap;

use redis::aio::MultiplexedConnection;

use super::redis_pool::{self, Pool};
use super::{DurableStore, decode_records};
use crate::error::StorageError;
use crate::record::QuotaRecord;

/// Redis implementation of [`DurableStore`].
pub struct RedisStore {
    pool: Pool,
    hash_key: String,
}

impl RedisStore {
    /// Create a new Redis store and verify the server is reachable.
    ///
    /// The engine cannot safely initialize without knowing prior state,
    /// so an unreachable server is an error the caller treats as fatal.
    pub async fn new(config: &config::RedisConfig) -> Result<Self, StorageError> {
        let pool = redis_pool::create_pool(config)
            .map_err(|e| StorageError::Connection(format!("Failed to create Redis connection pool: {e}")))?;

        let store = Self {
            pool,
            hash_key: config.hash_key.clone(),
        };

        let ping = async {
            let mut conn = store.connection().await?;

            redis::cmd("PING")
                .query_async::<String>(&mut conn)
                .await
                .map_err(|e| StorageError::Connection(format!("Failed to ping Redis server: {e}")))
        };

        match config.connection_timeout {
            Some(timeout) => {
                tokio::time::timeout(timeout, ping)
                    .await
                    .map_err(|_| StorageError::Connection("Timed out connecting to Redis".to_string()))??;
            }
            None => {
                ping.await?;
            }
        }

        Ok(store)
    }

    async fn connection(&self) -> Result<MultiplexedConnection, StorageError> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        // Multiplexed connections are cheap to clone; the pooled object
        // goes straight back while the clone shares its pipeline.
        Ok((*conn).clone())
    }
}

impl DurableStore for RedisStore {
    async fn load_all(&self) -> Result<HashMap<String, QuotaRecord>, StorageError> {
        let mut conn = self.connection().await?;

        let raw: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(&self.hash_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::Query(e.to_string()))?;

        Ok(decode_records(raw))
    }

    async fn persist(&self, key: &str, record: &QuotaRecord) -> Result<(), StorageError> {
        let value = serde_json::to_string(record)?;
        let mut conn = self.connection().await?;

        redis::cmd("HSET")
            .arg(&self.hash_key)
            .arg(key)
            .arg(value)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| StorageError::Query(e.to_string()))
    }

    async fn persist_all(&self, records: &HashMap<String, QuotaRecord>) -> Result<(), StorageError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut cmd = redis::cmd("HSET");
        cmd.arg(&self.hash_key);

        for (key, record) in records {
            cmd.arg(key).arg(serde_json::to_string(record)?);
        }

        let mut conn = self.connection().await?;

        cmd.query_async::<()>(&mut conn)
            .await
            .map_err(|e| StorageError::Query(e.to_string()))
    }

    async fn remove(&self, keys: &[String]) -> Result<(), StorageError> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut conn = self.connection().await?;

        redis::cmd("HDEL")
            .arg(&self.hash_key)
            .arg(keys)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| StorageError::Query(e.to_string()))
    }
}
