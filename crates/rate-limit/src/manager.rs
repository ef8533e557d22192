//! The quota store and consumption engine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use config::{RateLimitConfig, StorageConfig, TiersConfig};
use dashmap::DashMap;
use jiff::Timestamp;
use tokio::sync::Mutex;

use crate::error::RateLimitError;
use crate::policy::TierPolicy;
use crate::record::QuotaRecord;
use crate::storage::{DurableStore, MemoryStore, RedisStore};

/// Durable storage backend for quota records.
enum Storage {
    Memory(MemoryStore),
    Redis(RedisStore),
}

impl Storage {
    async fn load_all(&self) -> Result<HashMap<String, QuotaRecord>, crate::StorageError> {
        match self {
            Storage::Memory(store) => store.load_all().await,
            Storage::Redis(store) => store.load_all().await,
        }
    }

    async fn persist(&self, key: &str, record: &QuotaRecord) -> Result<(), crate::StorageError> {
        match self {
            Storage::Memory(store) => store.persist(key, record).await,
            Storage::Redis(store) => store.persist(key, record).await,
        }
    }

    async fn persist_all(&self, records: &HashMap<String, QuotaRecord>) -> Result<(), crate::StorageError> {
        match self {
            Storage::Memory(store) => store.persist_all(records).await,
            Storage::Redis(store) => store.persist_all(records).await,
        }
    }

    async fn remove(&self, keys: &[String]) -> Result<(), crate::StorageError> {
        match self {
            Storage::Memory(store) => store.remove(keys).await,
            Storage::Redis(store) => store.remove(keys).await,
        }
    }
}

/// The outcome of one admission check.
pub struct Admission {
    /// The post-consumption record, for response headers.
    pub record: QuotaRecord,
    /// Whether the request is admitted. Evaluated on the
    /// pre-consumption state, so a window admits exactly `limit`
    /// requests before denials start.
    pub allowed: bool,
}

/// Manager for the two-tier quota store.
///
/// The hot tier answers every admission decision; the durable tier is
/// bulk-loaded at construction and written back opportunistically, so
/// the request path never blocks on it.
pub struct QuotaManager {
    tiers: TiersConfig,
    flush_timeout: Duration,
    hot: DashMap<String, QuotaRecord>,
    storage: Arc<Storage>,
    /// Serializes sweeps; `admit` never takes this lock.
    sweep_lock: Mutex<()>,
}

impl QuotaManager {
    /// Create a manager with the configured backend and load prior
    /// state from it.
    ///
    /// An unreachable backend is fatal here: starting with an empty hot
    /// tier would silently forget every outstanding window.
    pub async fn new(config: RateLimitConfig) -> Result<Self, RateLimitError> {
        let storage = match &config.storage {
            StorageConfig::Memory => Storage::Memory(MemoryStore::new()),
            StorageConfig::Redis(redis_config) => Storage::Redis(RedisStore::new(redis_config).await?),
        };

        Self::from_storage(config, storage).await
    }

    async fn from_storage(config: RateLimitConfig, storage: Storage) -> Result<Self, RateLimitError> {
        let started = std::time::Instant::now();
        let records = storage.load_all().await?;

        log::info!(
            "Loaded {} quota records from durable storage in {:?}",
            records.len(),
            started.elapsed()
        );

        let hot = DashMap::new();
        for (key, record) in records {
            hot.insert(key, record);
        }

        Ok(Self {
            tiers: config.tiers,
            flush_timeout: config.flush_timeout,
            hot,
            storage: Arc::new(storage),
            sweep_lock: Mutex::new(()),
        })
    }

    /// Select the quota tier for a request.
    pub fn tier_for(&self, path: &str, credential_valid: bool) -> TierPolicy {
        TierPolicy::select(&self.tiers, path, credential_valid)
    }

    /// Answer "is this request admitted?" for an identity, consuming one
    /// request from its window if so.
    ///
    /// This is a per-key linearizable read-modify-write on the hot tier:
    /// get-or-create under the entry guard, replace the record if its
    /// window has expired, then consume. The consumed record is mirrored
    /// to durable storage without waiting for the write to land; a
    /// denied request changes nothing and writes nothing.
    pub fn admit(&self, key: &str, token_based: bool, tier: &TierPolicy) -> Admission {
        let now = Timestamp::now();

        let mut entry = self
            .hot
            .entry(key.to_string())
            .or_insert_with(|| QuotaRecord::new(tier, token_based, now));

        if entry.expired(now) {
            // Policy values are (re)applied to a key only here.
            *entry = QuotaRecord::new(tier, token_based, now);
        }

        let allowed = !entry.exceeded(now);
        if allowed {
            let consumed = entry.clone().consume();
            *entry = consumed;
        }

        let record = entry.clone();
        drop(entry);

        if allowed {
            self.mirror(key, &record);
        }

        Admission { record, allowed }
    }

    /// Mirror a record to durable storage, fire-and-forget. Failures
    /// must not affect admission decisions; they are logged and dropped.
    fn mirror(&self, key: &str, record: &QuotaRecord) {
        let storage = self.storage.clone();
        let key = key.to_string();
        let record = record.clone();

        tokio::spawn(async move {
            if let Err(err) = storage.persist(&key, &record).await {
                log::warn!("Failed to mirror quota record for {key}: {err}");
            }
        });
    }

    /// Evict every expired record from both tiers.
    ///
    /// Sweeps are serialized by a best-effort guard: if another sweep is
    /// in flight this one is skipped, not queued. Expiry is re-checked
    /// under the entry lock so a record refreshed by a concurrent
    /// `admit` is left alone in the hot tier.
    pub async fn sweep(&self) {
        let Ok(_guard) = self.sweep_lock.try_lock() else {
            log::debug!("A sweep is already running, skipping this one");
            return;
        };

        let now = Timestamp::now();

        let expired: Vec<String> = self
            .hot
            .iter()
            .filter(|entry| entry.value().expired(now))
            .map(|entry| entry.key().clone())
            .collect();

        if expired.is_empty() {
            return;
        }

        log::info!("Evicting {} expired quota records", expired.len());

        for key in &expired {
            self.hot.remove_if(key, |_, record| record.expired(now));
        }

        if let Err(err) = self.storage.remove(&expired).await {
            log::warn!("Failed to remove expired quota records from durable storage: {err}");
        }
    }

    /// Flush the hot tier to durable storage, bounded by the configured
    /// timeout. Called once at shutdown; failures are logged, never
    /// retried, and never block process exit.
    pub async fn shutdown(&self) {
        let snapshot: HashMap<String, QuotaRecord> = self
            .hot
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        if snapshot.is_empty() {
            return;
        }

        match tokio::time::timeout(self.flush_timeout, self.storage.persist_all(&snapshot)).await {
            Ok(Ok(())) => log::info!("Flushed {} quota records to durable storage", snapshot.len()),
            Ok(Err(err)) => log::error!("Failed to flush quota records at shutdown: {err}"),
            Err(_) => log::error!("Timed out flushing quota records at shutdown"),
        }
    }

    /// Number of records currently in the hot tier.
    pub fn record_count(&self) -> usize {
        self.hot.len()
    }
}
