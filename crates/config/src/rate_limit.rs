//! Rate limiting configuration structures.

use duration_str::{deserialize_duration, deserialize_option_duration};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Rate limiting configuration for the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enabled.
    pub enabled: bool,
    /// Interval between expired-record sweeps.
    #[serde(deserialize_with = "deserialize_duration")]
    pub sweep_interval: Duration,
    /// Upper bound for the shutdown write-back of the hot tier.
    #[serde(deserialize_with = "deserialize_duration")]
    pub flush_timeout: Duration,
    /// Quota tiers applied per identity and route class.
    pub tiers: TiersConfig,
    /// Durable storage backend configuration.
    pub storage: StorageConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval: Duration::from_secs(60),
            flush_timeout: Duration::from_secs(5),
            tiers: TiersConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// The quota tiers. A route matching the image manipulation pattern is
/// always constrained by the image manipulation tier; otherwise a valid
/// bearer token selects the authenticated tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TiersConfig {
    /// Tier for anonymous callers on ordinary routes.
    pub default: TierQuota,
    /// Tier for callers presenting a valid token on ordinary routes.
    pub authenticated: TierQuota,
    /// Tier for resource-heavy image manipulation routes.
    pub image_manipulation: TierQuota,
}

impl Default for TiersConfig {
    fn default() -> Self {
        Self {
            default: TierQuota {
                limit: 1200,
                duration: Duration::from_secs(3600),
            },
            authenticated: TierQuota {
                limit: 2500,
                duration: Duration::from_secs(3600),
            },
            image_manipulation: TierQuota {
                limit: 100,
                duration: Duration::from_secs(900),
            },
        }
    }
}

/// Configuration for a single quota tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierQuota {
    /// Maximum number of requests allowed within the window.
    pub limit: u32,
    /// Window duration for the tier.
    #[serde(deserialize_with = "deserialize_duration")]
    pub duration: Duration,
}

/// Durable storage backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-process storage. Quota records do not survive a restart.
    Memory,
    /// Redis storage with configuration.
    Redis(Box<RedisConfig>),
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Memory
    }
}

/// Redis storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
    /// Connection pool configuration.
    #[serde(default)]
    pub pool: RedisPoolConfig,
    /// The hash all quota records are stored under.
    #[serde(default = "default_hash_key")]
    pub hash_key: String,
    /// Connection timeout.
    #[serde(default = "default_connection_timeout", deserialize_with = "deserialize_option_duration")]
    pub connection_timeout: Option<Duration>,
}

fn default_hash_key() -> String {
    "petal:ratelimits".to_string()
}

fn default_connection_timeout() -> Option<Duration> {
    Some(Duration::from_secs(5))
}

/// Redis connection pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RedisPoolConfig {
    /// Maximum number of connections.
    pub max_size: Option<usize>,
    /// Timeout for creating connections.
    #[serde(deserialize_with = "deserialize_option_duration")]
    pub timeout_create: Option<Duration>,
    /// Timeout for waiting for a connection.
    #[serde(deserialize_with = "deserialize_option_duration")]
    pub timeout_wait: Option<Duration>,
    /// Timeout before recycling idle connections.
    #[serde(deserialize_with = "deserialize_option_duration")]
    pub timeout_recycle: Option<Duration>,
}

impl Default for RedisPoolConfig {
    fn default() -> Self {
        Self {
            max_size: Some(16),
            timeout_create: Some(Duration::from_secs(5)),
            timeout_wait: Some(Duration::from_secs(5)),
            timeout_recycle: Some(Duration::from_secs(300)),
        }
    }
}
