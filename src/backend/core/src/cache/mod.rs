//! Tiered caching layer.
//!
//! This module provides an LRU+TTL cache with:
//!
//! - **Local Tier**: bounded in-process map with least-recently-used eviction
//! - **Remote Tier**: pluggable [`CacheStore`] backends (in-memory, Redis)
//! - **Health Failover**: the remote tier is skipped while it is failing
//! - **Compression**: large values are held as gzip+base64
//! - **Persistence**: optional durable mirror of the local tier
//! - **Statistics**: hit rate, latency and eviction counters per instance
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         TieredCache<T>                              │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   ┌──────────────┐   ┌─────────────────────────┐  │
//! │  │ HealthMonitor│   │ StatsTracker │   │   PersistenceStore      │  │
//! │  │ (gate+ticker)│   │              │   │   (FileStore)           │  │
//! │  └──────┬───────┘   └──────────────┘   └─────────────────────────┘  │
//! │         │ healthy?                                                  │
//! │         ▼                                                           │
//! │  ┌─────────────────────┐        ┌──────────────────────────────┐    │
//! │  │ CacheStore (remote) │  miss  │ Local LRU+TTL map            │    │
//! │  │ Memory | Redis      │ ─────▶ │ (authoritative when degraded)│    │
//! │  └─────────────────────┘        └──────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use tiercache_core::cache::{CacheConfig, MemoryBackend, TieredCache};
//!
//! let cache: TieredCache<serde_json::Value> = TieredCache::builder("pricing")
//!     .config(CacheConfig::builder().max_size(500).build())
//!     .backend(Arc::new(MemoryBackend::new()))
//!     .build()
//!     .await?;
//!
//! cache.set("pricing_brand:apple", json!({"price": 129}), None).await;
//! let price = cache.get("pricing_brand:apple").await;
//! ```

pub mod backend;
pub mod entry;
pub mod health;
pub mod key;
pub mod pattern;
pub mod persistence;
pub mod registry;
pub mod stats;
mod tiered;

pub use backend::{CacheStore, MemoryBackend, RedisStore, RedisStoreConfig};
pub use entry::{CacheEntry, PersistedRecord, RemoteEntry, StoredValue};
pub use health::{HealthMonitor, HealthSnapshot, HealthStatus};
pub use key::{CacheKey, Endpoint, KeyParam};
pub use persistence::{FileStore, PersistenceStore};
pub use registry::{CacheInstance, CacheRegistry, CacheReport, InstanceReport};
pub use stats::{CacheStats, StatsTracker};
pub use tiered::{Cacheable, TieredCache, TieredCacheBuilder};

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Cache Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-instance cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of local entries
    pub max_size: usize,

    /// TTL applied when `set` is given none
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,

    /// Values whose JSON form is longer than this are compressed (0 disables)
    pub compression_threshold_bytes: usize,

    /// Mirror local writes into the persistence store
    pub persist_locally: bool,

    /// Track get latency
    pub performance_tracking: bool,

    /// Timeout for each remote call
    #[serde(with = "humantime_serde")]
    pub backend_timeout: Duration,

    /// Period of the liveness ping
    #[serde(with = "humantime_serde")]
    pub health_check_interval: Duration,

    /// Consecutive failures before the remote tier is skipped
    pub failure_threshold: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            default_ttl: Duration::from_secs(300), // 5 minutes
            compression_threshold_bytes: 10_000,   // 10 KB
            persist_locally: false,
            performance_tracking: true,
            backend_timeout: Duration::from_secs(2),
            health_check_interval: Duration::from_secs(30),
            failure_threshold: HealthMonitor::DEFAULT_FAILURE_THRESHOLD,
        }
    }
}

impl CacheConfig {
    /// Create a new cache configuration builder.
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Reject configurations the cache cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(CacheError::configuration("max_size must be at least 1"));
        }
        if self.default_ttl.is_zero() {
            return Err(CacheError::configuration("default_ttl must be positive"));
        }
        if self.backend_timeout.is_zero() {
            return Err(CacheError::configuration("backend_timeout must be positive"));
        }
        if self.health_check_interval.is_zero() {
            return Err(CacheError::configuration(
                "health_check_interval must be positive",
            ));
        }
        if self.failure_threshold == 0 {
            return Err(CacheError::configuration(
                "failure_threshold must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Builder for cache configuration.
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.config.max_size = max_size;
        self
    }

    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.config.default_ttl = ttl;
        self
    }

    pub fn compression_threshold_bytes(mut self, threshold: usize) -> Self {
        self.config.compression_threshold_bytes = threshold;
        self
    }

    pub fn persist_locally(mut self, enabled: bool) -> Self {
        self.config.persist_locally = enabled;
        self
    }

    pub fn performance_tracking(mut self, enabled: bool) -> Self {
        self.config.performance_tracking = enabled;
        self
    }

    pub fn backend_timeout(mut self, timeout: Duration) -> Self {
        self.config.backend_timeout = timeout;
        self
    }

    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.config.health_check_interval = interval;
        self
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn build(self) -> CacheConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_default_config_is_valid() {
        assert!(CacheConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let err = CacheConfig::builder().max_size(0).build().validate().unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigurationError);
    }

    #[test]
    fn test_zero_ttl_is_rejected() {
        let config = CacheConfig::builder().default_ttl(Duration::ZERO).build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_deserializes_humantime() {
        let config: CacheConfig = serde_json::from_str(
            r#"{"max_size": 200, "default_ttl": "1h", "persist_locally": true}"#,
        )
        .unwrap();
        assert_eq!(config.max_size, 200);
        assert_eq!(config.default_ttl, Duration::from_secs(3600));
        assert!(config.persist_locally);
        assert_eq!(config.health_check_interval, Duration::from_secs(30));
    }
}
