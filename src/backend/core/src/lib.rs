//! # tiercache
//!
//! A tiered LRU+TTL cache with health-based failover.
//!
//! ## Architecture
//!
//! - **Cache**: local LRU+TTL tier over a pluggable remote backend, with
//!   compression, persistence and per-instance statistics
//! - **Health**: consecutive-failure tracking and periodic pings that route
//!   traffic away from a failing backend
//! - **Registry**: the named pricing/device/API instances and their report
//! - **Telemetry**: structured logging and Prometheus metrics
//! - **Config**: layered settings from defaults, files and the environment

pub mod cache;
pub mod config;
pub mod error;
pub mod telemetry;

pub use error::{CacheError, ErrorCode, ErrorSeverity, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cache::{
        CacheConfig, CacheEntry, CacheInstance, CacheKey, CacheRegistry, CacheReport,
        CacheStats, CacheStore, Cacheable, Endpoint, FileStore, HealthMonitor,
        HealthSnapshot, HealthStatus, MemoryBackend, PersistenceStore, RedisStore,
        RedisStoreConfig, StoredValue, TieredCache, TieredCacheBuilder,
    };
    pub use crate::cache::registry::{JsonCache, PricingCombo};
    pub use crate::config::{BackendKind, Settings};
    pub use crate::error::{CacheError, ErrorCode, ErrorSeverity, Result};
}
