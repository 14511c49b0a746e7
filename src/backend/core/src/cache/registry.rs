//! Named cache instances.
//!
//! The registry is the composition root for the site's three caches. It
//! builds them from [`Settings`], hands out references, and aggregates their
//! statistics into a [`CacheReport`].

use super::backend::{CacheStore, MemoryBackend, RedisStore, RedisStoreConfig};
use super::health::HealthSnapshot;
use super::key::{CacheKey, Endpoint};
use super::persistence::{FileStore, PersistenceStore};
use super::stats::CacheStats;
use super::{CacheConfig, TieredCache};
use crate::config::{BackendKind, CachesSettings, Settings};
use crate::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

/// A cache holding JSON responses.
pub type JsonCache = TieredCache<Value>;

// ═══════════════════════════════════════════════════════════════════════════════
// Instances
// ═══════════════════════════════════════════════════════════════════════════════

/// The named cache instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheInstance {
    /// Repair price calculations
    Pricing,
    /// Device brands and models
    Device,
    /// Other API responses
    Api,
}

impl CacheInstance {
    pub const ALL: [CacheInstance; 3] = [Self::Pricing, Self::Device, Self::Api];

    /// Instance name, also the persistence namespace.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pricing => "pricing",
            Self::Device => "device",
            Self::Api => "api",
        }
    }

    /// Built-in configuration of this instance.
    pub fn default_config(&self) -> CacheConfig {
        match self {
            Self::Pricing => CacheConfig::builder()
                .max_size(500)
                .default_ttl(Duration::from_secs(600))
                .persist_locally(true)
                .build(),
            Self::Device => CacheConfig::builder()
                .max_size(200)
                .default_ttl(Duration::from_secs(3600))
                .persist_locally(true)
                .build(),
            Self::Api => CacheConfig::builder()
                .max_size(1000)
                .default_ttl(Duration::from_secs(300))
                .persist_locally(false)
                .build(),
        }
    }
}

impl fmt::Display for CacheInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A pricing lookup worth keeping warm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingCombo {
    pub device_type: String,
    pub brand: String,
    pub model: String,
    pub service: String,
    pub tier: String,
}

impl PricingCombo {
    pub fn new(device_type: &str, brand: &str, model: &str, service: &str) -> Self {
        Self {
            device_type: device_type.to_string(),
            brand: brand.to_string(),
            model: model.to_string(),
            service: service.to_string(),
            tier: "standard".to_string(),
        }
    }

    /// Cache key of this lookup.
    pub fn key(&self) -> String {
        CacheKey::pricing(
            &self.device_type,
            &self.brand,
            &self.model,
            &self.service,
            &self.tier,
        )
    }

    /// The most requested combinations.
    pub fn popular() -> Vec<Self> {
        vec![
            Self::new("mobile", "Apple", "iPhone 15", "screen_replacement"),
            Self::new("mobile", "Apple", "iPhone 14", "screen_replacement"),
            Self::new("mobile", "Samsung", "Galaxy S24", "screen_replacement"),
            Self::new("laptop", "Apple", "MacBook Pro", "screen_replacement"),
            Self::new("laptop", "Dell", "XPS 13", "battery_replacement"),
        ]
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════════════

/// The pricing, device and API caches.
///
/// Instances share the backend and persistence handles but no cache state.
#[derive(Debug)]
pub struct CacheRegistry {
    pricing: JsonCache,
    device: JsonCache,
    api: JsonCache,
}

impl CacheRegistry {
    /// Connect the configured backend and build every instance.
    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        let backend: Option<Arc<dyn CacheStore>> = match settings.backend.kind {
            BackendKind::None => None,
            BackendKind::Memory => Some(Arc::new(MemoryBackend::new())),
            BackendKind::Redis => {
                let store = RedisStore::connect(RedisStoreConfig {
                    url: settings.backend.redis_url.clone(),
                    key_prefix: settings.backend.key_prefix.clone(),
                    scan_count: settings.backend.scan_count,
                })
                .await?;
                Some(Arc::new(store))
            }
        };

        let needs_store = CacheInstance::ALL
            .iter()
            .any(|instance| settings.caches.get(*instance).persist_locally);
        let persistence: Option<Arc<dyn PersistenceStore>> = if needs_store {
            Some(Arc::new(FileStore::open(&settings.persistence.path).await?))
        } else {
            None
        };

        Self::with_stores(&settings.caches, backend, persistence).await
    }

    /// Build every instance over the given stores.
    pub async fn with_stores(
        caches: &CachesSettings,
        backend: Option<Arc<dyn CacheStore>>,
        persistence: Option<Arc<dyn PersistenceStore>>,
    ) -> Result<Self> {
        let build = |instance: CacheInstance| {
            TieredCache::<Value>::builder(instance.name())
                .config(caches.get(instance).clone())
                .maybe_backend(backend.clone())
                .maybe_persistence(persistence.clone())
                .build()
        };

        let registry = Self {
            pricing: build(CacheInstance::Pricing).await?,
            device: build(CacheInstance::Device).await?,
            api: build(CacheInstance::Api).await?,
        };

        info!(
            backend = backend.as_ref().map(|b| b.name()).unwrap_or("none"),
            persistence = persistence.is_some(),
            "Cache registry ready"
        );

        Ok(registry)
    }

    pub fn get(&self, instance: CacheInstance) -> &JsonCache {
        match instance {
            CacheInstance::Pricing => &self.pricing,
            CacheInstance::Device => &self.device,
            CacheInstance::Api => &self.api,
        }
    }

    pub fn pricing(&self) -> &JsonCache {
        &self.pricing
    }

    pub fn device(&self) -> &JsonCache {
        &self.device
    }

    pub fn api(&self) -> &JsonCache {
        &self.api
    }

    /// Get the cache that stores an endpoint's responses.
    pub fn for_endpoint(&self, endpoint: Endpoint) -> &JsonCache {
        self.get(endpoint.instance())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Warming & Invalidation
    // ─────────────────────────────────────────────────────────────────────────

    /// Prefetch pricing lookups that are not cached yet.
    ///
    /// Returns the number of lookups fetched and stored.
    #[instrument(skip_all, fields(combos = combos.len()))]
    pub async fn warm_pricing<F, Fut, E>(&self, combos: &[PricingCombo], fetcher: F) -> usize
    where
        F: Fn(PricingCombo) -> Fut,
        Fut: Future<Output = std::result::Result<Value, E>>,
        E: fmt::Display,
    {
        let by_key: HashMap<String, PricingCombo> = combos
            .iter()
            .map(|combo| (combo.key(), combo.clone()))
            .collect();
        let keys: Vec<String> = by_key.keys().cloned().collect();

        let fetch = |key: String| {
            let pending = by_key.get(&key).cloned().map(&fetcher);
            async move {
                match pending {
                    Some(fut) => fut.await.map_err(|e| e.to_string()),
                    None => Err(format!("no pricing combination for key {}", key)),
                }
            }
        };

        let warmed = self
            .pricing
            .prefetch(keys, fetch, Some(Endpoint::PricingCalculate.default_ttl()))
            .await;
        info!(warmed = warmed, "Pricing cache warm-up completed");
        warmed
    }

    /// Drop pricing entries matching `pattern`, or all of them.
    pub async fn invalidate_pricing(&self, pattern: Option<&Regex>) -> usize {
        let removed = match pattern {
            Some(pattern) => self.pricing.invalidate_by_pattern(pattern).await,
            None => self.pricing.clear().await,
        };
        info!(pattern = ?pattern.map(Regex::as_str), removed = removed, "Pricing cache invalidated");
        removed
    }

    /// Drop device entries whose key starts with `<device_type>_`, or all of them.
    pub async fn invalidate_device(&self, device_type: Option<&str>) -> usize {
        let removed = match device_type {
            Some(device_type) => match Regex::new(&format!("^{}_", regex::escape(device_type))) {
                Ok(pattern) => self.device.invalidate_by_pattern(&pattern).await,
                Err(e) => {
                    CacheError::from(e).log();
                    0
                }
            },
            None => self.device.clear().await,
        };
        info!(device_type = ?device_type, removed = removed, "Device cache invalidated");
        removed
    }

    /// Invalidate `pattern` in every instance.
    pub async fn invalidate_everywhere(&self, pattern: &Regex) -> usize {
        let mut removed = 0;
        for instance in CacheInstance::ALL {
            removed += self.get(instance).invalidate_by_pattern(pattern).await;
        }
        removed
    }

    /// Clear every instance.
    pub async fn clear_all(&self) {
        for instance in CacheInstance::ALL {
            self.get(instance).clear().await;
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Monitoring
    // ─────────────────────────────────────────────────────────────────────────

    /// Ping the backend from every instance.
    pub async fn check_health(&self) -> Vec<(CacheInstance, HealthSnapshot)> {
        let mut snapshots = Vec::with_capacity(CacheInstance::ALL.len());
        for instance in CacheInstance::ALL {
            snapshots.push((instance, self.get(instance).check_health().await));
        }
        snapshots
    }

    /// Combined statistics of every instance.
    pub fn report(&self) -> CacheReport {
        let instances: Vec<InstanceReport> = CacheInstance::ALL
            .iter()
            .map(|instance| {
                let cache = self.get(*instance);
                InstanceReport {
                    instance: *instance,
                    max_size: cache.config().max_size,
                    stats: cache.get_stats(),
                    health: cache.get_health_status(),
                }
            })
            .collect();
        CacheReport::from_instances(instances)
    }

    /// Stop every health ticker.
    pub fn shutdown(&self) {
        for instance in CacheInstance::ALL {
            self.get(instance).shutdown();
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Reports
// ═══════════════════════════════════════════════════════════════════════════════

/// One instance's share of a [`CacheReport`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceReport {
    pub instance: CacheInstance,
    pub max_size: usize,
    pub stats: CacheStats,
    pub health: HealthSnapshot,
}

/// Statistics across all instances.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheReport {
    pub generated_at: DateTime<Utc>,
    pub instances: Vec<InstanceReport>,
    pub total_hits: u64,
    pub total_misses: u64,

    /// Percentage, rounded to 2 decimals
    pub overall_hit_rate: f64,

    /// Request-weighted mean, rounded to 2 decimals
    pub average_response_time_ms: f64,
}

/// Instances above this share of `max_size` are reported as near capacity.
const CAPACITY_WARNING_RATIO: f64 = 0.8;

impl CacheReport {
    /// Aggregate instance reports.
    pub fn from_instances(instances: Vec<InstanceReport>) -> Self {
        let total_hits: u64 = instances.iter().map(|r| r.stats.hits).sum();
        let total_misses: u64 = instances.iter().map(|r| r.stats.misses).sum();
        let weighted_time: f64 = instances
            .iter()
            .map(|r| r.stats.average_response_time_ms * r.stats.requests() as f64)
            .sum();

        let requests = total_hits + total_misses;
        let (overall_hit_rate, average_response_time_ms) = if requests == 0 {
            (0.0, 0.0)
        } else {
            (
                total_hits as f64 / requests as f64 * 100.0,
                weighted_time / requests as f64,
            )
        };

        Self {
            generated_at: Utc::now(),
            instances,
            total_hits,
            total_misses,
            overall_hit_rate: round2(overall_hit_rate),
            average_response_time_ms: round2(average_response_time_ms),
        }
    }

    /// Tuning suggestions for the current numbers.
    pub fn recommendations(&self) -> Vec<String> {
        let mut out = Vec::new();

        if self.total_hits + self.total_misses > 0 {
            if self.overall_hit_rate < 50.0 {
                out.push(
                    "Low cache hit rate detected. Consider increasing cache TTL or warming cache with popular data."
                        .to_string(),
                );
            } else if self.overall_hit_rate > 95.0 {
                out.push(
                    "Very high cache hit rate. Consider reducing cache TTL to ensure data freshness."
                        .to_string(),
                );
            }
        }

        if self.average_response_time_ms > 100.0 {
            out.push(
                "High average response time. Consider optimizing cache storage or lowering the compression threshold."
                    .to_string(),
            );
        }

        for report in &self.instances {
            let limit = report.max_size as f64 * CAPACITY_WARNING_RATIO;
            if report.stats.entries as f64 > limit {
                out.push(format!(
                    "{} cache approaching its size limit ({}/{}). Consider increasing max_size.",
                    report.instance, report.stats.entries, report.max_size
                ));
            }

            if report.stats.requests() > 0 && report.stats.hit_rate < 30.0 {
                out.push(format!(
                    "{} cache has low hit rate ({:.2}%). Review caching strategy for this cache type.",
                    report.instance, report.stats.hit_rate
                ));
            }

            if !report.health.is_healthy {
                let last_check = report
                    .health
                    .last_check
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());
                out.push(format!(
                    "{} cache health check failing. Last check: {}, Failures: {}",
                    report.instance, last_check, report.health.consecutive_failures
                ));
            }
        }

        out
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
