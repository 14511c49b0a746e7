//! The tiered cache.

use super::backend::CacheStore;
use super::entry::{ttl_seconds, CacheEntry, PersistedRecord, RemoteEntry, StoredValue};
use super::health::{spawn_ticker, with_timeout, HealthMonitor, HealthSnapshot};
use super::pattern::{escape_glob, regex_to_glob};
use super::persistence::PersistenceStore;
use super::stats::{CacheStats, StatsTracker};
use super::CacheConfig;
use crate::error::{CacheError, Result};
use chrono::Utc;
use metrics::{counter, histogram};
use parking_lot::Mutex;
use regex::Regex;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Values that can live in a [`TieredCache`].
pub trait Cacheable: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Cacheable for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

// ═══════════════════════════════════════════════════════════════════════════════
// Local Tier
// ═══════════════════════════════════════════════════════════════════════════════

struct LocalTier<T> {
    entries: HashMap<String, CacheEntry<T>>,
    access_counter: u64,
    stats: StatsTracker,
}

impl<T> LocalTier<T> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            access_counter: 0,
            stats: StatsTracker::new(),
        }
    }

    fn next_order(&mut self) -> u64 {
        self.access_counter += 1;
        self.access_counter
    }

    /// Remove the entry with the smallest access order.
    fn evict_lru(&mut self) -> Option<String> {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.access_order)
            .map(|(key, _)| key.clone())?;
        self.entries.remove(&victim);
        self.stats.record_eviction();
        Some(victim)
    }
}

enum Lookup<T> {
    Missing,
    Expired,
    Found(Result<T>),
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tiered Cache
// ═══════════════════════════════════════════════════════════════════════════════

/// LRU+TTL cache layering a local map over an optional remote [`CacheStore`].
///
/// While the backend is healthy it is authoritative for reads; while it is
/// failing every operation runs against the local tier alone. No operation
/// on a built cache returns an error.
pub struct TieredCache<T> {
    name: String,
    config: CacheConfig,
    local: Mutex<LocalTier<T>>,
    backend: Option<Arc<dyn CacheStore>>,
    persistence: Option<Arc<dyn PersistenceStore>>,
    health: Arc<HealthMonitor>,
    persist_order: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
}

impl<T: Cacheable> TieredCache<T> {
    /// Start building a cache instance.
    pub fn builder(name: impl Into<String>) -> TieredCacheBuilder<T> {
        TieredCacheBuilder::new(name)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Get a value.
    #[instrument(skip(self), fields(cache = %self.name))]
    pub async fn get(&self, key: &str) -> Option<T> {
        let started = Instant::now();

        let value = match self.get_remote(key).await {
            Some(value) => {
                let mut local = self.local.lock();
                let order = local.next_order();
                if let Some(entry) = local.entries.get_mut(key) {
                    entry.touch(order);
                }
                local.stats.record_hit();
                Some(value)
            }
            None => self.get_local(key),
        };

        if value.is_some() {
            counter!("tiercache_hits_total", "cache" => self.name.clone()).increment(1);
        } else {
            counter!("tiercache_misses_total", "cache" => self.name.clone()).increment(1);
        }

        if self.config.performance_tracking {
            let elapsed = started.elapsed();
            self.local.lock().stats.record_response_time(elapsed);
            histogram!("tiercache_get_duration_seconds", "cache" => self.name.clone())
                .record(elapsed.as_secs_f64());
        }

        value
    }

    async fn get_remote(&self, key: &str) -> Option<T> {
        let backend = self.healthy_backend()?;
        let remote_key = self.scoped_key(key);
        let raw = self.call("get", backend.get(&remote_key)).await.ok()??;

        let decoded = RemoteEntry::parse(&raw).and_then(|entry| {
            if entry.is_expired() {
                Ok(None)
            } else {
                entry.decode::<T>().map(Some)
            }
        });

        match decoded {
            Ok(Some(value)) => {
                debug!(cache = %self.name, key = key, "Remote hit");
                Some(value)
            }
            Ok(None) => {
                debug!(cache = %self.name, key = key, "Dropping expired remote entry");
                let _ = self.call("delete", backend.delete(&remote_key)).await;
                None
            }
            Err(e) => {
                e.log();
                let _ = self.call("delete", backend.delete(&remote_key)).await;
                None
            }
        }
    }

    fn get_local(&self, key: &str) -> Option<T> {
        let (value, error) = {
            let mut local = self.local.lock();
            let order = local.next_order();
            let now = Utc::now();

            let lookup = match local.entries.get_mut(key) {
                None => Lookup::Missing,
                Some(entry) if entry.is_expired_at(now) => Lookup::Expired,
                Some(entry) => {
                    entry.touch(order);
                    Lookup::Found(entry.value.decode())
                }
            };

            match lookup {
                Lookup::Found(Ok(value)) => {
                    local.stats.record_hit();
                    (Some(value), None)
                }
                Lookup::Found(Err(e)) => {
                    local.entries.remove(key);
                    local.stats.record_miss();
                    (None, Some(e))
                }
                Lookup::Expired => {
                    local.entries.remove(key);
                    local.stats.record_miss();
                    (None, None)
                }
                Lookup::Missing => {
                    local.stats.record_miss();
                    (None, None)
                }
            }
        };

        if let Some(e) = error {
            e.log();
        }
        value
    }

    /// Get every unexpired local entry whose key matches, sorted by key.
    ///
    /// Does not touch access order or statistics.
    pub fn get_by_pattern(&self, pattern: &Regex) -> Vec<(String, T)> {
        let now = Utc::now();
        let mut matches: Vec<(String, T)> = {
            let local = self.local.lock();
            local
                .entries
                .iter()
                .filter(|(key, entry)| !entry.is_expired_at(now) && pattern.is_match(key))
                .filter_map(|(key, entry)| entry.value.decode().ok().map(|v| (key.clone(), v)))
                .collect()
        };
        matches.sort_by(|a, b| a.0.cmp(&b.0));
        matches
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Store a value. `None` or a zero TTL uses the configured default.
    #[instrument(skip(self, value), fields(cache = %self.name))]
    pub async fn set(&self, key: &str, value: T, ttl: Option<Duration>) {
        let ttl = ttl
            .filter(|ttl| !ttl.is_zero())
            .unwrap_or(self.config.default_ttl);

        let stored = match StoredValue::encode(value, self.config.compression_threshold_bytes) {
            Ok(stored) => stored,
            Err(e) => {
                e.log();
                warn!(cache = %self.name, key = key, "Value could not be serialized, not cached");
                return;
            }
        };
        let mut entry = CacheEntry::new(stored, ttl, 0);

        if let Some(backend) = self.healthy_backend() {
            match RemoteEntry::from_entry(&entry).and_then(|remote| remote.to_json_string()) {
                Ok(raw) => {
                    let _ = self
                        .call("set", backend.set(&self.scoped_key(key), raw, ttl_seconds(ttl)))
                        .await;
                }
                Err(e) => e.log(),
            }
        }

        let persisted = self
            .persistence()
            .map(|_| PersistedRecord::from_entry(&entry).and_then(|r| Ok(serde_json::to_string(&r)?)));

        let _persisting = self.persist_guard().await;
        let evicted = {
            let mut local = self.local.lock();
            let evicted = if !local.entries.contains_key(key)
                && local.entries.len() >= self.config.max_size
            {
                local.evict_lru()
            } else {
                None
            };
            entry.access_order = local.next_order();
            local.entries.insert(key.to_string(), entry);
            local.stats.record_set();
            evicted
        };

        counter!("tiercache_sets_total", "cache" => self.name.clone()).increment(1);

        if let Some(victim) = evicted {
            counter!("tiercache_evictions_total", "cache" => self.name.clone()).increment(1);
            debug!(cache = %self.name, evicted = %victim, "Evicted least recently used entry");
            self.unpersist(&victim).await;
        }

        if let (Some(store), Some(record)) = (self.persistence(), persisted) {
            let result = match record {
                Ok(raw) => store.put(&self.scoped_key(key), raw).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                e.log();
            }
        }
    }

    /// Delete a key from both tiers. Returns whether a local entry existed.
    #[instrument(skip(self), fields(cache = %self.name))]
    pub async fn delete(&self, key: &str) -> bool {
        if let Some(backend) = self.healthy_backend() {
            let _ = self.call("delete", backend.delete(&self.scoped_key(key))).await;
        }

        let _persisting = self.persist_guard().await;
        let existed = {
            let mut local = self.local.lock();
            let existed = local.entries.remove(key).is_some();
            if existed {
                local.stats.record_deletes(1);
            }
            existed
        };

        self.unpersist(key).await;
        existed
    }

    /// Empty this instance in both tiers and drop its persisted records.
    ///
    /// Only keys under this instance's remote namespace are deleted; other
    /// users of a shared backend keep theirs. Returns the number of distinct
    /// keys removed.
    #[instrument(skip(self), fields(cache = %self.name))]
    pub async fn clear(&self) -> usize {
        let mut removed = self.remove_remote(None).await;

        let _persisting = self.persist_guard().await;
        let local_keys: Vec<String> = {
            let mut local = self.local.lock();
            let keys: Vec<String> = local.entries.drain().map(|(key, _)| key).collect();
            local.stats.record_deletes(keys.len() as u64);
            keys
        };

        if let Some(store) = self.persistence() {
            if let Err(e) = store.remove_prefix(&self.scoped_key("")).await {
                e.log();
            }
        }
        removed.extend(local_keys);

        info!(cache = %self.name, removed = removed.len(), "Cache cleared");
        removed.len()
    }

    /// Delete every key matching `pattern` from both tiers.
    ///
    /// Returns the number of distinct keys removed.
    #[instrument(skip(self, pattern), fields(cache = %self.name, pattern = %pattern.as_str()))]
    pub async fn invalidate_by_pattern(&self, pattern: &Regex) -> usize {
        let mut removed = self.remove_remote(Some(pattern)).await;

        let _persisting = self.persist_guard().await;
        let local_keys: Vec<String> = {
            let mut local = self.local.lock();
            let keys: Vec<String> = local
                .entries
                .keys()
                .filter(|key| pattern.is_match(key))
                .cloned()
                .collect();
            for key in &keys {
                local.entries.remove(key);
            }
            local.stats.record_deletes(keys.len() as u64);
            keys
        };

        for key in &local_keys {
            self.unpersist(key).await;
        }
        removed.extend(local_keys);

        info!(cache = %self.name, removed = removed.len(), "Invalidated entries by pattern");
        removed.len()
    }

    /// Populate the keys that are not cached yet, fetching them concurrently.
    ///
    /// Fetch failures are logged and skipped. Returns the number of keys
    /// that were fetched and stored.
    #[instrument(skip_all, fields(cache = %self.name))]
    pub async fn prefetch<I, F, Fut, E>(&self, keys: I, fetcher: F, ttl: Option<Duration>) -> usize
    where
        I: IntoIterator<Item = String>,
        F: Fn(String) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        let fetcher = &fetcher;
        let tasks = keys.into_iter().map(|key| async move {
            if self.get(&key).await.is_some() {
                return false;
            }
            match fetcher(key.clone()).await {
                Ok(value) => {
                    self.set(&key, value, ttl).await;
                    true
                }
                Err(e) => {
                    warn!(cache = %self.name, key = %key, error = %e, "Prefetch failed");
                    false
                }
            }
        });

        let populated = futures::future::join_all(tasks)
            .await
            .into_iter()
            .filter(|populated| *populated)
            .count();

        info!(cache = %self.name, populated = populated, "Prefetch complete");
        populated
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Introspection
    // ─────────────────────────────────────────────────────────────────────────

    /// Get a statistics snapshot.
    pub fn get_stats(&self) -> CacheStats {
        let local = self.local.lock();
        local.stats.snapshot(local.entries.len())
    }

    /// Get the backend health state.
    pub fn get_health_status(&self) -> HealthSnapshot {
        self.health.snapshot()
    }

    /// Ping the backend now instead of waiting for the next tick.
    pub async fn check_health(&self) -> HealthSnapshot {
        if let Some(backend) = &self.backend {
            self.health
                .ping(backend.as_ref(), self.config.backend_timeout)
                .await;
        }
        self.health.snapshot()
    }

    /// Number of local entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.local.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Stop the health ticker.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            self.shutdown.cancel();
            debug!(cache = %self.name, "Cache shut down");
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn healthy_backend(&self) -> Option<&Arc<dyn CacheStore>> {
        self.backend.as_ref().filter(|_| self.health.is_healthy())
    }

    /// Run a backend call under the timeout and record the outcome.
    async fn call<R>(&self, operation: &'static str, fut: impl Future<Output = Result<R>>) -> Result<R> {
        let result = with_timeout(operation, self.config.backend_timeout, fut).await;
        match &result {
            Ok(_) => self.health.record_success(),
            Err(e) => self.health.record_failure(e),
        }
        result
    }

    fn persistence(&self) -> Option<&Arc<dyn PersistenceStore>> {
        self.persistence
            .as_ref()
            .filter(|_| self.config.persist_locally)
    }

    /// Key under this instance's namespace, used remotely and for persisted
    /// records.
    fn scoped_key(&self, key: &str) -> String {
        format!("{}:{}", self.name, key)
    }

    /// Held across a local mutation and its persisted mirror so a slower
    /// write cannot land after a later delete.
    async fn persist_guard(&self) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        match self.persistence() {
            Some(_) => Some(self.persist_order.lock().await),
            None => None,
        }
    }

    /// Delete this instance's remote keys, all of them or those matching
    /// `pattern`. Returns the unscoped keys that were removed.
    async fn remove_remote(&self, pattern: Option<&Regex>) -> HashSet<String> {
        let mut removed = HashSet::new();
        let Some(backend) = self.healthy_backend() else {
            return removed;
        };

        let namespace = self.scoped_key("");
        let mut glob = namespace.clone();
        escape_glob(&mut glob);
        glob.push_str(&pattern.map_or_else(|| "*".to_string(), regex_to_glob));

        let Ok(keys) = self.call("keys", backend.keys(&glob)).await else {
            return removed;
        };
        for full_key in keys {
            let Some(key) = full_key.strip_prefix(&namespace) else {
                continue;
            };
            if pattern.is_some_and(|pattern| !pattern.is_match(key)) {
                continue;
            }
            match self.call("delete", backend.delete(&full_key)).await {
                Ok(deleted) if deleted > 0 => {
                    removed.insert(key.to_string());
                }
                Ok(_) => {}
                Err(_) if !self.health.is_healthy() => break,
                Err(_) => {}
            }
        }
        removed
    }

    async fn unpersist(&self, key: &str) {
        if let Some(store) = self.persistence() {
            if let Err(e) = store.remove(&self.scoped_key(key)).await {
                e.log();
            }
        }
    }

    /// Load surviving persisted records into the local tier.
    async fn restore(&self) -> usize {
        let Some(store) = self.persistence() else {
            return 0;
        };

        let namespace = self.scoped_key("");
        let raw_records = match store.load(&namespace).await {
            Ok(records) => records,
            Err(e) => {
                e.log();
                return 0;
            }
        };

        let mut restored = Vec::new();
        let mut dropped = Vec::new();
        for (full_key, raw) in raw_records {
            match self.decode_record(&raw) {
                Ok(Some(entry)) => {
                    let key = full_key[namespace.len()..].to_string();
                    restored.push((key, entry));
                }
                Ok(None) => dropped.push(full_key),
                Err(e) => {
                    warn!(cache = %self.name, key = %full_key, error = %e, "Dropping unreadable persisted record");
                    dropped.push(full_key);
                }
            }
        }

        // Keep the most recently written records when over capacity.
        restored.sort_by_key(|(_, entry)| entry.created_at);
        let overflow = restored.len().saturating_sub(self.config.max_size);
        dropped.extend(
            restored
                .drain(..overflow)
                .map(|(key, _)| self.scoped_key(&key)),
        );

        let count = restored.len();
        {
            let mut local = self.local.lock();
            for (key, mut entry) in restored {
                entry.access_order = local.next_order();
                local.entries.insert(key, entry);
            }
        }

        for full_key in &dropped {
            if let Err(e) = store.remove(full_key).await {
                e.log();
            }
        }

        info!(cache = %self.name, restored = count, dropped = dropped.len(), "Restored persisted entries");
        count
    }

    /// Decode one persisted record; `None` when it has expired.
    fn decode_record(&self, raw: &str) -> Result<Option<CacheEntry<T>>> {
        let record: PersistedRecord = serde_json::from_str(raw)?;
        let Some(remaining) = record.remaining_ttl() else {
            return Ok(None);
        };
        let created_at = record.created_at();

        let value: T = serde_json::from_value(record.value)?;
        let stored = StoredValue::encode(value, self.config.compression_threshold_bytes)?;
        let mut entry = CacheEntry::new(stored, remaining, 0);
        entry.created_at = created_at;
        Ok(Some(entry))
    }
}

impl<T> Drop for TieredCache<T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl<T> std::fmt::Debug for TieredCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("backend", &self.backend.as_ref().map(|b| b.name()))
            .field("health", &self.health.snapshot())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Builder
// ═══════════════════════════════════════════════════════════════════════════════

/// Builder for [`TieredCache`].
pub struct TieredCacheBuilder<T> {
    name: String,
    config: CacheConfig,
    backend: Option<Arc<dyn CacheStore>>,
    persistence: Option<Arc<dyn PersistenceStore>>,
    _value: PhantomData<fn() -> T>,
}

impl<T: Cacheable> TieredCacheBuilder<T> {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: CacheConfig::default(),
            backend: None,
            persistence: None,
            _value: PhantomData,
        }
    }

    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the remote tier. Without one the cache runs local-only.
    pub fn backend(mut self, backend: Arc<dyn CacheStore>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the remote tier if one is given.
    pub fn maybe_backend(mut self, backend: Option<Arc<dyn CacheStore>>) -> Self {
        self.backend = backend;
        self
    }

    pub fn persistence(mut self, store: Arc<dyn PersistenceStore>) -> Self {
        self.persistence = Some(store);
        self
    }

    pub fn maybe_persistence(mut self, store: Option<Arc<dyn PersistenceStore>>) -> Self {
        self.persistence = store;
        self
    }

    /// Validate, restore persisted entries and start the health ticker.
    ///
    /// Must be called inside a tokio runtime when a backend is set.
    pub async fn build(self) -> Result<TieredCache<T>> {
        self.config.validate()?;
        if self.name.is_empty() {
            return Err(CacheError::configuration("cache name must not be empty"));
        }
        if self.config.persist_locally && self.persistence.is_none() {
            return Err(CacheError::configuration(format!(
                "cache '{}' persists locally but no persistence store was given",
                self.name
            )));
        }

        let health = Arc::new(HealthMonitor::new(
            self.name.clone(),
            self.config.failure_threshold,
        ));
        let shutdown = CancellationToken::new();

        if let Some(backend) = &self.backend {
            spawn_ticker(
                health.clone(),
                backend.clone(),
                self.config.health_check_interval,
                self.config.backend_timeout,
                shutdown.clone(),
            );
        }

        let cache = TieredCache {
            name: self.name,
            config: self.config,
            local: Mutex::new(LocalTier::new()),
            backend: self.backend,
            persistence: self.persistence,
            health,
            persist_order: tokio::sync::Mutex::new(()),
            shutdown,
        };

        cache.restore().await;

        info!(
            cache = %cache.name,
            max_size = cache.config.max_size,
            default_ttl = ?cache.config.default_ttl,
            backend = cache.backend.as_ref().map(|b| b.name()).unwrap_or("none"),
            persisted = cache.config.persist_locally,
            "Cache instance ready"
        );

        Ok(cache)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
