//! Integration tests for local persistence.
//!
//! Tests cover:
//! - Restoring entries into a new instance
//! - Dropping expired and unreadable records on restore
//! - Capacity limits on restore
//! - Mirroring of deletes, evictions and clears
//! - Namespacing between instances sharing a store

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tiercache_core::cache::{CacheConfig, FileStore, PersistenceStore, TieredCache};
use tiercache_core::Result;

/// A [`FileStore`] whose writes take a while to land.
struct SlowWrites {
    inner: FileStore,
    delay: Duration,
}

#[async_trait]
impl PersistenceStore for SlowWrites {
    async fn load(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        self.inner.load(prefix).await
    }

    async fn put(&self, key: &str, raw: String) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.put(key, raw).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.inner.remove(key).await
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<usize> {
        self.inner.remove_prefix(prefix).await
    }
}

async fn persisted_cache(name: &str, store: Arc<dyn PersistenceStore>, max_size: usize) -> TieredCache<Value> {
    TieredCache::builder(name)
        .config(
            CacheConfig::builder()
                .max_size(max_size)
                .persist_locally(true)
                .build(),
        )
        .persistence(store)
        .build()
        .await
        .unwrap()
}

async fn open(path: &Path) -> Arc<FileStore> {
    Arc::new(FileStore::open(path).await.unwrap())
}

// ============================================================================
// Restore Tests
// ============================================================================

#[tokio::test]
async fn test_entries_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.json");

    {
        let cache = persisted_cache("pricing", open(&path).await, 10).await;
        cache.set("iphone_apple_15_screen_standard", json!({"price": 199}), None).await;
        cache.set("iphone_apple_15_battery_standard", json!({"price": 89}), None).await;
    }

    let cache = persisted_cache("pricing", open(&path).await, 10).await;

    assert_eq!(cache.len(), 2);
    assert_eq!(
        cache.get("iphone_apple_15_screen_standard").await,
        Some(json!({"price": 199}))
    );
}

#[tokio::test]
async fn test_restored_entries_keep_their_expiry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.json");

    {
        let cache = persisted_cache("device", open(&path).await, 10).await;
        cache.set("short", json!(1), Some(Duration::from_millis(200))).await;
    }

    let cache = persisted_cache("device", open(&path).await, 10).await;
    assert_eq!(cache.get("short").await, Some(json!(1)));

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(cache.get("short").await.is_none());
}

#[tokio::test]
async fn test_expired_records_are_dropped_on_restore() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.json");

    {
        let cache = persisted_cache("api", open(&path).await, 10).await;
        cache.set("stale", json!(1), Some(Duration::from_millis(50))).await;
        cache.set("fresh", json!(2), None).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let store = open(&path).await;
    let cache = persisted_cache("api", store.clone(), 10).await;

    assert_eq!(cache.len(), 1);
    let keys: Vec<String> = store.load("api:").await.unwrap().into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec!["api:fresh".to_string()]);
}

#[tokio::test]
async fn test_unreadable_records_are_dropped_on_restore() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir.path().join("cache.json")).await;
    store.put("api:broken", "{not json".to_string()).await.unwrap();
    store
        .put("api:wrong-shape", json!({"value": 1}).to_string())
        .await
        .unwrap();

    let cache = persisted_cache("api", store.clone(), 10).await;

    assert!(cache.is_empty());
    assert!(store.load("api:").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_restore_keeps_newest_records_within_capacity() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.json");

    {
        let cache = persisted_cache("pricing", open(&path).await, 5).await;
        for i in 0..5 {
            cache.set(&format!("key{}", i), json!(i), None).await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    let store = open(&path).await;
    let cache = persisted_cache("pricing", store.clone(), 3).await;

    assert_eq!(cache.len(), 3);
    assert!(cache.get("key0").await.is_none());
    assert!(cache.get("key1").await.is_none());
    assert_eq!(cache.get("key4").await, Some(json!(4)));
    assert_eq!(store.load("pricing:").await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_corrupt_file_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.json");
    tokio::fs::write(&path, b"garbage").await.unwrap();

    let cache = persisted_cache("pricing", open(&path).await, 10).await;
    assert!(cache.is_empty());

    cache.set("k", json!(1), None).await;
    let reopened = persisted_cache("pricing", open(&path).await, 10).await;
    assert_eq!(reopened.get("k").await, Some(json!(1)));
}

// ============================================================================
// Mirroring Tests
// ============================================================================

#[tokio::test]
async fn test_record_format() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.json");
    let cache = persisted_cache("pricing", open(&path).await, 10).await;

    cache.set("k", json!({"price": 42}), None).await;

    let file: serde_json::Map<String, Value> =
        serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
    let raw = file["pricing:k"].as_str().unwrap();
    let record: Value = serde_json::from_str(raw).unwrap();

    assert_eq!(record["value"], json!({"price": 42}));
    assert!(record["expires"].as_i64().unwrap() > record["created"].as_i64().unwrap());
}

#[tokio::test]
async fn test_compressed_values_persist_decoded() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir.path().join("cache.json")).await;
    let cache: TieredCache<Value> = TieredCache::builder("api")
        .config(
            CacheConfig::builder()
                .persist_locally(true)
                .compression_threshold_bytes(32)
                .build(),
        )
        .persistence(store.clone())
        .build()
        .await
        .unwrap();

    let large = json!({"body": "y".repeat(500)});
    cache.set("large", large.clone(), None).await;

    let records = store.load("api:").await.unwrap();
    let record: Value = serde_json::from_str(&records[0].1).unwrap();
    assert_eq!(record["value"], large);
}

#[tokio::test]
async fn test_delete_removes_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir.path().join("cache.json")).await;
    let cache = persisted_cache("device", store.clone(), 10).await;

    cache.set("a", json!(1), None).await;
    cache.set("b", json!(2), None).await;
    cache.delete("a").await;

    let keys: Vec<String> = store.load("device:").await.unwrap().into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec!["device:b".to_string()]);
}

#[tokio::test]
async fn test_eviction_removes_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir.path().join("cache.json")).await;
    let cache = persisted_cache("device", store.clone(), 2).await;

    cache.set("a", json!(1), None).await;
    cache.set("b", json!(2), None).await;
    cache.set("c", json!(3), None).await;

    let keys: Vec<String> = store.load("device:").await.unwrap().into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec!["device:b".to_string(), "device:c".to_string()]);
}

#[tokio::test]
async fn test_clear_only_touches_own_namespace() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir.path().join("cache.json")).await;
    let pricing = persisted_cache("pricing", store.clone(), 10).await;
    let device = persisted_cache("device", store.clone(), 10).await;

    pricing.set("k", json!(1), None).await;
    device.set("k", json!(2), None).await;

    pricing.clear().await;

    assert!(store.load("pricing:").await.unwrap().is_empty());
    assert_eq!(store.load("device:").await.unwrap().len(), 1);
    assert_eq!(device.get("k").await, Some(json!(2)));
}

#[tokio::test]
async fn test_disabled_persistence_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir.path().join("cache.json")).await;
    let cache: TieredCache<Value> = TieredCache::builder("api")
        .config(CacheConfig::builder().persist_locally(false).build())
        .persistence(store.clone())
        .build()
        .await
        .unwrap();

    cache.set("k", json!(1), None).await;

    assert!(store.load("").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_during_slow_write_is_not_undone() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SlowWrites {
        inner: FileStore::open(dir.path().join("cache.json")).await.unwrap(),
        delay: Duration::from_millis(50),
    });
    let cache = persisted_cache("pricing", store.clone(), 10).await;

    tokio::join!(cache.set("k", json!(1), None), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.delete("k").await
    });

    assert!(cache.is_empty());
    assert!(store.load("pricing:").await.unwrap().is_empty());
}
