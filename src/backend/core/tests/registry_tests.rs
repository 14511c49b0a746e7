//! Integration tests for the cache registry.
//!
//! Tests cover:
//! - Building instances from settings
//! - Pricing warm-up
//! - Per-instance and cross-instance invalidation
//! - Reports and health checks

mod common;

use common::FlakyBackend;
use regex::Regex;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tiercache_core::cache::registry::PricingCombo;
use tiercache_core::cache::{
    CacheInstance, CacheKey, CacheRegistry, CacheStore, Endpoint, FileStore, MemoryBackend, PersistenceStore,
};
use tiercache_core::config::{BackendKind, CachesSettings, Settings};

async fn local_registry(dir: &tempfile::TempDir) -> CacheRegistry {
    let store: Arc<dyn PersistenceStore> =
        Arc::new(FileStore::open(dir.path().join("cache.json")).await.unwrap());
    CacheRegistry::with_stores(&CachesSettings::default(), None, Some(store))
        .await
        .unwrap()
}

// ============================================================================
// Construction Tests
// ============================================================================

#[tokio::test]
async fn test_from_settings_builds_every_instance() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::default();
    settings.persistence.path = dir.path().join("cache.json");

    let registry = CacheRegistry::from_settings(&settings).await.unwrap();

    assert_eq!(registry.pricing().name(), "pricing");
    assert_eq!(registry.device().config().max_size, 200);
    assert_eq!(registry.api().config().max_size, 1000);
    registry.shutdown();
}

#[tokio::test]
async fn test_from_settings_without_backend() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::default();
    settings.backend.kind = BackendKind::None;
    settings.persistence.path = dir.path().join("cache.json");

    let registry = CacheRegistry::from_settings(&settings).await.unwrap();
    registry.api().set("k", json!(1), None).await;

    assert_eq!(registry.api().get("k").await, Some(json!(1)));
}

#[tokio::test]
async fn test_persisting_instance_requires_store() {
    let result = CacheRegistry::with_stores(&CachesSettings::default(), None, None).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_for_endpoint_routes_to_owning_instance() {
    let dir = tempfile::tempdir().unwrap();
    let registry = local_registry(&dir).await;

    assert_eq!(registry.for_endpoint(Endpoint::PricingCalculate).name(), "pricing");
    assert_eq!(registry.for_endpoint(Endpoint::DevicesModels).name(), "device");
    assert_eq!(registry.for_endpoint(Endpoint::ServiceAreas).name(), "api");
}

#[tokio::test]
async fn test_instances_are_isolated_over_shared_backend() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn PersistenceStore> =
        Arc::new(FileStore::open(dir.path().join("cache.json")).await.unwrap());
    let backend = Arc::new(MemoryBackend::new());
    let registry = CacheRegistry::with_stores(
        &CachesSettings::default(),
        Some(backend.clone()),
        Some(store),
    )
    .await
    .unwrap();

    registry.pricing().set("k", json!({"price": 129}), None).await;
    registry.pricing().set("user:1", json!(1), None).await;

    assert!(backend.exists("pricing:k").await.unwrap());
    assert!(!backend.exists("k").await.unwrap());
    assert!(registry.device().get("k").await.is_none());
    assert!(registry.device().is_empty());

    let removed = registry
        .api()
        .invalidate_by_pattern(&Regex::new("^user:").unwrap())
        .await;
    assert_eq!(removed, 0);
    assert_eq!(registry.pricing().get("user:1").await, Some(json!(1)));
}

#[tokio::test]
async fn test_invalidate_pricing_without_pattern_drops_remote_copy() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn PersistenceStore> =
        Arc::new(FileStore::open(dir.path().join("cache.json")).await.unwrap());
    let backend = Arc::new(MemoryBackend::new());
    let registry = CacheRegistry::with_stores(
        &CachesSettings::default(),
        Some(backend.clone()),
        Some(store),
    )
    .await
    .unwrap();
    registry.pricing().set("p", json!(99), None).await;
    registry.device().set("p", json!(1), None).await;

    assert_eq!(registry.invalidate_pricing(None).await, 1);

    assert!(registry.pricing().get("p").await.is_none());
    assert!(!backend.exists("pricing:p").await.unwrap());
    assert_eq!(registry.device().get("p").await, Some(json!(1)));
}

// ============================================================================
// Warm-up Tests
// ============================================================================

#[tokio::test]
async fn test_warm_pricing_fetches_each_combo_once() {
    let dir = tempfile::tempdir().unwrap();
    let registry = local_registry(&dir).await;
    let fetches = AtomicUsize::new(0);
    let combos = PricingCombo::popular();

    let fetch = |combo: PricingCombo| {
        fetches.fetch_add(1, Ordering::SeqCst);
        async move { Ok::<_, String>(json!({"model": combo.model, "price": 100})) }
    };

    let warmed = registry.warm_pricing(&combos, &fetch).await;
    assert_eq!(warmed, combos.len());
    assert_eq!(fetches.load(Ordering::SeqCst), combos.len());

    let again = registry.warm_pricing(&combos, &fetch).await;
    assert_eq!(again, 0);
    assert_eq!(fetches.load(Ordering::SeqCst), combos.len());

    let value = registry.pricing().get(&combos[0].key()).await.unwrap();
    assert_eq!(value["model"], json!("iPhone 15"));
}

#[tokio::test]
async fn test_warm_pricing_skips_failures() {
    let dir = tempfile::tempdir().unwrap();
    let registry = local_registry(&dir).await;
    let combos = vec![
        PricingCombo::new("mobile", "Apple", "iPhone 15", "screen_replacement"),
        PricingCombo::new("mobile", "Nokia", "3310", "screen_replacement"),
    ];

    let warmed = registry
        .warm_pricing(&combos, |combo: PricingCombo| async move {
            if combo.brand == "Nokia" {
                Err("pricing service unavailable".to_string())
            } else {
                Ok(json!({"price": 199}))
            }
        })
        .await;

    assert_eq!(warmed, 1);
    assert_eq!(registry.pricing().len(), 1);
}

// ============================================================================
// Invalidation Tests
// ============================================================================

#[tokio::test]
async fn test_invalidate_device_by_type() {
    let dir = tempfile::tempdir().unwrap();
    let registry = local_registry(&dir).await;
    registry.device().set("mobile_brands", json!(["apple"]), None).await;
    registry.device().set("mobile_models_apple", json!(["15"]), None).await;
    registry.device().set("laptop_brands", json!(["dell"]), None).await;

    let removed = registry.invalidate_device(Some("mobile")).await;

    assert_eq!(removed, 2);
    assert!(registry.device().get("laptop_brands").await.is_some());
}

#[tokio::test]
async fn test_invalidate_device_escapes_type() {
    let dir = tempfile::tempdir().unwrap();
    let registry = local_registry(&dir).await;
    registry.device().set("a.b_brands", json!(1), None).await;
    registry.device().set("axb_brands", json!(2), None).await;

    assert_eq!(registry.invalidate_device(Some("a.b")).await, 1);
    assert!(registry.device().get("axb_brands").await.is_some());
}

#[tokio::test]
async fn test_invalidate_device_without_type_clears() {
    let dir = tempfile::tempdir().unwrap();
    let registry = local_registry(&dir).await;
    registry.device().set("mobile_brands", json!(1), None).await;
    registry.device().set("laptop_brands", json!(2), None).await;

    assert_eq!(registry.invalidate_device(None).await, 2);
    assert!(registry.device().is_empty());
}

#[tokio::test]
async fn test_invalidate_pricing_by_pattern() {
    let dir = tempfile::tempdir().unwrap();
    let registry = local_registry(&dir).await;
    let apple = CacheKey::pricing("mobile", "Apple", "iPhone 15", "screen", "standard");
    let samsung = CacheKey::pricing("mobile", "Samsung", "S24", "screen", "standard");
    registry.pricing().set(&apple, json!(1), None).await;
    registry.pricing().set(&samsung, json!(2), None).await;

    let removed = registry
        .invalidate_pricing(Some(&Regex::new("brand:apple").unwrap()))
        .await;

    assert_eq!(removed, 1);
    assert!(registry.pricing().get(&samsung).await.is_some());
}

#[tokio::test]
async fn test_invalidate_everywhere() {
    let dir = tempfile::tempdir().unwrap();
    let registry = local_registry(&dir).await;
    registry.pricing().set("promo_1", json!(1), None).await;
    registry.device().set("promo_2", json!(2), None).await;
    registry.api().set("promo_3", json!(3), None).await;
    registry.api().set("other", json!(4), None).await;

    let removed = registry
        .invalidate_everywhere(&Regex::new("^promo_").unwrap())
        .await;

    assert_eq!(removed, 3);
    assert_eq!(registry.api().len(), 1);
}

#[tokio::test]
async fn test_clear_all() {
    let dir = tempfile::tempdir().unwrap();
    let registry = local_registry(&dir).await;
    for instance in CacheInstance::ALL {
        registry.get(instance).set("k", json!(1), None).await;
    }

    registry.clear_all().await;

    for instance in CacheInstance::ALL {
        assert!(registry.get(instance).is_empty());
    }
}

// ============================================================================
// Report Tests
// ============================================================================

#[tokio::test]
async fn test_report_aggregates_instances() {
    let dir = tempfile::tempdir().unwrap();
    let registry = local_registry(&dir).await;
    registry.pricing().set("k", json!(1), None).await;
    registry.pricing().get("k").await;
    registry.pricing().get("k").await;
    registry.device().get("missing").await;

    let report = registry.report();

    assert_eq!(report.instances.len(), 3);
    assert_eq!(report.total_hits, 2);
    assert_eq!(report.total_misses, 1);
    assert_eq!(report.overall_hit_rate, 66.67);

    let pricing = &report.instances[0];
    assert_eq!(pricing.instance, CacheInstance::Pricing);
    assert_eq!(pricing.stats.entries, 1);
    assert_eq!(pricing.max_size, 500);
}

#[tokio::test]
async fn test_report_serializes_camel_case() {
    let dir = tempfile::tempdir().unwrap();
    let registry = local_registry(&dir).await;

    let value = serde_json::to_value(registry.report()).unwrap();

    assert!(value.get("overallHitRate").is_some());
    assert_eq!(value["instances"][0]["instance"], json!("pricing"));
    assert!(value["instances"][0]["stats"].get("hitRate").is_some());
}

#[tokio::test]
async fn test_check_health_covers_every_instance() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn PersistenceStore> =
        Arc::new(FileStore::open(dir.path().join("cache.json")).await.unwrap());
    let backend = Arc::new(FlakyBackend::failing());
    let registry = CacheRegistry::with_stores(
        &CachesSettings::default(),
        Some(backend.clone()),
        Some(store),
    )
    .await
    .unwrap();

    for _ in 0..3 {
        registry.check_health().await;
    }
    let snapshots = registry.check_health().await;

    assert_eq!(snapshots.len(), 3);
    assert!(snapshots.iter().all(|(_, health)| !health.is_healthy));

    let recommendations = registry.report().recommendations();
    assert_eq!(
        recommendations
            .iter()
            .filter(|r| r.contains("health check failing"))
            .count(),
        3
    );
}
