//! Configuration management.
//!
//! Settings are layered, lowest precedence first:
//! 1. Built-in defaults ([`Settings::default`])
//! 2. An optional `tiercache.{toml,yaml,json}` file (or an explicit path)
//! 3. `TIERCACHE__*` environment variables, `__` separating nested keys,
//!    e.g. `TIERCACHE__BACKEND__KIND=redis` or
//!    `TIERCACHE__CACHES__PRICING__MAX_SIZE=800`

use crate::cache::{CacheConfig, CacheInstance};
use crate::error::Result;
use crate::telemetry::TelemetryConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const ENV_PREFIX: &str = "TIERCACHE";
const DEFAULT_FILE: &str = "tiercache";

/// Main application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Logging and metrics
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Remote tier
    #[serde(default)]
    pub backend: BackendSettings,

    /// Durable local records
    #[serde(default)]
    pub persistence: PersistenceSettings,

    /// Named cache instances
    #[serde(default)]
    pub caches: CachesSettings,

    /// How often the binary logs the cache report
    #[serde(default = "default_report_interval", with = "humantime_serde")]
    pub report_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            telemetry: TelemetryConfig::default(),
            backend: BackendSettings::default(),
            persistence: PersistenceSettings::default(),
            caches: CachesSettings::default(),
            report_interval: default_report_interval(),
        }
    }
}

/// Which remote tier the registry connects to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Local tier only
    None,
    /// Process-local [`MemoryBackend`](crate::cache::MemoryBackend)
    #[default]
    Memory,
    /// [`RedisStore`](crate::cache::RedisStore)
    Redis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSettings {
    #[serde(default)]
    pub kind: BackendKind,

    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Namespace prepended to every Redis key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// SCAN batch size
    #[serde(default = "default_scan_count")]
    pub scan_count: usize,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
            scan_count: default_scan_count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceSettings {
    /// JSON file holding persisted records
    #[serde(default = "default_persistence_path")]
    pub path: PathBuf,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            path: default_persistence_path(),
        }
    }
}

/// Per-instance cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachesSettings {
    #[serde(default = "default_pricing")]
    pub pricing: CacheConfig,

    #[serde(default = "default_device")]
    pub device: CacheConfig,

    #[serde(default = "default_api")]
    pub api: CacheConfig,
}

impl CachesSettings {
    /// Get the configuration of one instance.
    pub fn get(&self, instance: CacheInstance) -> &CacheConfig {
        match instance {
            CacheInstance::Pricing => &self.pricing,
            CacheInstance::Device => &self.device,
            CacheInstance::Api => &self.api,
        }
    }
}

impl Default for CachesSettings {
    fn default() -> Self {
        Self {
            pricing: default_pricing(),
            device: default_device(),
            api: default_api(),
        }
    }
}

fn default_report_interval() -> Duration { Duration::from_secs(60) }
fn default_redis_url() -> String { "redis://127.0.0.1:6379".to_string() }
fn default_key_prefix() -> String { "tiercache:".to_string() }
fn default_scan_count() -> usize { 100 }
fn default_persistence_path() -> PathBuf { PathBuf::from("data/tiercache.json") }
fn default_pricing() -> CacheConfig { CacheInstance::Pricing.default_config() }
fn default_device() -> CacheConfig { CacheInstance::Device.default_config() }
fn default_api() -> CacheConfig { CacheInstance::Api.default_config() }

impl Settings {
    /// Load configuration from the optional default file and the environment.
    pub fn load() -> Result<Self> {
        Self::build(config::File::with_name(DEFAULT_FILE).required(false))
    }

    /// Load from a specific file path, then the environment.
    pub fn from_file(path: &str) -> Result<Self> {
        Self::build(config::File::with_name(path))
    }

    fn build(file: config::File<config::FileSourceFile, config::FileFormat>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Settings::default())?)
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = settings.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate every cache instance.
    pub fn validate(&self) -> Result<()> {
        for instance in CacheInstance::ALL {
            self.caches.get(instance).validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_instances() {
        let settings = Settings::default();
        assert_eq!(settings.caches.pricing.max_size, 500);
        assert_eq!(settings.caches.device.default_ttl, Duration::from_secs(3600));
        assert!(!settings.caches.api.persist_locally);
        assert_eq!(settings.backend.kind, BackendKind::Memory);
    }

    #[test]
    fn test_file_overrides_keep_instance_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[backend]
kind = "none"

[caches.pricing]
max_size = 800
default_ttl = "15m"
"#
        )
        .unwrap();

        let settings = Settings::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(settings.backend.kind, BackendKind::None);
        assert_eq!(settings.caches.pricing.max_size, 800);
        assert_eq!(settings.caches.pricing.default_ttl, Duration::from_secs(900));
        assert!(settings.caches.pricing.persist_locally);
        assert_eq!(settings.caches.device.max_size, 200);
    }

    #[test]
    fn test_invalid_instance_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[caches.api]\nmax_size = 0").unwrap();

        assert!(Settings::from_file(file.path().to_str().unwrap()).is_err());
    }
}
