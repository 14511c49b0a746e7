//! Deterministic cache key generation.
//!
//! This module provides:
//! - Endpoint key types with their default TTLs and owning cache instance
//! - A parameter-based key builder with normalization and exclusions
//! - Length capping for backend compatibility

use super::registry::CacheInstance;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;

/// Longest key handed to a backend before it is collapsed to a digest.
pub const MAX_KEY_LENGTH: usize = 250;

/// Hex characters of the digest kept in collapsed keys.
const DIGEST_CHARS: usize = 40;

// ═══════════════════════════════════════════════════════════════════════════════
// Endpoints
// ═══════════════════════════════════════════════════════════════════════════════

/// Cached endpoints with their key prefix, TTL and owning cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    /// Device brand listings
    DevicesBrands,

    /// Device model listings
    DevicesModels,

    /// Repair price calculation
    PricingCalculate,

    /// Service area lookups
    ServiceAreas,

    /// Service catalogue for pricing
    PricingServices,
}

impl Endpoint {
    /// Get the TTL for responses of this endpoint.
    pub fn default_ttl(&self) -> Duration {
        match self {
            Self::DevicesBrands => Duration::from_secs(3600),
            Self::DevicesModels => Duration::from_secs(3600),
            Self::PricingCalculate => Duration::from_secs(1800),
            Self::ServiceAreas => Duration::from_secs(86_400),
            Self::PricingServices => Duration::from_secs(3600),
        }
    }

    /// Get the key prefix.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::DevicesBrands => "brands",
            Self::DevicesModels => "models",
            Self::PricingCalculate => "pricing",
            Self::ServiceAreas => "service_areas",
            Self::PricingServices => "services",
        }
    }

    /// Get the cache instance that stores this endpoint's responses.
    pub fn instance(&self) -> CacheInstance {
        match self {
            Self::DevicesBrands | Self::DevicesModels => CacheInstance::Device,
            Self::PricingCalculate => CacheInstance::Pricing,
            Self::ServiceAreas | Self::PricingServices => CacheInstance::Api,
        }
    }

    /// Start a key for this endpoint.
    pub fn key(&self) -> CacheKey {
        CacheKey::new(self.prefix())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Parameter Values
// ═══════════════════════════════════════════════════════════════════════════════

/// A key parameter value. Only text is normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyParam {
    Text(String),
    Literal(String),
}

impl From<&str> for KeyParam {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for KeyParam {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&String> for KeyParam {
    fn from(value: &String) -> Self {
        Self::Text(value.clone())
    }
}

macro_rules! literal_param {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for KeyParam {
                fn from(value: $ty) -> Self {
                    Self::Literal(value.to_string())
                }
            }
        )*
    };
}

literal_param!(bool, i32, i64, u32, u64, usize, f64);

// ═══════════════════════════════════════════════════════════════════════════════
// Cache Key
// ═══════════════════════════════════════════════════════════════════════════════

/// Builder for parameter-based cache keys.
///
/// Parameters are sorted by name, so insertion order never changes the key.
#[derive(Debug, Clone)]
pub struct CacheKey {
    prefix: String,
    params: Vec<(String, KeyParam)>,
    excluded: Vec<String>,
    normalize: bool,
}

impl CacheKey {
    /// Create a key builder with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            params: Vec::new(),
            excluded: Vec::new(),
            normalize: true,
        }
    }

    /// Add a parameter. A repeated name replaces the earlier value.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<KeyParam>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.params.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.params.push((name, value)),
        }
        self
    }

    /// Add an optional parameter; `None` is skipped.
    pub fn param_opt<V: Into<KeyParam>>(self, name: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(value) => self.param(name, value),
            None => self,
        }
    }

    /// Drop a parameter name from the key.
    pub fn exclude(mut self, name: impl Into<String>) -> Self {
        self.excluded.push(name.into());
        self
    }

    /// Disable text normalization.
    pub fn raw(mut self) -> Self {
        self.normalize = false;
        self
    }

    /// Get the prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Build the key string.
    pub fn build(&self) -> String {
        let mut params: Vec<_> = self
            .params
            .iter()
            .filter(|(name, _)| !self.excluded.contains(name))
            .collect();
        params.sort_by(|a, b| a.0.cmp(&b.0));

        let parts: Vec<String> = params
            .into_iter()
            .map(|(name, value)| {
                let value = match value {
                    KeyParam::Text(text) if self.normalize => normalize(text),
                    KeyParam::Text(text) | KeyParam::Literal(text) => text.clone(),
                };
                format!("{}:{}", name, value)
            })
            .collect();

        let key = format!("{}_{}", self.prefix, parts.join("_"));
        if key.len() <= MAX_KEY_LENGTH {
            return key;
        }

        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        format!("{}_{}", self.prefix, &digest[..DIGEST_CHARS])
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.build())
    }
}

/// Lower-case, trim and replace whitespace runs with `_`.
fn normalize(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

// ═══════════════════════════════════════════════════════════════════════════════
// Convenience Constructors
// ═══════════════════════════════════════════════════════════════════════════════

impl CacheKey {
    /// Key for a price calculation.
    pub fn pricing(device_type: &str, brand: &str, model: &str, service: &str, tier: &str) -> String {
        Endpoint::PricingCalculate
            .key()
            .param("deviceType", device_type)
            .param("brand", brand)
            .param("model", model)
            .param("service", service)
            .param("tier", tier)
            .build()
    }

    /// Key for the brand listing of a device type.
    pub fn brands(device_type: &str) -> String {
        Endpoint::DevicesBrands
            .key()
            .param("deviceType", device_type)
            .build()
    }

    /// Key for the model listing of a brand.
    pub fn models(device_type: &str, brand: &str) -> String {
        Endpoint::DevicesModels
            .key()
            .param("deviceType", device_type)
            .param("brand", brand)
            .build()
    }
}
