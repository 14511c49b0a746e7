//! Cache entries and their storage formats.
//!
//! - [`StoredValue`]: how a value sits in the local tier (plain or compressed)
//! - [`CacheEntry`]: a local-tier entry with expiry and access bookkeeping
//! - [`RemoteEntry`]: the JSON document written to a [`CacheStore`](super::CacheStore)
//! - [`PersistedRecord`]: the JSON document written to a persistence store

use crate::error::{CacheError, ErrorCode, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::io::{Read, Write};
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Time helpers
// ═══════════════════════════════════════════════════════════════════════════════

/// Absolute expiry for a TTL starting at `now`.
pub(crate) fn expiry_from(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// TTL in whole seconds for the remote tier, rounded up, never zero.
pub(crate) fn ttl_seconds(ttl: Duration) -> u64 {
    let secs = ttl.as_secs().saturating_add(u64::from(ttl.subsec_nanos() > 0));
    secs.max(1)
}

fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Codec
// ═══════════════════════════════════════════════════════════════════════════════

/// gzip + base64 codec for values above the compression threshold.
pub mod codec {
    use super::*;

    /// Compress serialized JSON into a base64 string.
    pub fn compress(json: &[u8]) -> Result<String> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(json)
            .and_then(|_| encoder.finish())
            .map(|bytes| STANDARD.encode(bytes))
            .map_err(|e| {
                CacheError::with_internal(
                    ErrorCode::SerializationError,
                    "Failed to compress value",
                    e.to_string(),
                )
            })
    }

    /// Reverse [`compress`], returning the serialized JSON.
    pub fn decompress(encoded: &str) -> Result<Vec<u8>> {
        let bytes = STANDARD.decode(encoded).map_err(|e| {
            CacheError::with_internal(
                ErrorCode::DeserializationError,
                "Compressed value is not valid base64",
                e.to_string(),
            )
        })?;

        let mut decoder = GzDecoder::new(bytes.as_slice());
        let mut json = Vec::new();
        decoder.read_to_end(&mut json).map_err(|e| {
            CacheError::with_internal(
                ErrorCode::DeserializationError,
                "Failed to decompress value",
                e.to_string(),
            )
        })?;
        Ok(json)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Stored Value
// ═══════════════════════════════════════════════════════════════════════════════

/// A value as held by the local tier.
///
/// The representation is chosen once, at write time, from the serialized
/// size of the value.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue<T> {
    /// The value itself.
    Plain(T),
    /// `base64(gzip(json))` of the value.
    Compressed(String),
}

impl<T> StoredValue<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    /// Encode a value, compressing it when its JSON form is longer than
    /// `threshold` bytes. A threshold of zero disables compression.
    pub fn encode(value: T, threshold: usize) -> Result<Self> {
        let json = serde_json::to_vec(&value)?;
        if threshold > 0 && json.len() > threshold {
            Ok(Self::Compressed(codec::compress(&json)?))
        } else {
            Ok(Self::Plain(value))
        }
    }

    /// Recover the value.
    pub fn decode(&self) -> Result<T> {
        match self {
            Self::Plain(value) => Ok(value.clone()),
            Self::Compressed(encoded) => {
                let json = codec::decompress(encoded)?;
                Ok(serde_json::from_slice(&json)?)
            }
        }
    }

    /// Whether this value is held compressed.
    pub fn is_compressed(&self) -> bool {
        matches!(self, Self::Compressed(_))
    }

    /// JSON form used by the remote tier.
    fn to_json(&self) -> Result<serde_json::Value> {
        match self {
            Self::Plain(value) => Ok(serde_json::to_value(value)?),
            Self::Compressed(encoded) => Ok(serde_json::Value::String(encoded.clone())),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Local Entry
// ═══════════════════════════════════════════════════════════════════════════════

/// A local-tier cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    /// Stored value
    pub value: StoredValue<T>,

    /// Absolute expiry time
    pub expires_at: DateTime<Utc>,

    /// When this entry was written
    pub created_at: DateTime<Utc>,

    /// Last read or write
    pub last_accessed_at: DateTime<Utc>,

    /// Number of reads served by this entry
    pub hit_count: u64,

    /// LRU rank; larger is more recent
    pub access_order: u64,
}

impl<T> CacheEntry<T> {
    /// Create a fresh entry.
    pub fn new(value: StoredValue<T>, ttl: Duration, access_order: u64) -> Self {
        let now = Utc::now();
        Self {
            value,
            expires_at: expiry_from(now, ttl),
            created_at: now,
            last_accessed_at: now,
            hit_count: 0,
            access_order,
        }
    }

    /// Check if the entry has expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Check expiry against a given instant.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Get the remaining TTL.
    pub fn remaining_ttl(&self) -> Option<Duration> {
        self.expires_at
            .signed_duration_since(Utc::now())
            .to_std()
            .ok()
    }

    /// Record a read.
    pub(crate) fn touch(&mut self, access_order: u64) {
        self.last_accessed_at = Utc::now();
        self.hit_count += 1;
        self.access_order = access_order;
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Remote Entry
// ═══════════════════════════════════════════════════════════════════════════════

/// Entry document stored in the remote tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Plain JSON value, or the encoded string when `compressed`
    pub value: serde_json::Value,

    /// Expiry in epoch milliseconds
    pub expires: i64,

    /// Creation time in epoch milliseconds
    pub created: i64,

    /// Whether `value` is a compressed string
    #[serde(default)]
    pub compressed: bool,
}

impl RemoteEntry {
    /// Build the remote document for a local entry.
    pub fn from_entry<T>(entry: &CacheEntry<T>) -> Result<Self>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        Ok(Self {
            value: entry.value.to_json()?,
            expires: entry.expires_at.timestamp_millis(),
            created: entry.created_at.timestamp_millis(),
            compressed: entry.value.is_compressed(),
        })
    }

    /// Parse a raw document from the backend.
    pub fn parse(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Serialize for the backend.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Check if the entry has expired.
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp_millis() > self.expires
    }

    /// Decode the carried value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        if self.compressed {
            let encoded = self.value.as_str().ok_or_else(|| {
                CacheError::deserialization("Compressed remote entry does not hold a string")
            })?;
            let json = codec::decompress(encoded)?;
            Ok(serde_json::from_slice(&json)?)
        } else {
            Ok(T::deserialize(&self.value)?)
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Persisted Record
// ═══════════════════════════════════════════════════════════════════════════════

/// Durable local record: `{value, expires, created}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedRecord {
    /// Plain JSON value
    pub value: serde_json::Value,

    /// Expiry in epoch milliseconds
    pub expires: i64,

    /// Creation time in epoch milliseconds
    pub created: i64,
}

impl PersistedRecord {
    /// Build a record from a local entry. Compressed values are stored
    /// decoded so that a reload can re-apply the current threshold.
    pub fn from_entry<T>(entry: &CacheEntry<T>) -> Result<Self>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        let value = serde_json::to_value(entry.value.decode()?)?;
        Ok(Self {
            value,
            expires: entry.expires_at.timestamp_millis(),
            created: entry.created_at.timestamp_millis(),
        })
    }

    /// Remaining TTL, or `None` when the record has expired.
    pub fn remaining_ttl(&self) -> Option<Duration> {
        let expires = from_millis(self.expires)?;
        let remaining = expires.signed_duration_since(Utc::now());
        if remaining <= chrono::Duration::zero() {
            None
        } else {
            remaining.to_std().ok()
        }
    }

    /// Creation time, falling back to now for out-of-range values.
    pub fn created_at(&self) -> DateTime<Utc> {
        from_millis(self.created).unwrap_or_else(Utc::now)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
