//! Error handling for the tiered cache.
//!
//! This module provides:
//! - A single error type carrying a machine-readable [`ErrorCode`]
//! - Retryability and severity classification
//! - Error logging with tracing integration
//! - Metrics integration for error tracking
//!
//! Errors are only ever returned from construction paths (settings loading,
//! backend connection, cache building). Per-operation failures are caught,
//! logged and absorbed inside [`TieredCache`](crate::cache::TieredCache).

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Backend Errors (2100-2199)
    BackendUnavailable,
    BackendTimeout,
    UnexpectedReply,

    // Serialization Errors (2200-2299)
    SerializationError,
    DeserializationError,

    // Persistence Errors (2300-2399)
    PersistenceError,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    InvalidPattern,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::BackendUnavailable => 2100,
            Self::BackendTimeout => 2101,
            Self::UnexpectedReply => 2102,

            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,

            Self::PersistenceError => 2300,

            Self::ConfigurationError => 5000,
            Self::InvalidPattern => 5001,
        }
    }

    /// Check if this error is retryable.
    ///
    /// Backend errors count toward the health monitor's failure threshold;
    /// everything else is a property of the data or the configuration.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable | Self::BackendTimeout | Self::UnexpectedReply
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            2100..=2199 => "backend",
            2200..=2299 => "serialization",
            2300..=2399 => "persistence",
            5000..=5099 => "configuration",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Entry-level problems: a single value is dropped
    Low,
    /// Operational issues: the remote tier is degraded
    Medium,
    /// Startup failures
    High,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::SerializationError
            | ErrorCode::DeserializationError
            | ErrorCode::InvalidPattern => Self::Low,

            ErrorCode::BackendUnavailable
            | ErrorCode::BackendTimeout
            | ErrorCode::UnexpectedReply
            | ErrorCode::PersistenceError => Self::Medium,

            ErrorCode::ConfigurationError => Self::High,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The error type for the cache layer.
#[derive(Error, Debug)]
pub struct CacheError {
    /// Machine-readable error code
    code: ErrorCode,

    /// Human-readable message
    message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl CacheError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and message.
    pub fn new(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            message: message.into(),
            internal_message: None,
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both a message and internal detail.
    pub fn with_internal(
        code: ErrorCode,
        message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// The remote tier could not be reached or rejected the command.
    pub fn backend_unavailable(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::BackendUnavailable, message)
    }

    /// A backend call exceeded the configured timeout.
    pub fn backend_timeout(operation: &'static str, timeout: std::time::Duration) -> Self {
        Self::new(
            ErrorCode::BackendTimeout,
            format!("Backend {} timed out after {:?}", operation, timeout),
        )
    }

    /// A ping returned something other than `PONG`.
    pub fn unexpected_reply(reply: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::UnexpectedReply,
            "Unexpected PING response",
            reply,
        )
    }

    /// Invalid construction-time configuration.
    pub fn configuration(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message)
    }

    /// A stored value could not be decoded.
    pub fn deserialization(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::DeserializationError, message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Check if this error should count against backend health.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    internal_message = ?self.internal_message,
                    source = ?self.source,
                    "Cache error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    internal_message = ?self.internal_message,
                    "Cache degraded"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    "Cache entry dropped"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            "tiercache_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<redis::RedisError> for CacheError {
    fn from(error: redis::RedisError) -> Self {
        let (code, message) = if error.is_timeout() {
            (ErrorCode::BackendTimeout, "Redis operation timed out")
        } else if error.is_connection_refusal() || error.is_connection_dropped() {
            (ErrorCode::BackendUnavailable, "Unable to connect to Redis")
        } else {
            (ErrorCode::BackendUnavailable, "A Redis error occurred")
        };

        Self::with_internal(code, message, error.to_string()).with_source(error)
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() || error.is_eof() {
            ErrorCode::DeserializationError
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON data", error.to_string())
            .with_source(error)
    }
}

impl From<std::io::Error> for CacheError {
    fn from(error: std::io::Error) -> Self {
        Self::with_internal(
            ErrorCode::PersistenceError,
            "An I/O error occurred",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<tokio::time::error::Elapsed> for CacheError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        Self::with_internal(
            ErrorCode::BackendTimeout,
            "Operation timed out",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<regex::Error> for CacheError {
    fn from(error: regex::Error) -> Self {
        Self::with_internal(ErrorCode::InvalidPattern, "Invalid key pattern", error.to_string())
            .with_source(error)
    }
}

impl From<config::ConfigError> for CacheError {
    fn from(error: config::ConfigError) -> Self {
        Self::with_internal(
            ErrorCode::ConfigurationError,
            "Configuration error occurred",
            error.to_string(),
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_categories() {
        assert_eq!(ErrorCode::BackendUnavailable.category(), "backend");
        assert_eq!(ErrorCode::BackendTimeout.category(), "backend");
        assert_eq!(ErrorCode::DeserializationError.category(), "serialization");
        assert_eq!(ErrorCode::PersistenceError.category(), "persistence");
        assert_eq!(ErrorCode::ConfigurationError.category(), "configuration");
    }

    #[test]
    fn test_backend_errors_are_retryable() {
        assert!(CacheError::backend_unavailable("down").is_retryable());
        assert!(CacheError::unexpected_reply("NOPE").is_retryable());
        assert!(!CacheError::configuration("bad").is_retryable());
        assert!(!CacheError::deserialization("bad").is_retryable());
    }

    #[test]
    fn test_display_includes_internal_message() {
        let error = CacheError::unexpected_reply("HELLO");
        let rendered = error.to_string();
        assert!(rendered.contains("UnexpectedReply"));
        assert!(rendered.contains("HELLO"));
    }

    #[test]
    fn test_serde_json_error_maps_to_deserialization() {
        let err = serde_json::from_str::<u32>("not json").unwrap_err();
        let error: CacheError = err.into();
        assert_eq!(error.code(), ErrorCode::DeserializationError);
        assert_eq!(error.severity(), ErrorSeverity::Low);
    }
}
