//! Telemetry: logging and metrics.
//!
//! - **Logging**: structured JSON/pretty/compact output through `tracing-subscriber`
//! - **Metrics**: cache counters and gauges, optionally exported to Prometheus
//!
//! # Example
//!
//! ```rust,no_run
//! use tiercache_core::telemetry::{init_telemetry, TelemetryConfig};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = TelemetryConfig::default();
//! init_telemetry(&config).expect("Failed to initialize telemetry");
//! # }
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use metrics::{describe_metrics, init_metrics, MetricsConfig};

use serde::{Deserialize, Serialize};

/// Unified telemetry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Service name attached to metrics
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Environment (development, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            environment: default_environment(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

fn default_service_name() -> String {
    "tiercache".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

/// Initialize logging and metrics.
///
/// Call once at startup, inside the tokio runtime when the Prometheus
/// listener is enabled.
///
/// # Errors
///
/// Returns an error if a subscriber or recorder is already installed or the
/// configuration is invalid.
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<()> {
    init_logging(&config.logging, &config.environment)?;
    init_metrics(&config.metrics, &config.service_name)?;
    Ok(())
}
