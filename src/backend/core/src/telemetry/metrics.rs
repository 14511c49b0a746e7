//! Prometheus metrics for cache operations.
//!
//! Every cache instance labels its metrics with `cache = <instance name>`.
//! Recording is always on; the exporter is only installed when enabled, so
//! without it the `metrics` macros are no-ops.

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether the Prometheus exporter is installed
    #[serde(default)]
    pub enabled: bool,

    /// Address of the Prometheus scrape endpoint
    #[serde(default = "default_metrics_endpoint")]
    pub endpoint: String,

    /// Histogram buckets for get durations (in seconds)
    #[serde(default = "default_duration_buckets")]
    pub duration_buckets: Vec<f64>,

    /// Global labels added to all metrics
    #[serde(default)]
    pub global_labels: HashMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_metrics_endpoint(),
            duration_buckets: default_duration_buckets(),
            global_labels: HashMap::new(),
        }
    }
}

fn default_metrics_endpoint() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_duration_buckets() -> Vec<f64> {
    vec![
        0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
    ]
}

/// Initialize the metrics subsystem.
///
/// Installs the Prometheus recorder with an HTTP scrape listener on
/// `config.endpoint`. Must run inside a tokio runtime.
///
/// # Errors
///
/// Returns an error if the endpoint is not a socket address, the buckets are
/// empty, or a recorder is already installed.
pub fn init_metrics(config: &MetricsConfig, service_name: &str) -> anyhow::Result<()> {
    if !config.enabled {
        describe_metrics();
        return Ok(());
    }

    let endpoint: SocketAddr = config.endpoint.parse()?;

    let mut builder = PrometheusBuilder::new()
        .with_http_listener(endpoint)
        .add_global_label("service", service_name);

    for (key, value) in &config.global_labels {
        builder = builder.add_global_label(key, value);
    }

    builder
        .set_buckets(&config.duration_buckets)?
        .install()?;

    describe_metrics();

    tracing::info!(
        service_name = %service_name,
        endpoint = %endpoint,
        "Metrics exporter listening"
    );

    Ok(())
}

/// Register all metric descriptions.
pub fn describe_metrics() {
    describe_counter!("tiercache_hits_total", "Gets answered from either tier");
    describe_counter!("tiercache_misses_total", "Gets that found nothing");
    describe_counter!("tiercache_sets_total", "Values written to the local tier");
    describe_counter!(
        "tiercache_evictions_total",
        "Local entries evicted to stay within max_size"
    );
    describe_histogram!(
        "tiercache_get_duration_seconds",
        Unit::Seconds,
        "Latency of cache gets"
    );

    describe_counter!(
        "tiercache_backend_failures_total",
        "Remote tier calls that errored or timed out"
    );
    describe_gauge!(
        "tiercache_backend_healthy",
        "Remote tier health (1=healthy, 0=unhealthy)"
    );
    describe_counter!(
        "tiercache_backend_scans_total",
        "Key listings issued against Redis"
    );

    describe_counter!("tiercache_errors_total", "Cache errors by code and category");
}
