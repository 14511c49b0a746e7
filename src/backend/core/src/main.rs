//! tiercache - cache service entry point
//!
//! Builds the named cache instances, logs their report periodically and
//! shuts them down on Ctrl-C or SIGTERM.

use tiercache_core::{cache::CacheRegistry, config::Settings, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let settings = match std::env::var("TIERCACHE_CONFIG") {
        Ok(path) => Settings::from_file(&path)?,
        Err(_) => Settings::load().unwrap_or_else(|e| {
            eprintln!("Warning: Could not load config: {}. Using defaults.", e);
            Settings::default()
        }),
    };

    telemetry::init_telemetry(&settings.telemetry)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = ?settings.backend.kind,
        "Starting tiercache"
    );

    let registry = CacheRegistry::from_settings(&settings).await?;

    let mut ticker = tokio::time::interval(settings.report_interval);
    ticker.tick().await;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => log_report(&registry),
        }
    }

    registry.shutdown();
    log_report(&registry);
    tracing::info!("tiercache shutdown complete");

    Ok(())
}

fn log_report(registry: &CacheRegistry) {
    let report = registry.report();
    for instance in &report.instances {
        tracing::info!(
            cache = %instance.instance,
            entries = instance.stats.entries,
            hits = instance.stats.hits,
            misses = instance.stats.misses,
            hit_rate = instance.stats.hit_rate,
            evictions = instance.stats.evictions,
            healthy = instance.health.is_healthy,
            "Cache instance report"
        );
    }
    tracing::info!(
        overall_hit_rate = report.overall_hit_rate,
        average_response_time_ms = report.average_response_time_ms,
        "Cache report"
    );
    for recommendation in report.recommendations() {
        tracing::warn!(recommendation = %recommendation, "Cache recommendation");
    }
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
