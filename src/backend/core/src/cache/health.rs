//! Backend health monitoring.
//!
//! Tracks consecutive backend failures and periodic liveness pings.
//! The monitor gates whether a [`TieredCache`](super::TieredCache) consults
//! its remote tier at all.

use super::backend::CacheStore;
use crate::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Backend health states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    /// Remote tier is consulted
    Healthy,
    /// Remote tier is skipped; operations run local-only
    Unhealthy,
}

/// Point-in-time view of the health state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub is_healthy: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl HealthSnapshot {
    /// Get the state as an enum.
    pub fn status(&self) -> HealthStatus {
        if self.is_healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }
}

#[derive(Debug)]
struct HealthState {
    is_healthy: bool,
    last_check: Option<DateTime<Utc>>,
    consecutive_failures: u32,
}

/// Health state machine for one cache instance.
#[derive(Debug)]
pub struct HealthMonitor {
    cache_name: String,
    state: Mutex<HealthState>,
    failure_threshold: u32,
}

impl HealthMonitor {
    /// Default number of consecutive failures that marks the backend unhealthy.
    pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

    /// Create a monitor in the HEALTHY state.
    pub fn new(cache_name: impl Into<String>, failure_threshold: u32) -> Self {
        let cache_name = cache_name.into();
        gauge!("tiercache_backend_healthy", "cache" => cache_name.clone()).set(1.0);
        Self {
            cache_name,
            state: Mutex::new(HealthState {
                is_healthy: true,
                last_check: None,
                consecutive_failures: 0,
            }),
            failure_threshold: failure_threshold.max(1),
        }
    }

    /// Check if the remote tier should be consulted.
    pub fn is_healthy(&self) -> bool {
        self.state.lock().is_healthy
    }

    /// Get the current state.
    pub fn status(&self) -> HealthStatus {
        self.snapshot().status()
    }

    /// Get a copy of the health state.
    pub fn snapshot(&self) -> HealthSnapshot {
        let state = self.state.lock();
        HealthSnapshot {
            is_healthy: state.is_healthy,
            last_check: state.last_check,
            consecutive_failures: state.consecutive_failures,
        }
    }

    /// Record a successful backend call.
    pub fn record_success(&self) {
        let recovered = {
            let mut state = self.state.lock();
            state.consecutive_failures = 0;
            !std::mem::replace(&mut state.is_healthy, true)
        };

        if recovered {
            gauge!("tiercache_backend_healthy", "cache" => self.cache_name.clone()).set(1.0);
            tracing::info!(cache = %self.cache_name, "Cache backend recovered, remote tier re-enabled");
        }
    }

    /// Record a failed backend call.
    pub fn record_failure(&self, error: &CacheError) {
        counter!("tiercache_backend_failures_total", "cache" => self.cache_name.clone())
            .increment(1);

        let (failures, tripped) = {
            let mut state = self.state.lock();
            state.consecutive_failures += 1;
            let tripped = state.is_healthy && state.consecutive_failures >= self.failure_threshold;
            if tripped {
                state.is_healthy = false;
            }
            (state.consecutive_failures, tripped)
        };

        if tripped {
            gauge!("tiercache_backend_healthy", "cache" => self.cache_name.clone()).set(0.0);
            tracing::warn!(
                cache = %self.cache_name,
                failures = failures,
                threshold = self.failure_threshold,
                error = %error,
                "Cache backend marked unhealthy, falling back to local tier"
            );
        } else {
            tracing::debug!(
                cache = %self.cache_name,
                failures = failures,
                error = %error,
                "Cache backend call failed"
            );
        }
    }

    /// Issue one liveness ping and record the outcome.
    ///
    /// Returns whether the backend answered `PONG`.
    pub async fn ping(&self, backend: &dyn CacheStore, timeout: Duration) -> bool {
        let result = with_timeout("ping", timeout, backend.ping()).await;
        self.state.lock().last_check = Some(Utc::now());

        match result {
            Ok(reply) if reply == "PONG" => {
                self.record_success();
                true
            }
            Ok(reply) => {
                self.record_failure(&CacheError::unexpected_reply(reply));
                false
            }
            Err(error) => {
                self.record_failure(&error);
                false
            }
        }
    }
}

/// Run a backend call under a timeout. Elapsing counts as a backend error.
pub(crate) async fn with_timeout<T, F>(operation: &'static str, timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(CacheError::backend_timeout(operation, timeout)),
    }
}

/// Spawn the periodic ping task.
///
/// The task pings on every tick, whatever the current state, and stops when
/// `token` is cancelled.
pub(crate) fn spawn_ticker(
    monitor: Arc<HealthMonitor>,
    backend: Arc<dyn CacheStore>,
    interval: Duration,
    timeout: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    monitor.ping(backend.as_ref(), timeout).await;
                }
            }
        }

        tracing::debug!(cache = %monitor.cache_name, "Health ticker stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::MemoryBackend;

    #[test]
    fn test_starts_healthy() {
        let monitor = HealthMonitor::new("test", 3);
        let snapshot = monitor.snapshot();
        assert!(snapshot.is_healthy);
        assert_eq!(snapshot.consecutive_failures, 0);
        assert!(snapshot.last_check.is_none());
    }

    #[test]
    fn test_trips_after_threshold() {
        let monitor = HealthMonitor::new("test", 3);
        let error = CacheError::backend_unavailable("down");

        monitor.record_failure(&error);
        monitor.record_failure(&error);
        assert_eq!(monitor.status(), HealthStatus::Healthy);

        monitor.record_failure(&error);
        assert_eq!(monitor.status(), HealthStatus::Unhealthy);
        assert_eq!(monitor.snapshot().consecutive_failures, 3);
    }

    #[test]
    fn test_success_resets_counter() {
        let monitor = HealthMonitor::new("test", 3);
        let error = CacheError::backend_unavailable("down");

        monitor.record_failure(&error);
        monitor.record_failure(&error);
        monitor.record_success();
        monitor.record_failure(&error);

        assert!(monitor.is_healthy());
        assert_eq!(monitor.snapshot().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_ping_recovers() {
        let monitor = HealthMonitor::new("test", 1);
        monitor.record_failure(&CacheError::backend_unavailable("down"));
        assert!(!monitor.is_healthy());

        let backend = MemoryBackend::new();
        assert!(monitor.ping(&backend, Duration::from_secs(1)).await);

        let snapshot = monitor.snapshot();
        assert!(snapshot.is_healthy);
        assert_eq!(snapshot.consecutive_failures, 0);
        assert!(snapshot.last_check.is_some());
    }

    #[tokio::test]
    async fn test_timeout_is_an_error() {
        let result: Result<()> = with_timeout("get", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert_eq!(result.unwrap_err().code(), crate::error::ErrorCode::BackendTimeout);
    }
}
