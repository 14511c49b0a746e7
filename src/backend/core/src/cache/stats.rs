//! Per-instance cache statistics.

use serde::Serialize;
use std::time::Duration;

/// Snapshot of a cache instance's statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,

    /// Current number of local entries
    pub entries: usize,

    /// `hits / (hits + misses) * 100`, 0 before the first get
    pub hit_rate: f64,

    /// Running mean over timed gets
    pub average_response_time_ms: f64,
}

impl CacheStats {
    /// Total number of completed gets.
    pub fn requests(&self) -> u64 {
        self.hits + self.misses
    }
}

/// Counters updated by the owning cache under its lock.
#[derive(Debug, Default)]
pub struct StatsTracker {
    stats: CacheStats,
    timed_gets: u64,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&mut self) {
        self.stats.hits += 1;
        self.refresh_hit_rate();
    }

    pub fn record_miss(&mut self) {
        self.stats.misses += 1;
        self.refresh_hit_rate();
    }

    pub fn record_set(&mut self) {
        self.stats.sets += 1;
    }

    pub fn record_deletes(&mut self, count: u64) {
        self.stats.deletes += count;
    }

    pub fn record_eviction(&mut self) {
        self.stats.evictions += 1;
    }

    /// Fold one get's latency into the running average.
    pub fn record_response_time(&mut self, elapsed: Duration) {
        self.timed_gets += 1;
        let sample = elapsed.as_secs_f64() * 1000.0;
        let mean = self.stats.average_response_time_ms;
        self.stats.average_response_time_ms = mean + (sample - mean) / self.timed_gets as f64;
    }

    fn refresh_hit_rate(&mut self) {
        let total = self.stats.requests();
        self.stats.hit_rate = if total == 0 {
            0.0
        } else {
            self.stats.hits as f64 / total as f64 * 100.0
        };
    }

    /// Copy the counters, stamping the current local size.
    pub fn snapshot(&self, entries: usize) -> CacheStats {
        CacheStats {
            entries,
            ..self.stats.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_is_a_percentage() {
        let mut tracker = StatsTracker::new();
        assert_eq!(tracker.snapshot(0).hit_rate, 0.0);

        tracker.record_hit();
        tracker.record_miss();
        assert_eq!(tracker.snapshot(0).hit_rate, 50.0);

        tracker.record_hit();
        tracker.record_hit();
        assert_eq!(tracker.snapshot(0).hit_rate, 75.0);
    }

    #[test]
    fn test_running_average() {
        let mut tracker = StatsTracker::new();
        tracker.record_response_time(Duration::from_millis(10));
        tracker.record_response_time(Duration::from_millis(20));
        tracker.record_response_time(Duration::from_millis(30));

        let avg = tracker.snapshot(0).average_response_time_ms;
        assert!((avg - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_carries_entry_count() {
        let mut tracker = StatsTracker::new();
        tracker.record_set();
        tracker.record_deletes(2);
        tracker.record_eviction();

        let stats = tracker.snapshot(7);
        assert_eq!(stats.entries, 7);
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.deletes, 2);
        assert_eq!(stats.evictions, 1);
    }
}
