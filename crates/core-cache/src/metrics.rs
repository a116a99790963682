//! Cache metrics: lock-free counters with derived rates
//!
//! Counters are process-wide for the owning manager and reset only via an
//! explicit [`CacheMetrics::reset`] call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Aggregate cache counters, updated on every operation.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    total_ops: AtomicU64,
    access_time_total_us: AtomicU64,
    access_samples: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self, access_time: Duration) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.total_ops.fetch_add(1, Ordering::Relaxed);
        self.record_access_time(access_time);
    }

    pub fn record_miss(&self, access_time: Duration) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.total_ops.fetch_add(1, Ordering::Relaxed);
        self.record_access_time(access_time);
    }

    pub fn record_write(&self) {
        self.total_ops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    fn record_access_time(&self, access_time: Duration) {
        self.access_time_total_us
            .fetch_add(access_time.as_micros() as u64, Ordering::Relaxed);
        self.access_samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset every counter to zero
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.total_ops.store(0, Ordering::Relaxed);
        self.access_time_total_us.store(0, Ordering::Relaxed);
        self.access_samples.store(0, Ordering::Relaxed);
    }

    /// Point-in-time snapshot with derived rates. Memory usage and entry
    /// count are supplied by the manager, which owns the memory tier.
    pub fn snapshot(&self, memory_usage_bytes: u64, entry_count: usize) -> CacheMetricsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let evictions = self.evictions.load(Ordering::Relaxed);
        let total_ops = self.total_ops.load(Ordering::Relaxed);
        let samples = self.access_samples.load(Ordering::Relaxed);
        let total_us = self.access_time_total_us.load(Ordering::Relaxed);

        let lookups = hits + misses;
        let hit_rate = if lookups > 0 {
            hits as f64 / lookups as f64
        } else {
            0.0
        };
        // Efficiency derates the hit rate by eviction churn: a cache that
        // hits often but also evicts constantly is doing less useful work.
        let efficiency = if total_ops > 0 {
            (hit_rate * (1.0 - evictions as f64 / total_ops as f64)).max(0.0)
        } else {
            0.0
        };
        let avg_access_time_us = if samples > 0 {
            total_us as f64 / samples as f64
        } else {
            0.0
        };

        CacheMetricsSnapshot {
            hits,
            misses,
            evictions,
            total_ops,
            hit_rate,
            efficiency,
            avg_access_time_us,
            memory_usage_bytes,
            entry_count,
        }
    }
}

/// Point-in-time view of cache counters and derived rates
#[derive(Debug, Clone, PartialEq)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub total_ops: u64,
    /// hits / (hits + misses), 0.0 when no lookups yet
    pub hit_rate: f64,
    /// Hit rate derated by eviction churn, clamped at 0.0
    pub efficiency: f64,
    /// Running average lookup latency in microseconds
    pub avg_access_time_us: f64,
    /// Aggregate serialized size of memory-tier entries
    pub memory_usage_bytes: u64,
    /// Memory-tier entry count
    pub entry_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_metrics_are_zero() {
        let metrics = CacheMetrics::new();
        let snap = metrics.snapshot(0, 0);
        assert_eq!(snap.hits, 0);
        assert_eq!(snap.misses, 0);
        assert_eq!(snap.hit_rate, 0.0);
        assert_eq!(snap.efficiency, 0.0);
    }

    #[test]
    fn test_hit_rate() {
        let metrics = CacheMetrics::new();
        for _ in 0..3 {
            metrics.record_hit(Duration::from_micros(10));
        }
        metrics.record_miss(Duration::from_micros(10));

        let snap = metrics.snapshot(0, 0);
        assert_eq!(snap.hits, 3);
        assert_eq!(snap.misses, 1);
        assert!((snap.hit_rate - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_average_access_time() {
        let metrics = CacheMetrics::new();
        metrics.record_hit(Duration::from_micros(100));
        metrics.record_miss(Duration::from_micros(300));

        let snap = metrics.snapshot(0, 0);
        assert!((snap.avg_access_time_us - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_evictions_reduce_efficiency() {
        let metrics = CacheMetrics::new();
        for _ in 0..8 {
            metrics.record_hit(Duration::ZERO);
        }
        metrics.record_miss(Duration::ZERO);

        let clean = metrics.snapshot(0, 0).efficiency;
        metrics.record_evictions(4);
        let churned = metrics.snapshot(0, 0).efficiency;
        assert!(churned < clean);
    }

    #[test]
    fn test_reset() {
        let metrics = CacheMetrics::new();
        metrics.record_hit(Duration::from_micros(5));
        metrics.record_evictions(2);
        metrics.reset();

        let snap = metrics.snapshot(0, 0);
        assert_eq!(snap.hits, 0);
        assert_eq!(snap.evictions, 0);
        assert_eq!(snap.total_ops, 0);
        assert_eq!(snap.avg_access_time_us, 0.0);
    }
}
