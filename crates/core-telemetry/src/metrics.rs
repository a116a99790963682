//! Aggregated error metrics and the user-impact score

use crate::classify::Severity;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct MetricsInner {
    total: u64,
    by_severity: HashMap<Severity, u64>,
    by_kind: HashMap<String, u64>,
    by_component: HashMap<String, u64>,
    recovery_attempts: u64,
    recovered: u64,
    dropped: u64,
    /// Exponentially weighted moving average of severity impact weights
    impact_ewma: f64,
    timing_total: Duration,
    timing_samples: u64,
    started_at: Instant,
}

/// Point-in-time metrics snapshot with derived rates
#[derive(Debug, Clone)]
pub struct ErrorMetricsSnapshot {
    pub total: u64,
    pub by_severity: HashMap<Severity, u64>,
    pub by_kind: HashMap<String, u64>,
    pub by_component: HashMap<String, u64>,
    pub recovery_attempts: u64,
    pub recovered: u64,
    pub dropped: u64,
    pub user_impact: f64,
    /// Errors per minute since the handler started
    pub error_rate: f64,
    /// Fraction of recovery attempts that succeeded
    pub recovery_rate: f64,
    pub avg_timing_ms: f64,
    /// 0..100 health score derated by user impact and observed latency
    pub performance_score: f64,
}

pub struct ErrorMetrics {
    inner: Mutex<MetricsInner>,
    impact_alpha: f64,
}

impl ErrorMetrics {
    pub fn new(impact_alpha: f64) -> Self {
        Self {
            inner: Mutex::new(MetricsInner {
                total: 0,
                by_severity: HashMap::new(),
                by_kind: HashMap::new(),
                by_component: HashMap::new(),
                recovery_attempts: 0,
                recovered: 0,
                dropped: 0,
                impact_ewma: 0.0,
                timing_total: Duration::ZERO,
                timing_samples: 0,
                started_at: Instant::now(),
            }),
            impact_alpha,
        }
    }

    pub fn record_error(&self, kind: &str, component: &str, severity: Severity) {
        let mut inner = self.inner.lock().unwrap();
        inner.total += 1;
        *inner.by_severity.entry(severity).or_insert(0) += 1;
        *inner.by_kind.entry(kind.to_string()).or_insert(0) += 1;
        *inner.by_component.entry(component.to_string()).or_insert(0) += 1;
        inner.impact_ewma = self.impact_alpha * severity.impact_weight()
            + (1.0 - self.impact_alpha) * inner.impact_ewma;
    }

    pub fn record_recovery_attempt(&self, succeeded: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.recovery_attempts += 1;
        if succeeded {
            inner.recovered += 1;
        }
    }

    pub fn record_dropped(&self) {
        self.inner.lock().unwrap().dropped += 1;
    }

    /// Feed a page-load or interaction latency sample into the
    /// performance score
    pub fn record_timing_sample(&self, elapsed: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.timing_total += elapsed;
        inner.timing_samples += 1;
    }

    pub fn snapshot(&self) -> ErrorMetricsSnapshot {
        let inner = self.inner.lock().unwrap();
        let elapsed_min = inner.started_at.elapsed().as_secs_f64() / 60.0;
        let error_rate = if elapsed_min > 0.0 {
            inner.total as f64 / elapsed_min
        } else {
            0.0
        };
        let recovery_rate = if inner.recovery_attempts > 0 {
            inner.recovered as f64 / inner.recovery_attempts as f64
        } else {
            0.0
        };
        let avg_timing_ms = if inner.timing_samples > 0 {
            inner.timing_total.as_secs_f64() * 1000.0 / inner.timing_samples as f64
        } else {
            0.0
        };

        // Start from a perfect score, derate by the impact EWMA (a steady
        // stream of critical errors drives this toward zero) and by slow
        // observed latency above a 100 ms floor.
        let latency_penalty = ((avg_timing_ms - 100.0).max(0.0) / 100.0).min(30.0);
        let performance_score = (100.0 - inner.impact_ewma * 4.0 - latency_penalty).clamp(0.0, 100.0);

        ErrorMetricsSnapshot {
            total: inner.total,
            by_severity: inner.by_severity.clone(),
            by_kind: inner.by_kind.clone(),
            by_component: inner.by_component.clone(),
            recovery_attempts: inner.recovery_attempts,
            recovered: inner.recovered,
            dropped: inner.dropped,
            user_impact: inner.impact_ewma,
            error_rate,
            recovery_rate,
            avg_timing_ms,
            performance_score,
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = MetricsInner {
            total: 0,
            by_severity: HashMap::new(),
            by_kind: HashMap::new(),
            by_component: HashMap::new(),
            recovery_attempts: 0,
            recovered: 0,
            dropped: 0,
            impact_ewma: 0.0,
            timing_total: Duration::ZERO,
            timing_samples: 0,
            started_at: Instant::now(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_by_dimension() {
        let metrics = ErrorMetrics::new(0.2);
        metrics.record_error("timeout", "connection", Severity::High);
        metrics.record_error("timeout", "connection", Severity::High);
        metrics.record_error("render", "chat_panel", Severity::Medium);

        let snap = metrics.snapshot();
        assert_eq!(snap.total, 3);
        assert_eq!(snap.by_kind["timeout"], 2);
        assert_eq!(snap.by_component["connection"], 2);
        assert_eq!(snap.by_severity[&Severity::Medium], 1);
    }

    #[test]
    fn test_impact_ewma_rises_with_severity() {
        let metrics = ErrorMetrics::new(0.5);
        metrics.record_error("x", "c", Severity::Low);
        let low = metrics.snapshot().user_impact;
        metrics.record_error("x", "c", Severity::Critical);
        let with_critical = metrics.snapshot().user_impact;
        assert!(with_critical > low);
        // EWMA with alpha 0.5: 0.5*1, then 0.5*15 + 0.5*0.5
        assert!((with_critical - 7.75).abs() < 1e-9);
    }

    #[test]
    fn test_recovery_rate() {
        let metrics = ErrorMetrics::new(0.2);
        metrics.record_recovery_attempt(true);
        metrics.record_recovery_attempt(true);
        metrics.record_recovery_attempt(false);
        let snap = metrics.snapshot();
        assert_eq!(snap.recovery_attempts, 3);
        assert_eq!(snap.recovered, 2);
        assert!((snap.recovery_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_performance_score_derates() {
        let metrics = ErrorMetrics::new(1.0);
        assert!((metrics.snapshot().performance_score - 100.0).abs() < 1e-9);

        metrics.record_error("auth", "global", Severity::Critical);
        let snap = metrics.snapshot();
        assert!(snap.performance_score < 100.0);
        assert!(snap.performance_score >= 0.0);

        metrics.record_timing_sample(Duration::from_millis(600));
        assert!(metrics.snapshot().performance_score < snap.performance_score);
    }

    #[test]
    fn test_reset_clears_everything() {
        let metrics = ErrorMetrics::new(0.2);
        metrics.record_error("x", "c", Severity::High);
        metrics.record_recovery_attempt(true);
        metrics.reset();
        let snap = metrics.snapshot();
        assert_eq!(snap.total, 0);
        assert_eq!(snap.recovered, 0);
        assert_eq!(snap.user_impact, 0.0);
    }
}
