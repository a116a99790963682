//! The error handler: capture, buffering, and recovery dispatch
//!
//! ## Overview
//!
//! [`ErrorHandler::capture`] is fire-and-forget: the caller is never
//! blocked and never sees a failure from the handler itself. Critical
//! reports kick off recovery immediately; everything else lands in a
//! bounded buffer that an owned background task flushes for logging on a
//! fixed interval.
//!
//! ## Example
//!
//! ```no_run
//! use halo_core_telemetry::prelude::*;
//!
//! # fn example() {
//! let handler = ErrorHandler::new(TelemetryConfig::default());
//! handler.capture(ErrorReport::new(
//!     "timeout",
//!     "query timed out after 30s",
//!     ErrorContext::Query {
//!         url: "https://api.example.com/query".to_string(),
//!         action: "fetch".to_string(),
//!     },
//! ));
//! # }
//! ```

use crate::classify::{ErrorContext, ErrorReport, Severity};
use crate::metrics::{ErrorMetrics, ErrorMetricsSnapshot};
use crate::recovery::{RecoveryChannels, RecoveryEvent, RecoveryStrategy};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Pending reports held between flushes; overflow drops the oldest
    pub buffer_capacity: usize,

    /// Interval of the background flush task
    pub flush_interval: Duration,

    /// EWMA smoothing factor for the user-impact score
    pub impact_alpha: f64,

    /// How long the network fallback waits for connectivity to return
    pub connectivity_wait: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 100,
            flush_interval: Duration::from_secs(5),
            impact_alpha: 0.2,
            connectivity_wait: Duration::from_secs(10),
        }
    }
}

type ClearCachesHook = Arc<dyn Fn() + Send + Sync>;

pub struct ErrorHandler {
    config: TelemetryConfig,
    strategies: Mutex<HashMap<String, Arc<dyn RecoveryStrategy>>>,
    buffer: Mutex<VecDeque<ErrorReport>>,
    metrics: ErrorMetrics,
    channels: RecoveryChannels,
    clear_caches: Mutex<Option<ClearCachesHook>>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl ErrorHandler {
    /// Create a handler and start its flush task when a runtime is present
    pub fn new(config: TelemetryConfig) -> Arc<Self> {
        let handler = Arc::new(Self {
            metrics: ErrorMetrics::new(config.impact_alpha),
            config,
            strategies: Mutex::new(HashMap::new()),
            buffer: Mutex::new(VecDeque::new()),
            channels: RecoveryChannels::new(),
            clear_caches: Mutex::new(None),
            flusher: Mutex::new(None),
        });
        if Handle::try_current().is_ok() {
            handler.start_flusher();
        }
        handler
    }

    /// Capture an error report. Never blocks and never fails.
    ///
    /// Critical reports attempt recovery immediately; all other severities
    /// are buffered for the periodic flush.
    pub fn capture(self: &Arc<Self>, report: ErrorReport) {
        let severity = report.effective_severity();
        self.metrics
            .record_error(&report.kind, report.context.component(), severity);

        match severity {
            Severity::Critical => {
                tracing::error!(
                    kind = %report.kind,
                    component = report.context.component(),
                    message = %report.message,
                    "critical error captured"
                );
                if Handle::try_current().is_ok() {
                    let handler = Arc::clone(self);
                    tokio::spawn(async move {
                        handler.attempt_recovery(&report).await;
                    });
                }
            }
            _ => {
                let mut buffer = self.buffer.lock().unwrap();
                if buffer.len() >= self.config.buffer_capacity {
                    buffer.pop_front();
                    self.metrics.record_dropped();
                }
                buffer.push_back(report);
            }
        }
    }

    /// Register a recovery strategy for an error kind, replacing any
    /// previous one
    pub fn register_strategy(&self, kind: impl Into<String>, strategy: Arc<dyn RecoveryStrategy>) {
        self.strategies.lock().unwrap().insert(kind.into(), strategy);
    }

    /// Hook run by the generic memory-pressure fallback
    pub fn on_clear_caches(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.clear_caches.lock().unwrap() = Some(Arc::new(hook));
    }

    async fn attempt_recovery(&self, report: &ErrorReport) {
        let strategy = self.strategies.lock().unwrap().get(&report.kind).cloned();
        if let Some(strategy) = strategy {
            match strategy.recover(report).await {
                Ok(()) => {
                    self.metrics.record_recovery_attempt(true);
                    tracing::info!(kind = %report.kind, "recovery strategy succeeded");
                    return;
                }
                Err(err) => {
                    tracing::warn!(
                        kind = %report.kind,
                        error = %err,
                        "recovery strategy failed, trying generic fallback"
                    );
                }
            }
        }
        self.generic_recovery(report).await;
    }

    /// Fallback recoveries keyed by message content
    async fn generic_recovery(&self, report: &ErrorReport) {
        let message = report.message.to_lowercase();

        if ["network", "connection", "offline", "fetch"]
            .iter()
            .any(|m| message.contains(m))
        {
            let recovered = self
                .channels
                .wait_for_online(self.config.connectivity_wait)
                .await
                .is_ok();
            self.metrics.record_recovery_attempt(recovered);
            if recovered {
                tracing::info!(kind = %report.kind, "connectivity restored");
            }
            return;
        }

        if ["memory", "quota", "allocation"].iter().any(|m| message.contains(m)) {
            let hook = self.clear_caches.lock().unwrap().clone();
            if let Some(hook) = hook {
                hook();
                self.metrics.record_recovery_attempt(true);
                tracing::info!("cleared caches under memory pressure");
            } else {
                self.metrics.record_recovery_attempt(false);
            }
            return;
        }

        if ["render", "component", "display"].iter().any(|m| message.contains(m)) {
            self.channels.broadcast(RecoveryEvent {
                component: report.context.component().to_string(),
                kind: report.kind.clone(),
            });
            self.metrics.record_recovery_attempt(true);
            return;
        }

        self.metrics.record_recovery_attempt(false);
    }

    /// Drain the pending buffer, logging each report.
    ///
    /// Runs on the flush interval; exposed for deterministic tests.
    pub fn flush(&self) {
        let drained: Vec<ErrorReport> = self.buffer.lock().unwrap().drain(..).collect();
        for report in &drained {
            tracing::debug!(
                kind = %report.kind,
                component = report.context.component(),
                severity = %report.effective_severity(),
                message = %report.message,
                "buffered error"
            );
        }
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "flushed error buffer");
        }
    }

    pub fn start_flusher(self: &Arc<Self>) {
        let mut flusher = self.flusher.lock().unwrap();
        if flusher.is_some() {
            return;
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = self.config.flush_interval;
        *flusher = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(handler) => handler.flush(),
                    None => break,
                }
            }
        }));
    }

    pub fn stop_flusher(&self) {
        if let Some(handle) = self.flusher.lock().unwrap().take() {
            handle.abort();
        }
    }

    pub fn set_online(&self, online: bool) {
        self.channels.set_online(online);
    }

    pub fn is_online(&self) -> bool {
        self.channels.is_online()
    }

    pub fn subscribe_recovery(&self) -> broadcast::Receiver<RecoveryEvent> {
        self.channels.subscribe_events()
    }

    pub fn record_timing_sample(&self, elapsed: Duration) {
        self.metrics.record_timing_sample(elapsed);
    }

    pub fn metrics(&self) -> ErrorMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn pending(&self) -> usize {
        self.buffer.lock().unwrap().len()
    }
}

impl Drop for ErrorHandler {
    fn drop(&mut self) {
        if let Ok(mut flusher) = self.flusher.lock() {
            if let Some(handle) = flusher.take() {
                handle.abort();
            }
        }
    }
}

/// Route process-level panics into the handler as high-severity global
/// reports, the closest analogue of a global uncaught-exception hook.
///
/// Chains to the previously installed hook so default panic output is
/// preserved.
pub fn install_panic_hook(handler: &Arc<ErrorHandler>) {
    let weak = Arc::downgrade(handler);
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        if let Some(handler) = weak.upgrade() {
            let message = info
                .payload()
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| info.payload().downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic with non-string payload".to_string());
            let report = ErrorReport::new("panic", message, ErrorContext::Global)
                .with_severity(Severity::High);
            handler.capture(report);
        }
        previous(info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::RecoveryError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FlagStrategy {
        ran: Arc<AtomicBool>,
        fail: bool,
    }

    #[async_trait]
    impl RecoveryStrategy for FlagStrategy {
        async fn recover(&self, _report: &ErrorReport) -> Result<(), RecoveryError> {
            self.ran.store(true, Ordering::SeqCst);
            if self.fail {
                Err(RecoveryError::Failed("still broken".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn query_context() -> ErrorContext {
        ErrorContext::Query {
            url: "https://api.test/q".to_string(),
            action: "fetch".to_string(),
        }
    }

    #[tokio::test]
    async fn test_capture_buffers_without_blocking() {
        let handler = ErrorHandler::new(TelemetryConfig::default());
        handler.capture(ErrorReport::new("timeout", "request timed out", query_context()));
        assert_eq!(handler.pending(), 1);
        assert_eq!(handler.metrics().total, 1);

        handler.flush();
        assert_eq!(handler.pending(), 0);
        // Flushing only clears the buffer, aggregates survive
        assert_eq!(handler.metrics().total, 1);
    }

    #[tokio::test]
    async fn test_buffer_overflow_drops_oldest() {
        let config = TelemetryConfig {
            buffer_capacity: 3,
            ..Default::default()
        };
        let handler = ErrorHandler::new(config);
        for i in 0..5 {
            handler.capture(ErrorReport::new("misc", format!("error {i}"), query_context()));
        }
        assert_eq!(handler.pending(), 3);
        assert_eq!(handler.metrics().dropped, 2);
    }

    #[tokio::test]
    async fn test_critical_runs_registered_strategy() {
        let handler = ErrorHandler::new(TelemetryConfig::default());
        let ran = Arc::new(AtomicBool::new(false));
        handler.register_strategy(
            "auth",
            Arc::new(FlagStrategy { ran: ran.clone(), fail: false }),
        );

        handler.capture(ErrorReport::new("auth", "auth token rejected", query_context()));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(ran.load(Ordering::SeqCst));
        let metrics = handler.metrics();
        assert_eq!(metrics.recovered, 1);
        // Critical reports bypass the buffer
        assert_eq!(handler.pending(), 0);
    }

    #[tokio::test]
    async fn test_failed_strategy_falls_back_to_generic() {
        let handler = ErrorHandler::new(TelemetryConfig::default());
        let ran = Arc::new(AtomicBool::new(false));
        handler.register_strategy(
            "security",
            Arc::new(FlagStrategy { ran: ran.clone(), fail: true }),
        );

        // Message mentions network, so the generic connectivity fallback
        // runs after the strategy fails; we are online, so it succeeds.
        handler.capture(ErrorReport::new(
            "security",
            "security handshake failed over network",
            query_context(),
        ));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(ran.load(Ordering::SeqCst));
        let metrics = handler.metrics();
        assert_eq!(metrics.recovery_attempts, 1);
        assert_eq!(metrics.recovered, 1);
    }

    #[tokio::test]
    async fn test_memory_fallback_runs_clear_caches_hook() {
        let handler = ErrorHandler::new(TelemetryConfig::default());
        let cleared = Arc::new(AtomicUsize::new(0));
        let counter = cleared.clone();
        handler.on_clear_caches(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        // "payment" classifies critical, message routes to the memory hook
        handler.capture(ErrorReport::new(
            "payment",
            "payment ledger cache exceeded quota",
            query_context(),
        ));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(cleared.load(Ordering::SeqCst), 1);
        assert_eq!(handler.metrics().recovered, 1);
    }

    #[tokio::test]
    async fn test_render_fallback_broadcasts_event() {
        let handler = ErrorHandler::new(TelemetryConfig::default());
        let mut events = handler.subscribe_recovery();

        handler.capture(
            ErrorReport::new(
                "render",
                "component failed to render",
                ErrorContext::Component {
                    component: "chat_panel".to_string(),
                    action: "render".to_string(),
                },
            )
            .with_severity(Severity::Critical),
        );

        let event = tokio::time::timeout(Duration::from_millis(100), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.component, "chat_panel");
    }

    #[test]
    fn test_panic_hook_records_global_report() {
        let handler = ErrorHandler::new(TelemetryConfig::default());
        install_panic_hook(&handler);

        let result = std::panic::catch_unwind(|| panic!("boom in worker"));
        assert!(result.is_err());

        let metrics = handler.metrics();
        assert!(metrics.total >= 1);
        assert!(metrics.by_component.contains_key("global"));
    }
}
