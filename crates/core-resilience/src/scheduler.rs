//! Connection manager: priority queue, deduplication, and dispatch
//!
//! ## Overview
//!
//! All outbound queries flow through [`ConnectionManager::fetch`]. Requests
//! are queued by priority, identical in-flight requests are coalesced onto
//! a single network call, and dispatch is bounded by a concurrency ceiling.
//! Failures consult the per-origin circuit breaker and the retry policy
//! before the caller ever sees an error.
//!
//! ## Key Principles
//!
//! - **Stable ordering**: higher priority dispatches first; equal priority
//!   preserves arrival order.
//! - **One wire call per canonical request**: callers waiting on the same
//!   method, URL, and body all settle from one response.
//! - **Retries re-enter at the front**: a retried request does not lose its
//!   place behind newly arrived work.

use crate::breaker::{Admission, BreakerRegistry};
use crate::error::QueryError;
use crate::retry::{RetryConfig, RetryPolicy};
use crate::transport::{QueryRequest, QueryResponse, QueryTransport};
use crate::BreakerConfig;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Concurrent in-flight request ceiling
    pub max_concurrency: usize,

    /// How often the background pump drains the queue
    pub tick_interval: Duration,

    /// Deadline applied when a request carries none of its own
    pub default_timeout: Duration,

    pub breaker: BreakerConfig,
    pub retry: RetryConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 6,
            tick_interval: Duration::from_millis(50),
            default_timeout: Duration::from_secs(30),
            breaker: BreakerConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

type Settled = Result<QueryResponse, QueryError>;

struct QueuedRequest {
    request: QueryRequest,
    key: String,
    priority: i32,
    /// Arrival counter, breaks priority ties in FIFO order
    seq: u64,
    retry_count: u32,
}

#[derive(Default)]
struct SchedulerState {
    queue: VecDeque<QueuedRequest>,
    /// Callers waiting on a canonical key, queued or in flight
    waiters: HashMap<String, Vec<oneshot::Sender<Settled>>>,
    next_seq: u64,
}

/// Point-in-time scheduler counters
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub enqueued: u64,
    pub completed: u64,
    pub failed: u64,
    pub deduplicated: u64,
    pub retries: u64,
    pub fast_failures: u64,
    pub in_flight: u64,
    /// Largest number of requests dispatched by a single drain pass
    pub max_batch: u64,
    pub queued: usize,
}

#[derive(Default)]
struct ConnectionCounters {
    enqueued: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    deduplicated: AtomicU64,
    retries: AtomicU64,
    fast_failures: AtomicU64,
    in_flight: AtomicU64,
    max_batch: AtomicU64,
}

pub struct ConnectionManager {
    transport: Arc<dyn QueryTransport>,
    config: ConnectionConfig,
    state: Mutex<SchedulerState>,
    breakers: BreakerRegistry,
    retry: RetryPolicy,
    permits: Arc<Semaphore>,
    counters: ConnectionCounters,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Create a manager and start its queue pump when a runtime is present
    pub fn new(transport: Arc<dyn QueryTransport>, config: ConnectionConfig) -> Arc<Self> {
        let manager = Arc::new(Self {
            transport,
            permits: Arc::new(Semaphore::new(config.max_concurrency)),
            breakers: BreakerRegistry::new(config.breaker.clone()),
            retry: RetryPolicy::new(config.retry.clone()),
            config,
            state: Mutex::new(SchedulerState::default()),
            counters: ConnectionCounters::default(),
            pump: Mutex::new(None),
        });
        if Handle::try_current().is_ok() {
            manager.start_pump();
        }
        manager
    }

    /// Issue a request at `priority` (higher dispatches first) and wait for
    /// it to settle.
    ///
    /// An identical request already queued or in flight is joined rather
    /// than re-sent; every joined caller receives the same outcome.
    pub async fn fetch(self: &Arc<Self>, request: QueryRequest, priority: i32) -> Settled {
        let key = request.canonical_key();
        let (tx, rx) = oneshot::channel();

        {
            let mut state = self.state.lock().unwrap();
            if let Some(waiters) = state.waiters.get_mut(&key) {
                waiters.push(tx);
                self.counters.deduplicated.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(url = %request.url, "joined in-flight request");
            } else {
                state.waiters.insert(key.clone(), vec![tx]);
                let seq = state.next_seq;
                state.next_seq += 1;
                let queued = QueuedRequest {
                    request,
                    key,
                    priority,
                    seq,
                    retry_count: 0,
                };
                let at = state
                    .queue
                    .iter()
                    .position(|q| q.priority < priority)
                    .unwrap_or(state.queue.len());
                state.queue.insert(at, queued);
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.drain();

        match rx.await {
            Ok(settled) => settled,
            Err(_) => Err(QueryError::Aborted),
        }
    }

    /// Dispatch queued requests while permits remain
    fn drain(self: &Arc<Self>) {
        let mut dispatched = 0u64;
        loop {
            let permit = match self.permits.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let queued = {
                let mut state = self.state.lock().unwrap();
                match state.queue.pop_front() {
                    Some(queued) => queued,
                    None => break,
                }
            };
            dispatched += 1;
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                manager.execute(queued).await;
                drop(permit);
                manager.drain();
            });
        }
        self.counters.max_batch.fetch_max(dispatched, Ordering::Relaxed);
    }

    async fn execute(self: &Arc<Self>, mut queued: QueuedRequest) {
        let origin = queued.request.origin();

        let admission = match self.breakers.admit(&origin) {
            Ok(admission) => admission,
            Err(err) => {
                self.counters.fast_failures.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(%origin, "rejected by open circuit breaker");
                self.settle(&queued.key, Err(err));
                return;
            }
        };

        self.counters.in_flight.fetch_add(1, Ordering::Relaxed);
        let deadline = queued.request.timeout.unwrap_or(self.config.default_timeout);
        let outcome = match tokio::time::timeout(deadline, self.transport.send(&queued.request)).await
        {
            Err(_) => Err(QueryError::Timeout(deadline)),
            Ok(Err(err)) => Err(err),
            Ok(Ok(response)) => match QueryError::from_status(response.status) {
                Some(err) => Err(err),
                None => Ok(response),
            },
        };
        self.counters.in_flight.fetch_sub(1, Ordering::Relaxed);

        match outcome {
            Ok(response) => {
                self.breakers.record_success(&origin);
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                self.settle(&queued.key, Ok(response));
            }
            Err(err) => {
                if err.should_trip_breaker() {
                    self.breakers.record_failure(&origin);
                } else if admission == Admission::Probe {
                    // A caller-side error proves nothing about the origin;
                    // free the slot so the next request can probe.
                    self.breakers.release_probe(&origin);
                }
                if self.retry.should_retry(&err, queued.retry_count) {
                    let delay = self.retry.backoff_delay(queued.retry_count);
                    queued.retry_count += 1;
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        url = %queued.request.url,
                        attempt = queued.retry_count,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "scheduling retry"
                    );
                    let manager = Arc::clone(self);
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        manager.state.lock().unwrap().queue.push_front(queued);
                        manager.drain();
                    });
                } else {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(url = %queued.request.url, error = %err, "request failed");
                    self.settle(&queued.key, Err(err));
                }
            }
        }
    }

    /// Fan one outcome out to every caller waiting on `key`
    fn settle(&self, key: &str, outcome: Settled) {
        let waiters = self.state.lock().unwrap().waiters.remove(key);
        if let Some(waiters) = waiters {
            for tx in waiters {
                let _ = tx.send(outcome.clone());
            }
        }
    }

    /// Start the background pump that drains the queue on a fixed tick.
    /// Idempotent; holds only a weak handle so the pump cannot keep the
    /// manager alive.
    pub fn start_pump(self: &Arc<Self>) {
        let mut pump = self.pump.lock().unwrap();
        if pump.is_some() {
            return;
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        let tick = self.config.tick_interval;
        *pump = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.tick().await;
            loop {
                interval.tick().await;
                match weak.upgrade() {
                    Some(manager) => manager.drain(),
                    None => break,
                }
            }
        }));
    }

    pub fn stop_pump(&self) {
        if let Some(handle) = self.pump.lock().unwrap().take() {
            handle.abort();
        }
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    pub fn stats(&self) -> ConnectionStats {
        let queued = self.state.lock().unwrap().queue.len();
        ConnectionStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            deduplicated: self.counters.deduplicated.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            fast_failures: self.counters.fast_failures.load(Ordering::Relaxed),
            in_flight: self.counters.in_flight.load(Ordering::Relaxed),
            max_batch: self.counters.max_batch.load(Ordering::Relaxed),
            queued,
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Ok(mut pump) = self.pump.lock() {
            if let Some(handle) = pump.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct ScriptedTransport {
        calls: AtomicUsize,
        script: Mutex<VecDeque<Settled>>,
        delay: Duration,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Settled>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                script: Mutex::new(script.into_iter().collect()),
                delay: Duration::ZERO,
            })
        }

        fn slow(script: Vec<Settled>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                script: Mutex::new(script.into_iter().collect()),
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl QueryTransport for ScriptedTransport {
        async fn send(&self, _request: &QueryRequest) -> Settled {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay > Duration::ZERO {
                tokio::time::sleep(self.delay).await;
            }
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(QueryResponse {
                    status: 200,
                    body: "ok".to_string(),
                }))
        }
    }

    fn ok(body: &str) -> Settled {
        Ok(QueryResponse {
            status: 200,
            body: body.to_string(),
        })
    }

    fn quick_retry_config() -> ConnectionConfig {
        ConnectionConfig {
            retry: RetryConfig {
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                jitter: Duration::ZERO,
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let transport = ScriptedTransport::new(vec![ok("hello")]);
        let manager = ConnectionManager::new(transport.clone(), ConnectionConfig::default());

        let response = manager
            .fetch(QueryRequest::post_json("https://api.test/q", "{}"), 0)
            .await
            .unwrap();
        assert_eq!(response.body, "hello");
        assert_eq!(transport.calls(), 1);
        assert_eq!(manager.stats().completed, 1);
    }

    #[tokio::test]
    async fn test_identical_requests_share_one_call() {
        let transport = ScriptedTransport::slow(vec![ok("shared")], Duration::from_millis(30));
        let manager = ConnectionManager::new(transport.clone(), ConnectionConfig::default());

        let req = || QueryRequest::post_json("https://api.test/q", "{\"q\":1}");
        let (a, b, c) = tokio::join!(
            manager.fetch(req(), 0),
            manager.fetch(req(), 0),
            manager.fetch(req(), 0),
        );

        assert_eq!(a.unwrap().body, "shared");
        assert_eq!(b.unwrap().body, "shared");
        assert_eq!(c.unwrap().body, "shared");
        assert_eq!(transport.calls(), 1);
        assert_eq!(manager.stats().deduplicated, 2);
    }

    #[tokio::test]
    async fn test_distinct_bodies_are_not_coalesced() {
        let transport = ScriptedTransport::new(vec![ok("one"), ok("two")]);
        let manager = ConnectionManager::new(transport.clone(), ConnectionConfig::default());

        let a = manager
            .fetch(QueryRequest::post_json("https://api.test/q", "{\"q\":1}"), 0)
            .await
            .unwrap();
        let b = manager
            .fetch(QueryRequest::post_json("https://api.test/q", "{\"q\":2}"), 0)
            .await
            .unwrap();
        assert_ne!(a.body, b.body);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_retries_transient_failure_then_succeeds() {
        let transport = ScriptedTransport::new(vec![
            Err(QueryError::Network("connection reset".to_string())),
            Err(QueryError::Server { status: 503 }),
            ok("recovered"),
        ]);
        let manager = ConnectionManager::new(transport.clone(), quick_retry_config());

        let response = manager
            .fetch(QueryRequest::post_json("https://api.test/q", "{}"), 0)
            .await
            .unwrap();
        assert_eq!(response.body, "recovered");
        assert_eq!(transport.calls(), 3);
        assert_eq!(manager.stats().retries, 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail() {
        let transport = ScriptedTransport::new(vec![
            Err(QueryError::Server { status: 500 }),
            Err(QueryError::Server { status: 500 }),
            Err(QueryError::Server { status: 500 }),
            Err(QueryError::Server { status: 500 }),
        ]);
        let manager = ConnectionManager::new(transport.clone(), quick_retry_config());

        let err = manager
            .fetch(QueryRequest::post_json("https://api.test/q", "{}"), 0)
            .await
            .unwrap_err();
        assert_eq!(err, QueryError::Server { status: 500 });
        // Initial attempt plus the full retry budget
        assert_eq!(transport.calls(), 4);
        assert_eq!(manager.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_client_error_retries_once() {
        let transport = ScriptedTransport::new(vec![
            Ok(QueryResponse { status: 404, body: String::new() }),
            Ok(QueryResponse { status: 404, body: String::new() }),
        ]);
        let manager = ConnectionManager::new(transport.clone(), quick_retry_config());

        let err = manager
            .fetch(QueryRequest::post_json("https://api.test/q", "{}"), 0)
            .await
            .unwrap_err();
        assert_eq!(err, QueryError::Client { status: 404 });
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_timeout_is_not_retried() {
        let transport =
            ScriptedTransport::slow(vec![ok("late")], Duration::from_millis(200));
        let config = ConnectionConfig {
            default_timeout: Duration::from_millis(20),
            ..quick_retry_config()
        };
        let manager = ConnectionManager::new(transport.clone(), config);

        let err = manager
            .fetch(QueryRequest::post_json("https://api.test/q", "{}"), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Timeout(_)));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_breaker_opens_and_fast_fails() {
        // Timeouts trip the breaker but carry no retry budget, so each
        // fetch is exactly one attempt.
        let transport = ScriptedTransport::slow(
            (0..8).map(|_| ok("late")).collect(),
            Duration::from_millis(200),
        );
        let config = ConnectionConfig {
            default_timeout: Duration::from_millis(10),
            breaker: BreakerConfig {
                failure_threshold: 3,
                cooldown: Duration::from_secs(60),
            },
            ..quick_retry_config()
        };
        let manager = ConnectionManager::new(transport.clone(), config);

        for i in 0..3 {
            let req = QueryRequest::post_json("https://api.test/q", format!("{{\"n\":{i}}}"));
            assert!(matches!(
                manager.fetch(req, 0).await,
                Err(QueryError::Timeout(_))
            ));
        }
        assert_eq!(transport.calls(), 3);

        let err = manager
            .fetch(QueryRequest::post_json("https://api.test/q", "{\"n\":9}"), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::CircuitOpen { .. }));
        assert_eq!(transport.calls(), 3);
        assert_eq!(manager.stats().fast_failures, 1);
    }

    #[tokio::test]
    async fn test_breaker_recovers_after_cooldown() {
        let transport = ScriptedTransport::new(vec![ok("back up")]);
        let config = ConnectionConfig {
            breaker: BreakerConfig {
                failure_threshold: 1,
                cooldown: Duration::from_millis(20),
            },
            ..ConnectionConfig::default()
        };
        let manager = ConnectionManager::new(transport.clone(), config);

        manager.breakers().record_failure("https://api.test");
        assert!(matches!(
            manager
                .fetch(QueryRequest::post_json("https://api.test/q", "{}"), 0)
                .await,
            Err(QueryError::CircuitOpen { .. })
        ));
        assert_eq!(transport.calls(), 0);

        // After the cooldown the probe is admitted and its success closes
        // the breaker.
        tokio::time::sleep(Duration::from_millis(30)).await;
        let response = manager
            .fetch(QueryRequest::post_json("https://api.test/q2", "{}"), 0)
            .await
            .unwrap();
        assert_eq!(response.body, "back up");
        assert_eq!(
            manager.breakers().phase("https://api.test"),
            crate::BreakerPhase::Closed
        );
    }

    #[tokio::test]
    async fn test_inconclusive_probe_frees_slot() {
        let transport = ScriptedTransport::new(vec![
            Err(QueryError::Invalid("bad method".to_string())),
            ok("healthy"),
        ]);
        let config = ConnectionConfig {
            breaker: BreakerConfig {
                failure_threshold: 1,
                cooldown: Duration::from_millis(10),
            },
            ..quick_retry_config()
        };
        let manager = ConnectionManager::new(transport.clone(), config);

        manager.breakers().record_failure("https://api.test");
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The probe settles with a caller-side error that says nothing
        // about origin health.
        let err = manager
            .fetch(QueryRequest::post_json("https://api.test/q", "{\"n\":1}"), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Invalid(_)));

        // The slot must be free again: the next call probes the healthy
        // origin and closes the breaker rather than fast-failing forever.
        let response = manager
            .fetch(QueryRequest::post_json("https://api.test/q", "{\"n\":2}"), 0)
            .await
            .unwrap();
        assert_eq!(response.body, "healthy");
        assert_eq!(transport.calls(), 2);
        assert_eq!(
            manager.breakers().phase("https://api.test"),
            crate::BreakerPhase::Closed
        );
    }

    #[tokio::test]
    async fn test_priority_orders_queue() {
        // Single-slot concurrency with a slow first call forces the rest to
        // queue, where priority must decide dispatch order.
        let transport = ScriptedTransport::slow(
            vec![ok("a"), ok("b"), ok("c"), ok("d")],
            Duration::from_millis(20),
        );
        let config = ConnectionConfig {
            max_concurrency: 1,
            ..ConnectionConfig::default()
        };
        let manager = ConnectionManager::new(transport.clone(), config);

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for (name, priority) in [("first", 0), ("low", 0), ("high", 10), ("mid", 5)] {
            let manager = Arc::clone(&manager);
            let order = Arc::clone(&order);
            let req = QueryRequest::post_json("https://api.test/q", format!("{{\"{name}\":1}}"));
            handles.push(tokio::spawn(async move {
                let _ = manager.fetch(req, priority).await;
                order.lock().unwrap().push(name);
            }));
            // Let each fetch enqueue before the next arrives
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let order = order.lock().unwrap().clone();
        // "first" grabbed the only slot immediately; the queued rest drain
        // by priority.
        assert_eq!(order, vec!["first", "high", "mid", "low"]);
    }

    #[tokio::test]
    async fn test_concurrency_ceiling_respected() {
        let transport = ScriptedTransport::slow(
            (0..10).map(|_| ok("x")).collect(),
            Duration::from_millis(30),
        );
        let config = ConnectionConfig {
            max_concurrency: 2,
            ..ConnectionConfig::default()
        };
        let manager = ConnectionManager::new(transport.clone(), config);

        let mut handles = Vec::new();
        for i in 0..6 {
            let manager = Arc::clone(&manager);
            let req = QueryRequest::post_json("https://api.test/q", format!("{{\"n\":{i}}}"));
            handles.push(tokio::spawn(async move { manager.fetch(req, 0).await }));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(manager.stats().in_flight <= 2);
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(manager.stats().completed, 6);
    }
}
