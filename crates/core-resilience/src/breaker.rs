//! Per-origin circuit breaker
//!
//! ## Overview
//!
//! Each origin gets an independent breaker. Consecutive failures trip it
//! open; after a cooldown a single probe request is admitted (half-open),
//! and its outcome decides whether the breaker closes again or re-opens
//! for another full cooldown.
//!
//! ## Key Principles
//!
//! - **Fail fast**: an open breaker rejects immediately, without queueing
//!   the request or consuming a concurrency permit.
//! - **One probe at a time**: half-open admits exactly one in-flight
//!   request; concurrent callers are rejected until it settles. A probe
//!   that settles without saying anything about origin health releases
//!   the slot for the next caller instead of latching it.
//! - **Success resets everything**: any success closes the breaker and
//!   zeroes the failure count.

use crate::error::QueryError;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens
    pub failure_threshold: u32,

    /// How long an open breaker rejects before admitting a probe
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Breaker phase, as reported by [`BreakerRegistry::phase`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerPhase {
    Closed,
    Open,
    HalfOpen,
}

/// How a request was admitted. A `Probe` caller owns the half-open probe
/// slot and must hand it back on any settle that reaches neither
/// [`BreakerRegistry::record_success`] nor [`BreakerRegistry::record_failure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Normal,
    Probe,
}

#[derive(Debug)]
struct OriginBreaker {
    phase: BreakerPhase,
    consecutive_failures: u32,
    reopen_at: Option<Instant>,
    /// Half-open admits one probe; set while that probe is in flight
    probe_in_flight: bool,
}

impl OriginBreaker {
    fn new() -> Self {
        Self {
            phase: BreakerPhase::Closed,
            consecutive_failures: 0,
            reopen_at: None,
            probe_in_flight: false,
        }
    }
}

/// Registry of per-origin breakers, keyed by `scheme://host[:port]`
pub struct BreakerRegistry {
    config: BreakerConfig,
    origins: Mutex<HashMap<String, OriginBreaker>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            origins: Mutex::new(HashMap::new()),
        }
    }

    /// Decide whether a request to `origin` may proceed.
    ///
    /// Transitions an expired open breaker to half-open and claims the
    /// probe slot for the caller.
    pub fn admit(&self, origin: &str) -> Result<Admission, QueryError> {
        let mut origins = self.origins.lock().unwrap();
        let breaker = origins
            .entry(origin.to_string())
            .or_insert_with(OriginBreaker::new);

        match breaker.phase {
            BreakerPhase::Closed => Ok(Admission::Normal),
            BreakerPhase::Open => {
                let expired = breaker
                    .reopen_at
                    .map(|at| Instant::now() >= at)
                    .unwrap_or(true);
                if expired {
                    breaker.phase = BreakerPhase::HalfOpen;
                    breaker.probe_in_flight = true;
                    tracing::debug!(origin, "circuit breaker half-open, admitting probe");
                    Ok(Admission::Probe)
                } else {
                    Err(QueryError::CircuitOpen {
                        origin: origin.to_string(),
                    })
                }
            }
            BreakerPhase::HalfOpen => {
                if breaker.probe_in_flight {
                    Err(QueryError::CircuitOpen {
                        origin: origin.to_string(),
                    })
                } else {
                    breaker.probe_in_flight = true;
                    Ok(Admission::Probe)
                }
            }
        }
    }

    /// Record a successful response from `origin`
    pub fn record_success(&self, origin: &str) {
        let mut origins = self.origins.lock().unwrap();
        if let Some(breaker) = origins.get_mut(origin) {
            if breaker.phase != BreakerPhase::Closed {
                tracing::info!(origin, "circuit breaker closed after successful probe");
            }
            breaker.phase = BreakerPhase::Closed;
            breaker.consecutive_failures = 0;
            breaker.reopen_at = None;
            breaker.probe_in_flight = false;
        }
    }

    /// Record a breaker-relevant failure from `origin`
    pub fn record_failure(&self, origin: &str) {
        let mut origins = self.origins.lock().unwrap();
        let breaker = origins
            .entry(origin.to_string())
            .or_insert_with(OriginBreaker::new);

        match breaker.phase {
            BreakerPhase::HalfOpen => {
                // Probe failed, back to open for a fresh cooldown
                breaker.phase = BreakerPhase::Open;
                breaker.reopen_at = Some(Instant::now() + self.config.cooldown);
                breaker.probe_in_flight = false;
                breaker.consecutive_failures += 1;
                tracing::warn!(origin, "circuit breaker probe failed, re-opening");
            }
            BreakerPhase::Closed | BreakerPhase::Open => {
                breaker.consecutive_failures += 1;
                if breaker.phase == BreakerPhase::Closed
                    && breaker.consecutive_failures >= self.config.failure_threshold
                {
                    breaker.phase = BreakerPhase::Open;
                    breaker.reopen_at = Some(Instant::now() + self.config.cooldown);
                    tracing::warn!(
                        origin,
                        failures = breaker.consecutive_failures,
                        "circuit breaker opened"
                    );
                }
            }
        }
    }

    /// Hand back the half-open probe slot without judging origin health.
    ///
    /// For probes that settled with a caller-side error (invalid request,
    /// abort): the outcome proves nothing either way, so the next admitted
    /// request becomes the probe instead of the breaker latching half-open.
    pub fn release_probe(&self, origin: &str) {
        let mut origins = self.origins.lock().unwrap();
        if let Some(breaker) = origins.get_mut(origin) {
            if breaker.phase == BreakerPhase::HalfOpen {
                breaker.probe_in_flight = false;
                tracing::debug!(origin, "probe inconclusive, releasing probe slot");
            }
        }
    }

    pub fn phase(&self, origin: &str) -> BreakerPhase {
        let origins = self.origins.lock().unwrap();
        origins
            .get(origin)
            .map(|b| b.phase)
            .unwrap_or(BreakerPhase::Closed)
    }

    pub fn failure_count(&self, origin: &str) -> u32 {
        let origins = self.origins.lock().unwrap();
        origins
            .get(origin)
            .map(|b| b.consecutive_failures)
            .unwrap_or(0)
    }

    /// Forget all breaker state, closing every origin
    pub fn reset(&self) {
        self.origins.lock().unwrap().clear();
    }
}
