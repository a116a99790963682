//! Error taxonomy for outbound query calls
//!
//! Every failure an outbound call can produce maps to one variant, and the
//! variant alone decides retry budget, circuit-breaker accounting, and the
//! user-facing fallback class. Errors are `Clone` so a settled result can be
//! fanned out to every deduplicated waiter.

use std::time::Duration;
use thiserror::Error;

/// Errors produced by the connection manager and transport layer
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Circuit breaker is open for the request's origin
    #[error("circuit breaker is open for {origin}")]
    CircuitOpen { origin: String },

    /// The call exceeded its deadline
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The call was cancelled before completing
    #[error("request aborted")]
    Aborted,

    /// HTTP 429
    #[error("rate limited by the backend")]
    RateLimited,

    /// HTTP 5xx
    #[error("server error: HTTP {status}")]
    Server { status: u16 },

    /// HTTP 4xx other than 401/403/429
    #[error("client error: HTTP {status}")]
    Client { status: u16 },

    /// HTTP 401/403
    #[error("authentication rejected: HTTP {status}")]
    Auth { status: u16 },

    /// Connection-level failure (DNS, refused, reset, offline)
    #[error("network error: {0}")]
    Network(String),

    /// The request could not be built or issued
    #[error("invalid request: {0}")]
    Invalid(String),

    /// The backend answered 2xx with an unusable body
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl QueryError {
    /// Classify a non-2xx HTTP status. Returns `None` for success statuses.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            429 => Some(QueryError::RateLimited),
            401 | 403 => Some(QueryError::Auth { status }),
            400..=499 => Some(QueryError::Client { status }),
            _ => Some(QueryError::Server { status }),
        }
    }

    /// How many retries this class of failure earns.
    ///
    /// Timeouts and aborts are not retried (the caller already waited),
    /// rate limiting and auth failures are surfaced immediately, client
    /// errors get one more attempt, and transient network/server failures
    /// get a bounded budget with backoff.
    pub fn retry_budget(&self) -> u32 {
        match self {
            QueryError::Server { .. } | QueryError::Network(_) => 3,
            QueryError::Client { .. } => 1,
            QueryError::Timeout(_)
            | QueryError::Aborted
            | QueryError::RateLimited
            | QueryError::Auth { .. }
            | QueryError::CircuitOpen { .. }
            | QueryError::Invalid(_)
            | QueryError::Malformed(_) => 0,
        }
    }

    /// Stable discriminant name, used for recovery-strategy lookup and
    /// metrics keys
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::CircuitOpen { .. } => "circuit_open",
            QueryError::Timeout(_) => "timeout",
            QueryError::Aborted => "aborted",
            QueryError::RateLimited => "rate_limit",
            QueryError::Server { .. } => "server",
            QueryError::Client { .. } => "client",
            QueryError::Auth { .. } => "auth",
            QueryError::Network(_) => "network",
            QueryError::Invalid(_) => "invalid",
            QueryError::Malformed(_) => "malformed",
        }
    }

    /// Whether this failure is worth retrying at all
    pub fn is_transient(&self) -> bool {
        self.retry_budget() > 0
    }

    /// Whether this failure should count against the origin's breaker.
    ///
    /// Fast-fails never do (no backend was touched), caller-side problems
    /// never do, and a parseable-but-wrong body means the backend is up.
    pub fn should_trip_breaker(&self) -> bool {
        !matches!(
            self,
            QueryError::CircuitOpen { .. }
                | QueryError::Aborted
                | QueryError::Invalid(_)
                | QueryError::Malformed(_)
        )
    }
}
