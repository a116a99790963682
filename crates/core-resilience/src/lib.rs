//! Core resilience: priority scheduling, deduplication, circuit breaking,
//! and retry for outbound queries
//!
//! ## Overview
//!
//! This crate owns everything between "the application wants an answer"
//! and "bytes go on the wire". The wire itself stays behind the
//! [`QueryTransport`] trait so the crate remains pure logic, testable with
//! scripted transports and no network.
//!
//! - [`scheduler`]: the [`ConnectionManager`] priority queue and dispatch
//!   loop
//! - [`breaker`]: per-origin circuit breakers
//! - [`retry`]: exponential backoff policy
//! - [`transport`]: request/response shapes and the transport seam
//! - [`error`]: the [`QueryError`] taxonomy and its classifiers
//!
//! ## Example
//!
//! ```no_run
//! use halo_core_resilience::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(transport: Arc<dyn QueryTransport>) -> Result<(), QueryError> {
//! let manager = ConnectionManager::new(transport, ConnectionConfig::default());
//! let request = QueryRequest::post_json("https://api.example.com/query", "{\"q\":\"hi\"}");
//! let response = manager.fetch(request, 0).await?;
//! println!("{}", response.body);
//! # Ok(())
//! # }
//! ```

pub mod breaker;
pub mod error;
pub mod retry;
pub mod scheduler;
pub mod transport;

pub use breaker::{Admission, BreakerConfig, BreakerPhase, BreakerRegistry};
pub use error::QueryError;
pub use retry::{RetryConfig, RetryPolicy};
pub use scheduler::{ConnectionConfig, ConnectionManager, ConnectionStats};
pub use transport::{QueryRequest, QueryResponse, QueryTransport};

/// Common imports for downstream crates
pub mod prelude {
    pub use crate::breaker::{BreakerConfig, BreakerPhase};
    pub use crate::error::QueryError;
    pub use crate::retry::RetryConfig;
    pub use crate::scheduler::{ConnectionConfig, ConnectionManager, ConnectionStats};
    pub use crate::transport::{QueryRequest, QueryResponse, QueryTransport};
}
