/*!
 * Halo - client resilience and caching core
 *
 * Makes outbound calls to a remote query service fast, cheap, and
 * fault-tolerant from within a long-lived client process:
 * - Multi-tier cache with TTL expiry and scored eviction
 * - Deduplicating priority scheduler with per-origin circuit breakers
 *   and retry backoff
 * - Error capture with severity classification and pluggable recovery
 * - Immutable state store with bounded history and debounced persistence
 *
 * The composition root is [`QueryService`]: `query(question)` answers
 * from cache when it can, goes to the network when it must, and resolves
 * to a friendly fallback message instead of an error when everything
 * fails.
 */

pub mod config;
pub mod error;
pub mod logging;
pub mod service;
pub mod transport;

// Re-export commonly used types
pub use config::{LogLevel, ServiceConfig};
pub use error::{HaloError, Result};
pub use service::{fallback_message, QueryService};
pub use transport::HttpTransport;

pub use halo_core_cache as cache;
pub use halo_core_resilience as resilience;
pub use halo_core_state as state;
pub use halo_core_telemetry as telemetry;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
