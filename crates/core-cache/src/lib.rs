//! Halo Core Cache: multi-tier key/value caching
//!
//! # Overview
//!
//! This crate provides the caching layer for a long-lived client process:
//!
//! - **Memory tier**: fast in-process map, authoritative for the lifetime of
//!   the process
//! - **Session tier**: file-backed namespace rooted in an owned temporary
//!   directory, discarded when the process exits
//! - **Durable tier**: file-backed namespace in a caller-supplied directory,
//!   survives restarts and warms the memory tier on construction
//!
//! Every entry carries an absolute expiry. Expired entries are treated as
//! misses and purged lazily on access, plus proactively by a periodic sweep
//! owned by the [`CacheManager`].
//!
//! # Key Principles
//!
//! The cache is an optimization, never a source of truth: no operation on it
//! returns an error to the caller. Storage failures, corrupted entries, and
//! serialization problems degrade to a miss (on read) or a logged no-op (on
//! write).
//!
//! # Example
//!
//! ```
//! use halo_core_cache::{CacheConfig, CacheManager, SetOptions, TierKind};
//! use std::time::Duration;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let cache = CacheManager::new(CacheConfig {
//!     durable_dir: dir.path().to_path_buf(),
//!     ..Default::default()
//! })
//! .unwrap();
//!
//! cache.set(
//!     "faq:greeting",
//!     &"hello".to_string(),
//!     SetOptions::default().with_ttl(Duration::from_secs(60)),
//! );
//!
//! let hit: Option<String> = cache.get("faq:greeting", CacheManager::DEFAULT_READ_LAYERS);
//! assert_eq!(hit.as_deref(), Some("hello"));
//! ```

pub mod entry;
pub mod manager;
pub mod metrics;
pub mod tier;

pub use entry::{MemoryEntry, PersistedEntry};
pub use manager::{CacheConfig, CacheManager, SetOptions, SetPriority};
pub use metrics::{CacheMetrics, CacheMetricsSnapshot};
pub use tier::{CacheError, FileTier, PersistentTier, TierKind};

/// Prelude module for convenient imports
pub mod prelude {
    pub use super::manager::{CacheConfig, CacheManager, SetOptions, SetPriority};
    pub use super::metrics::CacheMetricsSnapshot;
    pub use super::tier::TierKind;
}
