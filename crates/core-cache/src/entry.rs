//! Cache entry bookkeeping
//!
//! Two envelope shapes exist: [`MemoryEntry`] carries the full access
//! bookkeeping used for eviction scoring, while [`PersistedEntry`] is the
//! minimal `{ key, data, expires_at }` shape written to file-backed tiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;

/// An entry held in the in-process memory tier.
///
/// Owned exclusively by the cache manager; mutated only through its own
/// get/set/evict paths.
#[derive(Debug, Clone)]
pub struct MemoryEntry {
    /// Cached value, stored serialized so promotion between tiers is lossless
    pub data: Value,

    /// When the entry was inserted
    pub created_at: DateTime<Utc>,

    /// Absolute wall-clock expiry
    pub expires_at: DateTime<Utc>,

    /// Number of hits against this entry
    pub access_count: u64,

    /// Monotonic stamp of the most recent hit (or the insert)
    pub last_accessed: Instant,

    /// Approximate serialized size, used for the memory ceiling
    pub size_bytes: usize,
}

impl MemoryEntry {
    /// Create a fresh entry expiring at `expires_at`
    pub fn new(data: Value, expires_at: DateTime<Utc>, size_bytes: usize) -> Self {
        Self {
            data,
            created_at: Utc::now(),
            expires_at,
            access_count: 0,
            last_accessed: Instant::now(),
            size_bytes,
        }
    }

    /// Whether the entry has passed its absolute expiry
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Record a hit: bump the access counter and refresh recency
    pub fn touch(&mut self) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed = Instant::now();
    }

    /// Eviction score combining frequency and recency. Lower scores are
    /// evicted first: an entry that is both cold and rarely used scores
    /// near zero, a hot entry scores high regardless of age.
    pub fn eviction_score(&self) -> f64 {
        let idle_secs = self.last_accessed.elapsed().as_secs_f64();
        (1.0 + self.access_count as f64) / (1.0 + idle_secs)
    }
}

/// The envelope written to file-backed tiers.
///
/// The original key travels inside the envelope because filenames are
/// hashed; warm-up and sweeps recover keys by reading envelopes back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedEntry {
    /// Original cache key
    pub key: String,

    /// Cached value
    pub data: Value,

    /// Absolute wall-clock expiry
    pub expires_at: DateTime<Utc>,
}

impl PersistedEntry {
    /// Whether the entry has passed its absolute expiry
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
