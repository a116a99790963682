//! The cache manager: layered lookup, scored eviction, warm-up, sweeping
//!
//! Lookup walks the requested layer list in order; a hit in a slower layer is
//! promoted into every faster layer listed ahead of it so the next lookup is
//! O(1) against the memory tier. Writes run eviction before the memory-tier
//! insert so the configured ceilings hold after every `set`.
//!
//! No method here returns an error: storage failures degrade to misses and
//! logged no-ops, because the cache is an optimization rather than a system
//! of record.

use crate::entry::{MemoryEntry, PersistedEntry};
use crate::metrics::{CacheMetrics, CacheMetricsSnapshot};
use crate::tier::{CacheError, FileTier, PersistentTier, TierKind};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Configuration for the cache manager
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Memory-tier entry ceiling
    pub max_entries: usize,

    /// Memory-tier aggregate size ceiling, in serialized bytes
    pub max_memory_bytes: usize,

    /// TTL applied when a `set` does not supply one
    pub default_ttl: Duration,

    /// Interval between proactive expiry sweeps
    pub sweep_interval: Duration,

    /// Maximum number of durable entries promoted on construction
    pub warm_limit: usize,

    /// Directory backing the durable tier
    pub durable_dir: PathBuf,

    /// Namespace prefix for persistent entries
    pub namespace: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 500,
            max_memory_bytes: 5 * 1024 * 1024, // 5 MiB
            default_ttl: Duration::from_secs(60 * 60),
            sweep_interval: Duration::from_secs(300),
            warm_limit: 50,
            durable_dir: std::env::temp_dir().join("halo-cache"),
            namespace: "halo".to_string(),
        }
    }
}

/// Insert priority for `set` operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetPriority {
    /// Eviction picks the lowest recency+frequency score
    #[default]
    Normal,
    /// Eviction picks strictly the oldest `last_accessed` entry
    High,
}

/// Options for a `set` operation
#[derive(Debug, Clone)]
pub struct SetOptions {
    /// Entry TTL; the manager default applies when absent
    pub ttl: Option<Duration>,
    /// Layers to write, in order
    pub layers: Vec<TierKind>,
    /// Eviction behavior when the memory tier needs room
    pub priority: SetPriority,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            ttl: None,
            layers: CacheManager::DEFAULT_WRITE_LAYERS.to_vec(),
            priority: SetPriority::Normal,
        }
    }
}

impl SetOptions {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_layers(mut self, layers: &[TierKind]) -> Self {
        self.layers = layers.to_vec();
        self
    }

    pub fn high_priority(mut self) -> Self {
        self.priority = SetPriority::High;
        self
    }
}

#[derive(Default)]
struct MemoryStore {
    entries: HashMap<String, MemoryEntry>,
    total_bytes: usize,
}

impl MemoryStore {
    fn remove(&mut self, key: &str) -> Option<MemoryEntry> {
        let entry = self.entries.remove(key)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    fn insert(&mut self, key: String, entry: MemoryEntry) {
        self.remove(&key);
        self.total_bytes += entry.size_bytes;
        self.entries.insert(key, entry);
    }
}

/// Multi-tier cache with TTL expiry and scored eviction.
///
/// Constructed once per process and shared via `Arc`; every method takes
/// `&self`.
pub struct CacheManager {
    config: CacheConfig,
    memory: Mutex<MemoryStore>,
    session: Box<dyn PersistentTier>,
    durable: Box<dyn PersistentTier>,
    metrics: CacheMetrics,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    sweeper_running: AtomicBool,
}

impl CacheManager {
    /// Lookup order used when the caller does not specify layers
    pub const DEFAULT_READ_LAYERS: &'static [TierKind] = &[TierKind::Memory, TierKind::Session];

    /// Write targets used when the caller does not specify layers
    pub const DEFAULT_WRITE_LAYERS: &'static [TierKind] = &[TierKind::Memory, TierKind::Session];

    /// Create a manager with file-backed session and durable tiers, warm the
    /// memory tier from the durable one, and start the sweep task when a
    /// tokio runtime is available.
    pub fn new(config: CacheConfig) -> Result<Arc<Self>, CacheError> {
        let session = Box::new(FileTier::session(&config.namespace)?);
        let durable = Box::new(FileTier::durable(&config.durable_dir, &config.namespace)?);
        Self::with_tiers(config, session, durable)
    }

    /// Create a manager over caller-supplied persistent tiers
    pub fn with_tiers(
        config: CacheConfig,
        session: Box<dyn PersistentTier>,
        durable: Box<dyn PersistentTier>,
    ) -> Result<Arc<Self>, CacheError> {
        let manager = Arc::new(Self {
            config,
            memory: Mutex::new(MemoryStore::default()),
            session,
            durable,
            metrics: CacheMetrics::new(),
            sweeper: Mutex::new(None),
            sweeper_running: AtomicBool::new(false),
        });

        manager.warm();
        if tokio::runtime::Handle::try_current().is_ok() {
            manager.start_sweeper();
        }
        Ok(manager)
    }

    /// Look up `key` through `layers` in order, promoting slower-tier hits
    /// into every faster layer listed ahead of the hit. Returns `None` on
    /// miss, expiry, corruption, or storage failure.
    pub fn get<T: DeserializeOwned>(&self, key: &str, layers: &[TierKind]) -> Option<T> {
        let started = Instant::now();
        let now = Utc::now();

        for (depth, layer) in layers.iter().enumerate() {
            let found = match layer {
                TierKind::Memory => self.get_memory(key, now),
                TierKind::Session | TierKind::Durable => {
                    self.get_persistent(*layer, key, now)
                }
            };

            if let Some((data, expires_at)) = found {
                return match serde_json::from_value::<T>(data.clone()) {
                    Ok(value) => {
                        self.promote(key, &data, expires_at, &layers[..depth]);
                        self.metrics.record_hit(started.elapsed());
                        Some(value)
                    }
                    Err(e) => {
                        // Type drift counts as corruption: drop the entry
                        // and record what the caller saw, a miss.
                        warn!(key, error = %e, "cached value failed to deserialize");
                        self.remove_everywhere(key);
                        self.metrics.record_miss(started.elapsed());
                        None
                    }
                };
            }
        }

        self.metrics.record_miss(started.elapsed());
        None
    }

    fn get_memory(&self, key: &str, now: DateTime<Utc>) -> Option<(Value, DateTime<Utc>)> {
        let mut store = self.memory.lock().unwrap();
        let expired = match store.entries.get_mut(key) {
            None => return None,
            Some(entry) if entry.is_expired(now) => true,
            Some(entry) => {
                entry.touch();
                return Some((entry.data.clone(), entry.expires_at));
            }
        };
        if expired {
            store.remove(key);
        }
        None
    }

    fn get_persistent(
        &self,
        layer: TierKind,
        key: &str,
        now: DateTime<Utc>,
    ) -> Option<(Value, DateTime<Utc>)> {
        let tier = self.tier(layer);
        let entry = tier.load(key)?;
        if entry.is_expired(now) {
            tier.remove(key);
            return None;
        }
        Some((entry.data, entry.expires_at))
    }

    /// Store a value in the requested layers. Never fails: serialization or
    /// storage problems are logged and swallowed.
    pub fn set<T: Serialize>(&self, key: &str, value: &T, options: SetOptions) {
        let data = match serde_json::to_value(value) {
            Ok(data) => data,
            Err(e) => {
                warn!(key, error = %e, "cache set skipped: value failed to serialize");
                return;
            }
        };

        let ttl = options.ttl.unwrap_or(self.config.default_ttl);
        let expires_at = Utc::now()
            + ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::days(365 * 100));

        for layer in &options.layers {
            match layer {
                TierKind::Memory => {
                    self.insert_memory(key, data.clone(), expires_at, options.priority)
                }
                TierKind::Session | TierKind::Durable => {
                    self.store_persistent(*layer, key, data.clone(), expires_at)
                }
            }
        }
        self.metrics.record_write();
    }

    fn insert_memory(
        &self,
        key: &str,
        data: Value,
        expires_at: DateTime<Utc>,
        priority: SetPriority,
    ) {
        let size_bytes = data.to_string().len();
        if size_bytes > self.config.max_memory_bytes {
            debug!(key, size_bytes, "entry larger than the memory ceiling, not cached in memory");
            return;
        }

        let mut store = self.memory.lock().unwrap();
        // Replacing an existing entry should not count its old size
        store.remove(key);

        let mut evicted = 0u64;
        while store.total_bytes + size_bytes > self.config.max_memory_bytes
            || store.entries.len() + 1 > self.config.max_entries
        {
            let victim = match priority {
                SetPriority::Normal => store
                    .entries
                    .iter()
                    .min_by(|a, b| {
                        a.1.eviction_score()
                            .partial_cmp(&b.1.eviction_score())
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .map(|(k, _)| k.clone()),
                SetPriority::High => store
                    .entries
                    .iter()
                    .min_by_key(|(_, e)| e.last_accessed)
                    .map(|(k, _)| k.clone()),
            };
            match victim {
                Some(k) => {
                    store.remove(&k);
                    evicted += 1;
                }
                None => break,
            }
        }
        if evicted > 0 {
            self.metrics.record_evictions(evicted);
            debug!(key, evicted, "evicted entries to make room");
        }

        store.insert(key.to_string(), MemoryEntry::new(data, expires_at, size_bytes));
    }

    fn store_persistent(&self, layer: TierKind, key: &str, data: Value, expires_at: DateTime<Utc>) {
        let entry = PersistedEntry {
            key: key.to_string(),
            data,
            expires_at,
        };
        if let Err(e) = self.tier(layer).store(&entry) {
            // Best-effort by design: the memory tier stays authoritative
            warn!(key, %layer, error = %e, "persistent cache write failed");
        }
    }

    fn promote(&self, key: &str, data: &Value, expires_at: DateTime<Utc>, faster: &[TierKind]) {
        for layer in faster {
            match layer {
                TierKind::Memory => {
                    self.insert_memory(key, data.clone(), expires_at, SetPriority::Normal)
                }
                TierKind::Session | TierKind::Durable => {
                    self.store_persistent(*layer, key, data.clone(), expires_at)
                }
            }
        }
    }

    /// Remove an exact key, or every key matching a trailing-`*` prefix
    /// pattern, from all tiers. Returns the number of entries removed.
    pub fn invalidate(&self, pattern: &str) -> usize {
        if let Some(prefix) = pattern.strip_suffix('*') {
            let mut removed = {
                let mut store = self.memory.lock().unwrap();
                let victims: Vec<String> = store
                    .entries
                    .keys()
                    .filter(|k| k.starts_with(prefix))
                    .cloned()
                    .collect();
                for k in &victims {
                    store.remove(k);
                }
                victims.len()
            };
            removed += self.session.remove_prefix(prefix);
            removed += self.durable.remove_prefix(prefix);
            removed
        } else {
            self.remove_everywhere(pattern)
        }
    }

    fn remove_everywhere(&self, key: &str) -> usize {
        let mut removed = 0;
        if self.memory.lock().unwrap().remove(key).is_some() {
            removed += 1;
        }
        if self.session.remove(key) {
            removed += 1;
        }
        if self.durable.remove(key) {
            removed += 1;
        }
        removed
    }

    /// Purge expired entries from every tier, returning the total removed
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let from_memory = {
            let mut store = self.memory.lock().unwrap();
            let victims: Vec<String> = store
                .entries
                .iter()
                .filter(|(_, e)| e.is_expired(now))
                .map(|(k, _)| k.clone())
                .collect();
            for k in &victims {
                store.remove(k);
            }
            victims.len()
        };
        from_memory + self.session.sweep_expired() + self.durable.sweep_expired()
    }

    /// Spawn the periodic sweep task. Idempotent; the task holds only a weak
    /// reference so a dropped manager stops sweeping on its own.
    pub fn start_sweeper(self: &Arc<Self>) {
        if self.sweeper_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = self.config.sweep_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // the first tick fires immediately
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(manager) => {
                        let removed = manager.sweep();
                        if removed > 0 {
                            debug!(removed, "cache sweep removed expired entries");
                        }
                    }
                    None => break,
                }
            }
        });
        *self.sweeper.lock().unwrap() = Some(handle);
    }

    /// Stop the periodic sweep task
    pub fn stop_sweeper(&self) {
        if let Some(handle) = self.sweeper.lock().unwrap().take() {
            handle.abort();
        }
        self.sweeper_running.store(false, Ordering::SeqCst);
    }

    /// Snapshot of counters plus derived hit-rate/efficiency
    pub fn metrics(&self) -> CacheMetricsSnapshot {
        let (bytes, count) = {
            let store = self.memory.lock().unwrap();
            (store.total_bytes as u64, store.entries.len())
        };
        self.metrics.snapshot(bytes, count)
    }

    /// Reset all counters to zero
    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    // Promote recently persisted entries so a fresh process is not cold
    fn warm(&self) {
        let now = Utc::now();
        let mut warmed = 0;
        for entry in self.durable.scan(self.config.warm_limit) {
            if entry.is_expired(now) {
                continue;
            }
            self.insert_memory(&entry.key, entry.data, entry.expires_at, SetPriority::Normal);
            warmed += 1;
        }
        if warmed > 0 {
            debug!(warmed, "warmed memory tier from durable entries");
        }
    }

    fn tier(&self, layer: TierKind) -> &dyn PersistentTier {
        match layer {
            TierKind::Session => self.session.as_ref(),
            TierKind::Durable => self.durable.as_ref(),
            TierKind::Memory => unreachable!("memory tier is not a PersistentTier"),
        }
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.lock().unwrap().take() {
            handle.abort();
        }
    }
}
