//! Persistent tier abstraction and the file-backed implementation
//!
//! A persistent tier is a key/value namespace where each entry is stored as
//! a JSON envelope `{ key, data, expires_at }` in its own file. Filenames are
//! `<prefix>_<hash>.json` where the hash is a stable digest of the key, so
//! keys may contain arbitrary characters.
//!
//! Corrupted entries are deleted on the next read rather than surfaced as
//! errors; the tier above treats them as misses.

use crate::entry::PersistedEntry;
use chrono::Utc;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, warn};

/// Identifies a cache layer in lookup-order lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TierKind {
    /// In-process map, always fastest
    Memory,
    /// File-backed namespace scoped to this process session
    Session,
    /// File-backed namespace that survives restarts
    Durable,
}

impl std::fmt::Display for TierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TierKind::Memory => write!(f, "memory"),
            TierKind::Session => write!(f, "session"),
            TierKind::Durable => write!(f, "durable"),
        }
    }
}

/// Errors internal to tier storage. These never cross the cache manager's
/// public surface; callers of the manager observe misses and no-ops instead.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Underlying filesystem failure
    #[error("cache storage I/O error: {0}")]
    Io(#[from] io::Error),

    /// Entry could not be serialized
    #[error("cache entry serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A persistent key/value namespace used as a cache tier.
///
/// Implementations must be cheap to call from async contexts: entries are
/// small JSON documents and operations never block on anything but local
/// storage.
pub trait PersistentTier: Send + Sync {
    /// Load an entry, deleting it first if it is corrupted. Expiry is the
    /// caller's concern; expired envelopes are returned as-is.
    fn load(&self, key: &str) -> Option<PersistedEntry>;

    /// Store an entry, overwriting any previous value for the key
    fn store(&self, entry: &PersistedEntry) -> Result<(), CacheError>;

    /// Remove an entry; returns whether one existed
    fn remove(&self, key: &str) -> bool;

    /// Read back up to `limit` envelopes, in unspecified order
    fn scan(&self, limit: usize) -> Vec<PersistedEntry>;

    /// Delete every expired entry, returning the number removed
    fn sweep_expired(&self) -> usize;

    /// Remove every entry whose key starts with `prefix`, returning the count
    fn remove_prefix(&self, prefix: &str) -> usize;
}

/// File-backed tier: one JSON file per entry under a namespace prefix.
pub struct FileTier {
    root: PathBuf,
    prefix: String,
    // Owning the tempdir ties the session namespace to this tier's lifetime
    _session_dir: Option<TempDir>,
}

impl FileTier {
    /// Open a durable namespace rooted at `root`, creating it if needed
    pub fn durable(root: impl Into<PathBuf>, prefix: &str) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            prefix: prefix.to_string(),
            _session_dir: None,
        })
    }

    /// Open a session-scoped namespace in an owned temporary directory.
    /// The directory (and every entry in it) is removed when the tier drops.
    pub fn session(prefix: &str) -> Result<Self, CacheError> {
        let dir = TempDir::new()?;
        let root = dir.path().to_path_buf();
        Ok(Self {
            root,
            prefix: prefix.to_string(),
            _session_dir: Some(dir),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = blake3::hash(key.as_bytes()).to_hex();
        self.root
            .join(format!("{}_{}.json", self.prefix, &digest.as_str()[..32]))
    }

    fn read_envelope(&self, path: &Path) -> Option<PersistedEntry> {
        let contents = fs::read_to_string(path).ok()?;
        match serde_json::from_str::<PersistedEntry>(&contents) {
            Ok(entry) => Some(entry),
            Err(e) => {
                // Corrupted entry: delete rather than surface
                debug!(path = %path.display(), error = %e, "removing corrupted cache entry");
                let _ = fs::remove_file(path);
                None
            }
        }
    }

    fn entry_paths(&self) -> Vec<PathBuf> {
        let needle = format!("{}_", self.prefix);
        let Ok(read_dir) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        read_dir
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(&needle) && n.ends_with(".json"))
                    .unwrap_or(false)
            })
            .collect()
    }
}

impl PersistentTier for FileTier {
    fn load(&self, key: &str) -> Option<PersistedEntry> {
        let path = self.path_for(key);
        if !path.exists() {
            return None;
        }
        self.read_envelope(&path)
    }

    fn store(&self, entry: &PersistedEntry) -> Result<(), CacheError> {
        let path = self.path_for(&entry.key);
        let contents = serde_json::to_string(entry)?;
        fs::write(&path, contents)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> bool {
        let path = self.path_for(key);
        fs::remove_file(path).is_ok()
    }

    fn scan(&self, limit: usize) -> Vec<PersistedEntry> {
        self.entry_paths()
            .iter()
            .filter_map(|p| self.read_envelope(p))
            .take(limit)
            .collect()
    }

    fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut removed = 0;
        for path in self.entry_paths() {
            if let Some(entry) = self.read_envelope(&path) {
                if entry.is_expired(now) && fs::remove_file(&path).is_ok() {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            debug!(prefix = %self.prefix, removed, "swept expired entries");
        }
        removed
    }

    fn remove_prefix(&self, prefix: &str) -> usize {
        let mut removed = 0;
        for path in self.entry_paths() {
            if let Some(entry) = self.read_envelope(&path) {
                if entry.key.starts_with(prefix) {
                    if let Err(e) = fs::remove_file(&path) {
                        warn!(key = %entry.key, error = %e, "failed to remove cache entry");
                    } else {
                        removed += 1;
                    }
                }
            }
        }
        removed
    }
}
