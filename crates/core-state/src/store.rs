//! The state store: immutable snapshots, coalesced notification, and
//! debounced persistence
//!
//! ## Overview
//!
//! State lives behind `Arc<T>`; an accepted update swaps the pointer and
//! records a history snapshot, so readers keep whatever snapshot they
//! already hold and nothing is ever mutated in place. Shallow-equal
//! updates are discarded outright. Observers subscribe through a `watch`
//! channel, so a synchronous burst of updates coalesces to the final state
//! by the time an observer is scheduled.
//!
//! Persistence, when configured, goes through the cache manager on a
//! debounce timer rather than synchronously on every update.

use crate::history::History;
use chrono::{DateTime, Utc};
use halo_core_cache::{CacheManager, SetOptions, TierKind};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct StateConfig {
    /// History ring capacity
    pub history_limit: usize,

    /// Key the store persists under; `None` disables persistence
    pub persist_key: Option<String>,

    /// A persisted snapshot older than this is ignored at load
    pub freshness: Duration,

    /// Quiet period after the last update before a persist runs
    pub debounce: Duration,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            history_limit: 50,
            persist_key: None,
            freshness: Duration::from_secs(24 * 60 * 60),
            debounce: Duration::from_secs(1),
        }
    }
}

/// What subscribers receive on every accepted change
#[derive(Debug)]
pub struct ChangeNotice<T> {
    pub current: Arc<T>,
    pub previous: Arc<T>,
    pub version: u64,
}

impl<T> Clone for ChangeNotice<T> {
    fn clone(&self) -> Self {
        Self {
            current: Arc::clone(&self.current),
            previous: Arc::clone(&self.previous),
            version: self.version,
        }
    }
}

/// Persisted envelope; `saved_at` gates the freshness window at load
#[derive(Debug, Serialize, Deserialize)]
struct PersistedState<T> {
    state: T,
    saved_at: DateTime<Utc>,
}

struct MemoEntry {
    version: u64,
    value: Box<dyn Any + Send>,
}

struct StoreInner<T> {
    current: Arc<T>,
    version: u64,
    history: History<T>,
    memo: HashMap<String, MemoEntry>,
}

pub struct StateStore<T> {
    config: StateConfig,
    inner: Mutex<StoreInner<T>>,
    notify: watch::Sender<ChangeNotice<T>>,
    cache: Option<Arc<CacheManager>>,
    persist_task: Mutex<Option<JoinHandle<()>>>,
}

const PERSIST_LAYERS: &[TierKind] = &[TierKind::Memory, TierKind::Durable];

impl<T> StateStore<T>
where
    T: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(initial: T, config: StateConfig) -> Arc<Self> {
        Self::build(initial, config, None)
    }

    /// Create a store that loads from and persists through the cache.
    ///
    /// A cached snapshot is only adopted when it is younger than the
    /// configured freshness window; otherwise `initial` stands.
    pub fn with_persistence(
        initial: T,
        config: StateConfig,
        cache: Arc<CacheManager>,
    ) -> Arc<Self> {
        let initial = match &config.persist_key {
            Some(key) => match cache.get::<PersistedState<T>>(&storage_key(key), PERSIST_LAYERS) {
                Some(persisted)
                    if Utc::now() - persisted.saved_at
                        < chrono::Duration::from_std(config.freshness)
                            .unwrap_or(chrono::Duration::MAX) =>
                {
                    tracing::info!(key = %key, "restored persisted state");
                    persisted.state
                }
                Some(_) => {
                    tracing::debug!(key = %key, "persisted state too old, starting fresh");
                    initial
                }
                None => initial,
            },
            None => initial,
        };
        Self::build(initial, config, Some(cache))
    }

    fn build(initial: T, config: StateConfig, cache: Option<Arc<CacheManager>>) -> Arc<Self> {
        let initial = Arc::new(initial);
        let (notify, _) = watch::channel(ChangeNotice {
            current: Arc::clone(&initial),
            previous: Arc::clone(&initial),
            version: 0,
        });
        Arc::new(Self {
            inner: Mutex::new(StoreInner {
                current: Arc::clone(&initial),
                version: 0,
                history: History::new(config.history_limit, initial),
                memo: HashMap::new(),
            }),
            config,
            notify,
            cache,
            persist_task: Mutex::new(None),
        })
    }

    /// Current state snapshot. Cheap; clones an `Arc`.
    pub fn state(&self) -> Arc<T> {
        Arc::clone(&self.inner.lock().unwrap().current)
    }

    pub fn version(&self) -> u64 {
        self.inner.lock().unwrap().version
    }

    pub fn history_len(&self) -> usize {
        self.inner.lock().unwrap().history.len()
    }

    /// Replace the state. Returns false when `next` equals the current
    /// state, in which case nothing is recorded or notified.
    pub fn set_state(self: &Arc<Self>, next: T, label: Option<&str>) -> bool {
        self.apply(next, label)
    }

    /// Compute the next state from the current one
    pub fn update_with(
        self: &Arc<Self>,
        f: impl FnOnce(&T) -> T,
        label: Option<&str>,
    ) -> bool {
        let next = f(&self.state());
        self.apply(next, label)
    }

    fn apply(self: &Arc<Self>, next: T, label: Option<&str>) -> bool {
        let notice = {
            let mut inner = self.inner.lock().unwrap();
            if next == *inner.current {
                return false;
            }
            let next = Arc::new(next);
            let previous = std::mem::replace(&mut inner.current, Arc::clone(&next));
            inner.version += 1;
            inner
                .history
                .push(Arc::clone(&next), label.map(str::to_string));
            ChangeNotice {
                current: next,
                previous,
                version: inner.version,
            }
        };
        let _ = self.notify.send(notice);
        self.schedule_persist();
        true
    }

    /// Step back to the previous history entry
    pub fn undo(self: &Arc<Self>) -> bool {
        self.time_travel(|history| history.undo().map(|s| Arc::clone(&s.state)))
    }

    /// Step forward to the next history entry
    pub fn redo(self: &Arc<Self>) -> bool {
        self.time_travel(|history| history.redo().map(|s| Arc::clone(&s.state)))
    }

    /// Jump to an absolute history index
    pub fn go_to(self: &Arc<Self>, index: usize) -> bool {
        self.time_travel(|history| history.go_to(index).map(|s| Arc::clone(&s.state)))
    }

    fn time_travel(
        self: &Arc<Self>,
        step: impl FnOnce(&mut History<T>) -> Option<Arc<T>>,
    ) -> bool {
        let notice = {
            let mut inner = self.inner.lock().unwrap();
            let Some(target) = step(&mut inner.history) else {
                return false;
            };
            let previous = std::mem::replace(&mut inner.current, Arc::clone(&target));
            inner.version += 1;
            ChangeNotice {
                current: target,
                previous,
                version: inner.version,
            }
        };
        let _ = self.notify.send(notice);
        self.schedule_persist();
        true
    }

    /// Run a selector, memoized under `cache_key` until the next accepted
    /// update.
    ///
    /// The selector runs without the store lock held, so it may read the
    /// store itself (nested `select`, `state()`).
    pub fn select<R>(&self, cache_key: &str, selector: impl FnOnce(&T) -> R) -> R
    where
        R: Clone + Send + 'static,
    {
        let (current, version) = {
            let inner = self.inner.lock().unwrap();
            if let Some(memo) = inner.memo.get(cache_key) {
                if memo.version == inner.version {
                    if let Some(value) = memo.value.downcast_ref::<R>() {
                        return value.clone();
                    }
                }
            }
            (Arc::clone(&inner.current), inner.version)
        };

        let value = selector(&current);

        let mut inner = self.inner.lock().unwrap();
        // Memoize only if no update slipped in while the selector ran
        if inner.version == version {
            inner.memo.insert(
                cache_key.to_string(),
                MemoEntry {
                    version,
                    value: Box::new(value.clone()),
                },
            );
        }
        value
    }

    /// Subscribe to accepted changes. The channel holds only the latest
    /// notice, so a burst of updates is observed as the final state.
    pub fn subscribe(&self) -> watch::Receiver<ChangeNotice<T>> {
        self.notify.subscribe()
    }

    fn schedule_persist(self: &Arc<Self>) {
        if self.cache.is_none() || self.config.persist_key.is_none() {
            return;
        }
        if Handle::try_current().is_err() {
            return;
        }
        let mut task = self.persist_task.lock().unwrap();
        if let Some(handle) = task.take() {
            handle.abort();
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        let debounce = self.config.debounce;
        *task = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if let Some(store) = weak.upgrade() {
                store.persist_now();
            }
        }));
    }

    /// Persist the current state immediately, bypassing the debounce
    pub fn persist_now(&self) {
        let (Some(cache), Some(key)) = (&self.cache, &self.config.persist_key) else {
            return;
        };
        let current = self.state();
        let payload = PersistedState {
            state: (*current).clone(),
            saved_at: Utc::now(),
        };
        cache.set(
            &storage_key(key),
            &payload,
            SetOptions::default()
                .with_layers(PERSIST_LAYERS)
                .with_ttl(self.config.freshness),
        );
        tracing::debug!(key = %key, "persisted state snapshot");
    }
}

impl<T> Drop for StateStore<T> {
    fn drop(&mut self) {
        if let Ok(mut task) = self.persist_task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}

fn storage_key(persist_key: &str) -> String {
    format!("state_{persist_key}")
}
