//! Core state: an immutable application state store with bounded history
//!
//! ## Overview
//!
//! State is held as `Arc` snapshots: an update swaps the pointer, records
//! the new snapshot in a bounded history ring, and notifies subscribers
//! through a `watch` channel that coalesces bursts. Selectors are memoized
//! per key until the next accepted update. Optional persistence routes
//! through the cache manager on a debounce timer.
//!
//! ## Example
//!
//! ```
//! use halo_core_state::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = StateStore::new(vec![1u32], StateConfig::default());
//! store.update_with(|v| {
//!     let mut v = v.clone();
//!     v.push(2);
//!     v
//! }, Some("push"));
//! assert_eq!(*store.state(), vec![1, 2]);
//! store.undo();
//! assert_eq!(*store.state(), vec![1]);
//! # }
//! ```

pub mod history;
pub mod store;

pub use history::{History, StateSnapshot};
pub use store::{ChangeNotice, StateConfig, StateStore};

/// Common imports for downstream crates
pub mod prelude {
    pub use crate::store::{ChangeNotice, StateConfig, StateStore};
}
