//! Flux: lean subscription-based state.
//!
//! A small in-process store that holds named values, lets observers subscribe
//! to changes on a key (or, with hierarchical keys, on any ancestor prefix),
//! and notifies them asynchronously. Bursts of writes to one key inside the
//! debounce window collapse into a single notification.
//!
//! # Two containers
//!
//! - [`StateStore`]: many values keyed by string. Keys are flat or
//!   `/`-delimited paths (see [`KeyMode`]).
//! - [`ValueCell`]: a single observed value, same dispatch rules.
//!
//! # Notifications
//!
//! Handlers take no arguments; they read the current value from the store
//! when they run, so a debounced notification always observes the latest
//! write. A change at `a/b/c` notifies subscribers of `a/b/c`, then `a/b`,
//! then `a` (hierarchical mode). Debounced dispatch runs on the ambient tokio
//! runtime; immediate dispatch runs before `set` returns.
//!
//! # Example
//!
//! ```ignore
//! use flux::{StateStore, SetOptions, StateValue};
//!
//! let store = Arc::new(StateStore::new());
//! let reader = Arc::clone(&store);
//! store.subscribe("home/devices", move || {
//!     let devices = reader.get("home/devices/1").unwrap();
//!     println!("devices changed: {devices:?}");
//! })?;
//!
//! store.set("home/devices/1", "lamp".to_string())?;
//! store.set_with("app/route", StateValue::new("/home"), SetOptions::immediate())?;
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub mod cell;
pub mod config;
pub mod error;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod trie;
pub mod value;

// Re-export primary types at crate root.
pub use cell::ValueCell;
pub use config::{DEFAULT_DEBOUNCE, KeyMode, StoreConfig};
pub use error::StateError;
pub use registry::{Filter, Handler, SubscriptionRegistry, handler};
pub use scheduler::Scheduler;
pub use store::{SetOptions, StateStore};
pub use trie::{Branch, StateTrie};
pub use value::{StateValue, SubscriptionId};

// Handlers never run under these locks, so a poisoned lock only means a
// panic elsewhere; the data is still consistent.

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(PoisonError::into_inner)
}
