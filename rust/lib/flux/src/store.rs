use std::any::Any;
use std::sync::{Arc, OnceLock, RwLock};

use tracing::{info, trace};

use crate::config::StoreConfig;
use crate::error::{StateError, validate_key};
use crate::registry::{Filter, Handler, SubscriptionRegistry, invoke_all};
use crate::scheduler::Scheduler;
use crate::trie::StateTrie;
use crate::value::{StateValue, SubscriptionId};
use crate::{read, write};

/// Per-call dispatch options for `set_with` / `toggle_with`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Notify before returning instead of after the debounce window.
    pub immediate: bool,
    /// Notify even when the new value equals the stored one.
    pub trigger_when_equal: bool,
}

impl SetOptions {
    /// Notify before `set` returns.
    pub fn immediate() -> Self {
        Self {
            immediate: true,
            ..Self::default()
        }
    }

    /// Also notify when the value did not change.
    pub fn trigger_when_equal(mut self) -> Self {
        self.trigger_when_equal = true;
        self
    }
}

/// Keyed state store with debounced, prefix-aware change notification.
///
/// - `set(key, value)` stores a value and schedules a notification.
/// - `get(key)` reads the current value (Arc clone, cheap).
/// - `on(keys, handler, context)` / `subscribe(key, f)` register handlers.
/// - `off(key, filter)` / `unsubscribe(id)` remove them.
/// - `destroy()` resets everything and cancels pending notifications.
///
/// Writes of an equal value are skipped unless
/// [`SetOptions::trigger_when_equal`] is set. No lock is held while handlers
/// run, so handlers may read and write the store.
pub struct StateStore {
    inner: Arc<Inner>,
}

struct Inner {
    config: StoreConfig,
    state: RwLock<StateTrie>,
    subscriptions: RwLock<SubscriptionRegistry<String>>,
    scheduler: Scheduler<String>,
}

impl Inner {
    fn notify(&self, key: &str) {
        let targets = self.config.key_mode.notify_targets(key);
        let handlers = read(&self.subscriptions).matching(&targets);
        if handlers.is_empty() {
            return;
        }
        trace!(key, count = handlers.len(), "notifying handlers");
        invoke_all(key, handlers);
    }
}

impl StateStore {
    /// Create an empty store with hierarchical keys and the default debounce.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Create an empty store with an explicit configuration.
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(StateTrie::new(config.key_mode)),
                subscriptions: RwLock::new(SubscriptionRegistry::new()),
                scheduler: Scheduler::with_runtime(config.debounce, config.runtime.clone()),
                config,
            }),
        }
    }

    /// Create a store pre-populated with `entries`. Nothing is notified.
    pub fn with_state<I, S>(config: StoreConfig, entries: I) -> Result<Self, StateError>
    where
        I: IntoIterator<Item = (S, StateValue)>,
        S: AsRef<str>,
    {
        let mut trie = StateTrie::new(config.key_mode);
        for (key, value) in entries {
            let key = key.as_ref();
            validate_key(key)?;
            trie.insert(key, value);
        }
        let store = Self::with_config(config);
        *write(&store.inner.state) = trie;
        Ok(store)
    }

    /// Process-wide default store, created on first use.
    ///
    /// It lives until process exit; call `destroy()` to reset it.
    pub fn global() -> &'static StateStore {
        static GLOBAL: OnceLock<StateStore> = OnceLock::new();
        GLOBAL.get_or_init(StateStore::new)
    }

    /// The configuration this store was built with.
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    // ====================================================================
    // State: write
    // ====================================================================

    /// Set a typed value and schedule a debounced notification.
    pub fn set<T>(&self, key: &str, value: T) -> Result<(), StateError>
    where
        T: Any + PartialEq + Send + Sync,
    {
        self.set_with(key, StateValue::new(value), SetOptions::default())
    }

    /// Set a pre-built StateValue and schedule a debounced notification.
    pub fn set_value(&self, key: &str, value: StateValue) -> Result<(), StateError> {
        self.set_with(key, value, SetOptions::default())
    }

    /// Set a value with explicit dispatch options.
    ///
    /// The value is always written. Dispatch is skipped when the value is
    /// strictly equal to the previous one, unless `trigger_when_equal`.
    /// In hierarchical mode the notification also reaches every ancestor
    /// prefix of `key`.
    ///
    /// Debounced dispatch runs on the runtime captured when the store was
    /// built, so `set` may be called from any thread. A store built outside
    /// a runtime, with none configured, returns `StateError::NoRuntime` for
    /// debounced writes unless called from inside one; nothing is written.
    pub fn set_with(
        &self,
        key: &str,
        value: StateValue,
        options: SetOptions,
    ) -> Result<(), StateError> {
        validate_key(key)?;
        if !options.immediate {
            self.inner.scheduler.runtime()?;
        }
        let previous = write(&self.inner.state).insert(key, value.clone());

        if !options.trigger_when_equal && previous.is_some_and(|p| p.strict_eq(&value)) {
            trace!(key, "value unchanged, skipping dispatch");
            return Ok(());
        }
        self.dispatch(key, options.immediate)
    }

    /// Flip the truthiness of the value at `key`, storing a `bool`.
    pub fn toggle(&self, key: &str) -> Result<(), StateError> {
        self.toggle_with(key, SetOptions::default())
    }

    /// Toggle with explicit dispatch options.
    pub fn toggle_with(&self, key: &str, options: SetOptions) -> Result<(), StateError> {
        let current = self.get(key)?.is_some_and(|v| v.is_truthy());
        self.set_with(key, StateValue::new(!current), options)
    }

    fn dispatch(&self, key: &str, immediate: bool) -> Result<(), StateError> {
        let inner = Arc::downgrade(&self.inner);
        let target = key.to_string();
        self.inner
            .scheduler
            .schedule_or_fire_now(key.to_string(), immediate, move || {
                if let Some(inner) = inner.upgrade() {
                    inner.notify(&target);
                }
            })
    }

    // ====================================================================
    // State: read
    // ====================================================================

    /// Get the current value at `key`.
    ///
    /// When `key` names a branch of deeper paths the result is a
    /// [`Branch`](crate::Branch) of its leaves. Returns `None` only when
    /// neither a value nor a branch exists there.
    pub fn get(&self, key: &str) -> Result<Option<StateValue>, StateError> {
        validate_key(key)?;
        Ok(read(&self.inner.state).get(key))
    }

    /// Check if a value or a branch exists at the given key.
    pub fn contains(&self, key: &str) -> bool {
        read(&self.inner.state).contains(key)
    }

    /// Scan all values strictly below `prefix`, ordered by path.
    pub fn scan(&self, prefix: &str) -> Vec<(String, StateValue)> {
        read(&self.inner.state).scan(prefix)
    }

    /// Get a snapshot of all keys and values, ordered by path.
    pub fn snapshot(&self) -> Vec<(String, StateValue)> {
        read(&self.inner.state).snapshot()
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        read(&self.inner.state).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ====================================================================
    // Subscriptions
    // ====================================================================

    /// Register `handler` for each space-delimited key in `keys`.
    ///
    /// `context` tags the subscriptions for bulk removal with
    /// [`Filter::ByContext`]. Returns one id per key.
    pub fn on(
        &self,
        keys: &str,
        handler: Handler,
        context: Option<&str>,
    ) -> Result<Vec<SubscriptionId>, StateError> {
        write(&self.inner.subscriptions).add_keys(keys, handler, context.map(str::to_string))
    }

    /// Subscribe a closure to a single key.
    pub fn subscribe<F>(&self, key: &str, f: F) -> Result<SubscriptionId, StateError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        write(&self.inner.subscriptions).add_key(key, Arc::new(f), None)
    }

    /// Remove subscriptions. Returns how many were removed.
    ///
    /// | key    | filter | removes                                  |
    /// |--------|--------|------------------------------------------|
    /// | `None` | `None` | everything                               |
    /// | `None` | `Some` | matching context or handler, on any key  |
    /// | `Some` | `None` | everything at exactly `key`              |
    /// | `Some` | `Some` | matching context or handler at `key`     |
    pub fn off(&self, key: Option<&str>, filter: Option<&Filter>) -> usize {
        let mut subscriptions = write(&self.inner.subscriptions);
        match (key, filter) {
            (None, None) => subscriptions.remove_all(),
            (None, Some(filter)) => subscriptions.remove_by_filter(filter),
            (Some(key), None) => subscriptions.remove_by_key(&key.to_string()),
            (Some(key), Some(filter)) => {
                subscriptions.remove_by_key_and_filter(&key.to_string(), filter)
            }
        }
    }

    /// Remove a single subscription by id. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        write(&self.inner.subscriptions).remove_by_id(id)
    }

    /// Number of live subscriptions across all keys.
    pub fn subscription_count(&self) -> usize {
        read(&self.inner.subscriptions).len()
    }

    /// Number of armed debounced notifications.
    pub fn pending_count(&self) -> usize {
        self.inner.scheduler.pending_count()
    }

    // ====================================================================
    // Lifecycle
    // ====================================================================

    /// Clear state and subscriptions and cancel every pending notification.
    ///
    /// The store stays usable afterwards. Calling it twice is harmless.
    pub fn destroy(&self) {
        let cancelled = self.inner.scheduler.cancel_all();
        write(&self.inner.state).clear();
        let removed = write(&self.inner.subscriptions).remove_all();
        info!(cancelled, removed, "state store destroyed");
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}
