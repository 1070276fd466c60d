use std::any::Any;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::{info, trace};

use crate::config::DEFAULT_DEBOUNCE;
use crate::error::StateError;
use crate::registry::{Filter, Handler, SubscriptionRegistry, invoke_all};
use crate::scheduler::Scheduler;
use crate::store::SetOptions;
use crate::value::{StateValue, SubscriptionId};
use crate::{read, write};

/// A single observed value.
///
/// Same rules as [`StateStore`](crate::StateStore) without keys: writes are
/// debounced into one notification, equal writes are skipped, and handlers
/// run in registration order.
pub struct ValueCell {
    inner: Arc<CellInner>,
}

struct CellInner {
    value: RwLock<Option<StateValue>>,
    subscriptions: RwLock<SubscriptionRegistry<()>>,
    scheduler: Scheduler<()>,
}

impl CellInner {
    fn notify(&self) {
        let handlers = read(&self.subscriptions).matching(&[()]);
        trace!(count = handlers.len(), "notifying cell handlers");
        invoke_all("cell", handlers);
    }
}

impl ValueCell {
    /// Create a cell holding `initial`.
    pub fn new<T: Any + PartialEq + Send + Sync>(initial: T) -> Self {
        Self::with_debounce(DEFAULT_DEBOUNCE, Some(StateValue::new(initial)))
    }

    /// Create a cell with no value.
    pub fn empty() -> Self {
        Self::with_debounce(DEFAULT_DEBOUNCE, None)
    }

    /// Create a cell with a custom debounce window.
    ///
    /// Debounced notifications run on the tokio runtime current at this
    /// call, so later writes may come from any thread.
    pub fn with_debounce(debounce: Duration, initial: Option<StateValue>) -> Self {
        Self {
            inner: Arc::new(CellInner {
                value: RwLock::new(initial),
                subscriptions: RwLock::new(SubscriptionRegistry::new()),
                scheduler: Scheduler::new(debounce),
            }),
        }
    }

    /// Set a typed value and schedule a debounced notification.
    pub fn set<T: Any + PartialEq + Send + Sync>(&self, value: T) -> Result<(), StateError> {
        self.set_with(StateValue::new(value), SetOptions::default())
    }

    /// Set a pre-built StateValue and schedule a debounced notification.
    pub fn set_value(&self, value: StateValue) -> Result<(), StateError> {
        self.set_with(value, SetOptions::default())
    }

    /// Set a value with explicit dispatch options.
    ///
    /// Returns `StateError::NoRuntime` for a debounced write when no
    /// runtime is reachable; the value is left untouched.
    pub fn set_with(&self, value: StateValue, options: SetOptions) -> Result<(), StateError> {
        if !options.immediate {
            self.inner.scheduler.runtime()?;
        }
        let previous = write(&self.inner.value).replace(value.clone());
        if !options.trigger_when_equal && previous.is_some_and(|p| p.strict_eq(&value)) {
            return Ok(());
        }

        let inner = Arc::downgrade(&self.inner);
        self.inner.scheduler.schedule_or_fire_now((), options.immediate, move || {
            if let Some(inner) = inner.upgrade() {
                inner.notify();
            }
        })
    }

    /// Current value, `None` when the cell is empty.
    pub fn get(&self) -> Option<StateValue> {
        read(&self.inner.value).clone()
    }

    /// Flip the truthiness of the value, storing a `bool`.
    pub fn toggle(&self) -> Result<(), StateError> {
        self.toggle_with(SetOptions::default())
    }

    pub fn toggle_with(&self, options: SetOptions) -> Result<(), StateError> {
        let current = self.get().is_some_and(|v| v.is_truthy());
        self.set_with(StateValue::new(!current), options)
    }

    /// Register `handler`, optionally tagged with `context`.
    pub fn on(&self, handler: Handler, context: Option<&str>) -> SubscriptionId {
        write(&self.inner.subscriptions).add((), handler, context.map(str::to_string))
    }

    /// Subscribe a closure.
    pub fn subscribe<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on(Arc::new(f), None)
    }

    /// Remove every subscription (`None`) or those matching `filter`.
    pub fn off(&self, filter: Option<&Filter>) -> usize {
        let mut subscriptions = write(&self.inner.subscriptions);
        match filter {
            None => subscriptions.remove_all(),
            Some(filter) => subscriptions.remove_by_filter(filter),
        }
    }

    /// Remove a single subscription by id. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        write(&self.inner.subscriptions).remove_by_id(id)
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        read(&self.inner.subscriptions).len()
    }

    /// Drop the value and subscriptions and cancel a pending notification.
    pub fn destroy(&self) {
        let cancelled = self.inner.scheduler.cancel_all();
        *write(&self.inner.value) = None;
        let removed = write(&self.inner.subscriptions).remove_all();
        info!(cancelled, removed, "value cell destroyed");
    }
}

impl Default for ValueCell {
    fn default() -> Self {
        Self::empty()
    }
}
