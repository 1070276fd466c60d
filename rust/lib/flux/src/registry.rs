use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::error;

use crate::error::{StateError, validate_key};
use crate::value::SubscriptionId;

/// Zero-argument change callback. Handlers read the current value themselves.
pub type Handler = Arc<dyn Fn() + Send + Sync>;

/// Wrap a closure as a [`Handler`].
///
/// Keep the returned `Arc` around to remove the subscription later with
/// [`Filter::ByHandler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn() + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Selects subscriptions for removal.
#[derive(Clone)]
pub enum Filter {
    /// Subscriptions registered with this context tag.
    ByContext(String),
    /// Subscriptions registered with this exact handler (`Arc` identity).
    ByHandler(Handler),
}

impl Filter {
    pub fn context(tag: impl Into<String>) -> Self {
        Filter::ByContext(tag.into())
    }

    fn matches<K>(&self, sub: &Subscription<K>) -> bool {
        match self {
            Filter::ByContext(tag) => sub.context.as_deref() == Some(tag.as_str()),
            Filter::ByHandler(h) => Arc::ptr_eq(h, &sub.handler),
        }
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::ByContext(tag) => f.debug_tuple("ByContext").field(tag).finish(),
            Filter::ByHandler(h) => f
                .debug_tuple("ByHandler")
                .field(&Arc::as_ptr(h).cast::<()>())
                .finish(),
        }
    }
}

struct Subscription<K> {
    id: SubscriptionId,
    key: K,
    handler: Handler,
    context: Option<String>,
}

/// Ordered list of subscriptions.
///
/// `K` is the subscribed key: `String` for keyed stores, `()` for a single
/// value cell. Entries keep insertion order, and several entries may share a
/// key; all of them fire on a match.
pub struct SubscriptionRegistry<K> {
    entries: Vec<Subscription<K>>,
    /// Last issued id. Ids start at 1.
    last_id: u64,
}

impl<K: PartialEq> SubscriptionRegistry<K> {
    /// Create an empty registry. The first issued id is 1.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            last_id: 0,
        }
    }

    /// Register `handler` at `key` without validating it.
    pub(crate) fn add(
        &mut self,
        key: K,
        handler: Handler,
        context: Option<String>,
    ) -> SubscriptionId {
        self.last_id += 1;
        let id = SubscriptionId(self.last_id);
        self.entries.push(Subscription {
            id,
            key,
            handler,
            context,
        });
        id
    }

    /// Returns the number of removed subscriptions.
    pub fn remove_all(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    /// Remove every subscription at exactly `key`.
    pub fn remove_by_key(&mut self, key: &K) -> usize {
        self.retain(|sub| sub.key != *key)
    }

    /// Remove subscriptions matching `filter`, on any key.
    pub fn remove_by_filter(&mut self, filter: &Filter) -> usize {
        self.retain(|sub| !filter.matches(sub))
    }

    /// Remove subscriptions at exactly `key` that also match `filter`.
    pub fn remove_by_key_and_filter(&mut self, key: &K, filter: &Filter) -> usize {
        self.retain(|sub| sub.key != *key || !filter.matches(sub))
    }

    /// Remove the subscription with `id`. Returns `false` if none matched.
    pub fn remove_by_id(&mut self, id: SubscriptionId) -> bool {
        self.retain(|sub| sub.id != id) > 0
    }

    /// Handlers registered at each of `targets`, target by target, each
    /// target's handlers in insertion order.
    pub fn matching(&self, targets: &[K]) -> Vec<Handler> {
        let mut handlers = Vec::new();
        for target in targets {
            handlers.extend(
                self.entries
                    .iter()
                    .filter(|sub| sub.key == *target)
                    .map(|sub| Arc::clone(&sub.handler)),
            );
        }
        handlers
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn retain<F>(&mut self, keep: F) -> usize
    where
        F: Fn(&Subscription<K>) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|sub| keep(sub));
        before - self.entries.len()
    }
}

impl SubscriptionRegistry<String> {
    /// Register `handler` at a single `key`. Empty keys are rejected.
    pub fn add_key(
        &mut self,
        key: &str,
        handler: Handler,
        context: Option<String>,
    ) -> Result<SubscriptionId, StateError> {
        validate_key(key)?;
        Ok(self.add(key.to_string(), handler, context))
    }

    /// Register `handler` once per space-delimited key in `keys`.
    ///
    /// All keys are validated before any entry is inserted.
    pub fn add_keys(
        &mut self,
        keys: &str,
        handler: Handler,
        context: Option<String>,
    ) -> Result<Vec<SubscriptionId>, StateError> {
        validate_key(keys.trim())?;
        let ids = keys
            .split_whitespace()
            .map(|key| self.add(key.to_string(), Arc::clone(&handler), context.clone()))
            .collect();
        Ok(ids)
    }
}

impl<K: PartialEq> Default for SubscriptionRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Invoke `handlers` in order for a change at `key`.
///
/// A panicking handler does not stop the ones after it. Once all have run,
/// the first panic is resumed on the calling thread.
pub(crate) fn invoke_all(key: &str, handlers: Vec<Handler>) {
    let mut first_panic = None;
    for h in handlers {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| h())) {
            error!(key, "change handler panicked");
            first_panic.get_or_insert(payload);
        }
    }
    if let Some(payload) = first_panic {
        panic::resume_unwind(payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Handler {
        let log = Arc::clone(log);
        handler(move || log.lock().unwrap().push(name))
    }

    fn fire(handlers: Vec<Handler>) {
        for h in handlers {
            h();
        }
    }

    // ========================================================================
    // Add
    // ========================================================================

    #[test]
    fn add_issues_increasing_ids() {
        let mut reg = SubscriptionRegistry::new();
        let a = reg.add("a".to_string(), handler(|| {}), None);
        let b = reg.add("b".to_string(), handler(|| {}), None);
        assert_eq!(a.get(), 1);
        assert!(a < b);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn add_key_rejects_empty_key() {
        let mut reg: SubscriptionRegistry<String> = SubscriptionRegistry::new();
        assert!(matches!(
            reg.add_key("", handler(|| {}), None),
            Err(StateError::InvalidArgument(_))
        ));
        assert!(reg.is_empty());

        let id = reg.add_key("auth/state", handler(|| {}), None).unwrap();
        assert_eq!(id.get(), 1);
        assert_eq!(reg.matching(&["auth/state".to_string()]).len(), 1);
    }

    #[test]
    fn add_keys_registers_one_entry_per_key() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut reg: SubscriptionRegistry<String> = SubscriptionRegistry::new();
        let ids = reg.add_keys("x  y z", recorder(&log, "h"), None).unwrap();

        assert_eq!(ids.len(), 3);
        assert_eq!(reg.len(), 3);
        fire(reg.matching(&["y".to_string()]));
        assert_eq!(*log.lock().unwrap(), vec!["h"]);
    }

    #[test]
    fn add_keys_rejects_blank() {
        let mut reg: SubscriptionRegistry<String> = SubscriptionRegistry::new();
        assert!(matches!(
            reg.add_keys("", handler(|| {}), None),
            Err(StateError::InvalidArgument(_))
        ));
        assert!(matches!(
            reg.add_keys("   ", handler(|| {}), None),
            Err(StateError::InvalidArgument(_))
        ));
        assert!(reg.is_empty());
    }

    // ========================================================================
    // Matching
    // ========================================================================

    #[test]
    fn matching_keeps_insertion_order_per_target() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = SubscriptionRegistry::new();
        reg.add("a".to_string(), recorder(&log, "a1"), None);
        reg.add("a/b".to_string(), recorder(&log, "ab1"), None);
        reg.add("a".to_string(), recorder(&log, "a2"), None);
        reg.add("a/b".to_string(), recorder(&log, "ab2"), None);

        fire(reg.matching(&["a/b".to_string(), "a".to_string()]));
        assert_eq!(*log.lock().unwrap(), vec!["ab1", "ab2", "a1", "a2"]);
    }

    #[test]
    fn matching_is_exact() {
        let mut reg = SubscriptionRegistry::new();
        reg.add("auth".to_string(), handler(|| {}), None);
        assert!(reg.matching(&["authorization".to_string()]).is_empty());
        assert!(reg.matching(&["auth/state".to_string()]).is_empty());
    }

    #[test]
    fn unit_keyed_registry() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = SubscriptionRegistry::new();
        reg.add((), recorder(&log, "one"), None);
        reg.add((), recorder(&log, "two"), None);

        fire(reg.matching(&[()]));
        assert_eq!(*log.lock().unwrap(), vec!["one", "two"]);
    }

    // ========================================================================
    // Removal
    // ========================================================================

    #[test]
    fn remove_by_key_only_touches_that_key() {
        let mut reg = SubscriptionRegistry::new();
        reg.add("a".to_string(), handler(|| {}), None);
        reg.add("a".to_string(), handler(|| {}), Some("ctx".into()));
        reg.add("b".to_string(), handler(|| {}), None);

        assert_eq!(reg.remove_by_key(&"a".to_string()), 2);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn remove_by_context_globally() {
        let mut reg = SubscriptionRegistry::new();
        reg.add("a".to_string(), handler(|| {}), Some("panel".into()));
        reg.add("b".to_string(), handler(|| {}), Some("panel".into()));
        reg.add("c".to_string(), handler(|| {}), Some("other".into()));
        reg.add("d".to_string(), handler(|| {}), None);

        assert_eq!(reg.remove_by_filter(&Filter::context("panel")), 2);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn remove_by_handler_uses_identity() {
        let shared = handler(|| {});
        let lookalike = handler(|| {});
        let mut reg = SubscriptionRegistry::new();
        reg.add("a".to_string(), Arc::clone(&shared), None);
        reg.add("b".to_string(), Arc::clone(&shared), None);
        reg.add("a".to_string(), Arc::clone(&lookalike), None);

        assert_eq!(reg.remove_by_filter(&Filter::ByHandler(shared)), 2);
        assert_eq!(reg.matching(&["a".to_string()]).len(), 1);
    }

    #[test]
    fn remove_by_key_and_filter() {
        let h = handler(|| {});
        let mut reg = SubscriptionRegistry::new();
        reg.add("a".to_string(), Arc::clone(&h), Some("ctx".into()));
        reg.add("b".to_string(), Arc::clone(&h), Some("ctx".into()));

        let key = "a".to_string();
        assert_eq!(reg.remove_by_key_and_filter(&key, &Filter::context("ctx")), 1);
        assert_eq!(reg.remove_by_key_and_filter(&key, &Filter::ByHandler(h.clone())), 0);
        assert_eq!(reg.remove_by_key_and_filter(&"b".to_string(), &Filter::ByHandler(h)), 1);
        assert!(reg.is_empty());
    }

    #[test]
    fn remove_by_id_removes_single_entry() {
        let mut reg = SubscriptionRegistry::new();
        let a = reg.add("k".to_string(), handler(|| {}), None);
        let _b = reg.add("k".to_string(), handler(|| {}), None);

        assert!(reg.remove_by_id(a));
        assert!(!reg.remove_by_id(a));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn remove_all_clears() {
        let mut reg = SubscriptionRegistry::new();
        reg.add("a".to_string(), handler(|| {}), None);
        reg.add("b".to_string(), handler(|| {}), None);
        assert_eq!(reg.remove_all(), 2);
        assert!(reg.is_empty());
    }

    // ========================================================================
    // Invocation
    // ========================================================================

    #[test]
    fn invoke_all_runs_siblings_then_resumes_panic() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handlers = vec![
            recorder(&log, "before"),
            handler(|| panic!("boom")),
            recorder(&log, "after"),
        ];

        let result = panic::catch_unwind(AssertUnwindSafe(|| invoke_all("k", handlers)));
        assert!(result.is_err());
        assert_eq!(*log.lock().unwrap(), vec!["before", "after"]);
    }

    #[test]
    fn filter_debug_names_variant() {
        assert!(format!("{:?}", Filter::context("x")).contains("ByContext"));
        assert!(format!("{:?}", Filter::ByHandler(handler(|| {}))).contains("ByHandler"));
    }
}
