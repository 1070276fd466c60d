use std::time::Duration;

use tokio::runtime::Handle;

/// Default quiet period before a debounced notification fires.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1);

/// How keys are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyMode {
    /// Keys are opaque strings; a change notifies exact-key subscribers only.
    Flat,
    /// Keys are `/`-delimited paths; a change also notifies every ancestor
    /// prefix, deepest first.
    #[default]
    Hierarchical,
}

impl KeyMode {
    /// Split a key into its path segments.
    ///
    /// `"a/b/c"` -> `["a", "b", "c"]` in hierarchical mode, `["a/b/c"]` in flat mode.
    pub fn segments<'k>(self, key: &'k str) -> Vec<&'k str> {
        match self {
            KeyMode::Flat => vec![key],
            KeyMode::Hierarchical => key.split('/').collect(),
        }
    }

    /// The keys whose subscribers hear about a change at `key`, in dispatch order.
    ///
    /// `"a/b/c"` -> `["a/b/c", "a/b", "a"]` in hierarchical mode.
    pub fn notify_targets(self, key: &str) -> Vec<String> {
        match self {
            KeyMode::Flat => vec![key.to_string()],
            KeyMode::Hierarchical => {
                let mut targets = vec![key.to_string()];
                let mut rest = key;
                while let Some(idx) = rest.rfind('/') {
                    rest = &rest[..idx];
                    targets.push(rest.to_string());
                }
                targets
            }
        }
    }
}

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub key_mode: KeyMode,
    /// Quiet period for debounced notifications.
    pub debounce: Duration,
    /// Runtime debounced notifications are spawned on. `None` uses the
    /// runtime current when the store is built.
    pub runtime: Option<Handle>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            key_mode: KeyMode::Hierarchical,
            debounce: DEFAULT_DEBOUNCE,
            runtime: None,
        }
    }
}

impl StoreConfig {
    /// Flat keys, default debounce.
    pub fn flat() -> Self {
        Self {
            key_mode: KeyMode::Flat,
            ..Self::default()
        }
    }

    /// Replace the debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Spawn debounced notifications on `runtime`.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }
}
