use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::StateError;
use crate::lock;

/// Per-key debounced dispatch.
///
/// Each key has at most one armed dispatch. Arming again before the delay
/// elapses cancels the armed one and restarts the window, so a burst of
/// changes produces a single notification. Immediate dispatch cancels any
/// armed one and fires on the caller's thread.
///
/// Armed dispatches run as tokio tasks on the runtime captured at
/// construction, so arming works from threads outside that runtime. A task
/// that wakes up re-checks its token under the pending-map lock before
/// firing, so a cancelled dispatch never fires.
pub struct Scheduler<K> {
    delay: Duration,
    runtime: Option<Handle>,
    pending: Arc<Mutex<HashMap<K, CancellationToken>>>,
}

impl<K> Scheduler<K>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + 'static,
{
    /// Create a scheduler bound to the current tokio runtime, if any.
    pub fn new(delay: Duration) -> Self {
        Self::with_runtime(delay, None)
    }

    /// Create a scheduler that spawns on `runtime`.
    ///
    /// `None` captures the runtime current at construction. A scheduler
    /// built outside any runtime looks one up again each time it arms.
    pub fn with_runtime(delay: Duration, runtime: Option<Handle>) -> Self {
        Self {
            delay,
            runtime: runtime.or_else(|| Handle::try_current().ok()),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Quiet period before an armed dispatch fires.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// The runtime debounced dispatches are spawned on.
    ///
    /// Returns `StateError::NoRuntime` when none was captured and the
    /// calling thread is outside a runtime.
    pub fn runtime(&self) -> Result<Handle, StateError> {
        match &self.runtime {
            Some(handle) => Ok(handle.clone()),
            None => Handle::try_current().map_err(|_| StateError::NoRuntime),
        }
    }

    /// Fire now (`immediate`) or arm a debounced dispatch for `key`.
    ///
    /// Arming without a runtime (see [`Scheduler::runtime`]) returns
    /// `StateError::NoRuntime` and nothing is armed.
    pub fn schedule_or_fire_now<F>(
        &self,
        key: K,
        immediate: bool,
        fire: F,
    ) -> Result<(), StateError>
    where
        F: FnOnce() + Send + 'static,
    {
        if immediate {
            self.cancel(&key);
            debug!(?key, "immediate dispatch");
            fire();
            return Ok(());
        }

        let runtime = self.runtime()?;
        let token = CancellationToken::new();
        match lock(&self.pending).insert(key.clone(), token.clone()) {
            Some(previous) => {
                previous.cancel();
                debug!(?key, "re-armed dispatch");
            }
            None => debug!(?key, "armed dispatch"),
        }

        let pending = Arc::clone(&self.pending);
        let delay = self.delay;
        runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            {
                let mut pending = lock(&pending);
                if token.is_cancelled() {
                    return;
                }
                // Not cancelled, so the entry is still ours.
                pending.remove(&key);
            }
            debug!(?key, "firing debounced dispatch");
            fire();
        });
        Ok(())
    }

    /// Cancel the armed dispatch for `key`, if any.
    pub fn cancel(&self, key: &K) -> bool {
        match lock(&self.pending).remove(key) {
            Some(token) => {
                token.cancel();
                debug!(?key, "cancelled dispatch");
                true
            }
            None => false,
        }
    }

    /// Cancel every armed dispatch without firing. Returns how many were armed.
    pub fn cancel_all(&self) -> usize {
        let mut pending = lock(&self.pending);
        let count = pending.len();
        for (_, token) in pending.drain() {
            token.cancel();
        }
        if count > 0 {
            debug!(count, "cancelled all pending dispatches");
        }
        count
    }

    /// Number of armed, not yet fired dispatches.
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }
}

impl<K> Drop for Scheduler<K> {
    fn drop(&mut self) {
        let mut pending = lock(&self.pending);
        for (_, token) in pending.drain() {
            token.cancel();
        }
    }
}
