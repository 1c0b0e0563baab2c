//! Release tracking for listeners, timers and tasks
//!
//! A [`Cleanup`] collects release actions while a consumer acquires
//! resources and runs all of them exactly once when closed. Closing is
//! idempotent, and an action added after close runs immediately, so a
//! resource acquired late is still released.
//!
//! ```text
//!   Cleanup ──┬── unsubscribe listener (set A)
//!             ├── unsubscribe listener (set B)
//!             ├── nested Cleanup ──── cancel timer
//!             └── token: CancellationToken ◄── when_closed()
//! ```

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::dynamic_set::{DynamicSet, ListenerId, SetEvent, SetExtra, SetKey, SetValue};

type Action = Box<dyn FnOnce() + Send>;

struct CleanupInner {
    token: CancellationToken,
    actions: Mutex<Vec<Action>>,
}

/// Collection of release actions, run once on close
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct Cleanup {
    inner: Arc<CleanupInner>,
}

impl Cleanup {
    /// Create an open cleanup handle
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CleanupInner {
                token: CancellationToken::new(),
                actions: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a release action
    ///
    /// If the handle is already closed, the action runs immediately.
    pub fn add<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut actions = lock(&self.inner.actions);
            if !self.inner.token.is_cancelled() {
                actions.push(Box::new(action));
                return;
            }
        }
        action();
    }

    /// Close `other` when this handle closes
    pub fn add_cleanup(&self, other: Cleanup) {
        self.add(move || other.close());
    }

    /// Subscribe to `set` and unsubscribe when this handle closes
    pub fn subscribe<K, V, E, F>(&self, set: &DynamicSet<K, V, E>, listener: F) -> ListenerId
    where
        K: SetKey,
        V: SetValue,
        E: SetExtra,
        F: Fn(&SetEvent<K, V, E>) + Send + Sync + 'static,
    {
        let id = set.subscribe(listener);
        let weak = set.downgrade();
        self.add(move || {
            if let Some(set) = weak.upgrade() {
                set.unsubscribe(id);
            }
        });
        id
    }

    /// Close the handle, running every registered action in order
    pub fn close(&self) {
        let actions = {
            let mut actions = lock(&self.inner.actions);
            if self.inner.token.is_cancelled() {
                return;
            }
            self.inner.token.cancel();
            std::mem::take(&mut *actions)
        };

        for action in actions {
            action();
        }
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Resolves once the handle is closed
    pub fn when_closed(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let token = self.inner.token.clone();
        async move { token.cancelled().await }
    }

    /// Token cancelled when this handle closes
    ///
    /// Tasks tied to the handle's lifetime should select on it.
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// Close the handle after `duration`
    ///
    /// Must be called within a tokio runtime.
    pub fn close_after(&self, duration: Duration) {
        let cleanup = self.clone();
        let token = self.token();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => cleanup.close(),
                _ = token.cancelled() => {}
            }
        });
    }
}

impl Default for Cleanup {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cleanup")
            .field("closed", &self.is_closed())
            .field("pending", &lock(&self.inner.actions).len())
            .finish()
    }
}

/// What to release when a set member goes away
///
/// Returned from [`DynamicSet::for_each_async`] callbacks.
pub enum Release {
    /// Run a closure
    Action(Action),
    /// Close a nested cleanup handle
    Cleanup(Cleanup),
}

impl Release {
    /// Wrap a closure
    pub fn action<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Release::Action(Box::new(f))
    }

    /// Perform the release
    pub fn run(self) {
        match self {
            Release::Action(f) => f(),
            Release::Cleanup(cleanup) => cleanup.close(),
        }
    }
}

impl From<Cleanup> for Release {
    fn from(cleanup: Cleanup) -> Self {
        Release::Cleanup(cleanup)
    }
}

impl fmt::Debug for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Release::Action(_) => f.write_str("Release::Action"),
            Release::Cleanup(c) => f.debug_tuple("Release::Cleanup").field(c).finish(),
        }
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
