//! Observable state container
//!
//! [`StateContainer`] holds an immutable state snapshot plus an ordered list
//! of subscribers. Every update produces a new snapshot (the previous one is
//! never mutated in place) and synchronously notifies subscribers in the
//! order they subscribed.
//!
//! ```text
//! update(|s| s.messages = ..)
//!        │
//!        ▼
//!  clone current ──▶ apply patch ──▶ swap Arc<S> ──▶ notify #1, #2, #3 ...
//! ```
//!
//! A subscriber that panics is logged and skipped; the remaining subscribers
//! still receive the snapshot.
//!
//! The container performs no internal scheduling. Each instance is expected
//! to have a single logical owner that serializes calls to `update`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::warn;

type Callback<S> = Arc<dyn Fn(&S) + Send + Sync>;

struct Subscriber<S> {
    id: u64,
    callback: Callback<S>,
}

struct Inner<S> {
    state: RwLock<Arc<S>>,
    subscribers: Mutex<Vec<Subscriber<S>>>,
    next_id: AtomicU64,
}

/// Holder of an immutable state snapshot and its subscribers.
///
/// Cloning the container yields another handle to the same state.
pub struct StateContainer<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for StateContainer<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S> StateContainer<S>
where
    S: Clone + Send + Sync + 'static,
{
    /// Create a container holding `initial`.
    pub fn new(initial: S) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(Arc::new(initial)),
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Current snapshot. Has no side effects.
    pub fn get_state(&self) -> Arc<S> {
        self.inner.state.read().clone()
    }

    /// Merge a partial change into a copy of the current state, publish the
    /// copy as the new snapshot and notify all subscribers with it.
    ///
    /// The patch runs with no lock held, so it may read the container.
    pub fn update<F>(&self, patch: F) -> Arc<S>
    where
        F: FnOnce(&mut S),
    {
        let current = self.get_state();
        let mut next = S::clone(&current);
        patch(&mut next);
        let next = Arc::new(next);
        *self.inner.state.write() = next.clone();
        self.notify(&next);
        next
    }

    /// Replace the state wholesale and notify subscribers.
    pub fn replace(&self, state: S) -> Arc<S> {
        self.update(move |current| *current = state)
    }

    /// Register a callback invoked with every new snapshot.
    ///
    /// The callback stays registered until the returned [`Subscription`] is
    /// dropped or [`Subscription::unsubscribe`] is called.
    #[must_use = "dropping the subscription unsubscribes the callback"]
    pub fn subscribe<F>(&self, callback: F) -> Subscription<S>
    where
        F: Fn(&S) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.lock().push(Subscriber {
            id,
            callback: Arc::new(callback),
        });
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Drop every subscriber. Used on session teardown.
    pub fn clear_subscribers(&self) {
        self.inner.subscribers.lock().clear();
    }

    fn notify(&self, state: &S) {
        // Snapshot the list so callbacks may subscribe or unsubscribe
        // without deadlocking on the subscriber lock.
        let callbacks: Vec<(u64, Callback<S>)> = self
            .inner
            .subscribers
            .lock()
            .iter()
            .map(|s| (s.id, s.callback.clone()))
            .collect();

        for (id, callback) in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(state))).is_err() {
                warn!(subscriber = id, "State subscriber panicked; continuing with the rest");
            }
        }
    }
}

impl<S> Default for StateContainer<S>
where
    S: Clone + Default + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(S::default())
    }
}

/// Handle returned by [`StateContainer::subscribe`].
pub struct Subscription<S> {
    id: u64,
    inner: Weak<Inner<S>>,
}

impl<S> Subscription<S> {
    /// Remove the callback from its container.
    pub fn unsubscribe(self) {
        // Drop does the work
    }

    fn detach(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.subscribers.lock().retain(|s| s.id != self.id);
        }
    }
}

impl<S> Drop for Subscription<S> {
    fn drop(&mut self) {
        self.detach();
    }
}

impl<S> std::fmt::Debug for Subscription<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
