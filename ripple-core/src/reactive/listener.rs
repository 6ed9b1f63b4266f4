//! Change listeners.
//!
//! Signals, computed values and async signals let callers register
//! listeners that receive `(new, previous)` after a change. Listeners are
//! called in registration order, outside of any lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

type Listener<A> = Arc<dyn Fn(&A, &A) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ListenerId(u64);

impl ListenerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Ordered set of `(new, previous)` listeners.
pub(crate) struct Listeners<A>(Arc<Mutex<IndexMap<ListenerId, Listener<A>>>>);

impl<A> Clone for Listeners<A> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<A> Listeners<A> {
    pub(crate) fn new() -> Self {
        Self(Arc::new(Mutex::new(IndexMap::new())))
    }

    pub(crate) fn add<F>(&self, listener: F) -> ListenerHandle
    where
        A: 'static,
        F: Fn(&A, &A) + Send + Sync + 'static,
    {
        let id = ListenerId::new();
        self.0.lock().insert(id, Arc::new(listener));

        let registry = Arc::downgrade(&self.0);
        ListenerHandle {
            remove: Mutex::new(Some(Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    registry.lock().shift_remove(&id);
                }
            }))),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub(crate) fn notify(&self, new: &A, previous: &A) {
        let listeners: Vec<Listener<A>> = self.0.lock().values().cloned().collect();
        for listener in listeners {
            listener(new, previous);
        }
    }
}

/// Keeps a change listener registered.
///
/// Unregistering is idempotent. Dropping the handle unregisters.
#[must_use = "dropping a ListenerHandle unregisters the listener"]
pub struct ListenerHandle {
    remove: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl ListenerHandle {
    pub fn unregister(&self) {
        let remove = self.remove.lock().take();
        if let Some(remove) = remove {
            remove();
        }
    }

    pub fn is_registered(&self) -> bool {
        self.remove.lock().is_some()
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.unregister();
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("registered", &self.is_registered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listeners_run_in_registration_order() {
        let listeners = Listeners::<i32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_a = seen.clone();
        let _a = listeners.add(move |new, previous| seen_a.lock().push(("a", *new, *previous)));
        let seen_b = seen.clone();
        let _b = listeners.add(move |new, previous| seen_b.lock().push(("b", *new, *previous)));

        listeners.notify(&2, &1);

        assert_eq!(*seen.lock(), vec![("a", 2, 1), ("b", 2, 1)]);
    }

    #[test]
    fn unregister_is_idempotent() {
        let listeners = Listeners::<i32>::new();
        let handle = listeners.add(|_, _| {});
        assert_eq!(listeners.len(), 1);

        handle.unregister();
        handle.unregister();
        assert!(listeners.is_empty());
        assert!(!handle.is_registered());
    }

    #[test]
    fn listener_may_unregister_itself() {
        let listeners = Listeners::<i32>::new();
        let slot: Arc<Mutex<Option<ListenerHandle>>> = Arc::new(Mutex::new(None));

        let slot_clone = slot.clone();
        let handle = listeners.add(move |_, _| {
            if let Some(handle) = slot_clone.lock().take() {
                handle.unregister();
            }
        });
        *slot.lock() = Some(handle);

        listeners.notify(&1, &0);
        assert!(listeners.is_empty());
    }
}
