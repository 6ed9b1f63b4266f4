//! Computed Values
//!
//! A computed value is a cached derived value that re-evaluates only when
//! one of its dependencies changes.
//!
//! # How Computed Values Work
//!
//! 1. On first access, the derivation runs inside a fresh tracking scope and
//!    the result is cached. The scope is then subscribed to everything the
//!    derivation read.
//!
//! 2. When accessed again while clean, the cached value is returned.
//!
//! 3. When a dependency changes, the computed value is marked dirty and
//!    broadcasts to its own subscribers. Marking dirty never runs the
//!    derivation.
//!
//! 4. On next access, the old subscription is dropped and the derivation
//!    runs again in a new scope.
//!
//! # Eager Recomputation
//!
//! Change listeners need the new value at the moment of invalidation, so a
//! computed value with at least one listener re-derives immediately when a
//! dependency changes. Without listeners it stays lazy. This changes how
//! often the derivation runs, not only when.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::listener::{ListenerHandle, Listeners};
use super::scope::{Subscription, TrackingScope};
use super::signal::{SignalCore, SignalId};

struct ComputedInner<T> {
    /// This value's own signal identity, so others can depend on it.
    core: Arc<SignalCore>,

    /// The derivation function.
    derive: Box<dyn Fn() -> T + Send + Sync>,

    /// The cached value (None if never computed).
    value: RwLock<Option<T>>,

    dirty: AtomicBool,

    /// Links from the last derivation's scope to what it read.
    subscription: Mutex<Option<Subscription>>,

    listeners: Listeners<T>,
}

/// A memoized value derived from other signals.
///
/// # Type Parameters
///
/// - `T`: The type of the computed value. Must be Clone + Send + Sync.
///
/// # Example
///
/// ```rust
/// use ripple_core::reactive::{Computed, Signal};
///
/// let count = Signal::new(1);
/// let doubled = Computed::new({
///     let count = count.clone();
///     move || count.get() * 2
/// });
///
/// assert_eq!(doubled.get(), 2);
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<ComputedInner<T>>,
}

impl<T> Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new computed value with the given derivation.
    ///
    /// The derivation is not run immediately. It runs on first access.
    pub fn new<F>(derive: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(ComputedInner {
                core: SignalCore::new(),
                derive: Box::new(derive),
                value: RwLock::new(None),
                dirty: AtomicBool::new(true),
                subscription: Mutex::new(None),
                listeners: Listeners::new(),
            }),
        }
    }

    /// Get the signal ID other scopes see when they read this value.
    pub fn id(&self) -> SignalId {
        self.inner.core.id()
    }

    /// Get the current value, recomputing if dirty.
    ///
    /// If a tracking scope is recording, the read is registered with it.
    pub fn get(&self) -> T {
        self.inner.core.track();
        self.inner.current()
    }

    /// Get the current value, recomputing if dirty, without registering the
    /// read with the active scope.
    pub fn get_untracked(&self) -> T {
        self.inner.current()
    }

    /// Whether the next read will run the derivation.
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::SeqCst)
    }

    /// Register a listener called with `(new, previous)` after each
    /// recomputation that replaces an earlier value.
    ///
    /// While any listener is registered, invalidation recomputes eagerly.
    pub fn on_change<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&T, &T) + Send + Sync + 'static,
    {
        self.inner.listeners.add(listener)
    }

    /// Get the number of scopes subscribed to this value.
    pub fn subscriber_count(&self) -> usize {
        self.inner.core.subscriber_count()
    }

    /// Check if the computed value has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.read().is_some()
    }
}

impl<T> ComputedInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn current(self: &Arc<Self>) -> T {
        if self.dirty.load(Ordering::SeqCst) {
            let (value, previous) = self.recompute();
            if let Some(previous) = previous {
                self.listeners.notify(&value, &previous);
            }
            return value;
        }

        let cached = self.value.read().clone();
        match cached {
            Some(value) => value,
            None => self.recompute().0,
        }
    }

    /// Run the derivation in a fresh scope and subscribe that scope.
    ///
    /// Returns the new value and the value it replaced.
    fn recompute(self: &Arc<Self>) -> (T, Option<T>) {
        let stale = self.subscription.lock().take();
        drop(stale);

        let scope = TrackingScope::new();
        let value = scope.run(|| (self.derive)());
        let previous = self.value.write().replace(value.clone());

        let weak = Arc::downgrade(self);
        let subscription = scope.subscribe(move || {
            if let Some(inner) = weak.upgrade() {
                inner.invalidate();
            }
        });

        let replaced = self.subscription.lock().replace(subscription);
        drop(replaced);
        self.dirty.store(false, Ordering::SeqCst);

        debug!(computed = ?self.core.id(), dependencies = scope.reads().len(), "recomputed");

        (value, previous)
    }

    /// Called when any dependency broadcasts.
    fn invalidate(self: &Arc<Self>) {
        self.dirty.store(true, Ordering::SeqCst);

        let eager = if self.listeners.is_empty() {
            None
        } else {
            Some(self.recompute())
        };

        self.core.broadcast();

        if let Some((value, Some(previous))) = eager {
            self.listeners.notify(&value, &previous);
        }
    }
}

impl<T> Clone for Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Computed<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.id())
            .field("dirty", &self.is_dirty())
            .field("value", &*self.inner.value.read())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Signal;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn computed_computes_on_first_access() {
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();

        let computed = Computed::new(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            42
        });

        // Not computed yet
        assert!(!computed.has_value());
        assert!(computed.is_dirty());
        assert_eq!(call_count.load(Ordering::SeqCst), 0);

        // First access triggers computation
        assert_eq!(computed.get(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert!(computed.has_value());
        assert!(!computed.is_dirty());
    }

    #[test]
    fn computed_caches_value_when_clean() {
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();

        let computed = Computed::new(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
            42
        });

        assert_eq!(computed.get(), 42);
        assert_eq!(computed.get(), 42);
        assert_eq!(computed.get(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dependency_write_marks_dirty_without_recomputing() {
        let source = Signal::new(1);
        let call_count = Arc::new(AtomicI32::new(0));

        let computed = Computed::new({
            let source = source.clone();
            let call_count = call_count.clone();
            move || {
                call_count.fetch_add(1, Ordering::SeqCst);
                source.get() * 2
            }
        });

        assert_eq!(computed.get(), 2);
        source.set(5);

        assert!(computed.is_dirty());
        assert_eq!(call_count.load(Ordering::SeqCst), 1);

        assert_eq!(computed.get(), 10);
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dependencies_follow_the_latest_run() {
        let use_left = Signal::new(true);
        let left = Signal::new("left");
        let right = Signal::new("right");

        let computed = Computed::new({
            let (use_left, left, right) = (use_left.clone(), left.clone(), right.clone());
            move || if use_left.get() { left.get() } else { right.get() }
        });

        assert_eq!(computed.get(), "left");
        assert_eq!(left.subscriber_count(), 1);
        assert_eq!(right.subscriber_count(), 0);

        use_left.set(false);
        assert_eq!(computed.get(), "right");
        assert_eq!(left.subscriber_count(), 0);
        assert_eq!(right.subscriber_count(), 1);

        // The old branch no longer invalidates.
        left.set("other");
        assert!(!computed.is_dirty());
    }

    #[test]
    fn listeners_make_invalidation_eager() {
        let source = Signal::new(1);
        let call_count = Arc::new(AtomicI32::new(0));

        let computed = Computed::new({
            let source = source.clone();
            let call_count = call_count.clone();
            move || {
                call_count.fetch_add(1, Ordering::SeqCst);
                source.get() + 100
            }
        });
        assert_eq!(computed.get(), 101);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let handle = computed.on_change(move |new, previous| {
            seen_clone.lock().push((*new, *previous));
        });

        // With a listener, the write alone runs the derivation.
        source.set(2);
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
        assert!(!computed.is_dirty());
        assert_eq!(*seen.lock(), vec![(102, 101)]);

        // Reading afterwards hits the cache.
        assert_eq!(computed.get(), 102);
        assert_eq!(call_count.load(Ordering::SeqCst), 2);

        // Without listeners it goes back to lazy.
        handle.unregister();
        source.set(3);
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
        assert!(computed.is_dirty());
    }

    #[test]
    fn chained_computed_values() {
        let base = Signal::new(2);

        let doubled = Computed::new({
            let base = base.clone();
            move || base.get() * 2
        });
        let quadrupled = Computed::new({
            let doubled = doubled.clone();
            move || doubled.get() * 2
        });

        assert_eq!(quadrupled.get(), 8);

        base.set(5);
        assert!(doubled.is_dirty());
        assert!(quadrupled.is_dirty());
        assert_eq!(quadrupled.get(), 20);
    }

    #[test]
    fn panicking_derivation_stays_dirty() {
        let fail = Signal::new(true);
        let computed = Computed::new({
            let fail = fail.clone();
            move || {
                if fail.get() {
                    panic!("derivation failed");
                }
                1
            }
        });

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| computed.get()));
        assert!(result.is_err());
        assert!(computed.is_dirty());
        assert!(!crate::reactive::ReactiveContext::is_active());

        fail.set(false);
        assert_eq!(computed.get(), 1);
    }

    #[test]
    fn computed_clone_shares_state() {
        let computed1 = Computed::new(|| 42);
        assert_eq!(computed1.get(), 42);

        let computed2 = computed1.clone();

        assert_eq!(computed1.id(), computed2.id());
        assert!(computed2.has_value());
        assert!(!computed2.is_dirty());
    }
}
