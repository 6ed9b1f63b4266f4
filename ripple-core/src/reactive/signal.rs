//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which scopes depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read while a tracking scope is recording, the signal
//!    is added to that scope's read-set.
//!
//! 2. When the scope subscribes, it is added to the signal's subscriber set.
//!
//! 3. When a signal's value is set, every subscribed scope is notified, in
//!    subscription order. There is no equality check: every set broadcasts.
//!
//! # Memory Layout
//!
//! The subscription bookkeeping lives in [`SignalCore`], which is shared by
//! plain signals, computed values and async signals. Subscriber sets hold
//! scopes weakly, so a signal never keeps a scope alive.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use tracing::trace;

use super::context::ReactiveContext;
use super::listener::{ListenerHandle, Listeners};
use super::scope::{ScopeId, TrackingScope, WeakScope};

/// Unique identifier for a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignalId(u64);

impl SignalId {
    /// Generate a new unique signal ID.
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// The broadcasting half of a signal: identity, version and subscribers.
///
/// Anything that wants to be depended on owns one of these, calls
/// [`SignalCore::track`] when read and [`SignalCore::broadcast`] when it
/// changes.
pub struct SignalCore {
    id: SignalId,
    /// Bumped on every broadcast.
    version: AtomicU64,
    /// Subscribed scopes, in the order they first subscribed.
    scopes: Mutex<IndexMap<ScopeId, WeakScope>>,
}

impl SignalCore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: SignalId::next(),
            version: AtomicU64::new(0),
            scopes: Mutex::new(IndexMap::new()),
        })
    }

    pub fn id(&self) -> SignalId {
        self.id
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Register this signal with the scope currently recording, if any.
    pub fn track(self: &Arc<Self>) {
        ReactiveContext::track(self);
    }

    /// Notify every subscribed scope.
    ///
    /// Subscribers are collected before any of them runs, so a scope that
    /// subscribes during the broadcast is first notified by the next one.
    pub fn broadcast(&self) {
        self.version.fetch_add(1, Ordering::SeqCst);

        let scopes: Vec<TrackingScope> = {
            let mut map = self.scopes.lock();
            map.retain(|_, scope| scope.is_live());
            map.values().filter_map(WeakScope::upgrade).collect()
        };

        trace!(signal = ?self.id, subscribers = scopes.len(), "broadcast");

        for scope in scopes {
            scope.notify();
        }
    }

    /// Get the number of subscribed scopes.
    pub fn subscriber_count(&self) -> usize {
        self.scopes
            .lock()
            .values()
            .filter(|scope| scope.is_live())
            .count()
    }

    pub(crate) fn add_scope(&self, scope: &TrackingScope) {
        self.scopes
            .lock()
            .entry(scope.id())
            .or_insert_with(|| scope.downgrade());
    }

    pub(crate) fn remove_scope(&self, scope: ScopeId) {
        self.scopes.lock().shift_remove(&scope);
    }
}

impl Debug for SignalCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalCore")
            .field("id", &self.id)
            .field("version", &self.version())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// A reactive signal holding a value of type T.
///
/// # Type Parameters
///
/// - `T`: The type of value stored in the signal. Must be Clone + Send + Sync.
///
/// # Example
///
/// ```rust
/// use ripple_core::reactive::Signal;
///
/// let count = Signal::new(0);
///
/// // Read the value
/// let value = count.get();
///
/// // Update the value (notifies subscribers)
/// count.set(value + 5);
/// assert_eq!(count.get(), 5);
/// ```
pub struct Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    core: Arc<SignalCore>,

    /// The current value.
    value: Arc<RwLock<T>>,

    /// `(new, previous)` listeners, called after subscribers.
    listeners: Listeners<T>,
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new signal with the given initial value.
    pub fn new(value: T) -> Self {
        Self {
            core: SignalCore::new(),
            value: Arc::new(RwLock::new(value)),
            listeners: Listeners::new(),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> SignalId {
        self.core.id()
    }

    /// Get the current value.
    ///
    /// If a tracking scope is recording, the read is registered with it.
    pub fn get(&self) -> T {
        self.core.track();
        self.get_untracked()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.value.read().clone()
    }

    /// Replace the value and notify subscribers, then listeners.
    pub fn set(&self, value: T) {
        // Listeners get this write's value even if a subscriber writes again.
        let stored = (!self.listeners.is_empty()).then(|| value.clone());
        let previous = std::mem::replace(&mut *self.value.write(), value);

        self.core.broadcast();

        if let Some(stored) = stored {
            self.listeners.notify(&stored, &previous);
        }
    }

    /// Update the value using a function of the current value.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let new_value = f(&self.get_untracked());
        self.set(new_value);
    }

    /// Register a listener called with `(new, previous)` after every set.
    pub fn on_change<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&T, &T) + Send + Sync + 'static,
    {
        self.listeners.add(listener)
    }

    /// Current version, bumped on every set.
    pub fn version(&self) -> u64 {
        self.core.version()
    }

    /// Get the number of subscribed scopes.
    pub fn subscriber_count(&self) -> usize {
        self.core.subscriber_count()
    }

    /// The broadcasting half of this signal.
    pub fn core(&self) -> &Arc<SignalCore> {
        &self.core
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            value: Arc::clone(&self.value),
            listeners: self.listeners.clone(),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id())
            .field("value", &self.get_untracked())
            .field("subscriber_count", &self.subscriber_count())
            .field("listener_count", &self.listeners.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
