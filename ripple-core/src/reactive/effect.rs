//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change. It is the per-render tracking pattern a host
//! framework uses, packaged up: open a scope, run, close, subscribe, and do
//! it all again on invalidation.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately inside a fresh
//!    tracking scope to establish initial dependencies.
//!
//! 2. When any dependency changes, the effect re-runs synchronously, before
//!    the write that triggered it returns.
//!
//! 3. Each run drops the previous subscription and records into a new
//!    scope, so dependencies always reflect the latest run.
//!
//! # Differences from Computed
//!
//! - Computed values return a value; effects do not.
//! - Computed values are lazy (compute on access); effects are eager.
//!
//! An effect that writes a signal it also reads will re-trigger itself
//! without end.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::scope::{Subscription, TrackingScope};

struct EffectInner {
    /// The effect function.
    run: Box<dyn Fn() + Send + Sync>,

    /// Links from the latest run's scope to what it read.
    subscription: Mutex<Option<Subscription>>,

    /// Signals read by the latest run.
    dependency_count: AtomicUsize,

    /// Whether the effect has been disposed.
    disposed: AtomicBool,

    /// Number of times the effect has run.
    run_count: AtomicUsize,
}

/// A side-effecting computation that runs when dependencies change.
///
/// # Example
///
/// ```rust
/// use ripple_core::reactive::{Effect, Signal};
///
/// let count = Signal::new(0);
///
/// let effect = Effect::new({
///     let count = count.clone();
///     move || println!("Count is: {}", count.get())
/// });
///
/// count.set(5); // Prints: "Count is: 5"
/// assert_eq!(effect.run_count(), 2);
/// ```
pub struct Effect {
    inner: Arc<EffectInner>,
}

impl Effect {
    /// Create a new effect with the given function.
    ///
    /// The function runs immediately to establish initial dependencies.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let effect = Self::new_lazy(run);

        // Run immediately to establish dependencies
        effect.execute();

        effect
    }

    /// Create a new effect without running it immediately.
    ///
    /// Nothing is tracked until the first [`Effect::execute`].
    pub fn new_lazy<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(EffectInner {
                run: Box::new(run),
                subscription: Mutex::new(None),
                dependency_count: AtomicUsize::new(0),
                disposed: AtomicBool::new(false),
                run_count: AtomicUsize::new(0),
            }),
        }
    }

    /// Run the effect function and resubscribe to what it read.
    pub fn execute(&self) {
        self.inner.execute();
    }

    /// Dispose of the effect.
    ///
    /// After disposal, the effect will not run again. Disposing twice is
    /// harmless.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
        let subscription = self.inner.subscription.lock().take();
        drop(subscription);
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::SeqCst)
    }

    /// Get the number of signals the latest run read.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependency_count.load(Ordering::SeqCst)
    }
}

impl EffectInner {
    fn execute(self: &Arc<Self>) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }

        let stale = self.subscription.lock().take();
        drop(stale);

        let scope = TrackingScope::new();
        scope.run(|| (self.run)());
        self.run_count.fetch_add(1, Ordering::SeqCst);

        // The run itself may have disposed the effect.
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }

        let dependencies = scope.reads().len();
        self.dependency_count.store(dependencies, Ordering::SeqCst);

        let weak = Arc::downgrade(self);
        let subscription = scope.subscribe(move || {
            if let Some(inner) = weak.upgrade() {
                inner.execute();
            }
        });
        let replaced = self.subscription.lock().replace(subscription);
        drop(replaced);

        debug!(dependencies, runs = self.run_count.load(Ordering::SeqCst), "effect ran");
    }
}

impl Clone for Effect {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
