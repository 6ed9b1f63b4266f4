//! Tracking Scopes
//!
//! A tracking scope records every signal read while it is open, and later
//! subscribes to all of them as one unit. Recording and subscribing are two
//! separate steps: a consumer can run its computation once, look at what it
//! read, and only then decide whether to subscribe.
//!
//! A scope has at most one update callback. Subscribing again replaces the
//! callback and the links instead of adding a second set, and leaves earlier
//! [`Subscription`] handles inert.
//!
//! Opening a scope starts a new recording pass: reads from earlier passes are
//! forgotten, so the next subscription follows only the latest pass.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{debug, trace};

use super::context::{FrameGuard, ReactiveContext};
use super::signal::{SignalCore, SignalId};

/// Unique identifier for a tracking scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u64);

impl ScopeId {
    /// Generate a new unique scope ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ScopeId {
    fn default() -> Self {
        Self::new()
    }
}

type Callback = Arc<dyn Fn() + Send + Sync>;

/// One recorded read: which signal, and at which version.
#[derive(Debug, Clone)]
struct SnapshotEntry {
    signal: Weak<SignalCore>,
    id: SignalId,
    version: u64,
}

/// The sequence of signal versions a scope observed while recording.
///
/// Every [`TrackingScope::notify`] replaces the scope's snapshot with a fresh
/// `Arc`, so two snapshots taken before and after a notification are never
/// pointer-equal even when their contents match.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entries: SmallVec<[SnapshotEntry; 8]>,
}

impl Snapshot {
    /// Number of reads recorded, counting repeated reads of one signal.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Signal ids in read order, repeats included.
    pub fn signals(&self) -> impl Iterator<Item = SignalId> + '_ {
        self.entries.iter().map(|entry| entry.id)
    }

    /// Whether any recorded signal has broadcast since it was read.
    ///
    /// Signals that no longer exist cannot change and are ignored.
    pub fn is_stale(&self) -> bool {
        self.entries.iter().any(|entry| {
            entry
                .signal
                .upgrade()
                .map(|signal| signal.version() != entry.version)
                .unwrap_or(false)
        })
    }
}

pub(crate) struct ScopeInner {
    id: ScopeId,
    /// Signals read while recording, deduplicated, in first-read order.
    reads: Mutex<IndexMap<SignalId, Weak<SignalCore>>>,
    callback: Mutex<Option<Callback>>,
    snapshot: Mutex<Arc<Snapshot>>,
    /// Signals the current subscription is linked to.
    links: Mutex<Links>,
}

/// Live links, tagged with the subscription that made them.
#[derive(Default)]
struct Links {
    generation: u64,
    signals: Vec<Weak<SignalCore>>,
}

/// A recording window that captures signal reads.
///
/// Cloning a `TrackingScope` yields another handle to the same scope.
///
/// # Example
///
/// ```rust
/// use ripple_core::reactive::{Signal, TrackingScope};
///
/// let count = Signal::new(1);
///
/// let open = TrackingScope::begin();
/// let _ = count.get();
/// let scope = open.close();
///
/// let subscription = scope.subscribe(|| println!("count changed"));
/// count.set(2); // prints "count changed"
/// subscription.unsubscribe();
/// count.set(3); // prints nothing
/// ```
#[derive(Clone)]
pub struct TrackingScope(Arc<ScopeInner>);

impl TrackingScope {
    /// Create a scope that is not yet recording.
    pub fn new() -> Self {
        Self(Arc::new(ScopeInner {
            id: ScopeId::new(),
            reads: Mutex::new(IndexMap::new()),
            callback: Mutex::new(None),
            snapshot: Mutex::new(Arc::new(Snapshot::default())),
            links: Mutex::new(Links::default()),
        }))
    }

    /// Create a scope and immediately start recording into it.
    pub fn begin() -> OpenScope {
        Self::new().open()
    }

    pub fn id(&self) -> ScopeId {
        self.0.id
    }

    /// Make this scope the current recording target.
    ///
    /// Clears the read-set and snapshot of any earlier pass. Live links stay
    /// in place until the next [`TrackingScope::subscribe`]. Recording stops
    /// when the returned [`OpenScope`] is closed or dropped.
    pub fn open(&self) -> OpenScope {
        self.0.reads.lock().clear();
        *self.0.snapshot.lock() = Arc::new(Snapshot::default());

        OpenScope {
            scope: self.clone(),
            _frame: ReactiveContext::push(Some(self.clone())),
        }
    }

    /// Run `f` with this scope recording, closing it afterwards even if `f`
    /// panics.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let _open = self.open();
        f()
    }

    /// Add `signal` to the read-set and append its version to the snapshot.
    pub fn register_read(&self, signal: &Arc<SignalCore>) {
        let id = signal.id();
        self.0
            .reads
            .lock()
            .entry(id)
            .or_insert_with(|| Arc::downgrade(signal));

        let mut snapshot = self.0.snapshot.lock();
        Arc::make_mut(&mut *snapshot).entries.push(SnapshotEntry {
            signal: Arc::downgrade(signal),
            id,
            version: signal.version(),
        });

        trace!(scope = ?self.0.id, signal = ?id, "registered read");
    }

    /// Ids of the signals read so far, each once, in first-read order.
    pub fn reads(&self) -> Vec<SignalId> {
        self.0.reads.lock().keys().copied().collect()
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.0.snapshot.lock())
    }

    pub fn has_subscriber(&self) -> bool {
        self.0.callback.lock().is_some()
    }

    /// Subscribe this scope to every signal in its read-set.
    ///
    /// `on_update` becomes the scope's only callback, replacing any earlier
    /// one. Links left over from an earlier subscription to signals outside
    /// the current read-set are removed, and earlier handles stop having any
    /// effect. The returned [`Subscription`] removes the scope from those
    /// signals again, either explicitly or when it is dropped.
    pub fn subscribe<F>(&self, on_update: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.0.callback.lock() = Some(Arc::new(on_update));

        let reads: Vec<(SignalId, Weak<SignalCore>)> = self
            .0
            .reads
            .lock()
            .iter()
            .map(|(id, signal)| (*id, signal.clone()))
            .collect();

        let (generation, stale) = {
            let mut links = self.0.links.lock();
            links.generation += 1;
            let stale = std::mem::replace(
                &mut links.signals,
                reads.iter().map(|(_, signal)| signal.clone()).collect(),
            );
            (links.generation, stale)
        };

        for signal in stale.iter().filter_map(Weak::upgrade) {
            if !reads.iter().any(|(id, _)| *id == signal.id()) {
                signal.remove_scope(self.0.id);
            }
        }
        for signal in reads.iter().filter_map(|(_, signal)| signal.upgrade()) {
            signal.add_scope(self);
        }

        debug!(scope = ?self.0.id, signals = reads.len(), generation, "scope subscribed");

        Subscription {
            state: Mutex::new(Some((self.clone(), generation))),
        }
    }

    /// Remove every link made by the subscription tagged `generation`, if it
    /// is still the current one.
    fn unlink(&self, generation: u64) {
        let signals = {
            let mut links = self.0.links.lock();
            if links.generation != generation {
                return;
            }
            std::mem::take(&mut links.signals)
        };

        for signal in signals.iter().filter_map(Weak::upgrade) {
            signal.remove_scope(self.0.id);
        }

        debug!(scope = ?self.0.id, signals = signals.len(), generation, "scope unsubscribed");
    }

    fn is_current(&self, generation: u64) -> bool {
        self.0.links.lock().generation == generation
    }

    /// Invoke the update callback, if any, after swapping in a fresh snapshot.
    pub fn notify(&self) {
        {
            let mut snapshot = self.0.snapshot.lock();
            *snapshot = Arc::new(Snapshot::clone(&snapshot));
        }

        // Never call out while holding the lock: the callback may resubscribe.
        let callback = self.0.callback.lock().clone();
        match callback {
            Some(callback) => callback(),
            None => trace!(scope = ?self.0.id, "notified scope has no subscriber"),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakScope {
        WeakScope(Arc::downgrade(&self.0))
    }
}

impl Default for TrackingScope {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TrackingScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingScope")
            .field("id", &self.0.id)
            .field("reads", &self.0.reads.lock().len())
            .field("has_subscriber", &self.has_subscriber())
            .finish()
    }
}

/// Non-owning reference held by signals in their subscriber sets.
#[derive(Clone)]
pub(crate) struct WeakScope(Weak<ScopeInner>);

impl WeakScope {
    pub(crate) fn upgrade(&self) -> Option<TrackingScope> {
        self.0.upgrade().map(TrackingScope)
    }

    pub(crate) fn is_live(&self) -> bool {
        self.0.strong_count() > 0
    }
}

/// A scope that is currently recording.
///
/// Dropping it closes the scope; [`OpenScope::close`] does the same and hands
/// back the scope so it can be subscribed.
#[must_use = "dropping an OpenScope closes it immediately"]
pub struct OpenScope {
    scope: TrackingScope,
    _frame: FrameGuard,
}

impl OpenScope {
    pub fn scope(&self) -> &TrackingScope {
        &self.scope
    }

    /// Stop recording and return the scope.
    pub fn close(self) -> TrackingScope {
        self.scope.clone()
    }
}

/// Live links between a scope and the signals it read.
///
/// Unsubscribing is idempotent. Dropping the handle unsubscribes. A handle
/// superseded by a later [`TrackingScope::subscribe`] on the same scope is
/// inert: unsubscribing or dropping it leaves the newer links alone.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    state: Mutex<Option<(TrackingScope, u64)>>,
}

impl Subscription {
    /// Remove the scope from every signal it subscribed to.
    pub fn unsubscribe(&self) {
        let Some((scope, generation)) = self.state.lock().take() else {
            return;
        };
        scope.unlink(generation);
    }

    /// Whether this handle still controls the scope's links.
    pub fn is_active(&self) -> bool {
        self.state
            .lock()
            .as_ref()
            .map(|(scope, generation)| scope.is_current(*generation))
            .unwrap_or(false)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
