//! Async Signals
//!
//! An [`AsyncSignal`] is a signal whose value is always a [`CachedFuture`].
//! Assigning a new operation:
//!
//! 1. wraps it in a fresh cached future,
//! 2. broadcasts immediately, so dependents see the pending state,
//! 3. broadcasts again as soon as the new entry settles,
//! 4. once the entry it replaced has settled too, calls change listeners
//!    with both outcomes.
//!
//! Consumers that keep a handle to the previous entry still see its last
//! settled value until they read the signal again.
//!
//! If a newer assignment lands before an older one settles, the older
//! settlement is not reported: only the latest assignment broadcasts on
//! settlement and reaches listeners. The entry a signal is created with
//! broadcasts on settlement too, but has no previous outcome to hand to
//! listeners.

use std::fmt::Debug;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use super::cached::CachedFuture;
use super::listener::{ListenerHandle, Listeners};
use super::signal::{SignalCore, SignalId};
use crate::error::Result;

type Outcome<T, E> = std::result::Result<T, E>;

struct AsyncInner<T, E> {
    core: Arc<SignalCore>,
    current: RwLock<CachedFuture<T, E>>,
    /// Incremented by every assignment; settlement tasks compare against it.
    generation: AtomicU64,
    listeners: Listeners<Outcome<T, E>>,
}

/// A signal holding a [`CachedFuture`].
///
/// # Example
///
/// ```rust
/// use ripple_core::reactive::{AsyncSignal, Status};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> ripple_core::Result<()> {
/// let user = AsyncSignal::<String, String>::new(async { Ok("ada".to_string()) })?;
/// assert_eq!(user.get().status(), Status::Pending);
///
/// assert_eq!(user.get().await?, Ok("ada".to_string()));
/// # Ok(())
/// # }
/// ```
pub struct AsyncSignal<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    inner: Arc<AsyncInner<T, E>>,
}

impl<T, E> AsyncSignal<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create a signal driving `future` on the current Tokio runtime.
    pub fn new<F>(future: F) -> Result<Self>
    where
        F: Future<Output = Outcome<T, E>> + Send + 'static,
    {
        Ok(Self::from_cached(CachedFuture::spawn(future)?))
    }

    /// Create a signal that starts out fulfilled.
    pub fn from_value(value: T) -> Self {
        Self::from_cached(CachedFuture::fulfilled(value))
    }

    /// Create a signal around an existing entry.
    ///
    /// A pending entry broadcasts again when it settles, provided this is
    /// called inside a Tokio runtime.
    pub fn from_cached(cached: CachedFuture<T, E>) -> Self {
        let signal = Self {
            inner: Arc::new(AsyncInner {
                core: SignalCore::new(),
                current: RwLock::new(cached.clone()),
                generation: AtomicU64::new(0),
                listeners: Listeners::new(),
            }),
        };

        if cached.is_pending() {
            match Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(settle(Arc::downgrade(&signal.inner), 0, cached, None));
                }
                Err(_) => debug!(signal = ?signal.id(), "no runtime, initial settlement will not broadcast"),
            }
        }

        signal
    }

    pub fn id(&self) -> SignalId {
        self.inner.core.id()
    }

    /// Get the current entry, registering the read with the active scope.
    pub fn get(&self) -> CachedFuture<T, E> {
        self.inner.core.track();
        self.get_untracked()
    }

    pub fn get_untracked(&self) -> CachedFuture<T, E> {
        self.inner.current.read().clone()
    }

    /// Assign a new operation, driven on the current Tokio runtime.
    pub fn set_future<F>(&self, future: F) -> Result<()>
    where
        F: Future<Output = Outcome<T, E>> + Send + 'static,
    {
        let handle = Handle::try_current()?;
        self.assign(CachedFuture::spawn_on(&handle, future), Some(handle));
        Ok(())
    }

    /// Assign an already available value.
    ///
    /// Needs a runtime only when the entry being replaced is still pending.
    pub fn set(&self, value: T) -> Result<()> {
        self.set_cached(CachedFuture::fulfilled(value))
    }

    /// Assign an existing cache entry.
    ///
    /// Needs a runtime unless both `cached` and the entry it replaces have
    /// already settled.
    pub fn set_cached(&self, cached: CachedFuture<T, E>) -> Result<()> {
        let previous_settled = !self.inner.current.read().is_pending();
        let handle = if previous_settled && !cached.is_pending() {
            None
        } else {
            Some(Handle::try_current()?)
        };

        self.assign(cached, handle);
        Ok(())
    }

    /// Register a listener called with `(new, previous)` outcomes after an
    /// assignment settles.
    pub fn on_change<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&Outcome<T, E>, &Outcome<T, E>) + Send + Sync + 'static,
    {
        self.inner.listeners.add(listener)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.core.subscriber_count()
    }

    /// Swap in `next`, broadcast, and report settlement.
    ///
    /// `handle` is `None` only when neither entry is pending.
    fn assign(&self, next: CachedFuture<T, E>, handle: Option<Handle>) {
        let previous = std::mem::replace(&mut *self.inner.current.write(), next.clone());
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        self.inner.core.broadcast();

        if let (Some(next), Some(previous)) = (next.result(), previous.result()) {
            // Already settled: the broadcast above exposed the final state.
            self.inner.listeners.notify(&next, &previous);
            return;
        }

        match handle {
            Some(handle) => {
                let weak = Arc::downgrade(&self.inner);
                handle.spawn(settle(weak, generation, next, Some(previous)));
            }
            None => warn!(signal = ?self.id(), "assignment involves an abandoned entry, listeners not called"),
        }
    }
}

/// Report settlement of an assignment that is still current.
///
/// Dependents are told as soon as `next` settles. Listeners additionally
/// wait for `previous`, so they never see a pending previous outcome. The
/// entry a signal was created with has no previous entry; its settlement
/// broadcasts but does not reach listeners.
async fn settle<T, E>(
    inner: Weak<AsyncInner<T, E>>,
    generation: u64,
    next: CachedFuture<T, E>,
    previous: Option<CachedFuture<T, E>>,
) where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    let next = next.settled().await;

    {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if inner.generation.load(Ordering::SeqCst) != generation {
            debug!(signal = ?inner.core.id(), generation, "superseded assignment settled");
            return;
        }

        debug!(signal = ?inner.core.id(), generation, ok = matches!(next, Ok(Ok(_))), "assignment settled");
        inner.core.broadcast();
    }

    let Some(previous) = previous else {
        return;
    };
    let previous = previous.settled().await;

    let Some(inner) = inner.upgrade() else {
        return;
    };
    if inner.generation.load(Ordering::SeqCst) != generation {
        debug!(signal = ?inner.core.id(), generation, "assignment superseded before listeners ran");
        return;
    }

    match (next, previous) {
        (Ok(next), Ok(previous)) => inner.listeners.notify(&next, &previous),
        _ => warn!(signal = ?inner.core.id(), generation, "assignment involves an abandoned entry, listeners not called"),
    }
}

impl<T, E> Clone for AsyncSignal<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> Debug for AsyncSignal<T, E>
where
    T: Clone + Send + Sync + Debug + 'static,
    E: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncSignal")
            .field("id", &self.id())
            .field("current", &self.get_untracked())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
