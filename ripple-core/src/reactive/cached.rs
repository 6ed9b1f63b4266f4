//! Cached Futures
//!
//! A [`CachedFuture`] wraps one asynchronous operation and caches its
//! outcome. It moves at most once, out of `Pending`:
//!
//! ```text
//! Pending ──▶ Fulfilled(value)
//!     ├─────▶ Rejected(reason)
//!     └─────▶ Abandoned
//! ```
//!
//! `Abandoned` means the operation driving a spawned entry went away without
//! producing an outcome: it panicked, or its runtime dropped the task.
//!
//! Synchronous code reads it through [`CachedFuture::use_value`], which never
//! blocks. A pending read returns [`Suspend::Pending`] carrying a handle to
//! the same entry, which the caller awaits before retrying. A rejected read
//! returns the original reason.
//!
//! Settlement is published through a `tokio::sync::watch` channel, so any
//! number of tasks can wait on the same entry.

use std::fmt::{self, Debug, Display};
use std::future::{Future, IntoFuture};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// The observable state of a [`CachedFuture`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FutureState<T, E> {
    Pending,
    Fulfilled(T),
    Rejected(E),
    Abandoned,
}

impl<T: Clone, E: Clone> FutureState<T, E> {
    pub fn status(&self) -> Status {
        match self {
            FutureState::Pending => Status::Pending,
            FutureState::Fulfilled(_) => Status::Fulfilled,
            FutureState::Rejected(_) => Status::Rejected,
            FutureState::Abandoned => Status::Abandoned,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, FutureState::Pending)
    }

    /// The outcome, once settled. An abandoned entry has none.
    pub fn result(&self) -> Option<std::result::Result<T, E>> {
        match self {
            FutureState::Pending | FutureState::Abandoned => None,
            FutureState::Fulfilled(value) => Some(Ok(value.clone())),
            FutureState::Rejected(reason) => Some(Err(reason.clone())),
        }
    }
}

/// State tag without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Pending,
    Fulfilled,
    Rejected,
    Abandoned,
}

/// Why [`CachedFuture::use_value`] could not return a value.
pub enum Suspend<T, E> {
    /// Not settled yet. Await the handle, then read again.
    Pending(CachedFuture<T, E>),
    /// Settled with a failure; this is the original reason.
    Rejected(E),
    /// The operation went away without an outcome. Retrying will not help.
    Abandoned,
}

impl<T, E> Suspend<T, E> {
    /// The entry to wait on, if this is a suspension rather than a failure.
    pub fn pending(&self) -> Option<&CachedFuture<T, E>> {
        match self {
            Suspend::Pending(cached) => Some(cached),
            Suspend::Rejected(_) | Suspend::Abandoned => None,
        }
    }

    pub fn into_rejected(self) -> Option<E> {
        match self {
            Suspend::Pending(_) | Suspend::Abandoned => None,
            Suspend::Rejected(reason) => Some(reason),
        }
    }
}

impl<T, E: Debug> Debug for Suspend<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Suspend::Pending(_) => f.write_str("Pending"),
            Suspend::Rejected(reason) => f.debug_tuple("Rejected").field(reason).finish(),
            Suspend::Abandoned => f.write_str("Abandoned"),
        }
    }
}

impl<T, E: Display> Display for Suspend<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Suspend::Pending(_) => f.write_str("cached future is still pending"),
            Suspend::Rejected(reason) => Display::fmt(reason, f),
            Suspend::Abandoned => f.write_str("cached future was dropped before it settled"),
        }
    }
}

impl<T, E> std::error::Error for Suspend<T, E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Suspend::Pending(_) | Suspend::Abandoned => None,
            Suspend::Rejected(reason) => reason.source(),
        }
    }
}

struct CachedInner<T, E> {
    state: watch::Sender<FutureState<T, E>>,
}

/// Lives inside a spawned task; abandons the entry if the task ends without
/// settling it.
struct AbandonOnDrop<T, E>(CachedFuture<T, E>);

impl<T, E> Drop for AbandonOnDrop<T, E> {
    fn drop(&mut self) {
        let abandoned = self.0.inner.state.send_if_modified(|state| {
            if !matches!(state, FutureState::Pending) {
                return false;
            }
            *state = FutureState::Abandoned;
            true
        });

        if abandoned {
            warn!("cached future dropped before it settled");
        }
    }
}

/// A settle-once cache around one asynchronous operation.
///
/// Cloning yields another handle to the same entry.
///
/// # Example
///
/// ```rust
/// use ripple_core::reactive::{CachedFuture, Suspend};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> ripple_core::Result<()> {
/// let cached = CachedFuture::<u32, String>::spawn(async { Ok(7) })?;
///
/// let value = match cached.use_value() {
///     Ok(value) => value,
///     Err(Suspend::Pending(pending)) => pending.await?.unwrap_or_default(),
///     Err(Suspend::Rejected(reason)) => panic!("{reason}"),
///     Err(Suspend::Abandoned) => panic!("operation abandoned"),
/// };
/// assert_eq!(value, 7);
/// # Ok(())
/// # }
/// ```
pub struct CachedFuture<T, E> {
    inner: Arc<CachedInner<T, E>>,
}

impl<T, E> CachedFuture<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Start driving `future` on the current Tokio runtime.
    ///
    /// The entry is pending when this returns, even if `future` is already
    /// complete: settlement always happens on the spawned task. If that task
    /// panics or is dropped first, the entry becomes
    /// [`FutureState::Abandoned`].
    pub fn spawn<F>(future: F) -> Result<Self>
    where
        F: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        let handle = Handle::try_current()?;
        Ok(Self::spawn_on(&handle, future))
    }

    /// Like [`CachedFuture::spawn`], on an explicit runtime.
    pub fn spawn_on<F>(handle: &Handle, future: F) -> Self
    where
        F: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        let cached = Self::pending();
        let guard = AbandonOnDrop(cached.clone());
        handle.spawn(async move {
            let guard = guard;
            let result = future.await;
            guard.0.settle(result);
        });
        cached
    }

    /// A pending entry settled by hand through [`CachedFuture::settle`].
    pub fn pending() -> Self {
        Self::with_state(FutureState::Pending)
    }

    pub fn fulfilled(value: T) -> Self {
        Self::with_state(FutureState::Fulfilled(value))
    }

    pub fn rejected(reason: E) -> Self {
        Self::with_state(FutureState::Rejected(reason))
    }

    fn with_state(state: FutureState<T, E>) -> Self {
        let (state, _) = watch::channel(state);
        Self {
            inner: Arc::new(CachedInner { state }),
        }
    }

    /// Move a pending entry to its final state.
    ///
    /// Only the first call has an effect. Returns whether this call settled
    /// the entry.
    pub fn settle(&self, result: std::result::Result<T, E>) -> bool {
        let settled = self.inner.state.send_if_modified(|state| {
            if !state.is_pending() {
                return false;
            }
            *state = match result {
                Ok(value) => FutureState::Fulfilled(value),
                Err(reason) => FutureState::Rejected(reason),
            };
            true
        });

        if settled {
            debug!(status = ?self.status(), "cached future settled");
        }
        settled
    }

    pub fn state(&self) -> FutureState<T, E> {
        self.inner.state.borrow().clone()
    }

    pub fn status(&self) -> Status {
        self.inner.state.borrow().status()
    }

    pub fn is_pending(&self) -> bool {
        self.inner.state.borrow().is_pending()
    }

    /// The outcome, once settled.
    pub fn result(&self) -> Option<std::result::Result<T, E>> {
        self.inner.state.borrow().result()
    }

    /// Read the value without blocking.
    ///
    /// Returns the value if fulfilled, [`Suspend::Rejected`] with the
    /// original reason if rejected, [`Suspend::Abandoned`] if the operation
    /// went away, and [`Suspend::Pending`] with a handle to this entry if it
    /// has not settled.
    pub fn use_value(&self) -> std::result::Result<T, Suspend<T, E>> {
        match self.state() {
            FutureState::Fulfilled(value) => Ok(value),
            FutureState::Rejected(reason) => Err(Suspend::Rejected(reason)),
            FutureState::Abandoned => Err(Suspend::Abandoned),
            FutureState::Pending => Err(Suspend::Pending(self.clone())),
        }
    }

    /// Wait until the entry settles and return its outcome.
    ///
    /// Fails with [`Error::Abandoned`] if the operation went away first.
    pub async fn settled(&self) -> Result<std::result::Result<T, E>> {
        let mut receiver = self.inner.state.subscribe();
        loop {
            let state = receiver.borrow_and_update().clone();
            match state {
                FutureState::Pending => {}
                FutureState::Fulfilled(value) => return Ok(Ok(value)),
                FutureState::Rejected(reason) => return Ok(Err(reason)),
                FutureState::Abandoned => return Err(Error::Abandoned),
            }
            // `self` owns the sender, so the channel outlives this wait.
            let _ = receiver.changed().await;
        }
    }

    /// Whether two handles refer to the same entry.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T, E> Clone for CachedFuture<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> IntoFuture for CachedFuture<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    type Output = Result<std::result::Result<T, E>>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.settled().await })
    }
}

impl<T: Debug, E: Debug> Debug for CachedFuture<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedFuture")
            .field("state", &*self.inner.state.borrow())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    fn controlled() -> (oneshot::Sender<std::result::Result<&'static str, String>>, CachedFuture<&'static str, String>) {
        let (tx, rx) = oneshot::channel();
        let cached = CachedFuture::spawn(async move {
            rx.await.unwrap_or_else(|_| Err("sender dropped".to_string()))
        })
        .expect("inside a runtime");
        (tx, cached)
    }

    #[test]
    fn spawn_outside_runtime_fails() {
        let result = CachedFuture::<u8, String>::spawn(async { Ok(1) });
        assert!(matches!(result, Err(Error::NoRuntime(_))));
    }

    #[test]
    fn settles_exactly_once() {
        let cached = CachedFuture::<u8, String>::pending();
        assert_eq!(cached.status(), Status::Pending);

        assert!(cached.settle(Ok(1)));
        assert!(!cached.settle(Err("late".into())));
        assert!(!cached.settle(Ok(2)));

        assert_eq!(cached.state(), FutureState::Fulfilled(1));
    }

    #[test]
    fn use_value_on_settled_entries() {
        let fulfilled = CachedFuture::<u8, String>::fulfilled(3);
        assert_eq!(fulfilled.use_value().ok(), Some(3));

        let rejected = CachedFuture::<u8, String>::rejected("nope".into());
        let err = rejected.use_value().unwrap_err();
        assert_eq!(err.to_string(), "nope");
        assert_eq!(err.into_rejected(), Some("nope".to_string()));
    }

    #[test]
    fn pending_use_value_hands_back_same_entry() {
        let cached = CachedFuture::<u8, String>::pending();
        let err = cached.use_value().unwrap_err();

        let handle = err.pending().expect("pending suspension");
        assert!(handle.ptr_eq(&cached));
    }

    #[tokio::test]
    async fn spawned_future_starts_pending() {
        let cached = CachedFuture::<u8, String>::spawn(async { Ok(5) }).unwrap();

        // Even a ready future settles off the calling path.
        assert!(cached.is_pending());
        assert_eq!(cached.settled().await.unwrap(), Ok(5));
        assert_eq!(cached.status(), Status::Fulfilled);
    }

    #[tokio::test]
    async fn pending_then_fulfilled() {
        let (tx, cached) = controlled();
        assert!(matches!(cached.use_value(), Err(Suspend::Pending(_))));

        tx.send(Ok("A")).unwrap();
        assert_eq!(cached.clone().await.unwrap(), Ok("A"));
        assert_eq!(cached.use_value().ok(), Some("A"));
    }

    #[tokio::test]
    async fn pending_then_rejected() {
        let (tx, cached) = controlled();

        tx.send(Err("boom".to_string())).unwrap();
        assert_eq!(cached.settled().await.unwrap(), Err("boom".to_string()));
        assert_eq!(cached.status(), Status::Rejected);

        // Rejections are reported on every read, never swallowed.
        assert_eq!(cached.use_value().unwrap_err().into_rejected(), Some("boom".to_string()));
        assert_eq!(cached.use_value().unwrap_err().into_rejected(), Some("boom".to_string()));
    }

    #[tokio::test]
    async fn many_waiters_share_one_settlement() {
        let (tx, cached) = controlled();

        let first = tokio::spawn(cached.clone().into_future());
        let second = tokio::spawn(cached.clone().into_future());

        tx.send(Ok("shared")).unwrap();
        assert_eq!(first.await.unwrap().unwrap(), Ok("shared"));
        assert_eq!(second.await.unwrap().unwrap(), Ok("shared"));
    }

    #[tokio::test]
    async fn panicking_operation_abandons_the_entry() {
        let cached = CachedFuture::<u8, String>::spawn(async { panic!("operation failed") })
        .unwrap();

        assert!(matches!(cached.settled().await, Err(Error::Abandoned)));
        assert_eq!(cached.status(), Status::Abandoned);
        assert!(matches!(cached.use_value(), Err(Suspend::Abandoned)));

        // Abandonment is final.
        assert!(!cached.settle(Ok(1)));
    }

    #[test]
    fn dropped_runtime_abandons_the_entry() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let (_tx, rx) = oneshot::channel::<std::result::Result<u8, String>>();
        let cached = CachedFuture::spawn_on(runtime.handle(), async move {
            rx.await.unwrap_or_else(|_| Err("sender dropped".to_string()))
        });
        assert!(cached.is_pending());

        drop(runtime);
        assert_eq!(cached.state(), FutureState::Abandoned);
    }
}
