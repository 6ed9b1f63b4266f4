//! Reactive Context
//!
//! The reactive context tracks which tracking scope is currently recording.
//! This enables automatic dependency tracking: when a signal is read, it is
//! registered into the scope on top of the stack.
//!
//! # Implementation
//!
//! We use a thread-local stack of frames. Opening a scope pushes a recording
//! frame; closing it pops the frame. [`ReactiveContext::untracked`] pushes a
//! non-recording frame so that reads inside it reach no scope at all.
//!
//! Each thread is its own execution context: reads on one thread never leak
//! into a scope opened on another.

use std::cell::{Cell, RefCell};

use tracing::{trace, warn};

use super::scope::TrackingScope;
use super::signal::SignalCore;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Frame>> = RefCell::new(Vec::new());
    static NEXT_FRAME: Cell<u64> = Cell::new(0);
}

/// Identifies one push onto the context stack so the matching pop can
/// verify it is removing the right frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameKey(u64);

/// An entry in the context stack.
struct Frame {
    key: FrameKey,
    /// `None` for frames pushed by [`ReactiveContext::untracked`].
    scope: Option<TrackingScope>,
}

/// Pops its frame when dropped, including during unwinding.
pub(crate) struct FrameGuard {
    key: FrameKey,
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        ReactiveContext::pop(self.key);
    }
}

/// Entry point to the thread's active-scope stack.
pub struct ReactiveContext;

impl ReactiveContext {
    /// Push a frame. The frame stays on the stack until the returned guard
    /// is dropped.
    pub(crate) fn push(scope: Option<TrackingScope>) -> FrameGuard {
        let key = FrameKey(NEXT_FRAME.with(|next| {
            let key = next.get();
            next.set(key + 1);
            key
        }));

        trace!(frame = key.0, scope = ?scope.as_ref().map(TrackingScope::id), "push context frame");
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(Frame { key, scope }));

        FrameGuard { key }
    }

    /// Remove the frame identified by `key`.
    ///
    /// The common case is popping the top. A frame buried under other frames
    /// is removed in place so the frames above it keep recording; a key that
    /// is no longer present is ignored.
    fn pop(key: FrameKey) {
        // The stack may already be gone during thread teardown.
        let _ = CONTEXT_STACK.try_with(|stack| {
            let mut stack = stack.borrow_mut();

            if stack.last().map(|frame| frame.key) == Some(key) {
                stack.pop();
                trace!(frame = key.0, "pop context frame");
                return;
            }

            match stack.iter().position(|frame| frame.key == key) {
                Some(index) => {
                    warn!(frame = key.0, depth = stack.len(), "closing a context frame that is not on top");
                    stack.remove(index);
                }
                None => trace!(frame = key.0, "context frame already closed"),
            }
        });
    }

    /// The scope currently recording reads, if any.
    pub fn current() -> Option<TrackingScope> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().and_then(|frame| frame.scope.clone()))
    }

    /// Check if a scope is currently recording reads.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .map(|frame| frame.scope.is_some())
                .unwrap_or(false)
        })
    }

    /// Number of frames on this thread's stack.
    pub fn depth() -> usize {
        CONTEXT_STACK.with(|stack| stack.borrow().len())
    }

    /// Record a read of `signal` in the current scope.
    ///
    /// This is called by every tracked read.
    pub(crate) fn track(signal: &std::sync::Arc<SignalCore>) {
        // Clone out of the stack so registration never runs under the borrow.
        if let Some(scope) = Self::current() {
            scope.register_read(signal);
        }
    }

    /// Run `f` with tracking suspended.
    ///
    /// Reads inside `f` are not registered with any scope, not even the one
    /// that was active when `untracked` was called.
    pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
        let _frame = Self::push(None);
        f()
    }
}
