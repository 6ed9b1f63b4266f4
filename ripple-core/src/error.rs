//! Error types for the reactive core.
//!
//! Bookkeeping misuse (closing a scope twice, notifying a scope nobody
//! subscribed, unsubscribing twice) is inert by construction and never shows
//! up here. What remains is asynchronous work that cannot make progress:
//! starting it without a runtime, or losing it before it settles.

use thiserror::Error;

/// Errors returned by the reactive core.
#[derive(Debug, Error)]
pub enum Error {
    /// A cached future had to be driven to settlement, but the calling
    /// thread is not inside a Tokio runtime.
    #[error("no Tokio runtime available to settle the future: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    /// The task driving a cached future panicked or was dropped before it
    /// produced an outcome.
    #[error("cached future was dropped before it settled")]
    Abandoned,
}

/// Convenience alias for results produced by this crate.
pub type Result<T> = std::result::Result<T, Error>;
