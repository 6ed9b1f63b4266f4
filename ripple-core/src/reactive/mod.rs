//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, tracking scopes,
//! computed values, cached futures and async signals.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! while a tracking scope is recording, the signal registers the read with
//! that scope. When the signal is written, every subscribed scope is
//! notified, in subscription order. Writes always notify, even when the new
//! value equals the old one.
//!
//! ## Tracking Scopes
//!
//! A TrackingScope records which signals were read during a window of
//! execution. After the window closes, subscribing the scope links it to
//! everything it read; the subscription is the handle that undoes the links.
//! Scopes nest: the innermost open scope receives reads.
//!
//! ## Computed Values
//!
//! A Computed value caches a derivation and is itself readable like a signal.
//! Dependency writes mark it dirty; the derivation runs again on next read.
//!
//! ## Cached Futures and Async Signals
//!
//! A CachedFuture settles exactly once and exposes its state synchronously.
//! An AsyncSignal holds one and notifies both when replaced and when the
//! replacement settles.
//!
//! ## Effects
//!
//! An Effect re-runs a side-effecting closure whenever something it read
//! changes.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local stack of tracking frames to detect
//! dependencies automatically. No lock is held while user callbacks run, so
//! callbacks may read, write, subscribe and unsubscribe freely.

mod async_signal;
mod cached;
mod computed;
mod context;
mod effect;
mod listener;
mod scope;
mod signal;

pub use async_signal::AsyncSignal;
pub use cached::{CachedFuture, FutureState, Status, Suspend};
pub use computed::Computed;
pub use context::ReactiveContext;
pub use effect::Effect;
pub use listener::ListenerHandle;
pub use scope::{OpenScope, ScopeId, Snapshot, Subscription, TrackingScope};
pub use signal::{Signal, SignalCore, SignalId};
