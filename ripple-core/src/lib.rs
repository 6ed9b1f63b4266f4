//! Ripple Core
//!
//! This crate provides a fine-grained reactive dependency-tracking engine.
//! It implements:
//!
//! - Observable state cells (signals) that notify subscribers on write
//! - Tracking scopes that record which signals a computation read
//! - Lazily re-evaluated computed values
//! - Cached futures with synchronous state inspection
//! - Async signals whose value is a cached future
//!
//! A host (a UI framework, a render loop, a job scheduler) opens a scope
//! around a unit of work, closes it, subscribes, and re-runs the work when
//! notified.
//!
//! # Architecture
//!
//! - `reactive`: Reactive primitives and dependency tracking
//!
//! # Example
//!
//! ```rust
//! use ripple_core::reactive::{Computed, Signal, TrackingScope};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! // Create a signal
//! let count = Signal::new(1);
//!
//! // Create a derived value
//! let doubled = Computed::new({
//!     let count = count.clone();
//!     move || count.get() * 2
//! });
//!
//! // Record a render
//! let scope = TrackingScope::new();
//! let rendered = scope.run(|| doubled.get());
//! assert_eq!(rendered, 2);
//!
//! let renders = Arc::new(AtomicUsize::new(0));
//! let _subscription = scope.subscribe({
//!     let renders = renders.clone();
//!     move || {
//!         renders.fetch_add(1, Ordering::SeqCst);
//!     }
//! });
//!
//! // Update the signal
//! count.set(5);
//! assert_eq!(renders.load(Ordering::SeqCst), 1);
//! assert_eq!(doubled.get(), 10);
//! ```

pub mod reactive;

mod error;

pub use error::{Error, Result};
