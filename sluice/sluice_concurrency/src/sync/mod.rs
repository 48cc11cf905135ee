//! Shared synchronization primitives.
//!
//! Atomic counters/flags/sequences used across the pool and the parallel
//! sequence engine, plus the cooperative cancellation token that all
//! components share.

/// Atomic counters, flags, and index sources
pub mod atomic;

/// Cooperative cancellation token
pub mod cancel;

pub use atomic::{AtomicCounter, AtomicFlag, AtomicSequence};
pub use cancel::CancelToken;
