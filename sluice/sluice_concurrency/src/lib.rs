#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

//! # Sluice Concurrency
//!
//! The bounded concurrent task-execution core of the sluice toolkit:
//!
//! - A [`Pool`] running closures with capped parallelism, cooperative
//!   cancellation, panic containment, and per-task result records.
//! - A [`ParallelSeq`] engine fanning lazy sequences out to worker
//!   threads and back in, with persistent combinator pipelines.
//! - A [`ConcurrentMap`] with an occupied/vacant [`Entry`] API and
//!   compare-and-swap updates, used by the pool for result collection
//!   and by pipelines for deduplication.
//! - A [`RateLimiter`] token bucket for pacing admission.
//!
//! The components share one cancellation idiom: a [`CancelToken`]
//! polled (or selected on) at every suspension point. Cancellation is
//! cooperative — it stops admission and consumption, never code that is
//! already running.
//!
//! ## Pacing a pool with the rate limiter
//!
//! ```
//! use sluice_concurrency::{CancelToken, Pool, RateLimiter};
//! use std::time::Duration;
//!
//! let limiter = RateLimiter::new(100, Duration::from_secs(1), 4);
//! let cancel = CancelToken::new();
//! let mut pool = Pool::<u32, String>::new().limit(2);
//!
//! for i in 0..4 {
//!     if limiter.wait(&cancel) {
//!         pool.go(move || Ok(i));
//!     }
//! }
//! assert_eq!(pool.wait().len(), 4);
//! limiter.stop();
//! ```

/// Token-bucket rate limiting
pub mod limit;

/// Concurrent map with an occupied/vacant entry API
pub mod map;

/// The bounded worker pool
pub mod pool;

/// The parallel sequence engine
pub mod seq;

/// Shared atomics and cancellation
pub mod sync;

// Re-export key types for easier access
pub use limit::{RateLimiter, RateLimiterConfig};
pub use map::{ConcurrentMap, Entry, OccupiedEntry, VacantEntry};
pub use pool::{Pool, TaskOutcome, TaskRecord};
pub use seq::{IntoParallelSeq, ParallelSeq};
pub use sync::CancelToken;
