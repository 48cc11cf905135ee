//! Token-bucket rate limiting.
//!
//! A [`RateLimiter`] paces work admitted into a pool or pipeline: up to
//! `burst` operations proceed immediately, then one token becomes
//! available every `period / refill`. Callers block on
//! [`wait`](RateLimiter::wait) (cancellable) or poll
//! [`try_wait`](RateLimiter::try_wait).

/// Token bucket implementation
pub mod bucket;

pub use bucket::{RateLimiter, RateLimiterConfig};
