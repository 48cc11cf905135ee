//! The bounded worker pool.
//!
//! Submit closures with [`Pool::go`], collect every outcome with
//! [`Pool::wait`]. Parallelism is capped by [`Pool::limit`], failures
//! are isolated per task (panics included), and cancellation is
//! cooperative: it stops admission, never running code.

/// Task outcomes and records
pub mod task;

/// The pool itself
pub mod worker;

pub use task::{TaskOutcome, TaskRecord};
pub use worker::Pool;
