//! Error types for the sluice toolkit.
//!
//! This module defines the error hierarchy shared by every sluice crate.
//! Subsystems keep precise error types, and the root `Error` can wrap any
//! of them so callers get uniform handling at the top level.

use thiserror::Error;

/// Convenience alias for results carrying the root [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Root error type for the sluice toolkit.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Worker pool errors
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// General runtime errors
    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Errors related to worker pool lifecycle operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The operation requires an idle pool but tasks are still running
    #[error("{0} tasks still active")]
    TasksActive(usize),

    /// The pool was cancelled, with the cause rendered as text
    #[error("pool cancelled: {0}")]
    Cancelled(String),
}
