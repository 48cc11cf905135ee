#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

//! # Sluice Core
//!
//! `sluice_core` provides the foundation types shared by the sluice
//! concurrency toolkit: the error hierarchy and the lazy sequence
//! collaborator interface consumed by the parallel execution crates.
//!
//! ## Crate Structure
//!
//! - **error**: error types for all sluice components
//! - **sequence**: the "push elements until told to stop" source interface

pub mod error;
pub mod sequence;

// Re-export key types for easier access
pub use error::{Error, PoolError, Result};
pub use sequence::Sequence;
