//! The parallel sequence engine.
//!
//! Wraps any lazy [`Sequence`](sluice_core::Sequence) into a
//! [`ParallelSeq`] pipeline: elements fan out to a fixed set of worker
//! threads through bounded channels, flow through a fused
//! filter/map/skip/take process, and fan back in to the calling thread.
//! Combinators are persistent — each returns a new pipeline value — and
//! executors (`collect`, `find`, `fold`, ...) are all built on the
//! single [`range`](ParallelSeq::range) primitive.

/// Pipeline values and combinators
pub mod pipeline;

/// Execution: fan-out/fan-in and the executors
pub mod range;

pub use pipeline::{IntoParallelSeq, ParallelSeq};
