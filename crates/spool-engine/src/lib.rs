//! # spool-engine
//!
//! The "narrow waist" of the worker side. Defines the [`ModelRuntime`] trait
//! that abstracts over concrete inference backends, the [`GenerationState`]
//! owned by a running job, and the [`Generator`] loop that turns a prompt
//! plus settings into a sequence of cumulative-text snapshots.
//!
//! ## Design Notes
//!
//! ### Interior Mutability
//! `ModelRuntime` methods take `&self` (not `&mut self`) so one runtime can
//! be shared behind an `Arc` by the worker context and its jobs. Backends
//! that hold caches or residual decode state are responsible for their own
//! synchronization; the queue runtime runs one job at a time, so contention
//! is not expected.
//!
//! ### Sampling
//! The numeric sampling algorithm lives inside the backend and is reached
//! only through [`ModelRuntime::sample_next`]. The loop here decides *when*
//! to sample and *when to stop*, never *how* to pick a token.

pub mod generator;
pub mod mock;
pub mod runtime;
pub mod state;

pub use generator::{FinishReason, Generator, Snapshot};
pub use mock::MockRuntime;
pub use runtime::{ModelRuntime, WORD_BOUNDARY_MARKER};
pub use spool_protocol::TokenId;
pub use state::GenerationState;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Top-level error type for engine operations. Sampling and decode failures
/// are fatal for the job that hit them.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("encoding failed: {0}")]
    Encode(String),
    #[error("decoding failed: {0}")]
    Decode(String),
    #[error("sampling failed: {0}")]
    Sampling(String),
    #[error("prompt produced no tokens")]
    EmptyPrompt,
}
