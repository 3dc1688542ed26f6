//! # spool-client
//!
//! HTTP client for the hosted job queue: submit a generation job, follow
//! its stream endpoint, forward only the new text out of each cumulative
//! snapshot, and cancel best-effort when things go sideways.
//!
//! The polling loop is sequential: one job, one request in flight, fixed
//! intervals. That is the contract the queue's stream endpoint is built
//! around. [`PollPolicy`] makes the intervals and the overall deadline
//! explicit instead of leaving them buried in the loop.

pub mod client;
pub mod endpoint;
pub mod error;
pub mod stream;

pub use client::QueueClient;
pub use endpoint::Endpoint;
pub use error::ClientError;
pub use stream::{JobStream, PollPolicy, StreamDelta};

pub type Result<T> = std::result::Result<T, ClientError>;
