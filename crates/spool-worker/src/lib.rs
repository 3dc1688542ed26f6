//! # spool-worker
//!
//! The job-handler half of the system: what the hosting queue runtime
//! invokes for each job. [`WorkerContext`] is built once per process and
//! holds the model runtime plus the default generation settings;
//! [`WorkerContext::handle`] validates a job's input, resolves settings,
//! assembles the prompt, and returns either a finished result or a lazy
//! snapshot stream for the runtime to relay.
//!
//! There is deliberately no global state here. The hosting runtime decides
//! when the context is created and owns its lifetime.

pub mod config;
pub mod handler;

pub use config::WorkerConfig;
pub use handler::{JobOutput, JobRequest, JobResult, WorkerContext};

pub type Result<T> = std::result::Result<T, WorkerError>;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The job input had no usable prompt. The job fails without touching
    /// the model.
    #[error("job input is missing a prompt")]
    MissingInput,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("engine error: {0}")]
    Engine(#[from] spool_engine::EngineError),
}
