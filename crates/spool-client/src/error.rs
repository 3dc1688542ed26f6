//! Client-side error types.

use spool_protocol::JobStatus;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The prompt was missing or empty; nothing was submitted.
    #[error("prompt must be a non-empty string")]
    MissingInput,

    /// The queue rejected the submission. Single attempt, no retry.
    #[error("job submission rejected with http {status}: {body}")]
    Submission { status: u16, body: String },

    /// A non-submit request came back with an error status.
    #[error("queue returned http {status}: {body}")]
    Http { status: u16, body: String },

    /// Connection-level failure talking to the queue.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The queue answered with a body this client cannot parse.
    #[error("malformed queue response: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The job reached a terminal state other than COMPLETED.
    #[error("job ended with status {status}: {detail}")]
    JobEnded { status: JobStatus, detail: String },

    /// The poll policy's deadline ran out before the job finished.
    #[error("poll deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
}
