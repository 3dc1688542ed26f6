//! Job lifecycle states and the transition rules between them.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a queued job.
///
/// The lifecycle only moves forward: a job starts `IN_QUEUE`, moves to
/// `IN_PROGRESS` when a worker picks it up, and ends in exactly one of the
/// terminal states. A queued job can be cancelled without ever running.
/// Terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    InQueue,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Whether the job has reached a state it can never leave.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether the lifecycle permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match self {
            JobStatus::InQueue => {
                matches!(next, JobStatus::InProgress | JobStatus::Cancelled)
            }
            JobStatus::InProgress => next.is_terminal(),
            // Terminal states are absorbing.
            _ => false,
        }
    }

    /// Wire name of the status, e.g. `IN_QUEUE`.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::InQueue => "IN_QUEUE",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
