//! Request and response envelopes for the queue endpoints.
//!
//! Shapes follow the hosted queue API: `POST /run` submits a job,
//! `GET /stream/{id}` returns cumulative-output snapshots plus the current
//! status, `GET /status/{id}` returns the terminal result. Unknown keys are
//! tolerated everywhere so either side can evolve first.

use crate::status::JobStatus;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Body of `POST /run`.
///
/// `input` is left as a raw JSON object on purpose: the queue relays it to
/// the worker untouched, and input validation is the worker's job. The
/// client builds it with the `prompt` / `stream` / `sampling_params` layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub input: Map<String, Value>,
}

/// Reply to a successful submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
}

/// One snapshot in a stream poll. `output` is the full cumulative text the
/// worker has produced so far, not an increment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEntry {
    pub output: String,
}

/// Reply to `GET /stream/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollResponse {
    #[serde(default)]
    pub stream: Vec<StreamEntry>,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Reply to `GET /status/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub id: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Milliseconds the job sat in the queue before a worker picked it up.
    #[serde(
        default,
        rename = "delayTime",
        skip_serializing_if = "Option::is_none"
    )]
    pub delay_time: Option<u64>,
    /// Milliseconds the handler spent on the job.
    #[serde(
        default,
        rename = "executionTime",
        skip_serializing_if = "Option::is_none"
    )]
    pub execution_time: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_response_tolerates_unknown_keys() {
        let raw = r#"{
            "stream": [{"output": "hello", "extra": 1}],
            "status": "IN_PROGRESS",
            "workerId": "gpu-0"
        }"#;
        let poll: PollResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(poll.stream.len(), 1);
        assert_eq!(poll.stream[0].output, "hello");
        assert_eq!(poll.status, JobStatus::InProgress);
        assert!(poll.error.is_none());
    }

    #[test]
    fn poll_response_stream_defaults_empty() {
        let poll: PollResponse = serde_json::from_str(r#"{"status": "IN_QUEUE"}"#).unwrap();
        assert!(poll.stream.is_empty());
    }

    #[test]
    fn status_response_uses_camel_case_timings() {
        let resp = StatusResponse {
            id: "abc".to_string(),
            status: JobStatus::Completed,
            output: Some(serde_json::json!({"result": "done"})),
            error: None,
            delay_time: Some(12),
            execution_time: Some(340),
        };
        let encoded = serde_json::to_value(&resp).unwrap();
        assert_eq!(encoded["delayTime"], 12);
        assert_eq!(encoded["executionTime"], 340);
        assert!(encoded.get("error").is_none());
    }

    #[test]
    fn submit_response_status_optional() {
        let resp: SubmitResponse = serde_json::from_str(r#"{"id": "j-1"}"#).unwrap();
        assert_eq!(resp.id, "j-1");
        assert!(resp.status.is_none());
    }
}
