//! Handlers for the queue endpoints.

use crate::error::ServerError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};
use spool_protocol::{JobStatus, PollResponse, StatusResponse, SubmitRequest, SubmitResponse};

/// `POST /run`: register a job and return its id without waiting for it.
pub async fn handle_run(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, ServerError> {
    let id = state.submit(request.input)?;
    Ok(Json(SubmitResponse {
        id,
        status: Some(JobStatus::InQueue),
    }))
}

/// `GET /stream/{id}`: hand out the snapshots appended since the caller's
/// previous poll, plus the current status.
pub async fn handle_stream(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<PollResponse>, ServerError> {
    state
        .stream_slice(&job_id)
        .map(Json)
        .ok_or(ServerError::JobNotFound(job_id))
}

/// `GET /status/{id}`: the job's status, result, and queue timings.
pub async fn handle_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<StatusResponse>, ServerError> {
    state
        .status_snapshot(&job_id)
        .map(Json)
        .ok_or(ServerError::JobNotFound(job_id))
}

/// `GET /cancel/{id}`: stop the job if it still can be stopped.
pub async fn handle_cancel(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Value>, ServerError> {
    let status = state
        .cancel_job(&job_id)
        .ok_or_else(|| ServerError::JobNotFound(job_id.clone()))?;
    Ok(Json(json!({
        "id": job_id,
        "status": status.as_str(),
    })))
}

/// Health check with queue depth and worker readiness.
pub async fn handle_health(State(state): State<AppState>) -> Json<Value> {
    let (total, queued, running) = state.job_counts();
    Json(json!({
        "status": "ok",
        "worker": { "ready": state.context_ready() },
        "jobs": {
            "total": total,
            "queued": queued,
            "running": running,
        }
    }))
}
