//! Shared queue state: the job table and the lazily built worker context.

use crate::{Result, ServerError};
use serde_json::{Map, Value};
use spool_engine::ModelRuntime;
use spool_protocol::{JobStatus, PollResponse, StatusResponse, StreamEntry};
use spool_worker::{JobResult, WorkerConfig, WorkerContext};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{mpsc, OnceCell};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One tracked job.
///
/// `snapshots` holds cumulative completion texts in arrival order; `cursor`
/// marks how many of them have already been handed out through `/stream`.
struct Job {
    input: Map<String, Value>,
    status: JobStatus,
    snapshots: Vec<String>,
    cursor: usize,
    output: Option<Value>,
    error: Option<String>,
    cancel: CancellationToken,
    enqueued_at: Instant,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
}

impl Job {
    fn new(input: Map<String, Value>) -> Self {
        Self {
            input,
            status: JobStatus::InQueue,
            snapshots: Vec::new(),
            cursor: 0,
            output: None,
            error: None,
            cancel: CancellationToken::new(),
            enqueued_at: Instant::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Apply a status transition, refusing anything the lifecycle does not
    /// allow. Terminal states absorb every further attempt.
    fn transition(&mut self, id: &str, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            tracing::warn!(
                "job {}: refusing transition {} -> {}",
                id,
                self.status.as_str(),
                next.as_str()
            );
            return false;
        }
        self.status = next;
        true
    }

    fn delay_ms(&self) -> Option<u64> {
        let picked_up = self.started_at.or(self.finished_at)?;
        Some(picked_up.duration_since(self.enqueued_at).as_millis() as u64)
    }

    fn execution_ms(&self) -> Option<u64> {
        let started = self.started_at?;
        let finished = self.finished_at?;
        Some(finished.duration_since(started).as_millis() as u64)
    }
}

/// State shared across handlers and the worker loop.
///
/// The job table sits behind a plain mutex; every access is a short
/// lock-mutate-release with no await points inside.
#[derive(Clone)]
pub struct AppState {
    jobs: Arc<Mutex<HashMap<String, Job>>>,
    queue: mpsc::UnboundedSender<String>,
    config: WorkerConfig,
    runtime: Arc<dyn ModelRuntime>,
    context: Arc<OnceCell<Arc<WorkerContext>>>,
}

impl AppState {
    /// Build the state plus the receiving end of the job queue. The caller
    /// wires the receiver into [`run_jobs`](crate::runner::run_jobs).
    pub fn new(
        config: WorkerConfig,
        runtime: Arc<dyn ModelRuntime>,
    ) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (queue, receiver) = mpsc::unbounded_channel();
        let state = Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            queue,
            config,
            runtime,
            context: Arc::new(OnceCell::new()),
        };
        (state, receiver)
    }

    /// The worker context, built on first use and reused for every job
    /// after that.
    pub async fn worker_context(&self) -> Arc<WorkerContext> {
        self.context
            .get_or_init(|| async {
                Arc::new(WorkerContext::new(self.config.clone(), self.runtime.clone()))
            })
            .await
            .clone()
    }

    /// Whether the worker context has been built yet. Exposed for `/health`.
    pub fn context_ready(&self) -> bool {
        self.context.initialized()
    }

    /// Register a job and hand its id to the worker loop.
    pub fn submit(&self, input: Map<String, Value>) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.jobs
            .lock()
            .unwrap()
            .insert(id.clone(), Job::new(input));
        if self.queue.send(id.clone()).is_err() {
            self.jobs.lock().unwrap().remove(&id);
            return Err(ServerError::WorkerUnavailable);
        }
        tracing::info!("job {}: queued", id);
        Ok(id)
    }

    /// Claim a queued job for execution. Returns its input and cancellation
    /// token, or `None` when the job was cancelled while still queued.
    pub fn begin_job(&self, id: &str) -> Option<(Map<String, Value>, CancellationToken)> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(id)?;
        if !job.transition(id, JobStatus::InProgress) {
            return None;
        }
        job.started_at = Some(Instant::now());
        Some((job.input.clone(), job.cancel.clone()))
    }

    /// Append a cumulative snapshot for a running job.
    pub fn push_snapshot(&self, id: &str, text: String) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(id) {
            if !job.status.is_terminal() {
                job.snapshots.push(text);
            }
        }
    }

    /// Finish a non-streaming job. The full sequence text is pushed as the
    /// single snapshot so `/stream` pollers see the result too.
    pub fn complete_job(&self, id: &str, result: JobResult) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(id) {
            if job.transition(id, JobStatus::Completed) {
                job.snapshots.push(result.result.clone());
                job.output = serde_json::to_value(&result).ok();
                job.finished_at = Some(Instant::now());
                tracing::info!("job {}: completed ({} tokens)", id, result.tokens_generated);
            }
        }
    }

    /// Finish a streaming job. The aggregated snapshot list becomes the
    /// job's output, mirroring how the hosted queue reports streamed runs.
    pub fn complete_stream(&self, id: &str) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(id) {
            if job.transition(id, JobStatus::Completed) {
                job.output = Some(Value::Array(
                    job.snapshots.iter().cloned().map(Value::String).collect(),
                ));
                job.finished_at = Some(Instant::now());
                tracing::info!("job {}: completed ({} snapshots)", id, job.snapshots.len());
            }
        }
    }

    /// Mark a running job failed.
    pub fn fail_job(&self, id: &str, error: String) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(id) {
            if job.transition(id, JobStatus::Failed) {
                tracing::error!("job {}: failed: {}", id, error);
                job.error = Some(error);
                job.finished_at = Some(Instant::now());
            }
        }
    }

    /// Mark a running job cancelled after the worker loop observed its
    /// token.
    pub fn finish_cancelled(&self, id: &str) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(id) {
            if job.transition(id, JobStatus::Cancelled) {
                tracing::info!("job {}: cancelled", id);
                job.finished_at = Some(Instant::now());
            }
        }
    }

    /// Handle a cancel request. Queued jobs go terminal immediately;
    /// running jobs get their token fired and the worker loop finishes the
    /// transition; terminal jobs are left untouched.
    pub fn cancel_job(&self, id: &str) -> Option<JobStatus> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(id)?;
        match job.status {
            JobStatus::InQueue => {
                job.transition(id, JobStatus::Cancelled);
                job.finished_at = Some(Instant::now());
                tracing::info!("job {}: cancelled while queued", id);
            }
            JobStatus::InProgress => {
                job.cancel.cancel();
                tracing::info!("job {}: cancellation requested", id);
            }
            _ => {}
        }
        Some(job.status)
    }

    /// Drain the snapshots appended since the previous poll.
    pub fn stream_slice(&self, id: &str) -> Option<PollResponse> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(id)?;
        let stream = job.snapshots[job.cursor..]
            .iter()
            .map(|text| StreamEntry {
                output: text.clone(),
            })
            .collect();
        job.cursor = job.snapshots.len();
        Some(PollResponse {
            stream,
            status: job.status,
            error: job.error.clone(),
        })
    }

    pub fn status_snapshot(&self, id: &str) -> Option<StatusResponse> {
        let jobs = self.jobs.lock().unwrap();
        let job = jobs.get(id)?;
        Some(StatusResponse {
            id: id.to_string(),
            status: job.status,
            output: job.output.clone(),
            error: job.error.clone(),
            delay_time: job.delay_ms(),
            execution_time: job.execution_ms(),
        })
    }

    /// Job counts for `/health`.
    pub fn job_counts(&self) -> (usize, usize, usize) {
        let jobs = self.jobs.lock().unwrap();
        let queued = jobs
            .values()
            .filter(|job| job.status == JobStatus::InQueue)
            .count();
        let running = jobs
            .values()
            .filter(|job| job.status == JobStatus::InProgress)
            .count();
        (jobs.len(), queued, running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spool_engine::MockRuntime;

    // The receiver is returned alongside the state so submissions do not
    // see a closed queue; tests that never run jobs just hold it.
    fn state() -> (AppState, mpsc::UnboundedReceiver<String>) {
        AppState::new(WorkerConfig::default(), Arc::new(MockRuntime::new()))
    }

    fn input() -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("prompt".to_string(), Value::String("hi".to_string()));
        map
    }

    #[test]
    fn submit_registers_a_queued_job() {
        let (state, _queue) = state();
        let id = state.submit(input()).unwrap();
        let status = state.status_snapshot(&id).unwrap();
        assert_eq!(status.status, JobStatus::InQueue);
        assert!(status.output.is_none());
        assert!(status.delay_time.is_none());
    }

    #[test]
    fn begin_job_claims_each_job_once() {
        let (state, _queue) = state();
        let id = state.submit(input()).unwrap();
        assert!(state.begin_job(&id).is_some());
        assert!(state.begin_job(&id).is_none());
        assert_eq!(state.status_snapshot(&id).unwrap().status, JobStatus::InProgress);
    }

    #[test]
    fn cancelled_queued_job_cannot_be_claimed() {
        let (state, _queue) = state();
        let id = state.submit(input()).unwrap();
        assert_eq!(state.cancel_job(&id), Some(JobStatus::Cancelled));
        assert!(state.begin_job(&id).is_none());
    }

    #[test]
    fn terminal_status_absorbs_later_outcomes() {
        let (state, _queue) = state();
        let id = state.submit(input()).unwrap();
        state.begin_job(&id).unwrap();
        state.finish_cancelled(&id);
        state.fail_job(&id, "too late".to_string());
        let status = state.status_snapshot(&id).unwrap();
        assert_eq!(status.status, JobStatus::Cancelled);
        assert!(status.error.is_none());
    }

    #[test]
    fn stream_slice_advances_the_cursor() {
        let (state, _queue) = state();
        let id = state.submit(input()).unwrap();
        state.begin_job(&id).unwrap();
        state.push_snapshot(&id, "a".to_string());
        state.push_snapshot(&id, "ab".to_string());

        let first = state.stream_slice(&id).unwrap();
        assert_eq!(first.stream.len(), 2);
        assert_eq!(first.stream[1].output, "ab");
        assert_eq!(first.status, JobStatus::InProgress);

        let second = state.stream_slice(&id).unwrap();
        assert!(second.stream.is_empty());

        state.push_snapshot(&id, "abc".to_string());
        let third = state.stream_slice(&id).unwrap();
        assert_eq!(third.stream.len(), 1);
        assert_eq!(third.stream[0].output, "abc");
    }

    #[test]
    fn cancel_of_running_job_only_fires_the_token() {
        let (state, _queue) = state();
        let id = state.submit(input()).unwrap();
        let (_, cancel) = state.begin_job(&id).unwrap();
        assert!(!cancel.is_cancelled());
        assert_eq!(state.cancel_job(&id), Some(JobStatus::InProgress));
        assert!(cancel.is_cancelled());
        // The worker loop owns the terminal transition.
        assert_eq!(state.status_snapshot(&id).unwrap().status, JobStatus::InProgress);
    }

    #[test]
    fn unknown_job_is_reported_as_absent() {
        let (state, _queue) = state();
        assert!(state.status_snapshot("missing").is_none());
        assert!(state.stream_slice("missing").is_none());
        assert!(state.cancel_job("missing").is_none());
    }
}
