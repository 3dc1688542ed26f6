//! The worker loop that drains the job queue.

use crate::state::AppState;
use spool_worker::{JobOutput, JobRequest, WorkerContext};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Drain the job queue until every sender is gone.
///
/// Jobs run one at a time on the blocking pool, which keeps the model
/// runtime single-tenant: no two jobs ever interleave their generation
/// state. The worker context is built when the first job arrives.
pub async fn run_jobs(state: AppState, mut queue: mpsc::UnboundedReceiver<String>) {
    while let Some(job_id) = queue.recv().await {
        let Some((input, cancel)) = state.begin_job(&job_id) else {
            continue;
        };
        let context = state.worker_context().await;
        let request = JobRequest {
            id: job_id.clone(),
            input,
        };
        let worker_state = state.clone();
        let joined =
            tokio::task::spawn_blocking(move || execute_job(&worker_state, context, request, cancel))
                .await;
        if let Err(err) = joined {
            state.fail_job(&job_id, format!("worker panicked: {err}"));
        }
    }
    tracing::info!("job queue closed, worker loop exiting");
}

/// Run a single claimed job to a terminal status.
///
/// Streaming jobs publish one snapshot per generated token and check the
/// cancellation token between pulls. Non-streaming jobs run in one piece,
/// so cancellation is only honored at the completion boundary.
fn execute_job(
    state: &AppState,
    context: Arc<WorkerContext>,
    request: JobRequest,
    cancel: CancellationToken,
) {
    let job_id = request.id.clone();
    match context.handle(&request) {
        Ok(JobOutput::Complete(result)) => {
            if cancel.is_cancelled() {
                state.finish_cancelled(&job_id);
            } else {
                state.complete_job(&job_id, result);
            }
        }
        Ok(JobOutput::Stream(generator)) => {
            for snapshot in generator {
                if cancel.is_cancelled() {
                    state.finish_cancelled(&job_id);
                    return;
                }
                match snapshot {
                    Ok(snapshot) => state.push_snapshot(&job_id, snapshot.text),
                    Err(err) => {
                        state.fail_job(&job_id, err.to_string());
                        return;
                    }
                }
            }
            if cancel.is_cancelled() {
                state.finish_cancelled(&job_id);
            } else {
                state.complete_stream(&job_id);
            }
        }
        Err(err) => state.fail_job(&job_id, err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};
    use spool_engine::MockRuntime;
    use spool_protocol::JobStatus;
    use spool_worker::WorkerConfig;
    use std::time::Duration;

    fn input(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn run_one(runtime: MockRuntime, input_value: Value, cancel_first: bool) -> (AppState, String) {
        let runtime = Arc::new(runtime);
        let (state, _queue) = AppState::new(WorkerConfig::default(), runtime.clone());
        let id = state.submit(input(input_value)).unwrap();
        let (input, cancel) = state.begin_job(&id).unwrap();
        if cancel_first {
            cancel.cancel();
        }
        let context = Arc::new(WorkerContext::new(WorkerConfig::default(), runtime));
        execute_job(
            &state,
            context,
            JobRequest {
                id: id.clone(),
                input,
            },
            cancel,
        );
        (state, id)
    }

    #[test]
    fn non_streaming_job_completes_with_full_text() {
        let (state, id) = run_one(
            MockRuntime::new().script(&["4"]),
            json!({"prompt": "2+2=", "max_new_tokens": 1}),
            false,
        );
        let status = state.status_snapshot(&id).unwrap();
        assert_eq!(status.status, JobStatus::Completed);
        assert_eq!(status.output.unwrap()["result"], "2+2=4");
        assert!(status.execution_time.is_some());
    }

    #[test]
    fn streaming_job_publishes_snapshots_then_completes() {
        let (state, id) = run_one(
            MockRuntime::new().script(&["▁one", "▁two"]),
            json!({"prompt": "count:", "stream": true, "max_new_tokens": 2}),
            false,
        );
        let poll = state.stream_slice(&id).unwrap();
        assert_eq!(poll.status, JobStatus::Completed);
        let outputs: Vec<&str> = poll.stream.iter().map(|e| e.output.as_str()).collect();
        assert_eq!(outputs, vec![" one", " one two"]);
        let status = state.status_snapshot(&id).unwrap();
        assert_eq!(
            status.output.unwrap(),
            json!([" one", " one two"])
        );
    }

    #[test]
    fn invalid_input_fails_the_job() {
        let (state, id) = run_one(MockRuntime::new(), json!({"stream": false}), false);
        let status = state.status_snapshot(&id).unwrap();
        assert_eq!(status.status, JobStatus::Failed);
        assert!(status.error.unwrap().contains("prompt"));
    }

    #[test]
    fn cancelled_token_ends_a_streaming_job_without_output() {
        let (state, id) = run_one(
            MockRuntime::new().script(&["▁never"]),
            json!({"prompt": "go", "stream": true}),
            true,
        );
        let status = state.status_snapshot(&id).unwrap();
        assert_eq!(status.status, JobStatus::Cancelled);
        assert!(status.output.is_none());
        assert!(state.stream_slice(&id).unwrap().stream.is_empty());
    }

    #[tokio::test]
    async fn worker_loop_drains_queued_jobs() {
        let runtime = Arc::new(MockRuntime::new().script(&["▁done"]).looping());
        let (state, queue) = AppState::new(WorkerConfig::default(), runtime);
        let first = state
            .submit(input(json!({"prompt": "a", "max_new_tokens": 1})))
            .unwrap();
        let second = state
            .submit(input(json!({"prompt": "b", "max_new_tokens": 1})))
            .unwrap();
        tokio::spawn(run_jobs(state.clone(), queue));

        for _ in 0..200 {
            let done = [&first, &second]
                .iter()
                .all(|id| state.status_snapshot(id).unwrap().status.is_terminal());
            if done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(
            state.status_snapshot(&first).unwrap().status,
            JobStatus::Completed
        );
        assert_eq!(
            state.status_snapshot(&second).unwrap().status,
            JobStatus::Completed
        );
    }
}
