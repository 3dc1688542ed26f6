//! The stream poller: cumulative snapshots in, incremental deltas out.

use crate::client::QueueClient;
use crate::error::ClientError;
use crate::Result;
use futures::Stream;
use spool_protocol::{JobStatus, PollResponse, StreamEntry};
use std::time::Duration;
use tokio::time::Instant;

/// Polling cadence and time budget.
///
/// The defaults mirror the queue's intended use: 200 ms between polls while
/// relaying a stream, 1 s when only waiting for completion, and no overall
/// deadline. A deadline, when set, covers the whole job from the first poll
/// and cancels the job best-effort once exceeded.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub stream_interval: Duration,
    pub status_interval: Duration,
    pub deadline: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            stream_interval: Duration::from_millis(200),
            status_interval: Duration::from_secs(1),
            deadline: None,
        }
    }
}

/// Newly produced text since the previous delta. `is_final` marks the last
/// delta of a completed job (its text may be empty when the final poll
/// carried nothing new).
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDelta {
    pub text: String,
    pub is_final: bool,
}

/// Follows one job's stream endpoint and yields deltas.
///
/// Also the arbiter of failure policy: HTTP error statuses from the queue
/// are logged and polling continues (they are transient runtime hiccups),
/// while transport or parse failures cancel the job best-effort and
/// propagate. A terminal FAILED or CANCELLED status ends the poll with
/// [`ClientError::JobEnded`].
pub struct JobStream<'c> {
    client: &'c QueueClient,
    job_id: String,
    streaming: bool,
    previous_output: String,
    finished: bool,
    started: Instant,
}

impl<'c> JobStream<'c> {
    pub(crate) fn new(client: &'c QueueClient, job_id: String, streaming: bool) -> Self {
        Self {
            client,
            job_id,
            streaming,
            previous_output: String::new(),
            finished: false,
            started: Instant::now(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Full cumulative text seen so far.
    pub fn cumulative(&self) -> &str {
        &self.previous_output
    }

    /// Cancel best-effort and poison the poller before propagating `err`.
    async fn fail(&mut self, err: ClientError) -> ClientError {
        self.finished = true;
        self.client.cancel(&self.job_id).await;
        err
    }

    /// Poll until something new happens: new text, completion, or an error.
    ///
    /// Returns `Ok(None)` once the job is done and every delta has been
    /// handed out.
    pub async fn next_delta(&mut self) -> Result<Option<StreamDelta>> {
        if self.finished {
            return Ok(None);
        }
        let interval = if self.streaming {
            self.client.policy().stream_interval
        } else {
            self.client.policy().status_interval
        };

        loop {
            tokio::time::sleep(interval).await;
            if let Some(deadline) = self.client.policy().deadline {
                if self.started.elapsed() >= deadline {
                    return Err(self.fail(ClientError::DeadlineExceeded(deadline)).await);
                }
            }

            let url = self.client.endpoint().stream_url(&self.job_id);
            let response = match self.client.get(&url).send().await {
                Ok(response) => response,
                Err(err) => return Err(self.fail(err.into()).await),
            };
            let status = response.status();
            let text = match response.text().await {
                Ok(text) => text,
                Err(err) => return Err(self.fail(err.into()).await),
            };
            if status.as_u16() >= 400 {
                tracing::error!(
                    "stream poll for job {} returned http {}: {}",
                    self.job_id,
                    status.as_u16(),
                    text
                );
                continue;
            }
            let poll: PollResponse = match serde_json::from_str(&text) {
                Ok(poll) => poll,
                Err(err) => return Err(self.fail(err.into()).await),
            };

            let delta = merge_entries(&mut self.previous_output, &poll.stream);
            match poll.status {
                JobStatus::Completed => {
                    self.finished = true;
                    return Ok(Some(StreamDelta {
                        text: delta,
                        is_final: true,
                    }));
                }
                JobStatus::Failed | JobStatus::Cancelled => {
                    self.finished = true;
                    return Err(ClientError::JobEnded {
                        status: poll.status,
                        detail: poll
                            .error
                            .unwrap_or_else(|| "no error reported".to_string()),
                    });
                }
                _ => {
                    if !delta.is_empty() {
                        return Ok(Some(StreamDelta {
                            text: delta,
                            is_final: false,
                        }));
                    }
                }
            }
        }
    }

    /// Drain the job and return its final cumulative text.
    pub async fn collect_text(mut self) -> Result<String> {
        while self.next_delta().await?.is_some() {}
        Ok(self.previous_output)
    }

    /// Adapt the poller into a `futures::Stream` of deltas.
    pub fn into_stream(mut self) -> impl Stream<Item = Result<StreamDelta>> + 'c {
        async_stream::stream! {
            loop {
                match self.next_delta().await {
                    Ok(Some(delta)) => {
                        let is_final = delta.is_final;
                        yield Ok(delta);
                        if is_final {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        yield Err(err);
                        break;
                    }
                }
            }
        }
    }
}

/// Fold a poll's entries into `previous_output`, returning only the new
/// text. Every entry carries the full cumulative output, so the delta is
/// whatever extends past what was already seen; entries no longer than the
/// known text contribute nothing.
fn merge_entries(previous_output: &mut String, entries: &[StreamEntry]) -> String {
    let mut delta = String::new();
    for entry in entries {
        if let Some(new_text) = entry.output.get(previous_output.len()..) {
            if !new_text.is_empty() {
                delta.push_str(new_text);
                *previous_output = entry.output.clone();
            }
        }
    }
    delta
}
