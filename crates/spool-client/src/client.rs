//! Job submission and the shared request plumbing.

use crate::endpoint::Endpoint;
use crate::error::ClientError;
use crate::stream::{JobStream, PollPolicy};
use crate::Result;
use serde_json::{Map, Value};
use spool_protocol::{is_setting_field, StatusResponse, SubmitRequest, SubmitResponse};

/// Client for one queue endpoint.
///
/// Holds a connection-pooled HTTP client, so reuse one `QueueClient` for
/// many jobs rather than building one per job.
pub struct QueueClient {
    http: reqwest::Client,
    endpoint: Endpoint,
    policy: PollPolicy,
}

impl QueueClient {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            policy: PollPolicy::default(),
        }
    }

    /// Replace the default polling policy.
    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub(crate) fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    pub(crate) fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub(crate) fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let mut request = self.http.get(url);
        if let Some(key) = self.endpoint.api_key() {
            request = request.bearer_auth(key);
        }
        request
    }

    /// Submit a job and return its id.
    ///
    /// `overrides` is a flat map: keys naming generation-settings fields are
    /// nested under `sampling_params`, everything else (`max_new_tokens`,
    /// `prompt_prefix`, ...) stays top-level in the input object. A single
    /// attempt; a rejected submission is not retried.
    pub async fn submit(
        &self,
        prompt: &str,
        overrides: &Map<String, Value>,
        stream: bool,
    ) -> Result<String> {
        if prompt.trim().is_empty() {
            return Err(ClientError::MissingInput);
        }

        let body = SubmitRequest {
            input: build_input(prompt, overrides, stream),
        };
        let mut request = self.http.post(self.endpoint.run_url()).json(&body);
        if let Some(key) = self.endpoint.api_key() {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ClientError::Submission {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: SubmitResponse = serde_json::from_str(&text)?;
        tracing::debug!("job {} accepted by queue", parsed.id);
        Ok(parsed.id)
    }

    /// Follow an already-submitted job. `streaming` selects the short poll
    /// interval used for streaming jobs.
    pub fn follow(&self, job_id: String, streaming: bool) -> JobStream<'_> {
        JobStream::new(self, job_id, streaming)
    }

    /// Submit a non-streaming job and poll it to completion, returning the
    /// final cumulative output text.
    pub async fn run(&self, prompt: &str, overrides: &Map<String, Value>) -> Result<String> {
        let job_id = self.submit(prompt, overrides, false).await?;
        self.follow(job_id, false).collect_text().await
    }

    /// Submit a streaming job and return the poller for its deltas.
    pub async fn open(
        &self,
        prompt: &str,
        overrides: &Map<String, Value>,
    ) -> Result<JobStream<'_>> {
        let job_id = self.submit(prompt, overrides, true).await?;
        Ok(self.follow(job_id, true))
    }

    /// Ask the queue to cancel a job. Best-effort: the outcome is logged
    /// and never propagated.
    pub async fn cancel(&self, job_id: &str) {
        let url = self.endpoint.cancel_url(job_id);
        match self.get(&url).send().await {
            Ok(response) => {
                tracing::info!(
                    "cancel request for job {} returned {}",
                    job_id,
                    response.status()
                );
            }
            Err(err) => {
                tracing::warn!("cancel request for job {} failed: {}", job_id, err);
            }
        }
    }

    /// Fetch the job's status record.
    pub async fn status(&self, job_id: &str) -> Result<StatusResponse> {
        let response = self.get(&self.endpoint.status_url(job_id)).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ClientError::Http {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(serde_json::from_str(&text)?)
    }
}

/// Build the `input` object for a submission. Explicit arguments win over
/// override keys with the same name.
fn build_input(prompt: &str, overrides: &Map<String, Value>, stream: bool) -> Map<String, Value> {
    let mut input = Map::new();
    let mut sampling = Map::new();
    for (key, value) in overrides {
        if is_setting_field(key) {
            sampling.insert(key.clone(), value.clone());
        } else {
            input.insert(key.clone(), value.clone());
        }
    }
    if !sampling.is_empty() {
        input.insert("sampling_params".to_string(), Value::Object(sampling));
    }
    input.insert("prompt".to_string(), Value::String(prompt.to_string()));
    input.insert("stream".to_string(), Value::Bool(stream));
    input
}
