//! The per-job handler and the process-wide worker context.

use crate::config::WorkerConfig;
use crate::{Result, WorkerError};
use serde::Serialize;
use serde_json::{Map, Value};
use spool_engine::{FinishReason, Generator, ModelRuntime};
use spool_protocol::{resolve, GenerationSettings};
use std::sync::Arc;

/// Input keys the handler consumes at the top level. Everything else in a
/// job's input is dropped with a warning, mirroring the settings resolver.
const KNOWN_INPUT_KEYS: &[&str] = &[
    "prompt",
    "stream",
    "sampling_params",
    "max_new_tokens",
    "prompt_prefix",
    "prompt_suffix",
];

/// One job as delivered by the queue runtime.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct JobRequest {
    pub id: String,
    #[serde(default)]
    pub input: Map<String, Value>,
}

/// Terminal result of a non-streaming job. `result` is the full sequence
/// text, prompt included.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub result: String,
    pub tokens_generated: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

/// What a job hands back to the queue runtime: either a finished result or
/// a lazy snapshot stream the runtime relays while pulling.
pub enum JobOutput<'r> {
    Complete(JobResult),
    Stream(Generator<'r>),
}

impl std::fmt::Debug for JobOutput<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobOutput::Complete(result) => f.debug_tuple("Complete").field(result).finish(),
            JobOutput::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Everything a worker process needs to serve jobs: the model runtime, the
/// resolved default settings, and the process configuration.
///
/// Built exactly once per process and passed by reference into each
/// [`handle`](WorkerContext::handle) call. The hosting runtime owns its
/// lifetime; there is no global instance to reach for.
pub struct WorkerContext {
    runtime: Arc<dyn ModelRuntime>,
    defaults: GenerationSettings,
    config: WorkerConfig,
}

impl WorkerContext {
    pub fn new(config: WorkerConfig, runtime: Arc<dyn ModelRuntime>) -> Self {
        let defaults = GenerationSettings::default().with_max_new_tokens(config.max_new_tokens);
        tracing::info!(
            "worker context ready: model {}, context limit {}",
            config.model_repo.as_deref().unwrap_or("<unset>"),
            config.max_seq_len.unwrap_or_else(|| runtime.max_seq_len()),
        );
        Self {
            runtime,
            defaults,
            config,
        }
    }

    pub fn runtime(&self) -> &dyn ModelRuntime {
        self.runtime.as_ref()
    }

    pub fn defaults(&self) -> &GenerationSettings {
        &self.defaults
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    fn context_limit(&self) -> usize {
        self.config
            .max_seq_len
            .unwrap_or_else(|| self.runtime.max_seq_len())
    }

    /// Run one job.
    ///
    /// Validates the prompt, consumes the top-level control keys, resolves
    /// the generation settings, and either drains the loop (non-streaming)
    /// or returns it for the caller to pull (streaming).
    pub fn handle(&self, job: &JobRequest) -> Result<JobOutput<'_>> {
        let input = &job.input;
        let prompt = input
            .get("prompt")
            .and_then(Value::as_str)
            .filter(|prompt| !prompt.is_empty())
            .ok_or(WorkerError::MissingInput)?;
        let stream = input
            .get("stream")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        for key in input.keys() {
            if !KNOWN_INPUT_KEYS.contains(&key.as_str()) {
                tracing::warn!("job {}: ignoring unknown input key {}", job.id, key);
            }
        }

        let empty = Map::new();
        let sampling = input
            .get("sampling_params")
            .and_then(Value::as_object)
            .unwrap_or(&empty);
        let mut settings = resolve(&self.defaults, sampling);
        if let Some(value) = input.get("max_new_tokens") {
            match value.as_u64() {
                Some(max) => settings.max_new_tokens = max.min(u64::from(u32::MAX)) as u32,
                None => {
                    tracing::warn!("job {}: ignoring non-integer max_new_tokens", job.id)
                }
            }
        }

        let prefix = input
            .get("prompt_prefix")
            .and_then(Value::as_str)
            .unwrap_or(&self.config.prompt_prefix);
        let suffix = input
            .get("prompt_suffix")
            .and_then(Value::as_str)
            .unwrap_or(&self.config.prompt_suffix);
        let full_prompt = format!("{}{}{}", prefix, prompt, suffix);

        tracing::info!(
            "job {}: prompt {} chars, stream {}, max_new_tokens {}",
            job.id,
            full_prompt.len(),
            stream,
            settings.max_new_tokens
        );

        let mut generator = Generator::with_context_limit(
            self.runtime.as_ref(),
            &full_prompt,
            settings,
            self.context_limit(),
        )?;

        if stream {
            return Ok(JobOutput::Stream(generator));
        }

        for snapshot in generator.by_ref() {
            snapshot?;
        }
        let result = generator.full_sequence_text()?;
        let tokens_generated = generator.state().generated().len();
        let finish_reason = generator.finish_reason();
        tracing::info!(
            "job {}: finished after {} tokens ({:?})",
            job.id,
            tokens_generated,
            finish_reason
        );
        Ok(JobOutput::Complete(JobResult {
            result,
            tokens_generated,
            finish_reason,
        }))
    }
}
