//! The token generation loop, exposed as a pull-based snapshot iterator.

use crate::runtime::{ModelRuntime, WORD_BOUNDARY_MARKER};
use crate::state::GenerationState;
use crate::{EngineError, Result, TokenId};
use serde::{Deserialize, Serialize};
use spool_protocol::GenerationSettings;

/// Why a generation loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// End-of-sequence token (or a configured stop token) was sampled.
    Eos,
    /// The cumulative text ended with a configured stop string.
    StopString,
    /// The generation budget was spent.
    MaxTokens,
}

/// One step of output: the full cumulative completion text so far. The
/// snapshot carrying a finish reason is the last one the loop produces.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub text: String,
    pub finish: Option<FinishReason>,
}

impl Snapshot {
    pub fn is_final(&self) -> bool {
        self.finish.is_some()
    }
}

/// Drives one job's generation, one sampled token per `next()` call.
///
/// Yielding after every token keeps the caller in control: a streaming
/// relay forwards the latest snapshot between pulls, and cancellation is a
/// matter of not pulling again. A generator that hit an error or produced
/// its final snapshot is fused; it is not resumable.
pub struct Generator<'r> {
    runtime: &'r dyn ModelRuntime,
    state: GenerationState,
    settings: GenerationSettings,
    /// Stop strings pre-lowered once; matching is case-insensitive.
    stop_strings_lower: Vec<String>,
    finish: Option<FinishReason>,
    finished: bool,
}

impl<'r> Generator<'r> {
    /// Start a generation loop using the runtime's own context length.
    pub fn new(
        runtime: &'r dyn ModelRuntime,
        prompt: &str,
        settings: GenerationSettings,
    ) -> Result<Self> {
        let limit = runtime.max_seq_len();
        Self::with_context_limit(runtime, prompt, settings, limit)
    }

    /// Start a generation loop with an explicit context length limit.
    ///
    /// Resets the runtime's residual state, encodes the prompt, and keeps
    /// only the most recent `context_limit` tokens when the prompt is
    /// longer than the context window.
    pub fn with_context_limit(
        runtime: &'r dyn ModelRuntime,
        prompt: &str,
        settings: GenerationSettings,
        context_limit: usize,
    ) -> Result<Self> {
        runtime.reset();
        let mut context = runtime.encode(prompt)?;
        if context.len() > context_limit {
            tracing::debug!(
                "truncating prompt from {} to {} tokens",
                context.len(),
                context_limit
            );
            context.drain(..context.len() - context_limit);
        }
        if context.is_empty() {
            return Err(EngineError::EmptyPrompt);
        }
        let stop_strings_lower = settings
            .stop_strings
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| s.to_lowercase())
            .collect();
        Ok(Self {
            runtime,
            state: GenerationState::new(context),
            settings,
            stop_strings_lower,
            finish: None,
            finished: false,
        })
    }

    /// The live generation state.
    pub fn state(&self) -> &GenerationState {
        &self.state
    }

    /// Why the loop stopped, once it has.
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish
    }

    /// Decode context plus generated tokens as one sequence. This is the
    /// prompt-included result text a non-streaming job reports.
    pub fn full_sequence_text(&self) -> Result<String> {
        self.runtime.decode(&self.state.full_sequence())
    }

    fn stop_reason(&self, token: TokenId) -> Option<FinishReason> {
        if token == self.runtime.eos_token() || self.settings.stop_tokens.contains(&token) {
            return Some(FinishReason::Eos);
        }
        if !self.stop_strings_lower.is_empty() {
            let lowered = self.state.text().to_lowercase();
            if self
                .stop_strings_lower
                .iter()
                .any(|stop| lowered.ends_with(stop))
            {
                return Some(FinishReason::StopString);
            }
        }
        if self.state.generated().len() >= self.settings.max_new_tokens as usize {
            return Some(FinishReason::MaxTokens);
        }
        None
    }
}

impl Iterator for Generator<'_> {
    type Item = Result<Snapshot>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished || self.settings.max_new_tokens == 0 {
            return None;
        }

        let token = match self.runtime.sample_next(&self.state, &self.settings) {
            Ok(token) => token,
            Err(err) => {
                self.finished = true;
                return Some(Err(err));
            }
        };

        let first = self.state.generated().is_empty();
        self.state.push_token(token);

        // The decoded completion drops a leading space when the first
        // generated token opens a new word; remember to restore it.
        if first {
            if let Some(piece) = self.runtime.piece(token) {
                if piece.starts_with(WORD_BOUNDARY_MARKER) {
                    self.state.set_leading_space();
                }
            }
        }

        let decoded = match self.runtime.decode(self.state.generated()) {
            Ok(decoded) => decoded,
            Err(err) => {
                self.finished = true;
                return Some(Err(err));
            }
        };
        let text = if self.state.leading_space() && !decoded.is_empty() {
            format!(" {}", decoded)
        } else {
            decoded
        };
        self.state.set_text(text.clone());

        let finish = self.stop_reason(token);
        if finish.is_some() {
            self.finish = finish;
            self.finished = true;
        }
        Some(Ok(Snapshot { text, finish }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRuntime;

    #[test]
    fn empty_prompt_is_rejected() {
        let runtime = MockRuntime::new();
        let result = Generator::new(&runtime, "", GenerationSettings::default());
        assert!(matches!(result, Err(EngineError::EmptyPrompt)));
    }

    #[test]
    fn reset_runs_once_per_loop() {
        let runtime = MockRuntime::new().script(&["▁ok"]);
        let generator =
            Generator::new(&runtime, "hello", GenerationSettings::default()).unwrap();
        assert_eq!(runtime.reset_calls(), 1);
        drop(generator);
        let _ = Generator::new(&runtime, "hello", GenerationSettings::default()).unwrap();
        assert_eq!(runtime.reset_calls(), 2);
    }

    #[test]
    fn zero_budget_yields_nothing() {
        let runtime = MockRuntime::new().script(&["▁ok"]);
        let settings = GenerationSettings::default().with_max_new_tokens(0);
        let mut generator = Generator::new(&runtime, "hello", settings).unwrap();
        assert!(generator.next().is_none());
        assert_eq!(runtime.sample_calls(), 0);
    }

    #[test]
    fn eos_finishes_without_growing_text() {
        // Script one word, then the mock starts returning eos.
        let runtime = MockRuntime::new().script(&["▁ok"]);
        let generator =
            Generator::new(&runtime, "hello", GenerationSettings::default()).unwrap();
        let snapshots: Vec<Snapshot> = generator.map(|s| s.unwrap()).collect();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].text, " ok");
        assert_eq!(snapshots[1].text, " ok");
        assert_eq!(snapshots[1].finish, Some(FinishReason::Eos));
    }

    #[test]
    fn configured_stop_token_acts_like_eos() {
        let runtime = MockRuntime::new().script(&["▁so", "▁long"]);
        let stop = runtime.token_for("▁long").unwrap();
        let settings = GenerationSettings::default().with_stop_tokens(vec![stop]);
        let generator = Generator::new(&runtime, "hello", settings).unwrap();
        let snapshots: Vec<Snapshot> = generator.map(|s| s.unwrap()).collect();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[1].finish, Some(FinishReason::Eos));
    }

    #[test]
    fn iterator_is_fused_after_finish() {
        let runtime = MockRuntime::new().script(&["▁ok"]);
        let settings = GenerationSettings::default().with_max_new_tokens(1);
        let mut generator = Generator::new(&runtime, "hello", settings).unwrap();
        let snapshot = generator.next().unwrap().unwrap();
        assert!(snapshot.is_final());
        assert!(generator.next().is_none());
        assert!(generator.next().is_none());
    }

    #[test]
    fn snapshots_grow_monotonically() {
        let runtime = MockRuntime::new().script(&["▁one", "▁two", "▁three"]);
        let settings = GenerationSettings::default().with_max_new_tokens(3);
        let generator = Generator::new(&runtime, "hello", settings).unwrap();
        let mut previous = String::new();
        for snapshot in generator {
            let snapshot = snapshot.unwrap();
            assert!(snapshot.text.starts_with(&previous));
            assert!(snapshot.text.len() >= previous.len());
            previous = snapshot.text;
        }
        assert_eq!(previous, " one two three");
    }
}
