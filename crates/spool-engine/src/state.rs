//! Per-job generation state.

use crate::TokenId;

/// State owned by one generation loop from start to termination.
///
/// `GenerationState` is intentionally not `Clone`: it stands for the live
/// context of exactly one job, and the cumulative text invariant (never
/// shrinking) only holds while a single loop owns it.
#[derive(Debug)]
pub struct GenerationState {
    /// Prompt tokens after tail truncation. Fixed once the loop starts.
    context: Vec<TokenId>,
    /// Tokens produced by sampling, in order. Append-only.
    generated: Vec<TokenId>,
    /// Cumulative decoded text for the generated tokens.
    text: String,
    /// Whether the first generated token opened a new word, meaning the
    /// decoded completion lost a leading space that must be restored.
    leading_space: bool,
}

impl GenerationState {
    pub fn new(context: Vec<TokenId>) -> Self {
        Self {
            context,
            generated: Vec::new(),
            text: String::new(),
            leading_space: false,
        }
    }

    /// Prompt tokens the model was seeded with.
    pub fn context(&self) -> &[TokenId] {
        &self.context
    }

    /// Tokens generated so far.
    pub fn generated(&self) -> &[TokenId] {
        &self.generated
    }

    /// Cumulative decoded completion text.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn leading_space(&self) -> bool {
        self.leading_space
    }

    /// Context and generated tokens as one sequence.
    pub fn full_sequence(&self) -> Vec<TokenId> {
        let mut sequence = Vec::with_capacity(self.context.len() + self.generated.len());
        sequence.extend_from_slice(&self.context);
        sequence.extend_from_slice(&self.generated);
        sequence
    }

    pub(crate) fn push_token(&mut self, token: TokenId) {
        self.generated.push(token);
    }

    pub(crate) fn set_leading_space(&mut self) {
        self.leading_space = true;
    }

    pub(crate) fn set_text(&mut self, text: String) {
        debug_assert!(text.len() >= self.text.len());
        self.text = text;
    }
}
