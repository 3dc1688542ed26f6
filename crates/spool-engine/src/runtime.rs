//! The backend trait every inference runtime implements.

use crate::state::GenerationState;
use crate::{Result, TokenId};
use spool_protocol::GenerationSettings;

/// Sentencepiece word-boundary marker. A vocab piece starting with this
/// character begins a new word; its decoded form starts with a space that
/// plain `decode` strips at position zero.
pub const WORD_BOUNDARY_MARKER: char = '\u{2581}';

/// A loaded model plus its tokenizer, behind one object-safe seam.
///
/// Model and tokenizer loading happen before a runtime is handed to the
/// worker context; from the loop's point of view the runtime is always
/// ready. FFI-backed GPU engines, candle backends, and the scripted
/// [`MockRuntime`](crate::MockRuntime) all fit this surface.
pub trait ModelRuntime: Send + Sync {
    /// Tokenize text into model token IDs.
    fn encode(&self, text: &str) -> Result<Vec<TokenId>>;

    /// Decode token IDs into text. Special tokens decode to nothing, and a
    /// single leading space from a word-boundary marker is stripped
    /// (standard sentencepiece behavior).
    fn decode(&self, tokens: &[TokenId]) -> Result<String>;

    /// Raw vocab piece for a token, e.g. `▁the`. `None` for unknown IDs.
    fn piece(&self, token: TokenId) -> Option<String>;

    /// End-of-sequence token ID.
    fn eos_token(&self) -> TokenId;

    /// Maximum context length the model was loaded with.
    fn max_seq_len(&self) -> usize;

    /// Drop residual decode state left over from a previous job. Called
    /// once at the start of every generation loop; backends without such
    /// state can keep the default no-op.
    fn reset(&self) {}

    /// Sample the next token given the current state and settings.
    fn sample_next(
        &self,
        state: &GenerationState,
        settings: &GenerationSettings,
    ) -> Result<TokenId>;
}
