//! A deterministic scripted runtime for tests, demos, and the local queue
//! emulator. No weights, no GPU; `sample_next` just replays a script.

use crate::runtime::{ModelRuntime, WORD_BOUNDARY_MARKER};
use crate::state::GenerationState;
use crate::{EngineError, Result, TokenId};
use spool_protocol::GenerationSettings;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

const EOS: TokenId = 0;

struct Vocab {
    pieces: Vec<String>,
    index: HashMap<String, TokenId>,
}

impl Vocab {
    fn intern(&mut self, piece: &str) -> TokenId {
        if let Some(&id) = self.index.get(piece) {
            return id;
        }
        let id = self.pieces.len() as TokenId;
        self.pieces.push(piece.to_string());
        self.index.insert(piece.to_string(), id);
        id
    }
}

/// Scripted [`ModelRuntime`]. The vocab grows as text is encoded
/// (whitespace words become `▁`-prefixed pieces); sampling pops tokens off
/// a fixed script and falls back to eos when the script runs out.
///
/// Sampling settings are accepted but not consulted; the script decides.
/// Call counters let tests assert how often the loop touched the runtime.
pub struct MockRuntime {
    vocab: RwLock<Vocab>,
    script: Mutex<VecDeque<TokenId>>,
    script_master: Vec<TokenId>,
    looping: bool,
    token_delay: Option<Duration>,
    max_seq_len: usize,
    sample_calls: AtomicUsize,
    reset_calls: AtomicUsize,
}

impl MockRuntime {
    pub fn new() -> Self {
        let mut vocab = Vocab {
            pieces: Vec::new(),
            index: HashMap::new(),
        };
        vocab.intern("</s>");
        Self {
            vocab: RwLock::new(vocab),
            script: Mutex::new(VecDeque::new()),
            script_master: Vec::new(),
            looping: false,
            token_delay: None,
            max_seq_len: 2048,
            sample_calls: AtomicUsize::new(0),
            reset_calls: AtomicUsize::new(0),
        }
    }

    /// Set the pieces `sample_next` will produce, in order. Word-initial
    /// pieces carry the `▁` marker, continuations do not.
    pub fn script(mut self, pieces: &[&str]) -> Self {
        let mut vocab = self.vocab.write().unwrap();
        let tokens: Vec<TokenId> = pieces.iter().map(|p| vocab.intern(p)).collect();
        drop(vocab);
        self.script_master = tokens.clone();
        self.script = Mutex::new(tokens.into());
        self
    }

    /// Replay the script from the start whenever it runs out, instead of
    /// falling back to eos. Lets one runtime serve job after job.
    pub fn looping(mut self) -> Self {
        self.looping = true;
        self
    }

    pub fn with_max_seq_len(mut self, max_seq_len: usize) -> Self {
        self.max_seq_len = max_seq_len;
        self
    }

    /// Sleep this long inside every `sample_next` call, so streaming looks
    /// like streaming instead of one instant burst.
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = Some(delay);
        self
    }

    /// Token ID for a piece, if it has been interned.
    pub fn token_for(&self, piece: &str) -> Option<TokenId> {
        self.vocab.read().unwrap().index.get(piece).copied()
    }

    pub fn sample_calls(&self) -> usize {
        self.sample_calls.load(Ordering::SeqCst)
    }

    pub fn reset_calls(&self) -> usize {
        self.reset_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRuntime for MockRuntime {
    fn encode(&self, text: &str) -> Result<Vec<TokenId>> {
        let mut vocab = self.vocab.write().unwrap();
        Ok(text
            .split_whitespace()
            .map(|word| vocab.intern(&format!("{}{}", WORD_BOUNDARY_MARKER, word)))
            .collect())
    }

    fn decode(&self, tokens: &[TokenId]) -> Result<String> {
        let vocab = self.vocab.read().unwrap();
        let mut joined = String::new();
        for &token in tokens {
            if token == EOS {
                continue;
            }
            let piece = vocab
                .pieces
                .get(token as usize)
                .ok_or_else(|| EngineError::Decode(format!("unknown token id {}", token)))?;
            joined.push_str(piece);
        }
        let replaced = joined.replace(WORD_BOUNDARY_MARKER, " ");
        Ok(replaced
            .strip_prefix(' ')
            .map(str::to_string)
            .unwrap_or(replaced))
    }

    fn piece(&self, token: TokenId) -> Option<String> {
        self.vocab
            .read()
            .unwrap()
            .pieces
            .get(token as usize)
            .cloned()
    }

    fn eos_token(&self) -> TokenId {
        EOS
    }

    fn max_seq_len(&self) -> usize {
        self.max_seq_len
    }

    fn reset(&self) {
        self.reset_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn sample_next(
        &self,
        _state: &GenerationState,
        _settings: &GenerationSettings,
    ) -> Result<TokenId> {
        self.sample_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.token_delay {
            std::thread::sleep(delay);
        }
        let mut script = self.script.lock().unwrap();
        if script.is_empty() && self.looping && !self.script_master.is_empty() {
            script.extend(self.script_master.iter().copied());
        }
        Ok(script.pop_front().unwrap_or(EOS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_interns_words_stably() {
        let runtime = MockRuntime::new();
        let first = runtime.encode("the cat sat").unwrap();
        let again = runtime.encode("the cat sat").unwrap();
        assert_eq!(first, again);
        assert_eq!(first.len(), 3);
        assert_eq!(runtime.piece(first[0]).unwrap(), "▁the");
    }

    #[test]
    fn decode_restores_spaces_and_strips_the_first() {
        let runtime = MockRuntime::new();
        let tokens = runtime.encode("hello world").unwrap();
        assert_eq!(runtime.decode(&tokens).unwrap(), "hello world");
    }

    #[test]
    fn decode_skips_eos() {
        let runtime = MockRuntime::new();
        let mut tokens = runtime.encode("hello").unwrap();
        tokens.push(EOS);
        assert_eq!(runtime.decode(&tokens).unwrap(), "hello");
    }

    #[test]
    fn decode_keeps_continuation_pieces_attached() {
        let runtime = MockRuntime::new().script(&["4"]);
        let mut tokens = runtime.encode("2+2=").unwrap();
        tokens.push(runtime.token_for("4").unwrap());
        assert_eq!(runtime.decode(&tokens).unwrap(), "2+2=4");
    }

    #[test]
    fn unknown_token_is_a_decode_error() {
        let runtime = MockRuntime::new();
        let result = runtime.decode(&[999]);
        assert!(matches!(result, Err(EngineError::Decode(_))));
    }

    #[test]
    fn script_runs_out_into_eos() {
        let runtime = MockRuntime::new().script(&["▁a", "▁b"]);
        let state = GenerationState::new(vec![1]);
        let settings = GenerationSettings::default();
        let a = runtime.sample_next(&state, &settings).unwrap();
        let b = runtime.sample_next(&state, &settings).unwrap();
        assert_ne!(a, EOS);
        assert_ne!(b, EOS);
        assert_eq!(runtime.sample_next(&state, &settings).unwrap(), EOS);
        assert_eq!(runtime.sample_calls(), 3);
    }

    #[test]
    fn looping_script_replays() {
        let runtime = MockRuntime::new().script(&["▁a"]).looping();
        let state = GenerationState::new(vec![1]);
        let settings = GenerationSettings::default();
        let first = runtime.sample_next(&state, &settings).unwrap();
        let second = runtime.sample_next(&state, &settings).unwrap();
        assert_eq!(first, second);
        assert_ne!(first, EOS);
    }
}
