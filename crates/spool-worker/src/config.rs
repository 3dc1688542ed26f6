//! Environment-driven worker configuration.

use crate::{Result, WorkerError};

/// Worker process configuration, read from the environment at startup.
///
/// Model identity fields (`model_repo`, `model_revision`, `gpu_split`,
/// `alpha`) are consumed by whichever backend constructs the
/// `ModelRuntime`; the handler itself only uses the prompt framing and the
/// generation defaults.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Model repository id, e.g. `TheBloke/Llama-2-13B-GPTQ`.
    pub model_repo: Option<String>,
    /// Repository revision to pin.
    pub model_revision: String,
    /// Comma-separated VRAM budget per GPU, e.g. `16,24`.
    pub gpu_split: Option<String>,
    /// Context-length override. `None` means use the model's own.
    pub max_seq_len: Option<usize>,
    /// RoPE NTK alpha scaling factor.
    pub alpha: Option<f32>,
    /// Text prepended to every prompt.
    pub prompt_prefix: String,
    /// Text appended to every prompt.
    pub prompt_suffix: String,
    /// Default generation budget when a job does not set one.
    pub max_new_tokens: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            model_repo: None,
            model_revision: "main".to_string(),
            gpu_split: None,
            max_seq_len: None,
            alpha: None,
            prompt_prefix: String::new(),
            prompt_suffix: String::new(),
            max_new_tokens: 256,
        }
    }
}

impl WorkerConfig {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary lookup function. `from_env`
    /// is this with `std::env::var`; tests pass a closure.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            model_repo: lookup("MODEL_REPO"),
            model_revision: lookup("MODEL_REVISION").unwrap_or(defaults.model_revision),
            gpu_split: lookup("GPU_SPLIT"),
            max_seq_len: parse_var(lookup("MAX_SEQ_LEN"), "MAX_SEQ_LEN")?,
            alpha: parse_var(lookup("ALPHA"), "ALPHA")?,
            prompt_prefix: lookup("PROMPT_PREFIX")
                .map(|raw| unescape(&raw))
                .unwrap_or(defaults.prompt_prefix),
            prompt_suffix: lookup("PROMPT_SUFFIX")
                .map(|raw| unescape(&raw))
                .unwrap_or(defaults.prompt_suffix),
            max_new_tokens: parse_var(lookup("MAX_NEW_TOKENS"), "MAX_NEW_TOKENS")?
                .unwrap_or(defaults.max_new_tokens),
        })
    }
}

fn parse_var<T: std::str::FromStr>(raw: Option<String>, name: &str) -> Result<Option<T>> {
    match raw {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| WorkerError::Config(format!("invalid {}: {:?}", name, raw))),
    }
}

/// Expand backslash escapes in an environment value, so a shell-provided
/// `"### User:\n"` really ends with a newline. Unknown escapes pass through
/// untouched.
pub fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) if hex.len() == 4 => out.push(decoded),
                    _ => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
