//! Typed generation settings and the per-request override resolver.
//!
//! Defaults match the alt-generator tuning the worker ships with. Clients
//! send overrides as a JSON object under `sampling_params`; [`resolve`]
//! applies the keys it knows and drops the rest with a warning, so a stale
//! or overeager client payload can never fail a job.

use crate::TokenId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Sampling and stopping parameters for one generation job.
///
/// `held_text` and `max_stop_tokens` are carried for wire compatibility
/// with alt-generator style payloads; the generation loop itself does not
/// consume them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub min_p: f32,
    pub typical: f32,
    pub token_repetition_penalty_max: f32,
    pub token_repetition_penalty_sustain: i32,
    pub token_repetition_penalty_decay: i32,
    pub disallowed_tokens: Option<Vec<TokenId>>,
    pub stop_strings: Vec<String>,
    pub stop_tokens: Vec<TokenId>,
    pub held_text: String,
    pub max_stop_tokens: u32,
    pub max_new_tokens: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: 0.95,
            top_k: 40,
            top_p: 0.65,
            min_p: 0.0,
            typical: 0.0,
            token_repetition_penalty_max: 1.15,
            token_repetition_penalty_sustain: -1,
            token_repetition_penalty_decay: 0,
            disallowed_tokens: None,
            stop_strings: Vec::new(),
            stop_tokens: Vec::new(),
            held_text: String::new(),
            max_stop_tokens: 2,
            max_new_tokens: 256,
        }
    }
}

impl GenerationSettings {
    /// Set the generation budget.
    pub fn with_max_new_tokens(mut self, max_new_tokens: u32) -> Self {
        self.max_new_tokens = max_new_tokens;
        self
    }

    /// Set the stop strings (matched case-insensitively against the
    /// cumulative output).
    pub fn with_stop_strings(mut self, stop_strings: Vec<String>) -> Self {
        self.stop_strings = stop_strings;
        self
    }

    /// Set the stop tokens (treated like end-of-sequence).
    pub fn with_stop_tokens(mut self, stop_tokens: Vec<TokenId>) -> Self {
        self.stop_tokens = stop_tokens;
        self
    }
}

/// Field names an override payload may set.
///
/// `max_new_tokens` is deliberately absent: it travels as a top-level input
/// key and is applied by the worker, not through the sampling_params merge.
pub const SETTING_FIELDS: &[&str] = &[
    "temperature",
    "top_k",
    "top_p",
    "min_p",
    "typical",
    "token_repetition_penalty_max",
    "token_repetition_penalty_sustain",
    "token_repetition_penalty_decay",
    "disallowed_tokens",
    "stop_strings",
    "stop_tokens",
    "held_text",
    "max_stop_tokens",
];

/// Whether `key` names a settings field the resolver will accept.
pub fn is_setting_field(key: &str) -> bool {
    SETTING_FIELDS.contains(&key)
}

/// Merge per-request overrides onto a copy of `defaults`.
///
/// Unknown keys and values that do not convert to the field's type are
/// dropped with a warning; they never fail the request.
pub fn resolve(defaults: &GenerationSettings, overrides: &Map<String, Value>) -> GenerationSettings {
    let mut settings = defaults.clone();
    for (key, value) in overrides {
        if !is_setting_field(key) {
            tracing::warn!("ignoring unknown generation setting: {}", key);
            continue;
        }
        let applied = match key.as_str() {
            "temperature" => assign_f32(&mut settings.temperature, value),
            "top_k" => assign_u32(&mut settings.top_k, value),
            "top_p" => assign_f32(&mut settings.top_p, value),
            "min_p" => assign_f32(&mut settings.min_p, value),
            "typical" => assign_f32(&mut settings.typical, value),
            "token_repetition_penalty_max" => {
                assign_f32(&mut settings.token_repetition_penalty_max, value)
            }
            "token_repetition_penalty_sustain" => {
                assign_i32(&mut settings.token_repetition_penalty_sustain, value)
            }
            "token_repetition_penalty_decay" => {
                assign_i32(&mut settings.token_repetition_penalty_decay, value)
            }
            "disallowed_tokens" => match value {
                Value::Null => {
                    settings.disallowed_tokens = None;
                    true
                }
                _ => match token_list(value) {
                    Some(tokens) => {
                        settings.disallowed_tokens = Some(tokens);
                        true
                    }
                    None => false,
                },
            },
            "stop_strings" => match string_list(value) {
                Some(strings) => {
                    settings.stop_strings = strings;
                    true
                }
                None => false,
            },
            "stop_tokens" => match token_list(value) {
                Some(tokens) => {
                    settings.stop_tokens = tokens;
                    true
                }
                None => false,
            },
            "held_text" => match value.as_str() {
                Some(text) => {
                    settings.held_text = text.to_string();
                    true
                }
                None => false,
            },
            "max_stop_tokens" => assign_u32(&mut settings.max_stop_tokens, value),
            _ => false,
        };
        if !applied {
            tracing::warn!(
                "ignoring generation setting {} with incompatible value",
                key
            );
        }
    }
    settings
}

fn assign_f32(slot: &mut f32, value: &Value) -> bool {
    match value.as_f64() {
        Some(v) => {
            *slot = v as f32;
            true
        }
        None => false,
    }
}

fn assign_u32(slot: &mut u32, value: &Value) -> bool {
    match value.as_u64().and_then(|v| u32::try_from(v).ok()) {
        Some(v) => {
            *slot = v;
            true
        }
        None => false,
    }
}

fn assign_i32(slot: &mut i32, value: &Value) -> bool {
    match value.as_i64().and_then(|v| i32::try_from(v).ok()) {
        Some(v) => {
            *slot = v;
            true
        }
        None => false,
    }
}

fn token_list(value: &Value) -> Option<Vec<TokenId>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_i64().and_then(|t| TokenId::try_from(t).ok()))
        .collect()
}

fn string_list(value: &Value) -> Option<Vec<String>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn overrides(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn defaults_match_shipped_tuning() {
        let settings = GenerationSettings::default();
        assert_eq!(settings.temperature, 0.95);
        assert_eq!(settings.top_k, 40);
        assert_eq!(settings.top_p, 0.65);
        assert_eq!(settings.token_repetition_penalty_max, 1.15);
        assert_eq!(settings.token_repetition_penalty_sustain, -1);
        assert!(settings.stop_strings.is_empty());
        assert_eq!(settings.max_stop_tokens, 2);
        assert_eq!(settings.max_new_tokens, 256);
    }

    #[test]
    fn known_overrides_apply() {
        let defaults = GenerationSettings::default();
        let resolved = resolve(
            &defaults,
            &overrides(&[
                ("temperature", json!(0.2)),
                ("top_k", json!(5)),
                ("stop_strings", json!(["###", "User:"])),
                ("stop_tokens", json!([2, 13])),
                ("disallowed_tokens", json!([7])),
            ]),
        );
        assert_eq!(resolved.temperature, 0.2);
        assert_eq!(resolved.top_k, 5);
        assert_eq!(resolved.stop_strings, vec!["###", "User:"]);
        assert_eq!(resolved.stop_tokens, vec![2, 13]);
        assert_eq!(resolved.disallowed_tokens, Some(vec![7]));
        // Untouched fields keep their defaults.
        assert_eq!(resolved.top_p, defaults.top_p);
    }

    #[test]
    fn unknown_key_is_dropped_without_error() {
        let defaults = GenerationSettings::default();
        let resolved = resolve(&defaults, &overrides(&[("foo_bar", json!(42))]));
        assert_eq!(resolved, defaults);
    }

    #[test]
    fn incompatible_value_is_dropped() {
        let defaults = GenerationSettings::default();
        let resolved = resolve(
            &defaults,
            &overrides(&[
                ("temperature", json!("hot")),
                ("top_k", json!(-3)),
                ("stop_strings", json!([1, 2])),
            ]),
        );
        assert_eq!(resolved, defaults);
    }

    #[test]
    fn max_new_tokens_not_accepted_through_overrides() {
        let defaults = GenerationSettings::default();
        let resolved = resolve(&defaults, &overrides(&[("max_new_tokens", json!(9999))]));
        assert_eq!(resolved.max_new_tokens, defaults.max_new_tokens);
        assert!(!is_setting_field("max_new_tokens"));
    }

    #[test]
    fn null_clears_disallowed_tokens() {
        let mut defaults = GenerationSettings::default();
        defaults.disallowed_tokens = Some(vec![2]);
        let resolved = resolve(&defaults, &overrides(&[("disallowed_tokens", Value::Null)]));
        assert_eq!(resolved.disallowed_tokens, None);
    }

    #[test]
    fn settings_deserialize_with_partial_payload() {
        let settings: GenerationSettings =
            serde_json::from_str(r#"{"temperature": 0.5}"#).unwrap();
        assert_eq!(settings.temperature, 0.5);
        assert_eq!(settings.top_k, GenerationSettings::default().top_k);
    }
}
