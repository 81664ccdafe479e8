use std::sync::OnceLock;

use regex::Regex;

use weft_core::state::StateStore;

/// A resolved instruction, plus any placeholders that had no value.
///
/// Missing keys are substituted with the empty string and surfaced here so
/// the caller can warn; an absent key is a configuration smell, never a
/// fatal error.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub text: String,
    pub missing: Vec<String>,
}

// Flat single-level keys only; `{{` and `}}` escape literal braces.
fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{|\}\}|\{([A-Za-z0-9_]+)\}").expect("placeholder pattern compiles")
    })
}

/// Substitute every `{key}` in `template` with the stringified value of
/// `key` from `state`.
///
/// The caller passes a snapshot, so a key referenced multiple times always
/// resolves to the same value; there is no re-fetch mid-resolution.
pub fn resolve(template: &str, state: &StateStore) -> Resolved {
    let mut text = String::with_capacity(template.len());
    let mut missing: Vec<String> = Vec::new();
    let mut last_end = 0;

    for caps in placeholder_re().captures_iter(template) {
        let m = caps.get(0).map(|m| (m.start(), m.end(), m.as_str()));
        let Some((start, end, matched)) = m else {
            continue;
        };
        text.push_str(&template[last_end..start]);
        last_end = end;

        match matched {
            "{{" => text.push('{'),
            "}}" => text.push('}'),
            _ => {
                let key = match caps.get(1) {
                    Some(k) => k.as_str(),
                    None => continue,
                };
                match state.get(key) {
                    Some(serde_json::Value::String(s)) => text.push_str(s),
                    Some(other) => text.push_str(&other.to_string()),
                    None => {
                        if !missing.iter().any(|k| k == key) {
                            missing.push(key.to_string());
                        }
                    }
                }
            }
        }
    }
    text.push_str(&template[last_end..]);

    Resolved { text, missing }
}

/// The distinct placeholder keys referenced by `template`, in first-use
/// order. Escaped braces are not placeholders.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for caps in placeholder_re().captures_iter(template) {
        if let Some(key) = caps.get(1) {
            if !keys.iter().any(|k| k == key.as_str()) {
                keys.push(key.as_str().to_string());
            }
        }
    }
    keys
}
