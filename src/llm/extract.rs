//! Locate a JSON object inside free-form model output.
//!
//! Models wrap answers in commentary, markdown fences, or wrapper objects.
//! The scanner walks every `{` in order, finds its balanced closing brace
//! (ignoring braces inside string literals), and accepts the first
//! candidate that parses as a JSON object carrying the wanted key.

use serde_json::Value;

/// Key that identifies a risk-assessment object.
pub const ASSESSMENT_KEY: &str = "riskScore";

/// First well-formed JSON object in `text` that has a `riskScore` key.
pub fn find_assessment_object(text: &str) -> Option<&str> {
    find_object_with_key(text, ASSESSMENT_KEY)
}

/// First well-formed JSON object in `text` that has `key` at its top level.
///
/// Candidates that are unbalanced, fail to parse, or lack the key are
/// skipped, so an object nested inside a non-matching wrapper is still found.
pub fn find_object_with_key<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    for (start, _) in text.match_indices('{') {
        let Some(len) = balanced_len(&text[start..]) else {
            continue;
        };
        let candidate = &text[start..start + len];
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(candidate) {
            if map.contains_key(key) {
                return Some(candidate);
            }
        }
    }
    None
}

/// Byte length of the brace-balanced span at the start of `s`, which must
/// begin with `{`. Returns `None` if the span never closes.
fn balanced_len(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}
