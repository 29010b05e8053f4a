//! Boundary adapter between free-form completion text and typed stage outputs.
//!
//! A completion either decodes into the expected shape or fails with a
//! [`ContractViolation`]. Nothing untyped gets past this module.

use serde::de::DeserializeOwned;

/// Characters of raw output kept in a violation for debugging.
const PREVIEW_CHARS: usize = 300;

/// A typed shape a completion must decode into.
pub trait Contract: DeserializeOwned {
    /// Name used in error messages and logs.
    const SHAPE: &'static str;

    /// Checks serde cannot express. Runs after a successful decode.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// A completion arrived but did not match its expected shape.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{shape} contract violated: {reason} (raw: {preview})")]
pub struct ContractViolation {
    pub shape: &'static str,
    pub reason: String,
    pub preview: String,
}

impl ContractViolation {
    fn new(shape: &'static str, reason: impl Into<String>, raw: &str) -> Self {
        Self {
            shape,
            reason: reason.into(),
            preview: raw.chars().take(PREVIEW_CHARS).collect(),
        }
    }
}

/// Decode `raw` into `T`, stripping any fence wrapping first.
pub fn parse<T: Contract>(raw: &str) -> Result<T, ContractViolation> {
    let body = strip_fences(raw);
    if body.is_empty() {
        return Err(ContractViolation::new(T::SHAPE, "empty completion", raw));
    }

    let value: T = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(first_err) => {
            let embedded = extract_json(body);
            if embedded.len() == body.len() {
                return Err(ContractViolation::new(T::SHAPE, first_err.to_string(), raw));
            }
            serde_json::from_str(embedded)
                .map_err(|e| ContractViolation::new(T::SHAPE, e.to_string(), raw))?
        }
    };

    value
        .validate()
        .map_err(|reason| ContractViolation::new(T::SHAPE, reason, raw))?;
    Ok(value)
}

/// Remove a surrounding fenced block, keeping only its interior.
///
/// Unfenced text comes back trimmed and otherwise untouched, so applying this
/// twice is the same as applying it once.
pub fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(after_open) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Drop the rest of the opening fence line (usually a language tag).
    let interior = match after_open.split_once('\n') {
        Some((_, rest)) => rest,
        None => after_open,
    };

    let interior = match interior.rfind("```") {
        Some(end) => &interior[..end],
        None => interior,
    };
    interior.trim()
}

/// Extract a JSON object from text that embeds one in prose.
pub fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();

    if trimmed.starts_with('{') {
        if let Some(end) = find_matching_brace(trimmed) {
            return &trimmed[..end];
        }
    }

    if let Some(start) = trimmed.find('{') {
        let remainder = &trimmed[start..];
        if let Some(end) = find_matching_brace(remainder) {
            return &remainder[..end];
        }
    }

    trimmed
}

/// Byte offset just past the brace closing the first object, respecting strings.
fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;

    for (i, c) in s.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        if c == '\\' && in_string {
            escape = true;
            continue;
        }
        if c == '"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Probe {
        name: String,
        tags: Vec<String>,
    }

    impl Contract for Probe {
        const SHAPE: &'static str = "probe";

        fn validate(&self) -> Result<(), String> {
            if self.name.is_empty() {
                return Err("name must not be empty".into());
            }
            Ok(())
        }
    }

    fn probe() -> Probe {
        Probe {
            name: "Ada".into(),
            tags: vec!["jazz".into(), "rust {lang}".into()],
        }
    }

    #[test]
    fn fenced_and_unfenced_decode_to_the_same_value() {
        let serialized = serde_json::to_string_pretty(&probe()).unwrap();
        let fenced = format!("```json\n{serialized}\n```");
        let bare_fence = format!("```\n{serialized}\n```\n");

        assert_eq!(parse::<Probe>(&serialized).unwrap(), probe());
        assert_eq!(parse::<Probe>(&fenced).unwrap(), probe());
        assert_eq!(parse::<Probe>(&bare_fence).unwrap(), probe());
    }

    #[test]
    fn strip_fences_is_idempotent() {
        let fenced = "```json\n{\"a\": 1}\n```";
        let once = strip_fences(fenced);
        assert_eq!(once, "{\"a\": 1}");
        assert_eq!(strip_fences(once), once);
    }

    #[test]
    fn single_line_fence_is_stripped() {
        assert_eq!(strip_fences("```{\"a\": 1}```"), "{\"a\": 1}");
    }

    #[test]
    fn missing_required_key_is_a_violation() {
        let err = parse::<Probe>(r#"{"name": "Ada"}"#).unwrap_err();
        assert_eq!(err.shape, "probe");
        assert!(err.reason.contains("tags"), "reason: {}", err.reason);
    }

    #[test]
    fn non_json_is_a_violation_with_preview() {
        let err = parse::<Probe>("Sure! Here's what I think about them.").unwrap_err();
        assert!(err.preview.starts_with("Sure!"));
    }

    #[test]
    fn empty_completion_is_a_violation() {
        let err = parse::<Probe>("   \n").unwrap_err();
        assert_eq!(err.reason, "empty completion");
    }

    #[test]
    fn validate_hook_runs_after_decode() {
        let err = parse::<Probe>(r#"{"name": "", "tags": []}"#).unwrap_err();
        assert_eq!(err.reason, "name must not be empty");
    }

    #[test]
    fn object_embedded_in_prose_is_recovered() {
        let raw = r#"Here you go: {"name": "Ada", "tags": ["a {b} c"]} hope that helps"#;
        let parsed = parse::<Probe>(raw).unwrap();
        assert_eq!(parsed.tags, vec!["a {b} c".to_string()]);
    }

    #[test]
    fn extract_json_handles_escaped_quotes() {
        let input = r#"{"title": "Fix \"broken\" thing"}"#;
        assert_eq!(extract_json(input), input);
    }
}
