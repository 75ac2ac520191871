//! Strict JSON decoding of model output.
//!
//! Pipeline: [`extract_json_payload`] locates the payload, a direct decode is
//! attempted, and only on a syntax error is the trailing-comma repair applied
//! before decoding again. The declared shape is enforced, never coerced.

use serde_json::Value;
use tracing::debug;

use crate::errors::ParseError;
use crate::json_repair::remove_trailing_commas;
use crate::json_scanner::{JsonShape, extract_json_payload};

/// Maximum number of characters of processed text kept for diagnostics
pub const DIAGNOSTIC_EXCERPT_CHARS: usize = 500;

/// Outcome of parsing one raw response: a complete value or a typed failure
pub type ParseOutcome = Result<Value, ParseError>;

/// Decode `raw` into a JSON value of the expected shape.
pub fn parse_strict_json(raw: Option<&str>, shape: JsonShape) -> ParseOutcome {
    let payload = extract_json_payload(raw, shape)?;

    let value = match serde_json::from_str::<Value>(payload) {
        Ok(value) => value,
        Err(first_error) => {
            let repaired = remove_trailing_commas(payload);
            debug!("Direct decode failed ({}), retrying after repair", first_error);
            serde_json::from_str::<Value>(&repaired).map_err(|e| {
                ParseError::SyntaxErrorAfterRepair {
                    message: e.to_string(),
                    excerpt: excerpt(&repaired),
                }
            })?
        }
    };

    if !shape.matches(&value) {
        return Err(ParseError::TypeMismatch {
            expected: shape,
            found: value_kind(&value).to_string(),
        });
    }

    Ok(value)
}

/// Verify every key in `required` is present on an object value.
/// Non-object values have no keys to check and pass.
pub fn check_required_keys<S: AsRef<str>>(value: &Value, required: &[S]) -> Result<(), ParseError> {
    let Some(object) = value.as_object() else {
        return Ok(());
    };

    let missing: Vec<String> = required
        .iter()
        .map(|key| key.as_ref())
        .filter(|key: &&str| !object.contains_key(*key))
        .map(str::to_string)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ParseError::MissingRequiredKeys(missing))
    }
}

/// [`parse_strict_json`] followed by [`check_required_keys`]
pub fn parse_with_required_keys<S: AsRef<str>>(
    raw: Option<&str>,
    shape: JsonShape,
    required: &[S],
) -> ParseOutcome {
    let value = parse_strict_json(raw, shape)?;
    check_required_keys(&value, required)?;
    Ok(value)
}

/// First [`DIAGNOSTIC_EXCERPT_CHARS`] characters of `text`, on a char boundary
pub fn excerpt(text: &str) -> String {
    match text.char_indices().nth(DIAGNOSTIC_EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse_object(raw: &str) -> ParseOutcome {
        parse_strict_json(Some(raw), JsonShape::Object)
    }

    #[test]
    fn test_clean_input_round_trips() {
        let samples = [
            r#"{"a": 1, "b": [true, null, 2.5], "c": {"d": "e"}}"#,
            r#"{}"#,
            r#"{"nested": {"deep": {"deeper": [[], [{}]]}}}"#,
        ];
        for sample in samples {
            let direct: Value = serde_json::from_str(sample).unwrap();
            let parsed = parse_object(sample).unwrap();
            assert_eq!(parsed, direct);

            let reserialized = serde_json::to_string(&parsed).unwrap();
            assert_eq!(serde_json::from_str::<Value>(&reserialized).unwrap(), direct);
        }

        let array = "[1, \"two\", {\"three\": 3}]";
        assert_eq!(
            parse_strict_json(Some(array), JsonShape::Array).unwrap(),
            serde_json::from_str::<Value>(array).unwrap()
        );
    }

    #[test]
    fn test_fence_stripping_preserves_value() {
        let payload = r#"{"title": "Roadmap", "items": [1, 2, 3]}"#;
        let bare = parse_object(payload).unwrap();

        for wrapped in [
            format!("```json\n{payload}\n```"),
            format!("```JSON\n{payload}\n```"),
            format!("```\n{payload}\n```"),
        ] {
            assert_eq!(parse_object(&wrapped).unwrap(), bare);
        }
    }

    #[test]
    fn test_markdown_snippets_in_string_values_survive() {
        let clean = r#"{"snippet": "Run ```npm test``` before merging", "n": 1}"#;
        assert_eq!(
            parse_object(clean).unwrap(),
            json!({"snippet": "Run ```npm test``` before merging", "n": 1})
        );

        let fenced = "```json\n{\"md\": \"```js\\nx()\\n```\", \"n\": 1}\n```";
        assert_eq!(parse_object(fenced).unwrap(), json!({"md": "```js\nx()\n```", "n": 1}));
    }

    #[test]
    fn test_narrative_prefix_is_ignored() {
        let payload = r#"{"persona": "Ops lead", "pain_points": ["manual reports"]}"#;
        let bare = parse_object(payload).unwrap();
        let prefixed = format!("Certainly. Based on your notes, here is the persona you asked for:\n\n{payload}");
        assert_eq!(parse_object(&prefixed).unwrap(), bare);
    }

    #[test]
    fn test_trailing_comma_tolerance() {
        assert_eq!(parse_object(r#"{"a": 1, "b": 2,}"#).unwrap(), json!({"a": 1, "b": 2}));
        assert_eq!(
            parse_strict_json(Some("[1, 2, 3,]"), JsonShape::Array).unwrap(),
            json!([1, 2, 3])
        );
        assert_eq!(
            parse_object(r#"{"items": [1, 2,], "x": 1,}"#).unwrap(),
            json!({"items": [1, 2], "x": 1})
        );
    }

    #[test]
    fn test_clean_decode_is_not_rewritten() {
        // A trailing comma inside a string survives because the direct decode succeeds
        let raw = r#"{"note": "keep this ,} intact"}"#;
        assert_eq!(parse_object(raw).unwrap(), json!({"note": "keep this ,} intact"}));
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let result = parse_object("[1,2,3]");
        assert_eq!(
            result,
            Err(ParseError::TypeMismatch {
                expected: JsonShape::Object,
                found: "array".to_string()
            })
        );

        let result = parse_strict_json(Some(r#"{"a": 1}"#), JsonShape::Array);
        assert!(matches!(result, Err(ParseError::TypeMismatch { .. })));
    }

    #[test]
    fn test_empty_input_fails_fast() {
        for raw in [None, Some(""), Some("   \n\t")] {
            assert_eq!(parse_strict_json(raw, JsonShape::Object), Err(ParseError::EmptyResponse));
        }
    }

    #[test]
    fn test_unrepairable_syntax_carries_bounded_excerpt() {
        let long_value = "x".repeat(2000);
        let raw = format!("{{\"a\": \"{long_value}\", \"b\": oops}}");
        match parse_object(&raw) {
            Err(ParseError::SyntaxErrorAfterRepair { excerpt, .. }) => {
                assert!(excerpt.chars().count() <= DIAGNOSTIC_EXCERPT_CHARS + 3);
                assert!(excerpt.starts_with("{\"a\": \"xxx"));
            }
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_required_key_enforcement() {
        let result = parse_with_required_keys(Some(r#"{"a": 1}"#), JsonShape::Object, &["a", "b"]);
        assert_eq!(result, Err(ParseError::MissingRequiredKeys(vec!["b".to_string()])));
        assert!(result.unwrap_err().to_string().contains('b'));

        let ok = parse_with_required_keys(Some(r#"{"a":1,"b":2}"#), JsonShape::Object, &["a", "b"]);
        assert_eq!(ok.unwrap(), json!({"a": 1, "b": 2}));
    }

    #[test]
    fn test_double_brace_scenario() {
        assert_eq!(
            parse_object("{\n{\"key\": \"value\"}}").unwrap(),
            json!({"key": "value"})
        );
    }

    #[test]
    fn test_unicode_and_escapes_preserved() {
        let raw = r#"{"text": "Hello\nWorld\t\"quoted\"", "emoji": "🎉"}"#;
        let value = parse_object(raw).unwrap();
        assert_eq!(value["text"], "Hello\nWorld\t\"quoted\"");
        assert_eq!(value["emoji"], "🎉");
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        let text = "é".repeat(DIAGNOSTIC_EXCERPT_CHARS + 10);
        let cut = excerpt(&text);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), DIAGNOSTIC_EXCERPT_CHARS + 3);
        assert_eq!(excerpt("short"), "short");
    }
}
