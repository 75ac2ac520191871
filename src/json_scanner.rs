use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::debug;

use crate::errors::ParseError;

/// Top-level shape a caller expects the model to return
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum JsonShape {
    #[default]
    Object,
    Array,
}

impl JsonShape {
    pub fn name(&self) -> &'static str {
        match self {
            JsonShape::Object => "object",
            JsonShape::Array => "array",
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            JsonShape::Object => value.is_object(),
            JsonShape::Array => value.is_array(),
        }
    }
}

impl fmt::Display for JsonShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

lazy_static! {
    // Opening ```json / ```JSON / bare ``` fence, language tag matched case-insensitively
    static ref FENCE_OPEN: Regex = Regex::new(r"```(?i:json)?[ \t]*\r?\n?").expect("code fence pattern is valid");
}

const FENCE: &str = "```";

/// Strip a single layer of markdown code fencing, keeping the fenced content.
///
/// A fence only counts when it opens before the first `{` or `[`; backticks
/// after that point belong to the payload. The closing fence is the first one
/// after the balanced payload, so fences inside string values survive. Text
/// without a complete fence is returned unchanged.
pub fn strip_code_fence(text: &str) -> &str {
    let Some(open) = FENCE_OPEN.find(text) else {
        return text;
    };
    if find_json_start(text).is_some_and(|first| first < open.start()) {
        return text;
    }

    let body = &text[open.end()..];
    let payload_end = find_json_start(body)
        .and_then(|start| find_json_end(body, start))
        .unwrap_or(0);

    match body[payload_end..].find(FENCE) {
        Some(close) => body[..payload_end + close].trim(),
        None => text,
    }
}

/// Index of the first `{` or `[` in `text`.
///
/// Whichever delimiter occurs first wins, even when it disagrees with the
/// expected shape: a shape disagreement is reported after decoding rather
/// than by skipping ahead to a later delimiter.
pub fn find_json_start(text: &str) -> Option<usize> {
    text.bytes().position(|b| b == b'{' || b == b'[')
}

/// Scan from `start` (which must point at `{` or `[`) and return the index one
/// past the delimiter that brings the nesting depth back to zero.
///
/// Quotes toggle the in-string flag; inside a string a backslash skips the
/// character after it, so `\"` and `\\` never affect depth or string state.
/// Returns `None` when the payload is truncated before depth reaches zero.
pub fn find_json_end(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(start + offset + 1);
                }
            }
            _ => {}
        }
    }

    None
}

/// Models occasionally double-wrap an object as `{\n{...}}`. When the chosen
/// start is an opening brace followed (after whitespace only) by another
/// opening brace, return the index of the inner brace.
fn unwrap_double_brace(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.get(start) != Some(&b'{') {
        return None;
    }
    let rest = &text[start + 1..];
    let skipped = rest.len() - rest.trim_start().len();
    let inner = start + 1 + skipped;
    (bytes.get(inner) == Some(&b'{')).then_some(inner)
}

/// Reduce raw model output to the substring intended as the JSON payload.
///
/// Fails with [`ParseError::EmptyResponse`] for absent or whitespace-only
/// input and with [`ParseError::NoJsonFound`] when no `{` or `[` exists.
/// Leading prose and trailing commentary are discarded. A payload whose
/// brackets never balance is returned to the end of the text so the decoder
/// can report the syntax error.
pub fn extract_json_payload(raw: Option<&str>, shape: JsonShape) -> Result<&str, ParseError> {
    let trimmed = raw.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return Err(ParseError::EmptyResponse);
    }

    let text = strip_code_fence(trimmed);
    let mut start = find_json_start(text).ok_or(ParseError::NoJsonFound)?;

    if let Some(inner) = unwrap_double_brace(text, start) {
        debug!("Dropping double-brace wrapper at offset {}", start);
        start = inner;
    }

    let end = find_json_end(text, start).unwrap_or(text.len());
    let payload = &text[start..end];

    debug!(
        expected = %shape,
        leading = start,
        trailing = text.len() - end,
        "Located JSON payload"
    );

    Ok(payload)
}
