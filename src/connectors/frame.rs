//! Frame decoding for inbound socket payloads.
//!
//! A single socket message may hold an empty-object keepalive, one JSON
//! document, or several documents concatenated without a delimiter. Decoding
//! is a pure function of the payload text.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("Unparseable frame ({len} bytes)")]
    Unparseable { len: usize },
}

/// One unit extracted from a raw frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FramePart {
    /// `{}`: the caller must answer with the keepalive pong.
    Keepalive,
    Document(Value),
}

/// Decodes one raw payload into its parts, in payload order.
///
/// Whitespace-only payloads decode to nothing. A payload that is neither a
/// JSON document nor a concatenation of JSON objects is an error; the caller
/// logs and drops it.
pub fn decode_frame(payload: &str) -> Result<Vec<FramePart>, FrameError> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(vec![classify(value)]);
    }

    let parts: Vec<FramePart> = split_objects(trimmed)
        .into_iter()
        .filter_map(|chunk| serde_json::from_str::<Value>(chunk).ok())
        .map(classify)
        .collect();

    if parts.is_empty() {
        Err(FrameError::Unparseable { len: payload.len() })
    } else {
        Ok(parts)
    }
}

fn classify(value: Value) -> FramePart {
    match &value {
        Value::Object(map) if map.is_empty() => FramePart::Keepalive,
        _ => FramePart::Document(value),
    }
}

/// Splits text into top-level `{...}` substrings by brace depth.
///
/// Braces inside string literals are not counted. Text between objects is
/// skipped; an unterminated trailing object is discarded.
fn split_objects(text: &str) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut depth: usize = 0;
    let mut start: Option<usize> = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, byte) in text.bytes().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match byte {
            b'"' if depth > 0 => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            b'}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        chunks.push(&text[s..=i]);
                    }
                }
            }
            _ => {}
        }
    }

    chunks
}
