//! # Response Parsing
//!
//! Models asked for "JSON only" still wrap their answer in prose or markdown
//! fences often enough that a single `serde_json::from_str` is not viable.
//! [`extract_json`] recovers a JSON object through an ordered fallback
//! chain; when every tier fails the raw text is surfaced for diagnostics
//! rather than silently defaulted.

use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("No JSON object found in model output: {raw}")]
    MalformedOutput { raw: String },
}

/// Extracts a JSON object from raw model text.
///
/// Tiers, each attempted only when the prior one fails:
/// 1. parse the whole trimmed text;
/// 2. parse the contents of a ```` ```json ```` fenced block;
/// 3. parse the substring between the first `{` and the last `}`.
///
/// The fence tier must run before the brace scan: a fenced response with
/// surrounding prose can contain braces outside the fence, and the blunter
/// scan would capture a superset that does not parse.
pub fn extract_json(raw: &str) -> Result<Value, ExtractError> {
    let trimmed = raw.trim();

    if let Some(value) = parse_object(trimmed) {
        return Ok(value);
    }

    if let Some(inner) = fenced_block(trimmed) {
        debug!("Whole-text parse failed, trying fenced JSON block");
        if let Some(value) = parse_object(inner) {
            return Ok(value);
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end > start {
            debug!("Fenced parse failed, trying brace-delimited substring");
            if let Some(value) = parse_object(&trimmed[start..=end]) {
                return Ok(value);
            }
        }
    }

    Err(ExtractError::MalformedOutput {
        raw: raw.to_string(),
    })
}

fn parse_object(text: &str) -> Option<Value> {
    serde_json::from_str::<Value>(text.trim())
        .ok()
        .filter(Value::is_object)
}

fn fenced_block(text: &str) -> Option<&str> {
    let re = Regex::new(r"```json\s*([\s\S]*?)\s*```").ok()?;
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}
