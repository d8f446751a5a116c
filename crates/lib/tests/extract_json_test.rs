//! # Response Parser Tests
//!
//! Exercises the ordered fallback chain that recovers a JSON object from
//! raw model text: whole-text parse, fenced block, brace scan, and the
//! final malformed-output failure.

mod common;

use common::setup_tracing;
use imagemeta::{extract_json, ExtractError};
use serde_json::json;

#[test]
fn parses_clean_json_directly() {
    setup_tracing();
    let value = extract_json(r#"{"a": 1, "b": ["x"]}"#).unwrap();
    assert_eq!(value, json!({"a": 1, "b": ["x"]}));
}

#[test]
fn parses_json_with_surrounding_whitespace() {
    setup_tracing();
    let value = extract_json("\n  {\"a\": 1}\n\n").unwrap();
    assert_eq!(value, json!({"a": 1}));
}

#[test]
fn parses_markdown_fenced_json() {
    setup_tracing();
    let raw = "Sure! Here is the result:\n```json\n{\"a\": 1}\n```";
    let value = extract_json(raw).unwrap();
    assert_eq!(value, json!({"a": 1}));
}

#[test]
fn fence_wins_over_blunt_brace_scan() {
    setup_tracing();
    // Braces in the prose would make a first-to-last-brace scan capture a
    // superset that does not parse; the fence tier must run first.
    let raw = "The {result} you asked for:\n```json\n{\"media_type\": \"photo\"}\n```\nAnything else {welcome}.";
    let value = extract_json(raw).unwrap();
    assert_eq!(value, json!({"media_type": "photo"}));
}

#[test]
fn recovers_object_embedded_in_prose() {
    setup_tracing();
    let value = extract_json("noise {\"a\": 1} trailing").unwrap();
    assert_eq!(value, json!({"a": 1}));
}

#[test]
fn recovers_object_from_unclosed_fence() {
    setup_tracing();
    // A truncated fence has no closing marker; the brace scan still finds
    // the complete object.
    let raw = "```json\n{\"a\": 1}";
    let value = extract_json(raw).unwrap();
    assert_eq!(value, json!({"a": 1}));
}

#[test]
fn fails_with_malformed_output_on_garbage() {
    setup_tracing();
    let err = extract_json("not json at all").unwrap_err();
    match err {
        ExtractError::MalformedOutput { raw } => assert_eq!(raw, "not json at all"),
    }
}

#[test]
fn fails_on_non_object_json() {
    setup_tracing();
    // The contract is an object; a bare array or scalar is not a usable
    // metadata payload.
    assert!(extract_json("[1, 2, 3]").is_err());
    assert!(extract_json("42").is_err());
}

#[test]
fn error_display_includes_offending_text() {
    setup_tracing();
    let err = extract_json("The model refused.").unwrap_err();
    assert!(err.to_string().contains("The model refused."));
}
