//! # Schema Normalization
//!
//! Deterministic repair of parsed metadata objects. [`normalize`] is total:
//! whatever shape the model produced, the result conforms to the record's
//! invariants. The rule order is load-bearing: defaults are injected before
//! the prune pass, and the tag union runs after the source fields have been
//! cap-truncated.

use crate::types::MetadataRecord;
use serde_json::{Map, Value};
use std::collections::HashSet;

/// The closed media-type vocabulary. Anything else is treated as unknown
/// and the field is dropped.
pub const MEDIA_TYPES: [&str; 8] = [
    "photo",
    "film_still",
    "painting",
    "illustration",
    "render",
    "screenshot",
    "poster",
    "document",
];

/// Maximum lengths for array-valued fields, enforced by truncation.
const ARRAY_CAPS: [(&str, usize); 6] = [
    ("objects", 6),
    ("scene", 3),
    ("lighting", 3),
    ("style", 5),
    ("palette", 6),
    ("tags", MAX_TAGS),
];

/// Fields folded into the tag union, in order, after `media_type`.
const TAG_SOURCES: [&str; 5] = ["scene", "lighting", "style", "palette", "objects"];

/// Keys exempt from the empty-value prune.
const ESSENTIAL_KEYS: [&str; 2] = ["media_type", "people"];

const MAX_TAGS: usize = 20;

/// Normalizes a parsed metadata object into a [`MetadataRecord`].
///
/// Total and idempotent; a non-object input yields a minimal record with
/// defaulted `people`.
pub fn normalize(parsed: Value) -> MetadataRecord {
    let mut data = match parsed {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    // media_type is enum-or-absent: null and out-of-vocabulary values are
    // dropped rather than carried through.
    if let Some(value) = data.get("media_type") {
        match value.as_str().map(|s| s.trim().to_ascii_lowercase()) {
            Some(s) if MEDIA_TYPES.contains(&s.as_str()) => {
                data.insert("media_type".to_string(), Value::String(s));
            }
            _ => {
                data.remove("media_type");
            }
        }
    }

    let people = normalize_people(data.get("people"));
    data.insert("people".to_string(), Value::Object(people));

    for (key, cap) in ARRAY_CAPS {
        if let Some(Value::Array(items)) = data.get_mut(key) {
            items.truncate(cap);
        }
    }

    let tags = match data.get("tags") {
        Some(Value::Array(existing)) if !existing.is_empty() => dedup_strings(existing.clone()),
        _ => derive_tags(&data),
    };
    data.insert("tags".to_string(), Value::Array(tags));

    let keys: Vec<String> = data.keys().cloned().collect();
    for key in keys {
        if ESSENTIAL_KEYS.contains(&key.as_str()) {
            continue;
        }
        let empty = match &data[&key] {
            Value::Null => true,
            Value::Array(items) => items.is_empty(),
            Value::Object(map) => map.is_empty(),
            _ => false,
        };
        if empty {
            data.remove(&key);
        }
    }

    data
}

/// Coerces `people` to `{count: int >= 0, faces_visible: bool}`, replacing
/// it wholesale when it is not an object. Extra sub-fields survive.
fn normalize_people(value: Option<&Value>) -> Map<String, Value> {
    let mut people = match value {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };
    let count = people
        .get("count")
        .and_then(|v| v.as_f64())
        .map(|n| (n.max(0.0)) as i64)
        .unwrap_or(0);
    people.insert("count".to_string(), Value::from(count));
    let faces = people
        .get("faces_visible")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    people.insert("faces_visible".to_string(), Value::Bool(faces));
    people
}

/// Union of `media_type` and the tag source fields, order-preserving,
/// first occurrence wins, capped.
fn derive_tags(data: &Map<String, Value>) -> Vec<Value> {
    let mut pool: Vec<Value> = Vec::new();
    if let Some(mt) = data.get("media_type").filter(|v| v.is_string()) {
        pool.push(mt.clone());
    }
    for key in TAG_SOURCES {
        if let Some(Value::Array(items)) = data.get(key) {
            pool.extend(items.iter().cloned());
        }
    }
    dedup_strings(pool)
}

/// Keeps string entries only, deduplicated in first-occurrence order and
/// capped at the tag limit.
fn dedup_strings(items: Vec<Value>) -> Vec<Value> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut unique = Vec::new();
    for item in items {
        if let Value::String(s) = &item {
            if seen.insert(s.clone()) {
                unique.push(item);
                if unique.len() == MAX_TAGS {
                    break;
                }
            }
        }
    }
    unique
}

/// Clamps a confidence-like scalar into `[lo, hi]`.
///
/// Numbers and numeric strings are coerced to a float and clamped; anything
/// else passes through unchanged.
pub fn clamp(value: &Value, lo: f64, hi: f64) -> Value {
    let numeric = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match numeric {
        Some(f) if f.is_finite() => Value::from(f.clamp(lo, hi)),
        _ => value.clone(),
    }
}
