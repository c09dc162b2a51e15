//! Canonical JSON helpers shared by the content-digest computation (C3) and
//! the canonical JSON coder (C4): both need the same deterministic,
//! key-sorted byte representation of a serde value.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::{BuildCacheError, Result};

/// Recursively re-sort every object's keys alphabetically. `serde_json`'s
/// `Map` preserves insertion (declaration) order by default in this crate
/// (the `preserve_order` feature); canonical output requires sorted order
/// regardless of how a type's `Serialize` impl happened to emit fields.
pub fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), canonicalize(map[key].clone()));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Serialize `value` to its canonical (key-sorted, whitespace-free) JSON
/// byte representation.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let raw = serde_json::to_value(value).map_err(|e| BuildCacheError::SerializationError {
        message: format!("failed to convert to JSON value: {e}"),
    })?;
    let canonical = canonicalize(raw);
    serde_json::to_vec(&canonical).map_err(|e| BuildCacheError::SerializationError {
        message: format!("failed to serialize canonical JSON: {e}"),
    })
}
