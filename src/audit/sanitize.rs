//! Key-material sanitization for audit payloads
//!
//! Centralizes the key-adjacent name set so every egress path (audit rows,
//! log fields) shares the same source of truth. A field name matches when its
//! lowercased, underscore-stripped form contains any of the listed tokens, so
//! `secretKey`, `SECRET_KEY`, and `walletSecretKeyBytes` are all caught.

use serde_json::Value;

use crate::{Error, Result};

/// Tokens that mark a field as key-adjacent. Matched against normalized
/// (lowercase, underscores removed) field names.
pub const KEY_ADJACENT_NAMES: &[&str] = &[
    "secretkey",
    "privatekey",
    "keypair",
    "seed",
    "mnemonic",
    "keymaterial",
];

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Whether a field name must never reach a persisted or emitted record.
pub fn is_key_adjacent(name: &str) -> bool {
    let normalized = normalize(name);
    KEY_ADJACENT_NAMES
        .iter()
        .any(|token| normalized.contains(token))
}

/// Return a copy of `value` with every key-adjacent object field dropped,
/// recursively. Object elements inside arrays are sanitized too. The input
/// tree is never mutated.
pub fn sanitize_details(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(name, _)| !is_key_adjacent(name))
                .map(|(name, v)| (name.clone(), sanitize_details(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_details).collect()),
        other => other.clone(),
    }
}

/// Verify a serialized details blob contains none of the key-adjacent
/// substrings, case-insensitively and across underscore variants. Called
/// after sanitization as the final gate before an audit row is written.
pub fn assert_no_key_material(json: &str) -> Result<()> {
    let normalized = normalize(json);
    for token in KEY_ADJACENT_NAMES {
        if normalized.contains(token) {
            return Err(Error::KeyMaterialDetected((*token).to_string()));
        }
    }
    Ok(())
}
