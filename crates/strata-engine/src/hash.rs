//! Content hashes for generated resources
//!
//! The suffix is derived from canonical JSON (sorted keys at every level) of
//! `{kind, name, data, binaryData, type}`, so the order in which keys were
//! declared never changes it.

use serde_json::{Map, Value as JsonValue};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Length of the name suffix
pub const SUFFIX_LEN: usize = 10;

/// Hash suffix for a generated ConfigMap or Secret body
pub fn name_hash(body: &JsonValue) -> String {
    let mut canonical = BTreeMap::new();
    canonical.insert("kind", body["kind"].clone());
    canonical.insert("name", body["metadata"]["name"].clone());
    canonical.insert("data", sorted(&body["data"]));
    if let Some(binary) = body.get("binaryData").filter(|b| !is_empty_map(b)) {
        canonical.insert("binaryData", sorted(binary));
    }
    if let Some(secret_type) = body.get("type").filter(|t| !t.is_null()) {
        canonical.insert("type", secret_type.clone());
    }

    encode(&sha256_hex(&canonical_json(&canonical)))
}

/// sha256 hex of the canonical data maps alone
pub fn data_digest(body: &JsonValue) -> String {
    let mut canonical = BTreeMap::new();
    canonical.insert("data", sorted(&body["data"]));
    canonical.insert("binaryData", sorted(&body["binaryData"]));
    sha256_hex(&canonical_json(&canonical))
}

/// Map the first [`SUFFIX_LEN`] hex characters away from vowels and digits
/// that read like letters
pub fn encode(hex: &str) -> String {
    hex.chars()
        .take(SUFFIX_LEN)
        .map(|c| match c {
            '0' => 'g',
            '1' => 'h',
            '3' => 'k',
            'a' => 'm',
            'e' => 't',
            other => other,
        })
        .collect()
}

fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

fn canonical_json(map: &BTreeMap<&str, JsonValue>) -> String {
    // BTreeMap serializes in key order; nested maps were sorted by `sorted`
    serde_json::to_string(map).unwrap_or_default()
}

/// Rebuild every mapping with its keys in sorted order
fn sorted(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let ordered: BTreeMap<&String, &JsonValue> = map.iter().collect();
            let mut out = Map::new();
            for (key, value) in ordered {
                out.insert(key.clone(), sorted(value));
            }
            JsonValue::Object(out)
        }
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(sorted).collect()),
        JsonValue::Null => JsonValue::Object(Map::new()),
        other => other.clone(),
    }
}

fn is_empty_map(value: &JsonValue) -> bool {
    value.as_object().is_none_or(Map::is_empty)
}
