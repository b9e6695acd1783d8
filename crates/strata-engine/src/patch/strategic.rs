//! Strategic merge
//!
//! Maps merge recursively and scalars overwrite. Lists whose field has a known
//! merge key merge element by element; every other list is replaced. A null
//! deletes the field. Directives:
//! - `$patch: delete` on a map removes it, on a keyed list element removes
//!   the matching element
//! - `$patch: replace` on a map replaces it instead of merging; as a list
//!   element it makes the rest of the list replace the target list

use serde_json::{Map, Value as JsonValue};

const DIRECTIVE: &str = "$patch";

/// Merge keys by field name
///
/// `ports` is resolved by content: container ports carry `containerPort`,
/// Service ports carry `port`.
fn merge_keys(field: &str, target: &[JsonValue], patch: &[JsonValue]) -> Option<&'static [&'static str]> {
    match field {
        "containers" | "initContainers" | "ephemeralContainers" | "env" | "volumes"
        | "imagePullSecrets" => Some(&["name"]),
        "volumeMounts" => Some(&["name", "mountPath"]),
        "hostAliases" => Some(&["ip"]),
        "ports" => {
            let container_ports = target
                .iter()
                .chain(patch)
                .any(|item| item.get("containerPort").is_some());
            if container_ports {
                Some(&["containerPort"])
            } else {
                Some(&["port"])
            }
        }
        _ => None,
    }
}

/// What the caller should do with the patched value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Keep,
    /// The patch asked for the whole document to be deleted
    Delete,
}

/// Merge `patch` into `target` in place
pub fn merge(target: &mut JsonValue, patch: &JsonValue) -> MergeOutcome {
    if directive(patch) == Some("delete") {
        return MergeOutcome::Delete;
    }
    merge_value(target, patch, None);
    MergeOutcome::Keep
}

fn directive(value: &JsonValue) -> Option<&str> {
    value.get(DIRECTIVE).and_then(JsonValue::as_str)
}

fn merge_value(target: &mut JsonValue, patch: &JsonValue, field: Option<&str>) {
    match patch {
        JsonValue::Object(patch_map) => {
            if directive(patch) == Some("replace") {
                *target = strip(patch);
                return;
            }
            match target {
                JsonValue::Object(target_map) => merge_map(target_map, patch_map),
                _ => *target = strip(patch),
            }
        }
        JsonValue::Array(patch_items) => {
            let keys = match (&*target, field) {
                (JsonValue::Array(target_items), Some(field)) => {
                    merge_keys(field, target_items, patch_items)
                }
                _ => None,
            };
            let replace_marker = patch_items
                .iter()
                .any(|item| directive(item) == Some("replace") && item.as_object().is_some_and(|m| m.len() == 1));

            match (target, keys) {
                (JsonValue::Array(target_items), Some(keys)) if !replace_marker => {
                    merge_list(target_items, patch_items, keys)
                }
                (target, _) => *target = strip(patch),
            }
        }
        _ => *target = patch.clone(),
    }
}

fn merge_map(target: &mut Map<String, JsonValue>, patch: &Map<String, JsonValue>) {
    for (key, value) in patch {
        if key.starts_with('$') {
            continue;
        }
        if value.is_null() || directive(value) == Some("delete") {
            target.shift_remove(key);
            continue;
        }
        match target.get_mut(key) {
            Some(existing) if !existing.is_null() => merge_value(existing, value, Some(key)),
            _ => {
                target.insert(key.clone(), strip(value));
            }
        }
    }
}

fn merge_list(target: &mut Vec<JsonValue>, patch: &[JsonValue], keys: &[&str]) {
    for item in patch {
        if item.get(keys[0]).is_none() {
            if directive(item).is_none() {
                target.push(strip(item));
            }
            continue;
        }

        let position = target
            .iter()
            .position(|existing| same_element(existing, item, keys));

        match (directive(item), position) {
            (Some("delete"), Some(position)) => {
                target.remove(position);
            }
            (Some("delete"), None) => {}
            (_, Some(position)) => merge_value(&mut target[position], item, None),
            (_, None) => target.push(strip(item)),
        }
    }
}

/// The primary key must be equal; secondary keys only when both sides set them
fn same_element(existing: &JsonValue, item: &JsonValue, keys: &[&str]) -> bool {
    let Some((primary, secondary)) = keys.split_first() else {
        return false;
    };
    if existing.get(*primary).is_none() || existing.get(*primary) != item.get(*primary) {
        return false;
    }
    secondary
        .iter()
        .all(|key| match (existing.get(*key), item.get(*key)) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        })
}

/// Copy a patch fragment without directives or nulls
pub fn strip(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => JsonValue::Object(
            map.iter()
                .filter(|(key, value)| !key.starts_with('$') && !value.is_null())
                .map(|(key, value)| (key.clone(), strip(value)))
                .collect(),
        ),
        JsonValue::Array(items) => JsonValue::Array(
            items
                .iter()
                .filter(|item| directive(item).is_none())
                .map(strip)
                .collect(),
        ),
        other => other.clone(),
    }
}
