//! JSON Patch (RFC 6902)
//!
//! Operations run against a copy of the document; the copy is only committed
//! when every operation succeeds.

use serde::Deserialize;
use serde_json::Value as JsonValue;
use strata_core::{FieldPath, Segment, fieldpath::parse_index};

/// One parsed JSON Patch operation
#[derive(Debug, Clone, PartialEq)]
pub enum JsonPatchOp {
    Add { path: FieldPath, value: JsonValue },
    Remove { path: FieldPath },
    Replace { path: FieldPath, value: JsonValue },
    Move { from: FieldPath, path: FieldPath },
    Copy { from: FieldPath, path: FieldPath },
    Test { path: FieldPath, value: JsonValue },
}

#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum RawOp {
    Add { path: String, value: JsonValue },
    Remove { path: String },
    Replace { path: String, value: JsonValue },
    Move { from: String, path: String },
    Copy { from: String, path: String },
    Test { path: String, value: JsonValue },
}

/// Why an operation failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpError {
    /// A pointer did not resolve
    PathNotFound(String),
    /// Any other failure, including a `test` mismatch
    Failed(String),
}

/// Parse the operation list of a JSON Patch document
pub fn parse_operations(document: &JsonValue) -> Result<Vec<JsonPatchOp>, String> {
    let raw: Vec<RawOp> = serde_json::from_value(document.clone())
        .map_err(|e| format!("invalid JSON patch: {}", e))?;

    let pointer = |p: &str| FieldPath::from_pointer(p).map_err(|e| e.to_string());
    raw.into_iter()
        .map(|op| {
            Ok(match op {
                RawOp::Add { path, value } => JsonPatchOp::Add {
                    path: pointer(&path)?,
                    value,
                },
                RawOp::Remove { path } => JsonPatchOp::Remove {
                    path: pointer(&path)?,
                },
                RawOp::Replace { path, value } => JsonPatchOp::Replace {
                    path: pointer(&path)?,
                    value,
                },
                RawOp::Move { from, path } => JsonPatchOp::Move {
                    from: pointer(&from)?,
                    path: pointer(&path)?,
                },
                RawOp::Copy { from, path } => JsonPatchOp::Copy {
                    from: pointer(&from)?,
                    path: pointer(&path)?,
                },
                RawOp::Test { path, value } => JsonPatchOp::Test {
                    path: pointer(&path)?,
                    value,
                },
            })
        })
        .collect()
}

/// Apply `operations` to `document` atomically
pub fn apply(document: &mut JsonValue, operations: &[JsonPatchOp]) -> Result<(), OpError> {
    let mut working = document.clone();
    for op in operations {
        apply_one(&mut working, op)?;
    }
    *document = working;
    Ok(())
}

fn apply_one(doc: &mut JsonValue, op: &JsonPatchOp) -> Result<(), OpError> {
    match op {
        JsonPatchOp::Add { path, value } => add(doc, path, value.clone()),
        JsonPatchOp::Remove { path } => remove(doc, path).map(|_| ()),
        JsonPatchOp::Replace { path, value } => {
            let slot = path.get_mut(doc).map_err(|_| not_found(path))?;
            *slot = value.clone();
            Ok(())
        }
        JsonPatchOp::Move { from, path } => {
            if from == path {
                return Ok(());
            }
            if path.segments().starts_with(from.segments()) {
                return Err(OpError::Failed(format!(
                    "cannot move '{}' into its own child '{}'",
                    from.as_str(),
                    path.as_str()
                )));
            }
            let value = remove(doc, from)?;
            add(doc, path, value)
        }
        JsonPatchOp::Copy { from, path } => {
            let value = from.get(doc).map_err(|_| not_found(from))?.clone();
            add(doc, path, value)
        }
        JsonPatchOp::Test { path, value } => {
            let actual = path.get(doc).map_err(|_| not_found(path))?;
            if values_equal(actual, value) {
                Ok(())
            } else {
                Err(OpError::Failed(format!(
                    "test failed at '{}': expected {}, found {}",
                    path.as_str(),
                    value,
                    actual
                )))
            }
        }
    }
}

fn add(doc: &mut JsonValue, path: &FieldPath, value: JsonValue) -> Result<(), OpError> {
    if path.is_root() {
        *doc = value;
        return Ok(());
    }
    let (container, last) = path.parent_mut(doc).map_err(|_| not_found(path))?;
    match (container, last) {
        (JsonValue::Object(map), Segment::Key(key)) => {
            map.insert(key.clone(), value);
            Ok(())
        }
        (JsonValue::Object(map), Segment::Append) => {
            map.insert("-".to_string(), value);
            Ok(())
        }
        (JsonValue::Array(items), Segment::Key(key)) => match parse_index(key) {
            Some(index) if index <= items.len() => {
                items.insert(index, value);
                Ok(())
            }
            _ => Err(not_found(path)),
        },
        (JsonValue::Array(items), Segment::Append) => {
            items.push(value);
            Ok(())
        }
        _ => Err(not_found(path)),
    }
}

fn remove(doc: &mut JsonValue, path: &FieldPath) -> Result<JsonValue, OpError> {
    if path.is_root() {
        return Err(OpError::Failed("cannot remove the document root".to_string()));
    }
    let (container, last) = path.parent_mut(doc).map_err(|_| not_found(path))?;
    match (container, last) {
        (JsonValue::Object(map), Segment::Key(key)) => {
            map.shift_remove(key).ok_or_else(|| not_found(path))
        }
        (JsonValue::Array(items), Segment::Key(key)) => match parse_index(key) {
            Some(index) if index < items.len() => Ok(items.remove(index)),
            _ => Err(not_found(path)),
        },
        _ => Err(not_found(path)),
    }
}

fn not_found(path: &FieldPath) -> OpError {
    OpError::PathNotFound(path.as_str().to_string())
}

/// Structural equality with numbers compared by value
fn values_equal(a: &JsonValue, b: &JsonValue) -> bool {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        (JsonValue::Array(x), JsonValue::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| values_equal(x, y))
        }
        (JsonValue::Object(x), JsonValue::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(key, value)| y.get(key).is_some_and(|other| values_equal(value, other)))
        }
        _ => a == b,
    }
}
