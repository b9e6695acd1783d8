//! Cross-resource field replacement
//!
//! A replacement reads one field from exactly one source resource and writes
//! it into field paths of every target resource. It runs last in a unit's
//! pipeline, so the source value reflects the unit's transforms and patches.

use serde_json::Value as JsonValue;
use strata_core::{
    CoreError, FieldOptions, FieldPath, Replacement, ReplacementSource, ReplacementTarget, ResId,
    ResourceSet, Segment, TargetSelector,
};

use crate::error::{BuildError, Result};

/// Run a unit's replacements in order
pub fn apply_replacements(
    unit: &str,
    resources: &mut ResourceSet,
    replacements: &[Replacement],
) -> Result<()> {
    for (i, replacement) in replacements.iter().enumerate() {
        let value = read_source(unit, resources, replacement)?;
        for (j, target) in replacement.targets.iter().enumerate() {
            let origin = format!("replacement #{} target #{}", i + 1, j + 1);
            write_target(unit, resources, target, &value, &origin)?;
        }
    }
    Ok(())
}

fn invalid_source(unit: &str, message: impl Into<String>) -> BuildError {
    BuildError::InvalidReplacementSource {
        unit: unit.to_string(),
        message: message.into(),
    }
}

fn read_source(unit: &str, resources: &ResourceSet, replacement: &Replacement) -> Result<JsonValue> {
    let source = &replacement.source;
    let selector = source.selector();
    let compiled = selector
        .compile()
        .map_err(|e| invalid_source(unit, e.to_string()))?;

    let ids = compiled.select(resources);
    let [id] = ids.as_slice() else {
        return Err(invalid_source(
            unit,
            format!("selector {} matched {} resources, expected exactly one", selector, ids.len()),
        ));
    };
    let Some(resource) = resources.get(id) else {
        return Err(invalid_source(unit, format!("{} disappeared", id)));
    };

    let path = FieldPath::parse(source.field_path()).map_err(|e| invalid_source(unit, e.to_string()))?;
    let value = path.get(resource.body()).map_err(|_| {
        invalid_source(
            unit,
            format!("field path '{}' not found in {}", source.field_path(), id),
        )
    })?;

    match source.options.as_ref().and_then(|o| o.delimiter.as_deref().map(|d| (d, o.index))) {
        Some((delimiter, index)) => {
            let text = value.as_str().ok_or_else(|| {
                invalid_source(
                    unit,
                    format!("'{}' in {} is not a string and cannot be split", path, id),
                )
            })?;
            let parts: Vec<&str> = text.split(delimiter).collect();
            usize::try_from(index)
                .ok()
                .and_then(|index| parts.get(index))
                .map(|part| JsonValue::String(part.to_string()))
                .ok_or_else(|| {
                    invalid_source(
                        unit,
                        format!(
                            "index {} is out of range for '{}' split by '{}'",
                            index, text, delimiter
                        ),
                    )
                })
        }
        None => Ok(value.clone()),
    }
}

fn write_target(
    unit: &str,
    resources: &mut ResourceSet,
    target: &ReplacementTarget,
    value: &JsonValue,
    origin: &str,
) -> Result<()> {
    let compile = |selector: &TargetSelector| {
        selector
            .compile()
            .map_err(|e| BuildError::load(unit, format!("{}: {}", origin, e)))
    };
    let select = compile(&target.select)?;
    let rejects = target
        .reject
        .iter()
        .map(compile)
        .collect::<Result<Vec<_>>>()?;

    let ids: Vec<ResId> = select
        .select(resources)
        .into_iter()
        .filter(|id| {
            resources
                .get(id)
                .is_some_and(|resource| !rejects.iter().any(|reject| reject.matches(resource)))
        })
        .collect();

    if ids.is_empty() {
        if select.allow_empty() {
            return Ok(());
        }
        return Err(BuildError::PatchTargetNotFound {
            unit: unit.to_string(),
            patch: origin.to_string(),
            selector: target.select.to_string(),
        });
    }

    let options = target.options.clone().unwrap_or_default();
    let parse = |p: &str| {
        FieldPath::parse(p).map_err(|e| BuildError::load(unit, format!("{}: {}", origin, e)))
    };
    let paths = if target.field_paths.is_empty() {
        vec![parse(ReplacementSource::DEFAULT_FIELD_PATH)?]
    } else {
        target
            .field_paths
            .iter()
            .map(|p| parse(p))
            .collect::<Result<Vec<_>>>()?
    };

    for id in ids {
        let Some(resource) = resources.get_mut(&id) else {
            return Err(BuildError::load(
                unit,
                format!("{}: {} is no longer in the unit", origin, id),
            ));
        };
        for path in &paths {
            write_path(resource.body_mut(), path, value, &options).map_err(|e| match e {
                CoreError::PathNotFound { .. } => BuildError::PathNotFound {
                    unit: unit.to_string(),
                    resource: id.to_string(),
                    path: path.to_string(),
                },
                other => BuildError::transform(unit, &id, path.as_str(), other.to_string()),
            })?;
            tracing::debug!(unit, resource = %id, path = %path, "replaced field");
        }
    }

    // A write into metadata.name or metadata.namespace changes the identity
    resources.reindex().map_err(|id| BuildError::MergeConflict {
        unit: unit.to_string(),
        resource: id.to_string(),
        message: format!("{} renamed a resource onto an existing one", origin),
    })
}

fn write_path(
    body: &mut JsonValue,
    path: &FieldPath,
    value: &JsonValue,
    options: &FieldOptions,
) -> strata_core::Result<()> {
    let has_wildcard = path
        .segments()
        .iter()
        .any(|s| matches!(s, Segment::Wildcard));

    if has_wildcard {
        let visited = path.visit_mut(body, &mut |slot| {
            *slot = merged_value(slot, value, options)?;
            Ok(())
        })?;
        if visited == 0 {
            return Err(path.unresolved());
        }
        return Ok(());
    }

    match path.get_mut(body) {
        Ok(slot) => {
            *slot = merged_value(slot, value, options)?;
            Ok(())
        }
        Err(CoreError::PathNotFound { .. }) if options.create => {
            path.set(body, value.clone(), true)
        }
        Err(e) => Err(e),
    }
}

/// The value to store at a slot currently holding `existing`
fn merged_value(
    existing: &JsonValue,
    value: &JsonValue,
    options: &FieldOptions,
) -> strata_core::Result<JsonValue> {
    let Some(delimiter) = options.delimiter.as_deref() else {
        return Ok(value.clone());
    };
    let (JsonValue::String(existing), JsonValue::String(replacement)) = (existing, value) else {
        return Err(CoreError::TypeMismatch {
            path: String::new(),
            expected: "string values when a delimiter is set".to_string(),
        });
    };

    let replacement = replacement.as_str();
    let mut parts: Vec<&str> = existing.split(delimiter).collect();
    match usize::try_from(options.index) {
        Err(_) => parts.insert(0, replacement),
        Ok(index) if index >= parts.len() => parts.push(replacement),
        Ok(index) => parts[index] = replacement,
    }
    Ok(JsonValue::String(parts.join(delimiter)))
}
