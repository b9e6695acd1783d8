//! Image overrides

use serde_json::Value as JsonValue;
use strata_core::{ImageOverride, ImageReference, ResourceSet};

use crate::error::{BuildError, Result};

const CONTAINER_FIELDS: &[&str] = &["containers", "initContainers"];

/// Rewrite container images whose repository matches an override
///
/// The override name is compared with the full repository, registry host
/// included: `nginx` does not match `docker.io/library/nginx`. Containers are found anywhere in the tree, so custom resources that embed
/// pod specs are covered too.
pub fn apply_images(unit: &str, resources: &mut ResourceSet, overrides: &[ImageOverride]) -> Result<()> {
    if overrides.is_empty() {
        return Ok(());
    }
    for resource in resources.iter_mut() {
        let id = resource.id();
        let mut path = Vec::new();
        visit(resource.body_mut(), &mut path, overrides).map_err(|(field, message)| {
            BuildError::transform(unit, &id, field, message)
        })?;
    }
    Ok(())
}

type VisitError = (String, &'static str);

fn visit(value: &mut JsonValue, path: &mut Vec<String>, overrides: &[ImageOverride]) -> std::result::Result<(), VisitError> {
    match value {
        JsonValue::Object(map) => {
            for (key, child) in map.iter_mut() {
                path.push(key.clone());
                if CONTAINER_FIELDS.contains(&key.as_str())
                    && let JsonValue::Array(containers) = child
                {
                    for (i, container) in containers.iter_mut().enumerate() {
                        path.push(i.to_string());
                        update_container(container, path, overrides)?;
                        path.pop();
                    }
                }
                visit(child, path, overrides)?;
                path.pop();
            }
        }
        JsonValue::Array(items) => {
            for (i, item) in items.iter_mut().enumerate() {
                path.push(i.to_string());
                visit(item, path, overrides)?;
                path.pop();
            }
        }
        _ => {}
    }
    Ok(())
}

fn update_container(
    container: &mut JsonValue,
    path: &[String],
    overrides: &[ImageOverride],
) -> std::result::Result<(), VisitError> {
    let Some(image) = container.get_mut("image") else {
        return Ok(());
    };
    let JsonValue::String(current) = image else {
        return Err((format!("{}.image", path.join(".")), "expected a string"));
    };

    let mut reference = ImageReference::parse(current);
    let Some(rule) = overrides.iter().find(|o| o.name == reference.name) else {
        return Ok(());
    };

    if let Some(new_name) = &rule.new_name {
        reference.name = new_name.clone();
    }
    if let Some(tag) = &rule.new_tag {
        reference.tag = Some(tag.clone());
        reference.digest = None;
    }
    if let Some(digest) = &rule.digest {
        reference.digest = Some(digest.clone());
        reference.tag = None;
    }
    *current = reference.to_string();
    Ok(())
}
