//! ConfigMap and Secret generators
//!
//! The loader reads every source up front and hands over a
//! [`GeneratorInput`] whose data map is already merged (files, then literals,
//! then env files; later keys win). This module turns it into a resource and
//! reconciles it with what the unit's bases produced.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use indexmap::IndexMap;
use serde_json::{Map, Value as JsonValue, json};
use std::collections::{BTreeMap, HashSet};

use strata_core::{
    GeneratedMeta, GeneratorBehavior, GeneratorOptions, Gvk, ResId, Resource, ResourceSet,
    TargetSelector,
};

use crate::error::{BuildError, Result};

/// Which generator list an entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorKind {
    ConfigMap,
    Secret,
}

impl GeneratorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeneratorKind::ConfigMap => "ConfigMap",
            GeneratorKind::Secret => "Secret",
        }
    }
}

/// A generator declaration with its sources already read
#[derive(Debug, Clone)]
pub struct GeneratorInput {
    pub kind: GeneratorKind,
    pub name: String,
    pub namespace: Option<String>,
    pub behavior: GeneratorBehavior,
    pub secret_type: Option<String>,
    /// Unit-wide options with the entry's own options layered on top
    pub options: GeneratorOptions,
    pub data: IndexMap<String, Vec<u8>>,
}

impl GeneratorInput {
    fn id(&self) -> ResId {
        ResId::new(
            Gvk::new("", "v1", self.kind.as_str()),
            self.namespace.clone(),
            self.name.clone(),
        )
    }

    /// Build the resource this generator declares
    pub fn generate(&self) -> strata_core::Result<Resource> {
        let mut metadata = Map::new();
        metadata.insert("name".into(), json!(self.name));
        if let Some(namespace) = &self.namespace {
            metadata.insert("namespace".into(), json!(namespace));
        }
        if !self.options.labels.is_empty() {
            metadata.insert("labels".into(), json!(self.options.labels));
        }
        if !self.options.annotations.is_empty() {
            metadata.insert("annotations".into(), json!(self.options.annotations));
        }

        let mut body = Map::new();
        body.insert("apiVersion".into(), json!("v1"));
        body.insert("kind".into(), json!(self.kind.as_str()));
        body.insert("metadata".into(), JsonValue::Object(metadata));

        // Sorted so output does not depend on declaration order
        let sorted: BTreeMap<&String, &Vec<u8>> = self.data.iter().collect();
        match self.kind {
            GeneratorKind::ConfigMap => {
                let mut data = Map::new();
                let mut binary = Map::new();
                for (key, bytes) in sorted {
                    match std::str::from_utf8(bytes) {
                        Ok(text) => data.insert(key.clone(), json!(text)),
                        Err(_) => binary.insert(key.clone(), json!(BASE64.encode(bytes))),
                    };
                }
                body.insert("data".into(), JsonValue::Object(data));
                if !binary.is_empty() {
                    body.insert("binaryData".into(), JsonValue::Object(binary));
                }
            }
            GeneratorKind::Secret => {
                let data: Map<String, JsonValue> = sorted
                    .into_iter()
                    .map(|(key, bytes)| (key.clone(), json!(BASE64.encode(bytes))))
                    .collect();
                body.insert(
                    "type".into(),
                    json!(self.secret_type.as_deref().unwrap_or("Opaque")),
                );
                body.insert("data".into(), JsonValue::Object(data));
            }
        }

        if self.options.is_immutable() {
            body.insert("immutable".into(), json!(true));
        }

        let mut resource = Resource::new(JsonValue::Object(body), &self.name)?;
        resource.set_generated(Some(GeneratedMeta {
            generator: self.name.clone(),
            hash_suffix: self.options.hash_suffix(),
            immutable: self.options.is_immutable(),
        }));
        Ok(resource)
    }
}

/// Add every generator's output to `resources`
///
/// `base_ids` are the identities the unit's bases contributed; only those may
/// be merged into or replaced.
pub fn apply_generators(
    unit: &str,
    resources: &mut ResourceSet,
    base_ids: &HashSet<ResId>,
    inputs: &[GeneratorInput],
) -> Result<()> {
    for input in inputs {
        let generated = input
            .generate()
            .map_err(|e| BuildError::load(unit, format!("generator '{}': {}", input.name, e)))?;
        let existing = find_existing(resources, input);

        let Some(existing_id) = existing else {
            if input.behavior != GeneratorBehavior::Create {
                return Err(BuildError::GeneratorCollision {
                    unit: unit.to_string(),
                    resource: input.id().to_string(),
                    message: format!(
                        "behavior '{}' needs a generated resource from a base to apply to",
                        behavior_name(input.behavior)
                    ),
                });
            }
            tracing::debug!(unit, resource = %generated.id(), "generated resource");
            resources.insert(generated);
            continue;
        };

        let from_base = base_ids.contains(&existing_id);
        let Some(current) = resources.get_mut(&existing_id) else {
            continue;
        };
        let resource_name = existing_id.to_string();

        if current.generated().is_none() || !from_base {
            return Err(BuildError::MergeConflict {
                unit: unit.to_string(),
                resource: resource_name,
                message: format!(
                    "generator '{}' collides with a resource declared in the same unit",
                    input.name
                ),
            });
        }

        match input.behavior {
            GeneratorBehavior::Create => {
                if !same_content(current.body(), generated.body()) {
                    return Err(BuildError::GeneratorCollision {
                        unit: unit.to_string(),
                        resource: resource_name,
                        message: "a base already generates this resource with different content"
                            .to_string(),
                    });
                }
            }
            GeneratorBehavior::Merge | GeneratorBehavior::Replace => {
                if current.generated().is_some_and(|meta| meta.immutable) {
                    return Err(BuildError::ImmutableViolation {
                        unit: unit.to_string(),
                        resource: resource_name,
                    });
                }
                if input.behavior == GeneratorBehavior::Merge {
                    merge_into(current, &generated);
                } else {
                    replace_content(current, &generated);
                }
                tracing::debug!(
                    unit,
                    resource = %resource_name,
                    behavior = behavior_name(input.behavior),
                    "updated generated resource from base"
                );
            }
        }
    }
    Ok(())
}

fn behavior_name(behavior: GeneratorBehavior) -> &'static str {
    match behavior {
        GeneratorBehavior::Create => "create",
        GeneratorBehavior::Merge => "merge",
        GeneratorBehavior::Replace => "replace",
    }
}

/// A resource this generator refers to: same kind, and the generator name as
/// a current or previous name
fn find_existing(resources: &ResourceSet, input: &GeneratorInput) -> Option<ResId> {
    let id = input.id();
    if resources.contains(&id) {
        return Some(id);
    }

    let selector = TargetSelector::for_resource(
        input.kind.as_str(),
        &input.name,
        input.namespace.as_deref(),
    )
    .compile()
    .ok()?;
    resources
        .iter()
        .filter(|r| r.generated().is_some() && r.api_version() == "v1")
        .find(|r| selector.matches(r))
        .map(Resource::id)
}

const CONTENT_FIELDS: &[&str] = &["data", "binaryData", "type", "immutable"];

fn same_content(a: &JsonValue, b: &JsonValue) -> bool {
    CONTENT_FIELDS.iter().all(|field| a.get(field) == b.get(field))
}

fn merge_into(current: &mut Resource, generated: &Resource) {
    for field in ["data", "binaryData"] {
        let Some(JsonValue::Object(incoming)) = generated.body().get(field) else {
            continue;
        };
        let body = strata_core::resource::ensure_object(current.body_mut());
        let target = body
            .entry(field.to_string())
            .or_insert_with(|| JsonValue::Object(Map::new()));
        let target = strata_core::resource::ensure_object(target);
        for (key, value) in incoming {
            target.insert(key.clone(), value.clone());
        }
        sort_map(target);
    }
    if let Some(secret_type) = generated.body().get("type") {
        strata_core::resource::ensure_object(current.body_mut())
            .insert("type".to_string(), secret_type.clone());
    }
    merge_metadata(current, generated);
    update_meta(current, generated);
}

fn replace_content(current: &mut Resource, generated: &Resource) {
    let body = strata_core::resource::ensure_object(current.body_mut());
    for field in CONTENT_FIELDS {
        body.shift_remove(*field);
    }
    for field in CONTENT_FIELDS {
        if let Some(value) = generated.body().get(*field) {
            body.insert(field.to_string(), value.clone());
        }
    }
    merge_metadata(current, generated);
    update_meta(current, generated);
}

fn merge_metadata(current: &mut Resource, generated: &Resource) {
    for field in ["labels", "annotations"] {
        let Some(JsonValue::Object(incoming)) = generated.body()["metadata"].get(field) else {
            continue;
        };
        let metadata = current.metadata_mut();
        let target = metadata
            .entry(field.to_string())
            .or_insert_with(|| JsonValue::Object(Map::new()));
        let target = strata_core::resource::ensure_object(target);
        for (key, value) in incoming {
            target.insert(key.clone(), value.clone());
        }
    }
}

fn update_meta(current: &mut Resource, generated: &Resource) {
    let Some(incoming) = generated.generated() else {
        return;
    };
    let mut meta = current.generated().cloned().unwrap_or_else(|| incoming.clone());
    meta.hash_suffix = incoming.hash_suffix;
    meta.immutable = incoming.immutable;
    current.set_generated(Some(meta));
}

fn sort_map(map: &mut Map<String, JsonValue>) {
    let entries: BTreeMap<String, JsonValue> = std::mem::take(map).into_iter().collect();
    map.extend(entries);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(name: &str, behavior: GeneratorBehavior, pairs: &[(&str, &[u8])]) -> GeneratorInput {
        GeneratorInput {
            kind: GeneratorKind::ConfigMap,
            name: name.to_string(),
            namespace: None,
            behavior,
            secret_type: None,
            options: GeneratorOptions::default(),
            data: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_vec()))
                .collect(),
        }
    }

    fn base_set(inputs: &[GeneratorInput]) -> (ResourceSet, HashSet<ResId>) {
        let mut set = ResourceSet::new();
        apply_generators("base", &mut set, &HashSet::new(), inputs).unwrap();
        let ids = set.ids().cloned().collect();
        (set, ids)
    }

    #[test]
    fn test_config_map_shape() {
        let resource = input(
            "app-config",
            GeneratorBehavior::Create,
            &[("b", b"2"), ("a", b"1"), ("blob", &[0xff, 0xfe])],
        )
        .generate()
        .unwrap();

        insta::assert_snapshot!(resource.to_yaml().unwrap(), @r"
        apiVersion: v1
        kind: ConfigMap
        metadata:
          name: app-config
        data:
          a: '1'
          b: '2'
        binaryData:
          blob: //4=
        ");
        assert!(resource.generated().unwrap().hash_suffix);
    }

    #[test]
    fn test_secret_shape() {
        let mut secret = input("creds", GeneratorBehavior::Create, &[("password", b"hunter2")]);
        secret.kind = GeneratorKind::Secret;
        secret.options.immutable = Some(true);
        let resource = secret.generate().unwrap();

        assert_eq!(resource.body()["type"], "Opaque");
        assert_eq!(resource.body()["data"]["password"], "aHVudGVyMg==");
        assert_eq!(resource.body()["immutable"], true);
        assert!(resource.generated().unwrap().immutable);
    }

    #[test]
    fn test_identical_create_is_idempotent() {
        let declared = input("cfg", GeneratorBehavior::Create, &[("k", b"v")]);
        let (mut set, ids) = base_set(std::slice::from_ref(&declared));
        apply_generators("overlay", &mut set, &ids, &[declared]).unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_differing_create_collides() {
        let (mut set, ids) = base_set(&[input("cfg", GeneratorBehavior::Create, &[("k", b"v")])]);
        let err = apply_generators(
            "overlay",
            &mut set,
            &ids,
            &[input("cfg", GeneratorBehavior::Create, &[("k", b"other")])],
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::GeneratorCollision { .. }));
    }

    #[test]
    fn test_merge_and_replace() {
        let (mut set, ids) = base_set(&[input(
            "cfg",
            GeneratorBehavior::Create,
            &[("A", b"1"), ("B", b"2")],
        )]);

        apply_generators(
            "overlay",
            &mut set,
            &ids,
            &[input("cfg", GeneratorBehavior::Merge, &[("B", b"3"), ("C", b"4")])],
        )
        .unwrap();
        let merged = set.iter().next().unwrap();
        assert_eq!(
            merged.body()["data"],
            serde_json::json!({"A": "1", "B": "3", "C": "4"})
        );

        apply_generators(
            "overlay",
            &mut set,
            &ids,
            &[input("cfg", GeneratorBehavior::Replace, &[("Z", b"9")])],
        )
        .unwrap();
        let replaced = set.iter().next().unwrap();
        assert_eq!(replaced.body()["data"], serde_json::json!({"Z": "9"}));
    }

    #[test]
    fn test_merge_without_base_collides() {
        let mut set = ResourceSet::new();
        let err = apply_generators(
            "overlay",
            &mut set,
            &HashSet::new(),
            &[input("cfg", GeneratorBehavior::Merge, &[("k", b"v")])],
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::GeneratorCollision { .. }));
    }

    #[test]
    fn test_merge_into_immutable_rejected() {
        let mut immutable = input("cfg", GeneratorBehavior::Create, &[("k", b"v")]);
        immutable.options.immutable = Some(true);
        let (mut set, ids) = base_set(&[immutable]);

        let err = apply_generators(
            "overlay",
            &mut set,
            &ids,
            &[input("cfg", GeneratorBehavior::Replace, &[("k", b"w")])],
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::ImmutableViolation { .. }));
    }

    #[test]
    fn test_same_unit_duplicate_is_conflict() {
        let mut set = ResourceSet::new();
        let err = apply_generators(
            "base",
            &mut set,
            &HashSet::new(),
            &[
                input("cfg", GeneratorBehavior::Create, &[("k", b"v")]),
                input("cfg", GeneratorBehavior::Create, &[("k", b"v")]),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::MergeConflict { .. }));
    }

    #[test]
    fn test_merge_finds_prefixed_base_resource() {
        let (mut set, _) = base_set(&[input("cfg", GeneratorBehavior::Create, &[("k", b"v")])]);
        let id = set.ids().next().cloned().unwrap();
        set.get_mut(&id).unwrap().rename("base-cfg");
        set.reindex().unwrap();
        let ids: HashSet<ResId> = set.ids().cloned().collect();

        apply_generators(
            "overlay",
            &mut set,
            &ids,
            &[input("cfg", GeneratorBehavior::Merge, &[("x", b"y")])],
        )
        .unwrap();
        let merged = set.iter().next().unwrap();
        assert_eq!(merged.name(), "base-cfg");
        assert_eq!(merged.body()["data"]["x"], "y");
    }
}
