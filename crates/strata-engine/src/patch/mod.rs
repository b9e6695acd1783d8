//! Patch engine
//!
//! A unit's patches run in declaration order after its transformers. Each
//! patch is either a strategic merge or a JSON Patch and applies to every
//! resource its target selects. Patches never change a resource's identity
//! unless `allowNameChange` is set.

pub mod json6902;
pub mod strategic;

use serde_json::Value as JsonValue;
use strata_core::{Gvk, ResId, Resource, ResourceSet, TargetSelector};

use crate::error::{BuildError, Result};

pub use json6902::{JsonPatchOp, OpError};
pub use strategic::MergeOutcome;

/// Patch payload
#[derive(Debug, Clone, PartialEq)]
pub enum Patch {
    StrategicMerge(JsonValue),
    JsonPatch(Vec<JsonPatchOp>),
}

/// A patch with its target, as declared in a unit file
#[derive(Debug, Clone)]
pub struct PatchDecl {
    /// File path or `inline patch #n`, used in errors
    pub origin: String,
    pub patch: Patch,
    pub target: Option<TargetSelector>,
    pub allow_name_change: bool,
}

impl PatchDecl {
    /// Selector used when none was given: the kind and name inside a
    /// strategic merge patch body
    fn selector(&self, unit: &str) -> Result<TargetSelector> {
        if let Some(target) = &self.target {
            return Ok(target.clone());
        }
        let Patch::StrategicMerge(body) = &self.patch else {
            return Err(BuildError::load(
                unit,
                format!("JSON patch {} has no target", self.origin),
            ));
        };

        let kind = body["kind"].as_str().filter(|k| !k.is_empty());
        let name = body["metadata"]["name"].as_str().filter(|n| !n.is_empty());
        let (Some(kind), Some(name)) = (kind, name) else {
            return Err(BuildError::load(
                unit,
                format!(
                    "patch {} has no target and does not name a kind and metadata.name",
                    self.origin
                ),
            ));
        };

        let mut selector =
            TargetSelector::for_resource(kind, name, body["metadata"]["namespace"].as_str());
        if let Some(api_version) = body["apiVersion"].as_str() {
            let gvk = Gvk::from_api_version(api_version, kind);
            selector.group = Some(gvk.group);
            selector.version = Some(gvk.version);
        }
        Ok(selector)
    }

    /// Apply to every selected resource in `resources`
    pub fn apply(&self, unit: &str, resources: &mut ResourceSet) -> Result<()> {
        let selector = self.selector(unit)?;
        let compiled = selector
            .compile()
            .map_err(|e| BuildError::load(unit, format!("patch {}: {}", self.origin, e)))?;

        let ids = compiled.select(resources);
        if ids.is_empty() {
            if compiled.allow_empty() {
                tracing::debug!(unit, patch = %self.origin, "patch matched nothing");
                return Ok(());
            }
            return Err(BuildError::PatchTargetNotFound {
                unit: unit.to_string(),
                patch: self.origin.clone(),
                selector: selector.to_string(),
            });
        }

        let mut deleted = Vec::new();
        for id in ids {
            let Some(resource) = resources.get_mut(&id) else {
                continue;
            };
            let mut patched = resource.body().clone();

            match &self.patch {
                Patch::StrategicMerge(body) => {
                    if strategic::merge(&mut patched, body) == MergeOutcome::Delete {
                        deleted.push(id);
                        continue;
                    }
                }
                Patch::JsonPatch(operations) => {
                    json6902::apply(&mut patched, operations).map_err(|e| match e {
                        OpError::PathNotFound(path) => BuildError::PathNotFound {
                            unit: unit.to_string(),
                            resource: id.to_string(),
                            path,
                        },
                        OpError::Failed(message) => self.failed(unit, &id, message),
                    })?;
                }
            }

            self.commit(unit, &id, resource, patched)?;
            tracing::debug!(unit, patch = %self.origin, resource = %id, "patched");
        }

        for id in &deleted {
            resources.remove(id);
        }
        resources.reindex().map_err(|id| BuildError::MergeConflict {
            unit: unit.to_string(),
            resource: id.to_string(),
            message: format!("patch {} renamed a resource onto an existing one", self.origin),
        })
    }

    fn commit(
        &self,
        unit: &str,
        id: &ResId,
        resource: &mut Resource,
        mut patched: JsonValue,
    ) -> Result<()> {
        // Validates identity fields the patch may have removed
        let candidate = Resource::new(patched.clone(), &self.origin)
            .map_err(|e| self.failed(unit, id, e.to_string()))?;

        let new_name = candidate.name().to_string();
        let new_namespace = candidate.namespace().map(str::to_string);
        restore_identity(&mut patched, resource);
        *resource.body_mut() = patched;

        if self.allow_name_change {
            resource.rename(new_name);
            if let Some(namespace) = new_namespace {
                resource.set_namespace(namespace);
            }
        }
        Ok(())
    }

    fn failed(&self, unit: &str, id: &ResId, message: String) -> BuildError {
        BuildError::PatchFailed {
            unit: unit.to_string(),
            patch: self.origin.clone(),
            resource: id.to_string(),
            message,
        }
    }
}

/// Put `original`'s apiVersion, kind, name and namespace back into `patched`
fn restore_identity(patched: &mut JsonValue, original: &Resource) {
    let map = strata_core::resource::ensure_object(patched);
    map.insert("apiVersion".into(), original.api_version().into());
    map.insert("kind".into(), original.kind().into());

    let metadata = map
        .entry("metadata")
        .or_insert_with(|| JsonValue::Object(Default::default()));
    let metadata = strata_core::resource::ensure_object(metadata);
    metadata.insert("name".into(), original.name().into());
    match original.namespace() {
        Some(namespace) => {
            metadata.insert("namespace".into(), namespace.into());
        }
        None => {
            metadata.shift_remove("namespace");
        }
    }
}

/// Run a unit's patches in order
pub fn apply_patches(unit: &str, resources: &mut ResourceSet, patches: &[PatchDecl]) -> Result<()> {
    for patch in patches {
        patch.apply(unit, resources)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resources() -> ResourceSet {
        let docs = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  replicas: 3
  template:
    spec:
      containers:
      - name: app
        image: nginx:1.0
---
apiVersion: v1
kind: Service
metadata:
  name: web
spec:
  ports:
  - port: 80
"#;
        Resource::from_yaml_documents(docs, "base.yaml")
            .unwrap()
            .into_iter()
            .collect()
    }

    fn smp(body: JsonValue) -> PatchDecl {
        PatchDecl {
            origin: "patch.yaml".to_string(),
            patch: Patch::StrategicMerge(body),
            target: None,
            allow_name_change: false,
        }
    }

    fn deployment_id() -> ResId {
        ResId::new(Gvk::new("apps", "v1", "Deployment"), None, "web")
    }

    #[test]
    fn test_smp_targets_by_body() {
        let mut set = resources();
        smp(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web"},
            "spec": {"replicas": 10}
        }))
        .apply("overlay", &mut set)
        .unwrap();

        assert_eq!(set.get(&deployment_id()).unwrap().body()["spec"]["replicas"], 10);
        let service = ResId::new(Gvk::new("", "v1", "Service"), None, "web");
        assert!(set.get(&service).unwrap().body()["spec"].get("replicas").is_none());
    }

    #[test]
    fn test_smp_matches_previous_name() {
        let mut set = resources();
        let id = deployment_id();
        set.get_mut(&id).unwrap().rename("prod-web");
        set.reindex().unwrap();

        smp(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web"},
            "spec": {"replicas": 7}
        }))
        .apply("overlay", &mut set)
        .unwrap();

        let renamed = ResId::new(Gvk::new("apps", "v1", "Deployment"), None, "prod-web");
        let resource = set.get(&renamed).unwrap();
        assert_eq!(resource.body()["spec"]["replicas"], 7);
        assert_eq!(resource.name(), "prod-web");
    }

    #[test]
    fn test_target_not_found() {
        let mut set = resources();
        let err = smp(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "api"},
            "spec": {"replicas": 1}
        }))
        .apply("overlay", &mut set)
        .unwrap_err();
        assert!(matches!(err, BuildError::PatchTargetNotFound { .. }));
    }

    #[test]
    fn test_allow_empty() {
        let mut set = resources();
        let patch = PatchDecl {
            target: Some(TargetSelector {
                kind: Some("CronJob".to_string()),
                allow_empty: true,
                ..Default::default()
            }),
            ..smp(json!({"spec": {"suspend": true}}))
        };
        patch.apply("overlay", &mut set).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_json_patch_with_selector() {
        let mut set = resources();
        let operations = json6902::parse_operations(&json!([
            {"op": "replace", "path": "/spec/template/spec/containers/0/image", "value": "nginx:2.0"}
        ]))
        .unwrap();
        let patch = PatchDecl {
            origin: "inline patch #1".to_string(),
            patch: Patch::JsonPatch(operations),
            target: Some(TargetSelector {
                kind: Some("Deployment".to_string()),
                ..Default::default()
            }),
            allow_name_change: false,
        };
        patch.apply("overlay", &mut set).unwrap();
        assert_eq!(
            set.get(&deployment_id()).unwrap().body()["spec"]["template"]["spec"]["containers"][0]["image"],
            "nginx:2.0"
        );
    }

    #[test]
    fn test_json_patch_missing_path() {
        let mut set = resources();
        let operations = json6902::parse_operations(&json!([
            {"op": "replace", "path": "/spec/strategy/type", "value": "Recreate"}
        ]))
        .unwrap();
        let patch = PatchDecl {
            origin: "inline patch #1".to_string(),
            patch: Patch::JsonPatch(operations),
            target: Some(TargetSelector::for_resource("Deployment", "web", None)),
            allow_name_change: false,
        };
        let err = patch.apply("overlay", &mut set).unwrap_err();
        assert!(matches!(err, BuildError::PathNotFound { .. }));
    }

    #[test]
    fn test_name_is_preserved_without_allow_name_change() {
        let mut set = resources();
        let operations = json6902::parse_operations(&json!([
            {"op": "replace", "path": "/metadata/name", "value": "renamed"}
        ]))
        .unwrap();
        let mut patch = PatchDecl {
            origin: "inline patch #1".to_string(),
            patch: Patch::JsonPatch(operations),
            target: Some(TargetSelector::for_resource("Deployment", "web", None)),
            allow_name_change: false,
        };
        patch.apply("overlay", &mut set).unwrap();
        assert!(set.contains(&deployment_id()));

        patch.allow_name_change = true;
        patch.apply("overlay", &mut set).unwrap();
        let renamed = ResId::new(Gvk::new("apps", "v1", "Deployment"), None, "renamed");
        let resource = set.get(&renamed).unwrap();
        assert_eq!(resource.prior_names()[0].name, "web");
    }

    #[test]
    fn test_delete_patch_removes_resource() {
        let mut set = resources();
        smp(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {"name": "web"},
            "$patch": "delete"
        }))
        .apply("overlay", &mut set)
        .unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.contains(&deployment_id()));
    }
}
