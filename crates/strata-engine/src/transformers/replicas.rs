//! Replica count overrides

use serde_json::Value as JsonValue;
use strata_core::{ReplicaOverride, ResourceSet};

use crate::error::{BuildError, Result};

/// Kinds that carry `spec.replicas`
pub const SCALABLE_KINDS: &[&str] = &[
    "Deployment",
    "ReplicaSet",
    "StatefulSet",
    "ReplicationController",
];

/// Set `spec.replicas` on scalable resources named by an override
///
/// Overrides name the resource as declared, so previous names match too.
pub fn apply_replicas(unit: &str, resources: &mut ResourceSet, overrides: &[ReplicaOverride]) -> Result<()> {
    for rule in overrides {
        for resource in resources.iter_mut() {
            if !SCALABLE_KINDS.contains(&resource.kind()) {
                continue;
            }
            if !resource.identities().any(|(name, _)| name == rule.name) {
                continue;
            }
            let id = resource.id();
            if rule.count < 0 {
                return Err(BuildError::transform(
                    unit,
                    &id,
                    "spec.replicas",
                    format!("replica count {} is negative", rule.count),
                ));
            }

            let body = strata_core::resource::ensure_object(resource.body_mut());
            let spec = body
                .entry("spec")
                .or_insert_with(|| JsonValue::Object(Default::default()));
            match spec {
                JsonValue::Object(spec) => {
                    spec.insert("replicas".into(), JsonValue::from(rule.count));
                }
                _ => return Err(BuildError::transform(unit, &id, "spec", "expected a map")),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::Resource;

    fn set(docs: &str) -> ResourceSet {
        Resource::from_yaml_documents(docs, "test.yaml")
            .unwrap()
            .into_iter()
            .collect()
    }

    const DOCS: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  replicas: 3
---
apiVersion: apps/v1
kind: StatefulSet
metadata:
  name: db
---
apiVersion: v1
kind: Service
metadata:
  name: web
"#;

    fn rule(name: &str, count: i64) -> ReplicaOverride {
        ReplicaOverride {
            name: name.to_string(),
            count,
        }
    }

    #[test]
    fn test_replicas_set() {
        let mut resources = set(DOCS);
        apply_replicas("overlay", &mut resources, &[rule("web", 5), rule("db", 2)]).unwrap();

        for resource in resources.iter() {
            match resource.kind() {
                "Deployment" => assert_eq!(resource.body()["spec"]["replicas"], 5),
                "StatefulSet" => assert_eq!(resource.body()["spec"]["replicas"], 2),
                _ => assert!(resource.body().get("spec").is_none()),
            }
        }
    }

    #[test]
    fn test_matches_previous_name() {
        let mut resources = set(DOCS);
        for resource in resources.iter_mut() {
            let renamed = format!("prod-{}", resource.name());
            resource.rename(renamed);
        }
        resources.reindex().unwrap();
        apply_replicas("overlay", &mut resources, &[rule("web", 1)]).unwrap();
        let deployment = resources.iter().find(|r| r.kind() == "Deployment").unwrap();
        assert_eq!(deployment.body()["spec"]["replicas"], 1);
    }

    #[test]
    fn test_negative_count() {
        let mut resources = set(DOCS);
        let err = apply_replicas("overlay", &mut resources, &[rule("web", -1)]).unwrap_err();
        assert!(matches!(err, BuildError::Transform { .. }));
    }
}
