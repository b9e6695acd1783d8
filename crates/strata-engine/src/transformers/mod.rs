//! Built-in transformers
//!
//! Run over a unit's whole accumulator in a fixed order: labels, annotations,
//! name prefix/suffix (with reference rewriting), namespace, images, replicas.

pub mod images;
pub mod labels;
pub mod names;
pub mod namespace;
pub mod replicas;

use strata_core::{Kustomization, ResourceSet};

use crate::error::{BuildError, Result};

pub use names::{NAME_REFERENCES, Rename, ReferenceSite, rewrite_references};

/// Apply every transformer the unit declares
pub fn apply_transformers(
    unit: &str,
    resources: &mut ResourceSet,
    kustomization: &Kustomization,
) -> Result<()> {
    labels::apply_labels(
        unit,
        resources,
        &kustomization.common_labels,
        &kustomization.labels,
    )?;
    labels::apply_annotations(unit, resources, &kustomization.common_annotations)?;

    let renames = names::apply_name_affixes(
        resources,
        kustomization.name_prefix.as_deref(),
        kustomization.name_suffix.as_deref(),
    );
    reindex(unit, resources)?;
    rewrite_references(unit, resources, &renames)?;

    if let Some(namespace) = kustomization.namespace.as_deref().filter(|ns| !ns.is_empty()) {
        namespace::apply_namespace(unit, resources, namespace)?;
        reindex(unit, resources)?;
    }

    images::apply_images(unit, resources, &kustomization.images)?;
    replicas::apply_replicas(unit, resources, &kustomization.replicas)?;
    Ok(())
}

fn reindex(unit: &str, resources: &mut ResourceSet) -> Result<()> {
    resources.reindex().map_err(|id| BuildError::MergeConflict {
        unit: unit.to_string(),
        resource: id.to_string(),
        message: "two resources share this identity after renaming".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use strata_core::Resource;

    #[test]
    fn test_fixed_order() {
        let unit = Kustomization::from_yaml(
            r#"
namePrefix: prod-
namespace: prod
commonLabels:
  env: prod
images:
- name: nginx
  newTag: "1.25"
replicas:
- name: web
  count: 4
"#,
            Path::new("kustomization.yaml"),
        )
        .unwrap();

        let mut resources: ResourceSet = Resource::from_yaml_documents(
            r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  replicas: 1
  template:
    spec:
      containers:
      - name: web
        image: nginx:1.0
        envFrom:
        - configMapRef:
            name: settings
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: settings
"#,
            "base.yaml",
        )
        .unwrap()
        .into_iter()
        .collect();

        apply_transformers("overlay", &mut resources, &unit).unwrap();

        let deployment = resources.iter().find(|r| r.kind() == "Deployment").unwrap();
        assert_eq!(deployment.name(), "prod-web");
        assert_eq!(deployment.namespace(), Some("prod"));
        assert_eq!(deployment.body()["metadata"]["labels"]["env"], "prod");
        assert_eq!(deployment.body()["spec"]["replicas"], 4);
        let container = &deployment.body()["spec"]["template"]["spec"]["containers"][0];
        assert_eq!(container["image"], "nginx:1.25");
        assert_eq!(container["envFrom"][0]["configMapRef"]["name"], "prod-settings");
    }

    #[test]
    fn test_suffix_on_already_suffixed_name() {
        let unit = Kustomization::from_yaml("nameSuffix: -x\n", Path::new("kustomization.yaml"))
            .unwrap();
        let mut resources: ResourceSet = Resource::from_yaml_documents(
            r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: a
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: a-x
"#,
            "base.yaml",
        )
        .unwrap()
        .into_iter()
        .collect();

        let result = apply_transformers("overlay", &mut resources, &unit);
        assert!(result.is_ok());
        let names: Vec<&str> = resources.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["a-x", "a-x-x"]);
    }
}
