//! Namespace override

use serde_json::Value as JsonValue;
use strata_core::ResourceSet;

use crate::error::{BuildError, Result};

const BINDINGS: &[&str] = &["RoleBinding", "ClusterRoleBinding"];

/// Move every namespaced resource into `namespace`
///
/// ServiceAccount subjects of (Cluster)RoleBindings that pointed at a moved
/// ServiceAccount follow it into the new namespace.
pub fn apply_namespace(unit: &str, resources: &mut ResourceSet, namespace: &str) -> Result<()> {
    let mut moved_accounts: Vec<(String, Option<String>)> = Vec::new();

    for resource in resources.iter_mut() {
        if resource.gvk().is_cluster_scoped() {
            continue;
        }
        if resource.kind() == "ServiceAccount" && resource.namespace() != Some(namespace) {
            moved_accounts.push((
                resource.name().to_string(),
                resource.namespace().map(str::to_string),
            ));
        }
        resource.set_namespace(namespace);
    }

    if moved_accounts.is_empty() {
        return Ok(());
    }

    for resource in resources.iter_mut() {
        if !BINDINGS.contains(&resource.kind()) {
            continue;
        }
        let id = resource.id();
        let Some(subjects) = resource.body_mut().get_mut("subjects") else {
            continue;
        };
        let JsonValue::Array(subjects) = subjects else {
            return Err(BuildError::transform(unit, &id, "subjects", "expected a sequence"));
        };

        for subject in subjects.iter_mut() {
            if subject.get("kind").and_then(JsonValue::as_str) != Some("ServiceAccount") {
                continue;
            }
            let name = subject.get("name").and_then(JsonValue::as_str);
            let subject_namespace = subject.get("namespace").and_then(JsonValue::as_str);
            let follows = moved_accounts.iter().any(|(account, old)| {
                Some(account.as_str()) == name
                    && match old.as_deref() {
                        Some(old) => subject_namespace == Some(old),
                        None => subject_namespace.is_none_or(|ns| ns == "default"),
                    }
            });
            if follows && let Some(subject) = subject.as_object_mut() {
                subject.insert("namespace".into(), JsonValue::String(namespace.to_string()));
            }
        }
    }
    Ok(())
}
