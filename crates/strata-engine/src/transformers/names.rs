//! Name prefix/suffix and name-reference rewriting
//!
//! Renaming a resource breaks every field that refers to it by name. The
//! [`NAME_REFERENCES`] table lists, per referenced kind, the kinds that refer
//! to it and where. After a rename each listed site holding the old name is
//! rewritten, provided the referrer lives in the same namespace.

use std::collections::HashMap;
use std::sync::LazyLock;

use serde_json::Value as JsonValue;
use strata_core::{CoreError, FieldPath, Gvk, ResourceSet};

use crate::error::{BuildError, Result};

/// Kinds whose names are never prefixed or suffixed
pub const NEVER_RENAMED: &[&str] = &["Namespace", "CustomResourceDefinition", "APIService"];

/// A rename performed during the build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub gvk: Gvk,
    pub namespace: Option<String>,
    pub old: String,
    pub new: String,
}

/// One place a resource refers to another by name
#[derive(Debug)]
pub struct ReferenceSite {
    /// Kind being referred to
    pub referenced: &'static str,
    /// Kinds that hold the reference
    pub referrers: &'static [&'static str],
    /// Object holding the name field; may contain wildcards
    pub container: FieldPath,
    pub field: &'static str,
    /// Only rewrite when the container's `kind` equals this
    pub guard: Option<&'static str>,
}

const POD_TEMPLATE_OWNERS: &[&str] = &[
    "Deployment",
    "ReplicaSet",
    "DaemonSet",
    "StatefulSet",
    "Job",
    "ReplicationController",
];

/// Pod spec location per kind
const POD_SPECS: &[(&[&str], &str)] = &[
    (POD_TEMPLATE_OWNERS, "spec.template.spec"),
    (&["CronJob"], "spec.jobTemplate.spec.template.spec"),
    (&["Pod"], "spec"),
];

/// References made from inside a pod spec: (kind, container, field)
const POD_SPEC_REFERENCES: &[(&str, &str, &str)] = &[
    ("ConfigMap", "volumes.*.configMap", "name"),
    ("ConfigMap", "volumes.*.projected.sources.*.configMap", "name"),
    ("ConfigMap", "containers.*.env.*.valueFrom.configMapKeyRef", "name"),
    ("ConfigMap", "initContainers.*.env.*.valueFrom.configMapKeyRef", "name"),
    ("ConfigMap", "containers.*.envFrom.*.configMapRef", "name"),
    ("ConfigMap", "initContainers.*.envFrom.*.configMapRef", "name"),
    ("Secret", "volumes.*.secret", "secretName"),
    ("Secret", "volumes.*.projected.sources.*.secret", "name"),
    ("Secret", "containers.*.env.*.valueFrom.secretKeyRef", "name"),
    ("Secret", "initContainers.*.env.*.valueFrom.secretKeyRef", "name"),
    ("Secret", "containers.*.envFrom.*.secretRef", "name"),
    ("Secret", "initContainers.*.envFrom.*.secretRef", "name"),
    ("Secret", "imagePullSecrets.*", "name"),
    ("PersistentVolumeClaim", "volumes.*.persistentVolumeClaim", "claimName"),
];

/// Pod spec scalar fields naming another resource: (kind, field)
const POD_SPEC_FIELDS: &[(&str, &str)] = &[
    ("ServiceAccount", "serviceAccountName"),
    ("PriorityClass", "priorityClassName"),
];

/// (kind, referrers, container, field, guard)
type OtherReference = (
    &'static str,
    &'static [&'static str],
    &'static str,
    &'static str,
    Option<&'static str>,
);

const OTHER_REFERENCES: &[OtherReference] = &[
    ("Secret", &["ServiceAccount"], "secrets.*", "name", None),
    ("Secret", &["ServiceAccount"], "imagePullSecrets.*", "name", None),
    ("Secret", &["Ingress"], "spec.tls.*", "secretName", None),
    ("Service", &["Ingress"], "spec.rules.*.http.paths.*.backend.service", "name", None),
    ("Service", &["Ingress"], "spec.defaultBackend.service", "name", None),
    ("Service", &["StatefulSet"], "spec", "serviceName", None),
    ("Service", &["APIService"], "spec.service", "name", None),
    (
        "ServiceAccount",
        &["RoleBinding", "ClusterRoleBinding"],
        "subjects.*",
        "name",
        Some("ServiceAccount"),
    ),
    ("Role", &["RoleBinding"], "roleRef", "name", Some("Role")),
    (
        "ClusterRole",
        &["RoleBinding", "ClusterRoleBinding"],
        "roleRef",
        "name",
        Some("ClusterRole"),
    ),
    (
        "Deployment",
        &["HorizontalPodAutoscaler"],
        "spec.scaleTargetRef",
        "name",
        Some("Deployment"),
    ),
    (
        "StatefulSet",
        &["HorizontalPodAutoscaler"],
        "spec.scaleTargetRef",
        "name",
        Some("StatefulSet"),
    ),
    (
        "ReplicaSet",
        &["HorizontalPodAutoscaler"],
        "spec.scaleTargetRef",
        "name",
        Some("ReplicaSet"),
    ),
];

/// Every known name reference
pub static NAME_REFERENCES: LazyLock<Vec<ReferenceSite>> = LazyLock::new(|| {
    let mut sites = Vec::new();
    let mut push = |referenced: &'static str,
                    referrers: &'static [&'static str],
                    container: &str,
                    field: &'static str,
                    guard: Option<&'static str>| {
        if let Ok(container) = FieldPath::parse(container) {
            sites.push(ReferenceSite {
                referenced,
                referrers,
                container,
                field,
                guard,
            });
        }
    };

    for (referrers, pod_spec) in POD_SPECS {
        for (referenced, container, field) in POD_SPEC_REFERENCES {
            push(
                *referenced,
                *referrers,
                &format!("{}.{}", pod_spec, container),
                *field,
                None,
            );
        }
        for (referenced, field) in POD_SPEC_FIELDS {
            push(*referenced, *referrers, *pod_spec, *field, None);
        }
    }
    for (referenced, referrers, container, field, guard) in OTHER_REFERENCES {
        push(*referenced, *referrers, *container, *field, *guard);
    }
    sites
});

/// Apply `namePrefix` and `nameSuffix`, returning what was renamed
pub fn apply_name_affixes(
    resources: &mut ResourceSet,
    prefix: Option<&str>,
    suffix: Option<&str>,
) -> Vec<Rename> {
    let prefix = prefix.unwrap_or_default();
    let suffix = suffix.unwrap_or_default();
    if prefix.is_empty() && suffix.is_empty() {
        return Vec::new();
    }

    let mut renames = Vec::new();
    for resource in resources.iter_mut() {
        if NEVER_RENAMED.contains(&resource.kind()) {
            continue;
        }
        let old = resource.name().to_string();
        let new = format!("{}{}{}", prefix, old, suffix);
        renames.push(Rename {
            gvk: resource.gvk(),
            namespace: resource.namespace().map(str::to_string),
            old,
            new: new.clone(),
        });
        resource.rename(new);
    }
    renames
}

/// Rewrite every reference to a renamed resource
pub fn rewrite_references(unit: &str, resources: &mut ResourceSet, renames: &[Rename]) -> Result<()> {
    if renames.is_empty() {
        return Ok(());
    }
    let mut by_kind: HashMap<&str, Vec<&Rename>> = HashMap::new();
    for rename in renames {
        by_kind.entry(rename.gvk.kind.as_str()).or_default().push(rename);
    }

    for resource in resources.iter_mut() {
        let kind = resource.kind().to_string();
        let namespace = resource.namespace().map(str::to_string);
        let id = resource.id();

        for site in NAME_REFERENCES.iter() {
            if !site.referrers.contains(&kind.as_str()) {
                continue;
            }
            let Some(candidates) = by_kind.get(site.referenced) else {
                continue;
            };
            let candidates: Vec<&Rename> = candidates
                .iter()
                .copied()
                .filter(|rename| same_namespace(rename.namespace.as_deref(), namespace.as_deref()))
                .collect();
            if candidates.is_empty() {
                continue;
            }

            site.container
                .visit_mut(resource.body_mut(), &mut |container| {
                    rewrite_site(container, site, &candidates)
                })
                .map(|_| ())
                .map_err(|e| {
                    BuildError::transform(
                        unit,
                        &id,
                        format!("{}.{}", site.container, site.field),
                        e.to_string(),
                    )
                })?;
        }
    }
    Ok(())
}

fn rewrite_site(
    container: &mut JsonValue,
    site: &ReferenceSite,
    candidates: &[&Rename],
) -> strata_core::Result<()> {
    if let Some(guard) = site.guard
        && container.get("kind").and_then(JsonValue::as_str) != Some(guard)
    {
        return Ok(());
    }
    let Some(value) = container.get_mut(site.field) else {
        return Ok(());
    };
    match value {
        JsonValue::String(name) => {
            if let Some(rename) = candidates.iter().find(|r| r.old == *name) {
                *name = rename.new.clone();
            }
            Ok(())
        }
        JsonValue::Null => Ok(()),
        _ => Err(CoreError::TypeMismatch {
            path: site.field.to_string(),
            expected: "a string".to_string(),
        }),
    }
}

/// A referrer without a namespace matches anything
fn same_namespace(renamed: Option<&str>, referrer: Option<&str>) -> bool {
    match (renamed, referrer) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}
