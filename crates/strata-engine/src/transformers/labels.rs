//! Common labels and annotations

use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use strata_core::{CoreError, FieldPath, LabelArgs, Resource, ResourceSet};

use crate::error::{BuildError, Result};

/// Where a map of labels or annotations is written
struct FieldSpec {
    /// `None` applies to every kind
    kinds: Option<&'static [&'static str]>,
    path: &'static str,
    /// Create the map when the path is missing
    create: bool,
}

const WORKLOADS: &[&str] = &["Deployment", "ReplicaSet", "DaemonSet", "StatefulSet"];
const POD_TEMPLATE_OWNERS: &[&str] = &[
    "Deployment",
    "ReplicaSet",
    "DaemonSet",
    "StatefulSet",
    "Job",
    "ReplicationController",
];

const METADATA_LABELS: &[FieldSpec] = &[FieldSpec {
    kinds: None,
    path: "metadata.labels",
    create: true,
}];

const SELECTOR_LABELS: &[FieldSpec] = &[
    FieldSpec {
        kinds: Some(&["Service", "ReplicationController"]),
        path: "spec.selector",
        create: true,
    },
    FieldSpec {
        kinds: Some(WORKLOADS),
        path: "spec.selector.matchLabels",
        create: true,
    },
    FieldSpec {
        kinds: Some(&["Job"]),
        path: "spec.selector.matchLabels",
        create: false,
    },
    FieldSpec {
        kinds: Some(&["NetworkPolicy"]),
        path: "spec.podSelector.matchLabels",
        create: false,
    },
];

const TEMPLATE_LABELS: &[FieldSpec] = &[
    FieldSpec {
        kinds: Some(POD_TEMPLATE_OWNERS),
        path: "spec.template.metadata.labels",
        create: true,
    },
    FieldSpec {
        kinds: Some(&["CronJob"]),
        path: "spec.jobTemplate.spec.template.metadata.labels",
        create: true,
    },
];

const ANNOTATIONS: &[FieldSpec] = &[
    FieldSpec {
        kinds: None,
        path: "metadata.annotations",
        create: true,
    },
    FieldSpec {
        kinds: Some(POD_TEMPLATE_OWNERS),
        path: "spec.template.metadata.annotations",
        create: true,
    },
    FieldSpec {
        kinds: Some(&["CronJob"]),
        path: "spec.jobTemplate.spec.template.metadata.annotations",
        create: true,
    },
];

/// Apply `commonLabels` and every `labels` entry
pub fn apply_labels(
    unit: &str,
    resources: &mut ResourceSet,
    common: &IndexMap<String, String>,
    entries: &[LabelArgs],
) -> Result<()> {
    if !common.is_empty() {
        let args = LabelArgs {
            pairs: common.clone(),
            include_selectors: true,
            include_templates: true,
        };
        apply_label_args(unit, resources, &args)?;
    }
    for args in entries {
        apply_label_args(unit, resources, args)?;
    }
    Ok(())
}

fn apply_label_args(unit: &str, resources: &mut ResourceSet, args: &LabelArgs) -> Result<()> {
    if args.pairs.is_empty() {
        return Ok(());
    }
    let mut specs: Vec<&FieldSpec> = METADATA_LABELS.iter().collect();
    if args.include_selectors {
        specs.extend(SELECTOR_LABELS);
    }
    if args.include_selectors || args.include_templates {
        specs.extend(TEMPLATE_LABELS);
    }

    for resource in resources.iter_mut() {
        write_pairs(unit, resource, &specs, &args.pairs)?;
    }
    Ok(())
}

/// Apply `commonAnnotations`
pub fn apply_annotations(
    unit: &str,
    resources: &mut ResourceSet,
    annotations: &IndexMap<String, String>,
) -> Result<()> {
    if annotations.is_empty() {
        return Ok(());
    }
    let specs: Vec<&FieldSpec> = ANNOTATIONS.iter().collect();
    for resource in resources.iter_mut() {
        write_pairs(unit, resource, &specs, annotations)?;
    }
    Ok(())
}

fn write_pairs(
    unit: &str,
    resource: &mut Resource,
    specs: &[&FieldSpec],
    pairs: &IndexMap<String, String>,
) -> Result<()> {
    let kind = resource.kind().to_string();
    let id = resource.id();

    for spec in specs {
        if spec.kinds.is_some_and(|kinds| !kinds.contains(&kind.as_str())) {
            continue;
        }
        let to_transform = |e: CoreError| BuildError::transform(unit, &id, spec.path, e.to_string());
        let path = FieldPath::parse(spec.path).map_err(to_transform)?;

        let map = if spec.create {
            path.ensure_map(resource.body_mut()).map_err(to_transform)?
        } else {
            match path.get_mut(resource.body_mut()) {
                Ok(JsonValue::Object(map)) => map,
                Ok(JsonValue::Null) | Err(_) => continue,
                Ok(_) => {
                    return Err(BuildError::transform(unit, &id, spec.path, "expected a map"));
                }
            }
        };
        for (key, value) in pairs {
            map.insert(key.clone(), JsonValue::String(value.clone()));
        }
    }
    Ok(())
}
