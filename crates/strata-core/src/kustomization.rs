//! Unit file schema (`kustomization.yaml`)
//!
//! A configuration unit is a directory holding one of [`UNIT_FILE_NAMES`].
//! The file declares resources, bases, generators, transformers, patches and
//! replacements. Parsing is strict: an unknown top-level field is an error.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};
use crate::selector::TargetSelector;

/// File names recognised as a unit file, in lookup order
pub const UNIT_FILE_NAMES: &[&str] = &["kustomization.yaml", "kustomization.yml", "Kustomization"];

/// Locate the unit file inside `dir`
pub fn find_unit_file(dir: &Path) -> Result<PathBuf> {
    let found: Vec<PathBuf> = UNIT_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .filter(|path| path.is_file())
        .collect();

    match found.len() {
        0 => Err(CoreError::UnitNotFound {
            path: dir.display().to_string(),
        }),
        1 => Ok(found.into_iter().next().unwrap_or_default()),
        _ => Err(CoreError::InvalidUnit {
            path: dir.display().to_string(),
            message: format!(
                "found multiple unit files: {}",
                found
                    .iter()
                    .filter_map(|p| p.file_name())
                    .map(|n| n.to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }),
    }
}

/// Parsed unit file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct Kustomization {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Free-form metadata, ignored by the build
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonValue>,

    /// Files, directories and remote references
    pub resources: Vec<String>,

    /// Legacy list of base directories
    pub bases: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_prefix: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_suffix: Option<String>,

    pub common_labels: IndexMap<String, String>,

    pub labels: Vec<LabelArgs>,

    pub common_annotations: IndexMap<String, String>,

    pub images: Vec<ImageOverride>,

    pub replicas: Vec<ReplicaOverride>,

    pub config_map_generator: Vec<GeneratorArgs>,

    pub secret_generator: Vec<GeneratorArgs>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub generator_options: Option<GeneratorOptions>,

    pub patches: Vec<PatchArgs>,

    /// Paths or inline YAML documents
    pub patches_strategic_merge: Vec<String>,

    #[serde(rename = "patchesJson6902")]
    pub patches_json6902: Vec<Json6902Args>,

    pub replacements: Vec<ReplacementEntry>,
}

impl Kustomization {
    /// Parse unit file text; `path` is only used in error messages
    pub fn from_yaml(text: &str, path: &Path) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let unit: Self = serde_yaml::from_str(text).map_err(|e| CoreError::InvalidUnit {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        unit.validate(path)?;
        Ok(unit)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        if let Some(rule) = self.replicas.iter().find(|r| r.count < 0) {
            return Err(CoreError::InvalidUnit {
                path: path.display().to_string(),
                message: format!("replica count {} for '{}' is negative", rule.count, rule.name),
            });
        }
        Ok(())
    }

    /// Read and parse the unit file of the directory `dir`
    pub fn load(dir: &Path) -> Result<(PathBuf, Self)> {
        let path = find_unit_file(dir)?;
        let text = std::fs::read_to_string(&path)?;
        let unit = Self::from_yaml(&text, &path)?;
        Ok((path, unit))
    }

    /// Entries of `resources` followed by legacy `bases`
    pub fn resource_refs(&self) -> impl Iterator<Item = &str> {
        self.resources
            .iter()
            .chain(self.bases.iter())
            .map(String::as_str)
    }
}

// ============================================================================
// Generators
// ============================================================================

/// How a generator treats a resource of the same identity from a base
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorBehavior {
    #[default]
    Create,
    Merge,
    Replace,
}

/// One `configMapGenerator` or `secretGenerator` entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct GeneratorArgs {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    pub behavior: GeneratorBehavior,

    /// `KEY=VALUE` pairs
    pub literals: Vec<String>,

    /// `path` or `key=path`
    pub files: Vec<String>,

    /// Env files, one `KEY=VALUE` per line
    #[serde(alias = "envFiles")]
    pub envs: Vec<String>,

    /// Single env file (legacy spelling)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,

    /// Secret type, `Opaque` when unset
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub secret_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<GeneratorOptions>,
}

impl GeneratorArgs {
    /// Env files in declaration order, legacy `env` first
    pub fn env_files(&self) -> impl Iterator<Item = &str> {
        self.env
            .iter()
            .chain(self.envs.iter())
            .map(String::as_str)
    }
}

/// Options shared by generators, per entry or unit-wide
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct GeneratorOptions {
    #[serde(alias = "disableHashSuffix", skip_serializing_if = "Option::is_none")]
    pub disable_name_suffix_hash: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub immutable: Option<bool>,

    pub labels: IndexMap<String, String>,

    pub annotations: IndexMap<String, String>,
}

impl GeneratorOptions {
    /// Layer per-generator options over unit-wide options
    pub fn merged(unit: Option<&Self>, entry: Option<&Self>) -> Self {
        let mut out = unit.cloned().unwrap_or_default();
        if let Some(entry) = entry {
            if entry.disable_name_suffix_hash.is_some() {
                out.disable_name_suffix_hash = entry.disable_name_suffix_hash;
            }
            if entry.immutable.is_some() {
                out.immutable = entry.immutable;
            }
            out.labels
                .extend(entry.labels.iter().map(|(k, v)| (k.clone(), v.clone())));
            out.annotations
                .extend(entry.annotations.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        out
    }

    pub fn hash_suffix(&self) -> bool {
        !self.disable_name_suffix_hash.unwrap_or(false)
    }

    pub fn is_immutable(&self) -> bool {
        self.immutable.unwrap_or(false)
    }
}

// ============================================================================
// Transformers
// ============================================================================

/// One entry of the `labels` list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct LabelArgs {
    pub pairs: IndexMap<String, String>,

    /// Also write into selector fields
    pub include_selectors: bool,

    /// Also write into pod template labels; implied by `include_selectors`
    pub include_templates: bool,
}

/// One entry of `images`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ImageOverride {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_name: Option<String>,

    #[serde(
        deserialize_with = "scalar_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub new_tag: Option<String>,

    #[serde(alias = "newDigest", skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// One entry of `replicas`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReplicaOverride {
    pub name: String,
    pub count: i64,
}

/// Accept `newTag: 1.21` as well as `newTag: "1.21"`
fn scalar_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_yaml::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_yaml::Value::Null) => Ok(None),
        Some(serde_yaml::Value::String(s)) => Ok(Some(s)),
        Some(serde_yaml::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(serde_yaml::Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a scalar, found {:?}",
            other
        ))),
    }
}

// ============================================================================
// Patches
// ============================================================================

/// One entry of `patches`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct PatchArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Inline patch body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetSelector>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<PatchOptions>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct PatchOptions {
    /// Let a strategic-merge patch's `metadata.name` rename its target
    pub allow_name_change: bool,
}

/// One entry of the legacy `patchesJson6902`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct Json6902Args {
    pub target: TargetSelector,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
}

// ============================================================================
// Replacements
// ============================================================================

/// A replacement declared inline or loaded from a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReplacementEntry {
    Inline(Replacement),
    File { path: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Replacement {
    pub source: ReplacementSource,
    pub targets: Vec<ReplacementTarget>,
}

/// Where a replacement value is read from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ReplacementSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Dotted path, `metadata.name` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<FieldOptions>,
}

impl ReplacementSource {
    pub const DEFAULT_FIELD_PATH: &'static str = "metadata.name";

    pub fn selector(&self) -> TargetSelector {
        TargetSelector {
            group: self.group.clone(),
            version: self.version.clone(),
            kind: self.kind.clone(),
            name: self.name.as_deref().map(regex::escape),
            namespace: self.namespace.as_deref().map(regex::escape),
            ..TargetSelector::default()
        }
    }

    pub fn field_path(&self) -> &str {
        self.field_path
            .as_deref()
            .unwrap_or(Self::DEFAULT_FIELD_PATH)
    }
}

/// Where a replacement value is written
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ReplacementTarget {
    pub select: TargetSelector,

    pub reject: Vec<TargetSelector>,

    pub field_paths: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<FieldOptions>,
}

/// Segment extraction and creation options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct FieldOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,

    pub index: i64,

    pub create: bool,
}
