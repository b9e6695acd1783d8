//! Build error types
//!
//! Every failure is fatal for the build and carries the unit it happened
//! in. Each variant has a stable diagnostic code `strata::build::<kind>`.

use miette::Diagnostic;
use strata_repo::RepoError;
use thiserror::Error;

/// Main build error type
#[derive(Error, Debug, Diagnostic)]
pub enum BuildError {
    #[error("Failed to load {unit}: {message}")]
    #[diagnostic(
        code(strata::build::load),
        help("Check that every entry of `resources` exists and the unit file parses")
    )]
    Load { unit: String, message: String },

    #[error("Reference cycle detected in {unit}: {chain}")]
    #[diagnostic(
        code(strata::build::reference_cycle),
        help("A unit may not include itself, directly or through its bases")
    )]
    ReferenceCycle { unit: String, chain: String },

    #[error("Failed to fetch {reference} for {unit}")]
    #[diagnostic(code(strata::build::remote_fetch))]
    RemoteFetch {
        unit: String,
        reference: String,
        #[source]
        source: RepoError,
        #[help]
        help: Option<String>,
    },

    #[error("Generator collision in {unit} for {resource}: {message}")]
    #[diagnostic(
        code(strata::build::generator_collision),
        help("Use `behavior: merge` or `behavior: replace` to change a generated resource from a base")
    )]
    GeneratorCollision {
        unit: String,
        resource: String,
        message: String,
    },

    #[error("Conflicting definitions of {resource} in {unit}: {message}")]
    #[diagnostic(
        code(strata::build::merge_conflict),
        help("Each resource may only be declared once; use a patch to change a resource from a base")
    )]
    MergeConflict {
        unit: String,
        resource: String,
        message: String,
    },

    #[error("Transform failed in {unit} on {resource} at '{field}': {message}")]
    #[diagnostic(code(strata::build::transform))]
    Transform {
        unit: String,
        resource: String,
        field: String,
        message: String,
    },

    #[error("Target of {patch} in {unit} matched no resources (selector: {selector})")]
    #[diagnostic(
        code(strata::build::patch_target_not_found),
        help("Set `allowEmpty: true` on the target to allow a patch that matches nothing")
    )]
    PatchTargetNotFound {
        unit: String,
        patch: String,
        selector: String,
    },

    #[error("Patch {patch} in {unit} failed on {resource}: {message}")]
    #[diagnostic(code(strata::build::patch_failed))]
    PatchFailed {
        unit: String,
        patch: String,
        resource: String,
        message: String,
    },

    #[error("Path '{path}' not found in {resource} ({unit})")]
    #[diagnostic(
        code(strata::build::path_not_found),
        help("Every intermediate field must exist; replacements accept `options.create: true`")
    )]
    PathNotFound {
        unit: String,
        resource: String,
        path: String,
    },

    #[error("Invalid replacement source in {unit}: {message}")]
    #[diagnostic(
        code(strata::build::invalid_replacement_source),
        help("The source must select exactly one resource and its field path must exist")
    )]
    InvalidReplacementSource { unit: String, message: String },

    #[error("Cannot change immutable generated resource {resource} in {unit}")]
    #[diagnostic(
        code(strata::build::immutable_violation),
        help("Generated resources marked `immutable` cannot be merged into or replaced")
    )]
    ImmutableViolation { unit: String, resource: String },

    #[error("Build task for {unit} failed: {message}")]
    #[diagnostic(code(strata::build::task_failed))]
    TaskFailed { unit: String, message: String },
}

/// Result type for build operations
pub type Result<T> = std::result::Result<T, BuildError>;

impl BuildError {
    /// The unit the error was raised in
    pub fn unit(&self) -> &str {
        match self {
            BuildError::Load { unit, .. }
            | BuildError::ReferenceCycle { unit, .. }
            | BuildError::RemoteFetch { unit, .. }
            | BuildError::GeneratorCollision { unit, .. }
            | BuildError::MergeConflict { unit, .. }
            | BuildError::Transform { unit, .. }
            | BuildError::PatchTargetNotFound { unit, .. }
            | BuildError::PatchFailed { unit, .. }
            | BuildError::PathNotFound { unit, .. }
            | BuildError::InvalidReplacementSource { unit, .. }
            | BuildError::ImmutableViolation { unit, .. }
            | BuildError::TaskFailed { unit, .. } => unit,
        }
    }

    /// Short name of the error class, the last segment of its code
    pub fn kind(&self) -> &'static str {
        match self {
            BuildError::Load { .. } => "load",
            BuildError::ReferenceCycle { .. } => "reference_cycle",
            BuildError::RemoteFetch { .. } => "remote_fetch",
            BuildError::GeneratorCollision { .. } => "generator_collision",
            BuildError::MergeConflict { .. } => "merge_conflict",
            BuildError::Transform { .. } => "transform",
            BuildError::PatchTargetNotFound { .. } => "patch_target_not_found",
            BuildError::PatchFailed { .. } => "patch_failed",
            BuildError::PathNotFound { .. } => "path_not_found",
            BuildError::InvalidReplacementSource { .. } => "invalid_replacement_source",
            BuildError::ImmutableViolation { .. } => "immutable_violation",
            BuildError::TaskFailed { .. } => "task_failed",
        }
    }

    pub(crate) fn load(unit: &str, message: impl Into<String>) -> Self {
        BuildError::Load {
            unit: unit.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn remote(unit: &str, reference: &str, source: RepoError) -> Self {
        let help = match &source {
            RepoError::Timeout { .. } => {
                Some("Raise the limit with --remote-timeout or check connectivity".to_string())
            }
            RepoError::IntegrityCheckFailed { .. } => {
                Some("The content changed since the digest was pinned; update the digest".to_string())
            }
            e if e.is_auth() => Some(format!(
                "Provide credentials for git, or set {} for HTTP remotes",
                strata_repo::http::TOKEN_ENV
            )),
            _ => None,
        };
        BuildError::RemoteFetch {
            unit: unit.to_string(),
            reference: reference.to_string(),
            source,
            help,
        }
    }

    pub(crate) fn transform(
        unit: &str,
        resource: impl std::fmt::Display,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        BuildError::Transform {
            unit: unit.to_string(),
            resource: resource.to_string(),
            field: field.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_follow_kind() {
        let errors = [
            BuildError::load("base", "missing"),
            BuildError::ReferenceCycle {
                unit: "a".into(),
                chain: "a -> b -> a".into(),
            },
            BuildError::transform("base", "Deployment.v1.apps/web", "metadata.labels", "not a map"),
            BuildError::TaskFailed {
                unit: "base".into(),
                message: "panicked".into(),
            },
        ];

        for error in errors {
            let code = error.code().map(|c| c.to_string()).unwrap_or_default();
            assert_eq!(code, format!("strata::build::{}", error.kind()));
        }
    }

    #[test]
    fn test_remote_help() {
        let error = BuildError::remote(
            "overlay",
            "https://example.com/a.yaml",
            RepoError::Timeout {
                reference: "https://example.com/a.yaml".into(),
                seconds: 1,
            },
        );
        assert_eq!(error.unit(), "overlay");
        assert!(error.help().is_some());
        assert!(error.to_string().contains("https://example.com/a.yaml"));
    }
}
