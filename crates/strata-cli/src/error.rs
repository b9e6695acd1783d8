//! CLI error types with exit code handling
//!
//! Build errors pass through with their own diagnostic; the CLI adds the
//! failures of its own surface (arguments, unit file edits, output).

use miette::Diagnostic;
use serde_json::json;
use strata_engine::BuildError;
use thiserror::Error;

use crate::exit_codes;

/// CLI error type that includes exit code information
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Build(#[from] BuildError),

    /// Editing the unit file failed
    #[error("Edit failed: {message}")]
    #[diagnostic(code(strata::cli::edit))]
    Edit {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Invalid argument value
    #[error("Invalid argument: {message}")]
    #[diagnostic(code(strata::cli::usage))]
    Usage { message: String },

    /// IO error (output file, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(strata::cli::io))]
    Io { message: String },

    /// Internal error (runtime, unexpected failure)
    #[error("Internal error: {message}")]
    #[diagnostic(code(strata::cli::internal))]
    Internal { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Build(err) => build_exit_code(err),
            CliError::Edit { .. } => exit_codes::LOAD_ERROR,
            CliError::Usage { .. } => exit_codes::USAGE_ERROR,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Internal { .. } => exit_codes::ERROR,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    pub fn edit(err: strata_core::CoreError) -> Self {
        let help = match &err {
            strata_core::CoreError::UnitNotFound { .. } => {
                Some("Run the command inside a unit directory or pass --dir".to_string())
            }
            strata_core::CoreError::InvalidArgument { .. } => Some(
                "Images take <name>=<newName>[:tag][@digest], replicas take <name>=<count>"
                    .to_string(),
            ),
            _ => None,
        };
        Self::Edit {
            message: err.to_string(),
            help,
        }
    }

    /// Machine-readable form for `--error-format json`
    pub fn to_json(&self) -> serde_json::Value {
        let (kind, unit) = match self {
            CliError::Build(err) => (err.kind(), Some(err.unit())),
            CliError::Edit { .. } => ("edit", None),
            CliError::Usage { .. } => ("usage", None),
            CliError::Io { .. } => ("io", None),
            CliError::Internal { .. } => ("internal", None),
        };
        json!({
            "error": {
                "code": self.code().map(|c| c.to_string()),
                "kind": kind,
                "unit": unit,
                "message": self.to_string(),
                "help": self.help().map(|h| h.to_string()),
                "exitCode": self.exit_code(),
            }
        })
    }
}

fn build_exit_code(err: &BuildError) -> i32 {
    match err {
        BuildError::Load { .. } => exit_codes::LOAD_ERROR,
        BuildError::ReferenceCycle { .. } => exit_codes::CYCLE_ERROR,
        BuildError::RemoteFetch { .. } => exit_codes::REMOTE_ERROR,
        BuildError::GeneratorCollision { .. }
        | BuildError::MergeConflict { .. }
        | BuildError::ImmutableViolation { .. } => exit_codes::CONFLICT_ERROR,
        BuildError::Transform { .. } => exit_codes::TRANSFORM_ERROR,
        BuildError::PatchTargetNotFound { .. }
        | BuildError::PatchFailed { .. }
        | BuildError::PathNotFound { .. } => exit_codes::PATCH_ERROR,
        BuildError::InvalidReplacementSource { .. } => exit_codes::REPLACEMENT_ERROR,
        BuildError::TaskFailed { .. } => exit_codes::ERROR,
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_errors_keep_their_code() {
        let err = CliError::from(BuildError::ReferenceCycle {
            unit: "overlay".to_string(),
            chain: "overlay -> base -> overlay".to_string(),
        });
        assert_eq!(err.exit_code(), exit_codes::CYCLE_ERROR);

        let json = err.to_json();
        assert_eq!(json["error"]["code"], "strata::build::reference_cycle");
        assert_eq!(json["error"]["kind"], "reference_cycle");
        assert_eq!(json["error"]["unit"], "overlay");
        assert_eq!(json["error"]["exitCode"], 3);
    }

    #[test]
    fn test_edit_error_help() {
        let err = CliError::edit(strata_core::CoreError::InvalidArgument {
            arg: "web".to_string(),
            message: "expected <name>=<count>".to_string(),
        });
        assert_eq!(err.exit_code(), exit_codes::LOAD_ERROR);
        assert!(err.to_json()["error"]["help"].is_string());
        assert!(err.to_json()["error"]["unit"].is_null());
    }
}
