//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("No kustomization file found in {path}")]
    UnitNotFound { path: String },

    #[error("Invalid kustomization file {path}: {message}")]
    InvalidUnit { path: String, message: String },

    #[error("Invalid resource in {source_name}: {message}")]
    InvalidResource { source_name: String, message: String },

    #[error("Invalid field path '{path}': {message}")]
    InvalidFieldPath { path: String, message: String },

    #[error("Field path '{path}' not found (missing segment '{segment}')")]
    PathNotFound { path: String, segment: String },

    #[error("Expected {expected} at '{path}'")]
    TypeMismatch { path: String, expected: String },

    #[error("Invalid selector: {message}")]
    InvalidSelector { message: String },

    #[error("Invalid argument '{arg}': {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
