//! Error types for remote fetch operations

use thiserror::Error;

/// Remote fetch errors
#[derive(Debug, Error)]
pub enum RepoError {
    // ============ Reference Errors ============
    #[error("Invalid remote reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    // ============ Network Errors ============
    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Fetching {reference} timed out after {seconds}s")]
    Timeout { reference: String, seconds: u64 },

    // ============ Authentication Errors ============
    #[error("Authentication required for {url}")]
    AuthRequired { url: String },

    #[error("Authentication failed: {message}")]
    AuthFailed { message: String },

    // ============ Git Errors ============
    #[error("git {operation} failed for {reference}: {message}")]
    GitFailed {
        reference: String,
        operation: String,
        message: String,
    },

    #[error("Path '{path}' not found in {reference}")]
    SubdirNotFound { reference: String, path: String },

    // ============ Integrity Errors ============
    #[error("Integrity check failed for {reference}: expected {expected}, got {actual}")]
    IntegrityCheckFailed {
        reference: String,
        expected: String,
        actual: String,
    },

    // ============ Cache Errors ============
    #[error("Cache error: {message}")]
    CacheError { message: String },

    // ============ IO Errors ============
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for remote fetch operations
pub type Result<T> = std::result::Result<T, RepoError>;

impl RepoError {
    /// Failed because the remote refused credentials
    pub fn is_auth(&self) -> bool {
        matches!(self, RepoError::AuthRequired { .. } | RepoError::AuthFailed { .. })
    }
}

impl From<reqwest::Error> for RepoError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            RepoError::NetworkError {
                message: format!("Connection failed: {}", e),
            }
        } else if let Some(status) = e.status() {
            RepoError::HttpError {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            RepoError::NetworkError {
                message: e.to_string(),
            }
        }
    }
}

impl From<url::ParseError> for RepoError {
    fn from(e: url::ParseError) -> Self {
        RepoError::InvalidReference {
            reference: String::new(),
            reason: e.to_string(),
        }
    }
}
