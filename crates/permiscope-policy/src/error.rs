// error.rs — Error types for the policy subsystem.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while building or loading a policy.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// A blocked-command pattern is not a valid regular expression.
    #[error("invalid command pattern '{pattern}' in scope '{action_name}': {reason}")]
    InvalidPattern {
        action_name: String,
        pattern: String,
        reason: String,
    },

    /// A policy file could not be read.
    #[error("failed to read policy file {path}: {source}")]
    LoadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid YAML policy: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid JSON policy: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error raised by a dynamic validator. Always treated as a guardrail failure.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ValidatorError(pub String);

impl ValidatorError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}
