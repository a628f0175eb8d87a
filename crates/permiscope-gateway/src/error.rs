// error.rs — Error types for the execution gateway.

use thiserror::Error;

use permiscope_policy::Decision;

/// Errors surfaced by the gateway and the `Agent` adapter.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The run did not succeed; carries the final decision and why.
    #[error("Permiscope blocked action: {decision} - {reason}")]
    Blocked { decision: Decision, reason: String },

    /// The policy could not be built or loaded.
    #[error("policy error: {0}")]
    Policy(#[from] permiscope_policy::PolicyError),

    /// The approval store could not be opened.
    #[error("approval store error: {0}")]
    Approval(#[from] permiscope_approval::ApprovalError),

    /// The audit log could not be opened.
    #[error("audit error: {0}")]
    Audit(#[from] permiscope_audit::AuditError),

    /// Invalid configuration file or environment variable.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Errors from running an action's side effect.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Missing {0} parameter")]
    MissingParameter(String),

    #[error("{path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// The command ran and exited non-zero (or could not be spawned).
    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("Unknown action type: {0} - no executor available")]
    UnknownAction(String),

    #[error("executor panicked: {0}")]
    Panicked(String),

    /// Free-form failure from a caller-registered executor.
    #[error("{0}")]
    Failed(String),
}

impl ExecutorError {
    pub fn failed(msg: impl Into<String>) -> Self {
        ExecutorError::Failed(msg.into())
    }
}

/// Errors from an interactive approval prompt.
#[derive(Debug, Error)]
pub enum PromptError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Input reached EOF before an answer was given.
    #[error("prompt closed")]
    Closed,

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("prompt error: {0}")]
    Other(String),
}
