// error.rs — Error types for the audit subsystem.
//
// Uses `thiserror` to derive the standard Rust `Error` trait automatically.
// Chain breaks are not errors: `verify_chain` reports them in a
// `ChainReport` so every violation can be listed at once.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during audit operations.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Failed to open or create the audit log file.
    #[error("failed to open audit log at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write an entry to the log.
    #[error("failed to append entry: {0}")]
    WriteFailed(#[from] std::io::Error),

    /// Failed to serialize or deserialize an entry (malformed JSON).
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// A line in the log could not be parsed as an entry.
    #[error("malformed audit entry at line {line}: {source}")]
    MalformedEntry {
        line: usize,
        source: serde_json::Error,
    },

    /// Another writer held the log lock for the whole retry window.
    #[error("could not lock audit log at {path} after {attempts} attempts")]
    LockTimeout { path: PathBuf, attempts: u32 },
}
