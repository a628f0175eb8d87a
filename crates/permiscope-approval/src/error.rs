// error.rs — Error types for the approval store.
//
// The gateway treats every one of these as "not approved": a store that
// cannot be read or locked never grants anything.

use std::path::PathBuf;

use thiserror::Error;

use crate::request::ApprovalStatus;

/// Errors that can occur during approval store operations.
#[derive(Debug, Error)]
pub enum ApprovalError {
    /// Reading or writing the store (or its lock file) failed.
    #[error("approval store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The store file exists but is not a valid JSON array of requests.
    #[error("approval store at {path} is corrupt: {source}")]
    CorruptStore {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Another process held the lock for the whole retry window.
    #[error("could not lock {path} after {attempts} attempts")]
    LockTimeout { path: PathBuf, attempts: u32 },

    /// A request cannot be moved back to the given status.
    #[error("cannot set approval request {id} to {status}")]
    InvalidTransition { id: String, status: ApprovalStatus },
}
