//! # permiscope-audit
//!
//! Append-only, hash-chained audit log for Permiscope.
//!
//! Every gateway run is recorded as an [`AuditLogEntry`] in a JSONL (JSON
//! Lines) log file. Each entry carries the hash of the line before it, and on
//! a keyed log an HMAC signature, so tampering is detectable with
//! [`AuditLog::verify_chain`].
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use permiscope_audit::{AuditLog, AuditLogEntry, ExecutionResult};
//! use permiscope_policy::{Action, Decision};
//!
//! let log = AuditLog::open("/tmp/audit.log").unwrap();
//! let action = Action::new("agent-1", "run_command").with_param("command", "ls");
//! log.log(AuditLogEntry::new(action, Decision::Allow, ExecutionResult::succeeded(None)))
//!     .unwrap();
//! assert!(log.verify_chain().unwrap().is_valid());
//! ```

pub mod entry;
pub mod error;
pub mod hasher;
pub mod log;

pub use entry::{AuditLogEntry, ExecutionResult};
pub use error::AuditError;
pub use hasher::{ChainHasher, GENESIS_HASH};
pub use log::{verify_file, AuditLog, ChainReport, ChainViolation, ViolationKind};
