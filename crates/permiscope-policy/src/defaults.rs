// defaults.rs — Zero-configuration safe policy.
//
// Used when a caller does not bring its own policy (the CLI, quick starts).
// Commands run unless they match a destructive pattern, writes are confined
// to scratch locations, and reads are allowed except for credential-like
// files.

use crate::action::{Action, READ_FILE, RUN_COMMAND, WRITE_FILE};
use crate::error::PolicyError;
use crate::policy::Policy;
use crate::scope::PermissionScope;

/// Command fragments the default policy never lets through.
pub const DESTRUCTIVE_COMMAND_PATTERNS: &[&str] = &[
    "rm -rf",
    "rm -f",
    "del /s",
    "del /f",
    "mkfs",
    "fdisk",
    "format",
    "shutdown",
    "reboot",
    "chmod 777",
    "chown root",
];

/// Path fragments that mark a file as sensitive.
pub const SENSITIVE_PATH_MARKERS: &[&str] = &[".env", "id_rsa", "shadow", "passwd", ".pem", ".key"];

/// Build the default policy.
pub fn default_policy() -> Result<Policy, PolicyError> {
    Policy::new(vec![
        PermissionScope::allow(RUN_COMMAND).with_blocked_commands(
            DESTRUCTIVE_COMMAND_PATTERNS
                .iter()
                .map(|p| regex::escape(p)),
        ),
        PermissionScope::allow(WRITE_FILE).with_allowed_paths([
            std::env::temp_dir(),
            "./temp".into(),
            "./logs".into(),
        ]),
        PermissionScope::allow(READ_FILE).with_validator(|action| !is_sensitive(action)),
    ])
}

/// True if the action's `path` parameter looks like a credential or system secret.
pub fn is_sensitive(action: &Action) -> bool {
    let path = action.param_str("path").unwrap_or_default().to_lowercase();
    SENSITIVE_PATH_MARKERS.iter().any(|m| path.contains(m))
}
