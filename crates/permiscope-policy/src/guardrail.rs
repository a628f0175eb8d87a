// guardrail.rs — Structural and dynamic checks applied to permissive scopes.
//
// Guardrails run in a fixed order: path, command, validator. The first one
// that fails determines the reported reason. Every failure mode (missing
// parameter, unresolvable path, validator error or panic) is a failure:
// nothing in here can turn into an ALLOW by accident.

use std::ffi::OsString;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Component, Path, PathBuf};

use regex::Regex;

use crate::action::{Action, READ_FILE, RUN_COMMAND, WRITE_FILE};
use crate::decision::{BlockReason, Guardrail};
use crate::policy::CompiledScope;
use crate::scope::ActionValidator;

/// Run every applicable guardrail of `scope` against `action`.
pub(crate) fn check(action: &Action, compiled: &CompiledScope) -> Result<(), BlockReason> {
    let scope = &compiled.scope;

    let path_bearing = matches!(action.action_name.as_str(), READ_FILE | WRITE_FILE)
        || scope.allowed_paths.is_some();
    if path_bearing {
        check_path(action.param_str("path"), scope.allowed_paths.as_deref())
            .map_err(|detail| fail(Guardrail::Path, detail))?;
    }

    let command_bearing =
        action.action_name == RUN_COMMAND || compiled.command_patterns.is_some();
    if command_bearing {
        check_command(
            action.param_str("command"),
            compiled.command_patterns.as_deref(),
        )
        .map_err(|detail| fail(Guardrail::Command, detail))?;
    }

    if let Some(validator) = &scope.validator {
        run_validator(validator.as_ref(), action)
            .map_err(|detail| fail(Guardrail::Validator, detail))?;
    }

    Ok(())
}

fn fail(guardrail: Guardrail, detail: String) -> BlockReason {
    tracing::warn!(%guardrail, %detail, "guardrail failed");
    BlockReason::GuardrailFailed { guardrail, detail }
}

fn check_path(raw: Option<&str>, allowed: Option<&[PathBuf]>) -> Result<(), String> {
    let Some(allowed) = allowed else {
        return Ok(());
    };
    let raw = match raw {
        Some(p) if !p.is_empty() => p,
        _ => return Err("missing 'path' parameter".to_string()),
    };
    let target = normalize_path(Path::new(raw))
        .map_err(|e| format!("cannot resolve path '{}': {}", raw, e))?;

    for root in allowed {
        match normalize_path(root) {
            Ok(root) if target.starts_with(&root) => return Ok(()),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(root = %root.display(), error = %e, "skipping unresolvable allowed path")
            }
        }
    }
    Err(format!(
        "'{}' resolves to '{}', outside the allowed paths",
        raw,
        target.display()
    ))
}

fn check_command(raw: Option<&str>, patterns: Option<&[Regex]>) -> Result<(), String> {
    let Some(patterns) = patterns else {
        return Ok(());
    };
    let command = normalize_command(raw.unwrap_or_default());
    if command.is_empty() {
        return Err("empty command".to_string());
    }
    match patterns.iter().find(|re| re.is_match(&command)) {
        Some(re) => Err(format!(
            "command '{}' matches blocked pattern '{}'",
            command,
            re.as_str()
        )),
        None => Ok(()),
    }
}

fn run_validator(validator: &dyn ActionValidator, action: &Action) -> Result<(), String> {
    match panic::catch_unwind(AssertUnwindSafe(|| validator.validate(action))) {
        Ok(Ok(true)) => Ok(()),
        Ok(Ok(false)) => Err("validator rejected the action".to_string()),
        Ok(Err(e)) => Err(format!("validator error: {}", e)),
        Err(_) => Err("validator panicked".to_string()),
    }
}

/// Normalize a shell command so trivial evasion does not dodge a pattern.
///
/// Backslashes and quote characters are removed and runs of whitespace
/// collapse to one space: `rm\ -rf`, `'rm' -rf` and `rm   -rf` all become
/// `rm -rf`.
pub fn normalize_command(command: &str) -> String {
    let stripped: String = command
        .chars()
        .filter(|c| !matches!(c, '\\' | '\'' | '"' | '`'))
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Resolve a path to an absolute, canonical form.
///
/// Relative paths are taken against the current directory, `.` and `..` are
/// resolved lexically, then symlinks are resolved through the deepest
/// ancestor that exists. The target of a write usually does not exist yet,
/// so plain `canonicalize` is not enough.
pub fn normalize_path(path: &Path) -> std::io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut lexical = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::ParentDir => {
                lexical.pop();
            }
            Component::CurDir => {}
            other => lexical.push(other.as_os_str()),
        }
    }

    let mut existing = lexical.as_path();
    let mut missing: Vec<OsString> = Vec::new();
    loop {
        if let Ok(mut resolved) = existing.canonicalize() {
            for part in missing.iter().rev() {
                resolved.push(part);
            }
            return Ok(resolved);
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return Ok(lexical),
        }
    }
}
