// scope.rs — Permission scopes: one rule per action name.
//
// A scope binds an action name to a declared decision plus optional
// guardrails that can downgrade ALLOW / REQUIRE_APPROVAL to BLOCK:
//
//   - allowed_paths: path roots a file action must stay under
//   - blocked_command_patterns: regexes a command must not match
//   - validator: arbitrary code run against the whole action
//
// Path and pattern guardrails are plain data and round-trip through policy
// files. Validators are code and can only be attached programmatically.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::decision::ScopeDecision;
use crate::error::ValidatorError;

/// Dynamic policy-as-code check. `Ok(false)` and `Err(_)` both fail the guardrail.
pub trait ActionValidator: Send + Sync {
    fn validate(&self, action: &Action) -> Result<bool, ValidatorError>;
}

/// Adapts a closure into an ActionValidator.
struct FnValidator<F>(F);

impl<F> ActionValidator for FnValidator<F>
where
    F: Fn(&Action) -> Result<bool, ValidatorError> + Send + Sync,
{
    fn validate(&self, action: &Action) -> Result<bool, ValidatorError> {
        (self.0)(action)
    }
}

/// A single policy rule.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionScope {
    /// The action this rule applies to (exact match).
    pub action_name: String,

    /// Declared decision before guardrails run.
    pub decision: ScopeDecision,

    /// Path roots the target must lie under. `None` means unrestricted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_paths: Option<Vec<PathBuf>>,

    /// Regexes matched against the normalized command. `None` means unrestricted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_command_patterns: Option<Vec<String>>,

    #[serde(skip)]
    pub validator: Option<Arc<dyn ActionValidator>>,
}

impl PermissionScope {
    pub fn new(action_name: impl Into<String>, decision: ScopeDecision) -> Self {
        Self {
            action_name: action_name.into(),
            decision,
            allowed_paths: None,
            blocked_command_patterns: None,
            validator: None,
        }
    }

    pub fn allow(action_name: impl Into<String>) -> Self {
        Self::new(action_name, ScopeDecision::Allow)
    }

    pub fn block(action_name: impl Into<String>) -> Self {
        Self::new(action_name, ScopeDecision::Block)
    }

    pub fn require_approval(action_name: impl Into<String>) -> Self {
        Self::new(action_name, ScopeDecision::RequireApproval)
    }

    pub fn with_allowed_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.allowed_paths = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_blocked_commands<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blocked_command_patterns = Some(patterns.into_iter().map(Into::into).collect());
        self
    }

    /// Attach a boolean predicate as the scope's validator.
    pub fn with_validator<F>(self, predicate: F) -> Self
    where
        F: Fn(&Action) -> bool + Send + Sync + 'static,
    {
        self.with_fallible_validator(move |action: &Action| Ok(predicate(action)))
    }

    /// Attach a validator that may itself fail.
    pub fn with_fallible_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Action) -> Result<bool, ValidatorError> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(FnValidator(validator)));
        self
    }

    /// Attach an existing validator implementation.
    pub fn with_action_validator(mut self, validator: Arc<dyn ActionValidator>) -> Self {
        self.validator = Some(validator);
        self
    }
}

impl fmt::Debug for PermissionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionScope")
            .field("action_name", &self.action_name)
            .field("decision", &self.decision)
            .field("allowed_paths", &self.allowed_paths)
            .field("blocked_command_patterns", &self.blocked_command_patterns)
            .field("validator", &self.validator.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_set_guardrails() {
        let scope = PermissionScope::allow("write_file")
            .with_allowed_paths(["/tmp", "/var/data"])
            .with_validator(|a| a.agent_id == "trusted");

        assert_eq!(scope.decision, ScopeDecision::Allow);
        assert_eq!(scope.allowed_paths.as_ref().unwrap().len(), 2);
        assert!(scope.blocked_command_patterns.is_none());

        let validator = scope.validator.as_ref().unwrap();
        let ok = Action::new("trusted", "write_file");
        let bad = Action::new("other", "write_file");
        assert!(validator.validate(&ok).unwrap());
        assert!(!validator.validate(&bad).unwrap());
    }

    #[test]
    fn serialization_skips_validator() {
        let scope = PermissionScope::require_approval("send_email").with_validator(|_| true);
        let json = serde_json::to_string(&scope).unwrap();
        assert_eq!(
            json,
            r#"{"actionName":"send_email","decision":"REQUIRE_APPROVAL"}"#
        );
        let restored: PermissionScope = serde_json::from_str(&json).unwrap();
        assert!(restored.validator.is_none());
    }

    #[test]
    fn debug_does_not_require_validator_debug() {
        let scope = PermissionScope::block("rm").with_validator(|_| false);
        let dbg = format!("{:?}", scope);
        assert!(dbg.contains("<fn>"));
    }
}
