// decision.rs — Policy outcomes and the reasons behind a BLOCK.
//
// `Decision` is the flat value recorded in audit entries and returned to
// callers. `PolicyDecision` is what the evaluator produces: the same three
// verdicts, but a Block always carries a `BlockReason` so users can tell a
// missing rule from a failed guardrail from an explicit deny.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Final outcome of a governed action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Allow,
    Block,
    RequireApproval,
    /// A blocked action reported to a shadow-mode caller as successful.
    ShadowBlock,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Decision::Allow => "ALLOW",
            Decision::Block => "BLOCK",
            Decision::RequireApproval => "REQUIRE_APPROVAL",
            Decision::ShadowBlock => "SHADOW_BLOCK",
        };
        f.write_str(s)
    }
}

/// The decision a policy scope declares. Shadow blocking is a gateway
/// concern, so it cannot be written into a policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScopeDecision {
    Allow,
    Block,
    RequireApproval,
}

impl From<ScopeDecision> for Decision {
    fn from(d: ScopeDecision) -> Self {
        match d {
            ScopeDecision::Allow => Decision::Allow,
            ScopeDecision::Block => Decision::Block,
            ScopeDecision::RequireApproval => Decision::RequireApproval,
        }
    }
}

/// Which guardrail rejected an action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Guardrail {
    Path,
    Command,
    Validator,
}

impl fmt::Display for Guardrail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Guardrail::Path => f.write_str("path"),
            Guardrail::Command => f.write_str("command"),
            Guardrail::Validator => f.write_str("validator"),
        }
    }
}

/// Why the evaluator blocked an action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockReason {
    /// No scope names this action (default deny).
    NoMatchingScope { action_name: String },
    /// A matching scope declares BLOCK.
    ExplicitlyBlocked { action_name: String },
    /// A permissive scope was downgraded by one of its guardrails.
    GuardrailFailed { guardrail: Guardrail, detail: String },
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::NoMatchingScope { action_name } => {
                write!(f, "no matching policy scope for action '{}'", action_name)
            }
            BlockReason::ExplicitlyBlocked { action_name } => {
                write!(f, "action '{}' is explicitly blocked by policy", action_name)
            }
            BlockReason::GuardrailFailed { guardrail, detail } => {
                write!(f, "{} guardrail failed: {}", guardrail, detail)
            }
        }
    }
}

/// The result of a policy evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "decision", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyDecision {
    Allow,
    RequireApproval,
    Block { reason: BlockReason },
}

impl PolicyDecision {
    /// Collapse to the flat decision value.
    pub fn decision(&self) -> Decision {
        match self {
            PolicyDecision::Allow => Decision::Allow,
            PolicyDecision::RequireApproval => Decision::RequireApproval,
            PolicyDecision::Block { .. } => Decision::Block,
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, PolicyDecision::Block { .. })
    }

    /// The block reason, if this is a Block.
    pub fn block_reason(&self) -> Option<&BlockReason> {
        match self {
            PolicyDecision::Block { reason } => Some(reason),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_wire_format_is_screaming_snake_case() {
        let json = serde_json::to_string(&Decision::RequireApproval).unwrap();
        assert_eq!(json, "\"REQUIRE_APPROVAL\"");
        let back: Decision = serde_json::from_str("\"SHADOW_BLOCK\"").unwrap();
        assert_eq!(back, Decision::ShadowBlock);
    }

    #[test]
    fn display_matches_wire_names() {
        assert_eq!(Decision::Block.to_string(), "BLOCK");
        assert_eq!(Decision::ShadowBlock.to_string(), "SHADOW_BLOCK");
    }

    #[test]
    fn block_reasons_are_distinguishable() {
        let none = BlockReason::NoMatchingScope {
            action_name: "launch".into(),
        };
        let explicit = BlockReason::ExplicitlyBlocked {
            action_name: "launch".into(),
        };
        let guard = BlockReason::GuardrailFailed {
            guardrail: Guardrail::Command,
            detail: "matched 'rm -rf'".into(),
        };
        assert!(none.to_string().contains("no matching policy"));
        assert!(explicit.to_string().contains("explicitly blocked"));
        assert_eq!(
            guard.to_string(),
            "command guardrail failed: matched 'rm -rf'"
        );
    }

    #[test]
    fn policy_decision_collapses() {
        let block = PolicyDecision::Block {
            reason: BlockReason::NoMatchingScope {
                action_name: "x".into(),
            },
        };
        assert_eq!(block.decision(), Decision::Block);
        assert!(block.is_blocked());
        assert!(block.block_reason().is_some());
        assert_eq!(PolicyDecision::Allow.decision(), Decision::Allow);
        assert!(PolicyDecision::RequireApproval.block_reason().is_none());
    }

    #[test]
    fn scope_decision_converts() {
        assert_eq!(
            Decision::from(ScopeDecision::RequireApproval),
            Decision::RequireApproval
        );
    }
}
