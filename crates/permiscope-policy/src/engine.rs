// engine.rs — Policy evaluation engine.
//
// The PolicyEngine is the core of the "default deny" security model.
// Every action passes through `evaluate()`, which:
//
// 1. Collects every scope whose action name matches → none → Block
// 2. Computes each scope's effective decision (Block stays Block;
//    Allow / RequireApproval are downgraded to Block if a guardrail fails)
// 3. Combines them: any Block wins, then RequireApproval, then Allow
//
// Because the most restrictive matching rule always wins, operators can
// stack narrow exceptions without caring about scope order.

use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::decision::{BlockReason, Decision, PolicyDecision, ScopeDecision};
use crate::guardrail;
use crate::policy::Policy;

/// What happened to one matching scope during evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationStep {
    /// Position of the scope in the policy.
    pub scope_index: usize,
    /// What the scope declares.
    pub declared: ScopeDecision,
    /// What it contributed after guardrails.
    pub effective: Decision,
    /// Human-readable outcome (e.g., "passed", "path guardrail failed: ...").
    pub outcome: String,
}

/// Full evaluation trace returned alongside a PolicyDecision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationTrace {
    pub decision: PolicyDecision,
    /// Scopes examined, in policy order. Evaluation stops at the first Block.
    pub steps: Vec<EvaluationStep>,
}

/// The policy engine. Evaluates actions against one immutable Policy.
#[derive(Debug, Clone, Default)]
pub struct PolicyEngine {
    policy: Policy,
}

impl PolicyEngine {
    pub fn new(policy: Policy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Evaluate an action and return a decision.
    pub fn evaluate(&self, action: &Action) -> PolicyDecision {
        self.evaluate_with_trace(action).decision
    }

    /// Evaluate an action and record how every matching scope contributed.
    pub fn evaluate_with_trace(&self, action: &Action) -> EvaluationTrace {
        let mut steps = Vec::new();
        let mut needs_approval = false;

        for (scope_index, compiled) in self.policy.matching(&action.action_name) {
            let declared = compiled.scope.decision;
            let outcome = match declared {
                ScopeDecision::Block => Err(BlockReason::ExplicitlyBlocked {
                    action_name: action.action_name.clone(),
                }),
                ScopeDecision::Allow | ScopeDecision::RequireApproval => {
                    guardrail::check(action, compiled)
                }
            };

            match outcome {
                Ok(()) => {
                    needs_approval |= declared == ScopeDecision::RequireApproval;
                    steps.push(EvaluationStep {
                        scope_index,
                        declared,
                        effective: declared.into(),
                        outcome: "passed".to_string(),
                    });
                }
                Err(reason) => {
                    steps.push(EvaluationStep {
                        scope_index,
                        declared,
                        effective: Decision::Block,
                        outcome: reason.to_string(),
                    });
                    tracing::info!(
                        agent_id = %action.agent_id,
                        action = %action.action_name,
                        %reason,
                        "policy blocked action"
                    );
                    return EvaluationTrace {
                        decision: PolicyDecision::Block { reason },
                        steps,
                    };
                }
            }
        }

        if steps.is_empty() {
            let reason = BlockReason::NoMatchingScope {
                action_name: action.action_name.clone(),
            };
            tracing::info!(
                agent_id = %action.agent_id,
                action = %action.action_name,
                "no policy scope matches; default deny"
            );
            return EvaluationTrace {
                decision: PolicyDecision::Block { reason },
                steps,
            };
        }

        let decision = if needs_approval {
            PolicyDecision::RequireApproval
        } else {
            PolicyDecision::Allow
        };
        tracing::debug!(
            agent_id = %action.agent_id,
            action = %action.action_name,
            decision = %decision.decision(),
            scopes = steps.len(),
            "policy evaluated"
        );
        EvaluationTrace { decision, steps }
    }
}

/// Evaluate `action` against `policy` without building an engine.
pub fn evaluate(action: &Action, policy: &Policy) -> PolicyDecision {
    PolicyEngine::new(policy.clone()).evaluate(action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::Guardrail;
    use crate::error::ValidatorError;
    use crate::scope::PermissionScope;

    fn engine(scopes: Vec<PermissionScope>) -> PolicyEngine {
        PolicyEngine::new(Policy::new(scopes).unwrap())
    }

    fn action(name: &str) -> Action {
        Action::new("test-agent", name)
    }

    fn assert_guardrail_block(decision: &PolicyDecision, expected: Guardrail) {
        match decision {
            PolicyDecision::Block {
                reason: BlockReason::GuardrailFailed { guardrail, .. },
            } => assert_eq!(*guardrail, expected),
            other => panic!("expected {} guardrail block, got {:?}", expected, other),
        }
    }

    #[test]
    fn basic_decisions() {
        let e = engine(vec![
            PermissionScope::allow("safe_action"),
            PermissionScope::block("blocked_action"),
            PermissionScope::require_approval("approval_action"),
        ]);
        assert_eq!(e.evaluate(&action("safe_action")), PolicyDecision::Allow);
        assert_eq!(
            e.evaluate(&action("blocked_action")),
            PolicyDecision::Block {
                reason: BlockReason::ExplicitlyBlocked {
                    action_name: "blocked_action".into()
                }
            }
        );
        assert_eq!(
            e.evaluate(&action("approval_action")),
            PolicyDecision::RequireApproval
        );
    }

    #[test]
    fn default_deny_for_unknown_action() {
        let e = engine(vec![PermissionScope::allow("safe_action")]);
        match e.evaluate(&action("launch_missiles")) {
            PolicyDecision::Block {
                reason: BlockReason::NoMatchingScope { action_name },
            } => assert_eq!(action_name, "launch_missiles"),
            other => panic!("expected default deny, got {:?}", other),
        }
        assert!(PolicyEngine::default()
            .evaluate(&action("anything"))
            .is_blocked());
    }

    #[test]
    fn require_approval_outranks_allow() {
        let e = engine(vec![
            PermissionScope::allow("deploy"),
            PermissionScope::require_approval("deploy"),
        ]);
        assert_eq!(e.evaluate(&action("deploy")), PolicyDecision::RequireApproval);

        // Order does not matter.
        let e = engine(vec![
            PermissionScope::require_approval("deploy"),
            PermissionScope::allow("deploy"),
        ]);
        assert_eq!(e.evaluate(&action("deploy")), PolicyDecision::RequireApproval);
    }

    #[test]
    fn any_guardrail_failure_blocks_regardless_of_other_scopes() {
        let e = engine(vec![
            PermissionScope::allow("deploy"),
            PermissionScope::require_approval("deploy").with_validator(|_| false),
        ]);
        let decision = e.evaluate(&action("deploy"));
        assert_guardrail_block(&decision, Guardrail::Validator);
    }

    #[cfg(unix)]
    #[test]
    fn narrow_exceptions_compose() {
        let dir = tempfile::tempdir().unwrap();
        let processed = dir.path().join("processed");
        let raw = dir.path().join("raw");
        let e = engine(vec![
            PermissionScope::allow("write_file").with_allowed_paths([dir.path()]),
            PermissionScope::allow("write_file")
                .with_validator(|a| !a.param_str("path").unwrap_or("").contains("/raw/")),
        ]);

        let ok = action("write_file").with_param("path", processed.join("out.csv").to_str().unwrap());
        let bad = action("write_file").with_param("path", raw.join("in.csv").to_str().unwrap());
        assert_eq!(e.evaluate(&ok), PolicyDecision::Allow);
        assert!(e.evaluate(&bad).is_blocked());
    }

    #[cfg(unix)]
    #[test]
    fn path_traversal_and_prefix_boundaries() {
        let e = engine(vec![
            PermissionScope::allow("write_file").with_allowed_paths(["/tmp"])
        ]);

        let traversal = action("write_file").with_param("path", "/tmp/../etc/passwd");
        assert_guardrail_block(&e.evaluate(&traversal), Guardrail::Path);

        let nested = action("write_file").with_param("path", "/tmp/sub/file");
        assert_eq!(e.evaluate(&nested), PolicyDecision::Allow);

        let lookalike = action("write_file").with_param("path", "/tmpevil/file");
        assert_guardrail_block(&e.evaluate(&lookalike), Guardrail::Path);
    }

    #[test]
    fn missing_path_with_allowlist_blocks() {
        let e = engine(vec![
            PermissionScope::allow("read_file").with_allowed_paths(["/tmp"])
        ]);
        assert_guardrail_block(&e.evaluate(&action("read_file")), Guardrail::Path);
    }

    #[test]
    fn path_guardrail_applies_to_custom_actions_that_declare_paths() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(vec![
            PermissionScope::allow("delete_file").with_allowed_paths([dir.path()])
        ]);
        let outside = action("delete_file").with_param("path", "/etc/hosts");
        assert_guardrail_block(&e.evaluate(&outside), Guardrail::Path);
    }

    #[test]
    fn command_evasion_is_normalized_away() {
        let e = engine(vec![
            PermissionScope::allow("run_command").with_blocked_commands(["rm -rf", "sudo"])
        ]);
        for cmd in ["rm  -rf  /", "rm\\ -rf /", "'rm' -rf /", "rm -rf /"] {
            let a = action("run_command").with_param("command", cmd);
            assert_guardrail_block(&e.evaluate(&a), Guardrail::Command);
        }
        let safe = action("run_command").with_param("command", "echo hi");
        assert_eq!(e.evaluate(&safe), PolicyDecision::Allow);
    }

    #[test]
    fn empty_command_with_patterns_blocks() {
        let e = engine(vec![
            PermissionScope::allow("run_command").with_blocked_commands(["rm -rf"])
        ]);
        assert_guardrail_block(&e.evaluate(&action("run_command")), Guardrail::Command);
    }

    #[test]
    fn run_command_without_patterns_is_unrestricted() {
        let e = engine(vec![PermissionScope::allow("run_command")]);
        let a = action("run_command").with_param("command", "rm -rf /");
        assert_eq!(e.evaluate(&a), PolicyDecision::Allow);
    }

    #[test]
    fn guardrails_also_apply_to_require_approval() {
        let e = engine(vec![
            PermissionScope::require_approval("run_command").with_blocked_commands(["shutdown"])
        ]);
        let a = action("run_command").with_param("command", "shutdown -h now");
        assert_guardrail_block(&e.evaluate(&a), Guardrail::Command);
    }

    #[test]
    fn dynamic_validator() {
        let e = engine(vec![PermissionScope::allow("dynamic_action")
            .with_validator(|a| a.parameters.get("magic") == Some(&serde_json::json!(42)))]);
        let good = action("dynamic_action").with_param("magic", 42);
        let bad = action("dynamic_action").with_param("magic", 7);
        assert_eq!(e.evaluate(&good), PolicyDecision::Allow);
        assert_guardrail_block(&e.evaluate(&bad), Guardrail::Validator);
    }

    #[test]
    fn failing_validator_fails_closed() {
        let e = engine(vec![
            PermissionScope::allow("erroring")
                .with_fallible_validator(|_| Err(ValidatorError::new("backend down"))),
            PermissionScope::allow("panicking").with_validator(|_| panic!("validator bug")),
        ]);
        assert_guardrail_block(&e.evaluate(&action("erroring")), Guardrail::Validator);
        assert_guardrail_block(&e.evaluate(&action("panicking")), Guardrail::Validator);
    }

    #[test]
    fn path_guardrail_reported_before_validator() {
        let e = engine(vec![PermissionScope::allow("write_file")
            .with_allowed_paths(["/nonexistent-root"])
            .with_validator(|_| false)]);
        let a = action("write_file").with_param("path", "/elsewhere/file");
        assert_guardrail_block(&e.evaluate(&a), Guardrail::Path);
    }

    #[test]
    fn trace_records_each_scope_until_block() {
        let e = engine(vec![
            PermissionScope::allow("deploy"),
            PermissionScope::require_approval("deploy"),
            PermissionScope::block("deploy"),
            PermissionScope::allow("deploy"),
        ]);
        let trace = e.evaluate_with_trace(&action("deploy"));
        assert!(trace.decision.is_blocked());
        assert_eq!(trace.steps.len(), 3);
        assert_eq!(trace.steps[0].effective, Decision::Allow);
        assert_eq!(trace.steps[1].effective, Decision::RequireApproval);
        assert_eq!(trace.steps[2].effective, Decision::Block);
        assert!(trace.steps[2].outcome.contains("explicitly blocked"));
    }

    #[test]
    fn free_function_matches_engine() {
        let policy = Policy::new(vec![PermissionScope::allow("ping")]).unwrap();
        assert_eq!(evaluate(&action("ping"), &policy), PolicyDecision::Allow);
        assert!(evaluate(&action("pong"), &policy).is_blocked());
    }
}
