// gateway.rs — The execution gateway.
//
// Every action flows through policy → (approval) → execution → audit:
//
//   1. The PolicyEngine decides ALLOW / BLOCK / REQUIRE_APPROVAL.
//   2. REQUIRE_APPROVAL is resolved from a live grant in the approval store,
//      or by waiting for a human (terminal prompt, or an external decision
//      written to the store), bounded by a timeout.
//   3. ALLOW dispatches to an executor; BLOCK is reported (or faked, in
//      shadow mode).
//   4. Exactly one audit entry is written for the run, whatever happened.
//
// `run(&self)` holds no lock of its own; many runs may be in flight at once.
// All file I/O, evaluation and executors run on tokio's blocking pool.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::MissedTickBehavior;

use permiscope_approval::{ApprovalStatus, ApprovalStore};
use permiscope_audit::{AuditLog, AuditLogEntry, ChainHasher, ExecutionResult};
use permiscope_policy::{Action, Decision, Policy, PolicyDecision, PolicyEngine};

use crate::config::GatewayConfig;
use crate::error::{ExecutorError, GatewayError};
use crate::executor::ExecutorRegistry;
use crate::prompt::{ApprovalPrompt, PromptAnswer};

/// Placeholder output returned for blocked actions in shadow mode.
pub const SHADOW_OUTPUT: &str = "[SHADOW] Action appeared successful.";

const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// What the caller gets back from a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayResult {
    pub decision: Decision,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GatewayResult {
    fn succeeded(decision: Decision, output: Option<Value>) -> Self {
        Self {
            decision,
            success: true,
            output,
            error: None,
        }
    }

    fn failed(decision: Decision, error: Option<String>) -> Self {
        Self {
            decision,
            success: false,
            output: None,
            error,
        }
    }
}

/// How a REQUIRE_APPROVAL was resolved.
enum Approval {
    Granted,
    /// Dry run: nobody was asked.
    NotRequested,
    Denied(String),
}

/// Where a human decision came from while waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Approved { interactive: bool },
    Rejected { interactive: bool },
    TimedOut,
}

/// Mediates every agent action.
pub struct ExecutionGateway {
    engine: Arc<PolicyEngine>,
    approvals: Arc<ApprovalStore>,
    audit: Arc<AuditLog>,
    executors: Arc<ExecutorRegistry>,
    prompt: Option<Arc<dyn ApprovalPrompt>>,
    approval_timeout: Duration,
    poll_interval: Duration,
}

impl ExecutionGateway {
    /// Build a gateway for `policy` with state where `config` says.
    pub fn new(policy: Policy, config: &GatewayConfig) -> Result<Self, GatewayError> {
        let approvals = ApprovalStore::open(&config.approvals_file)?.with_ttl(config.approval_ttl());
        let audit = AuditLog::open_with(
            &config.audit_log,
            ChainHasher::new(config.signing_secret.as_deref()),
        )?
        .with_strict(config.strict_logging);

        tracing::info!(
            approvals = %config.approvals_file.display(),
            audit_log = %config.audit_log.display(),
            keyed = audit.is_keyed(),
            strict = config.strict_logging,
            "execution gateway ready"
        );

        Ok(Self::from_parts(PolicyEngine::new(policy), approvals, audit)
            .with_approval_timeout(config.approval_timeout())
            .with_poll_interval(config.poll_interval()))
    }

    pub fn from_parts(engine: PolicyEngine, approvals: ApprovalStore, audit: AuditLog) -> Self {
        Self {
            engine: Arc::new(engine),
            approvals: Arc::new(approvals),
            audit: Arc::new(audit),
            executors: Arc::new(ExecutorRegistry::new()),
            prompt: None,
            approval_timeout: DEFAULT_APPROVAL_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_executors(mut self, executors: ExecutorRegistry) -> Self {
        self.executors = Arc::new(executors);
        self
    }

    /// Ask a human interactively when approval is needed. Without a prompt
    /// the gateway waits only for decisions written to the approval store.
    pub fn with_prompt(mut self, prompt: Arc<dyn ApprovalPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn engine(&self) -> &PolicyEngine {
        &self.engine
    }

    pub fn approvals(&self) -> &ApprovalStore {
        &self.approvals
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// Evaluate, resolve approval, execute and audit one action.
    ///
    /// Never returns an error: every outcome, including internal faults, is
    /// a `GatewayResult` and an audit entry.
    pub async fn run(&self, action: Action, dry_run: bool) -> GatewayResult {
        let evaluated = {
            let engine = Arc::clone(&self.engine);
            let action = action.clone();
            blocking(move || engine.evaluate(&action)).await
        };
        let (mut decision, mut block_reason) = match evaluated {
            Ok(PolicyDecision::Block { reason }) => (Decision::Block, Some(reason.to_string())),
            Ok(other) => (other.decision(), None),
            Err(e) => {
                tracing::warn!(action = %action.action_name, error = %e, "policy evaluation failed");
                (Decision::Block, Some(format!("policy evaluation failed: {}", e)))
            }
        };

        if decision == Decision::RequireApproval {
            match self.resolve_approval(&action, dry_run).await {
                Approval::Granted => decision = Decision::Allow,
                Approval::NotRequested => {}
                Approval::Denied(reason) => {
                    decision = Decision::Block;
                    block_reason = Some(reason);
                }
            }
        }

        let mut result = match decision {
            Decision::Allow if dry_run => GatewayResult::succeeded(decision, None),
            Decision::Allow => match self.execute(&action).await {
                Ok(output) => GatewayResult::succeeded(decision, Some(output)),
                Err(e) => {
                    tracing::warn!(action = %action.action_name, error = %e, "execution failed");
                    GatewayResult::failed(decision, Some(e.to_string()))
                }
            },
            Decision::Block | Decision::ShadowBlock if action.shadow_mode => {
                GatewayResult::succeeded(Decision::ShadowBlock, Some(Value::String(SHADOW_OUTPUT.into())))
            }
            Decision::Block | Decision::ShadowBlock => GatewayResult::failed(
                Decision::Block,
                Some(block_reason.unwrap_or_else(|| "blocked by policy".to_string())),
            ),
            // Dry run that would have needed a human: neither run nor blocked.
            Decision::RequireApproval => GatewayResult::failed(decision, None),
        };

        tracing::info!(
            agent_id = %action.agent_id,
            action = %action.action_name,
            decision = %result.decision,
            success = result.success,
            dry_run,
            "action processed"
        );

        self.record(action, &mut result, dry_run).await;
        result
    }

    async fn resolve_approval(&self, action: &Action, dry_run: bool) -> Approval {
        let granted = {
            let store = Arc::clone(&self.approvals);
            let action = action.clone();
            blocking(move || store.is_approved(&action.agent_id, &action.action_name, &action.parameters))
                .await
        };
        match granted {
            Ok(Ok(true)) => {
                tracing::info!(action = %action.action_name, "using existing approval grant");
                return Approval::Granted;
            }
            Ok(Ok(false)) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "approval store unavailable; treating as not approved"),
            Err(e) => tracing::warn!(error = %e, "approval lookup failed; treating as not approved"),
        }

        if dry_run {
            return Approval::NotRequested;
        }

        let requested = {
            let store = Arc::clone(&self.approvals);
            let action = action.clone();
            blocking(move || {
                store.request_approval(&action.agent_id, &action.action_name, &action.parameters)
            })
            .await
        };
        match requested {
            Ok(Ok(request)) => tracing::info!(
                id = %request.id,
                action = %action.action_name,
                "waiting for approval"
            ),
            Ok(Err(e)) => tracing::warn!(error = %e, "could not record pending approval"),
            Err(e) => tracing::warn!(error = %e, "could not record pending approval"),
        }

        match self.await_verdict(action).await {
            Verdict::Approved { interactive } => {
                if interactive {
                    self.persist(action, ApprovalStatus::Approved).await;
                }
                Approval::Granted
            }
            Verdict::Rejected { interactive } => {
                if interactive {
                    self.persist(action, ApprovalStatus::Rejected).await;
                }
                Approval::Denied("approval rejected".to_string())
            }
            Verdict::TimedOut => {
                tracing::warn!(
                    action = %action.action_name,
                    timeout_secs = self.approval_timeout.as_secs(),
                    "approval timed out"
                );
                Approval::Denied("approval timed out".to_string())
            }
        }
    }

    /// First of: interactive answer, decision found in the store, timeout.
    async fn await_verdict(&self, action: &Action) -> Verdict {
        tokio::select! {
            verdict = self.ask_prompt(action) => verdict,
            verdict = self.poll_store(action) => verdict,
            _ = tokio::time::sleep(self.approval_timeout) => Verdict::TimedOut,
        }
    }

    /// Resolves only if the prompt gives an answer; otherwise stays pending.
    async fn ask_prompt(&self, action: &Action) -> Verdict {
        let Some(prompt) = self.prompt.clone() else {
            return std::future::pending::<Verdict>().await;
        };
        let action = action.clone();
        match tokio::task::spawn_blocking(move || prompt.ask(&action)).await {
            Ok(Ok(PromptAnswer::Approve)) => Verdict::Approved { interactive: true },
            Ok(Ok(PromptAnswer::Reject)) => Verdict::Rejected { interactive: true },
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "approval prompt unavailable; waiting for external decision");
                std::future::pending::<Verdict>().await
            }
            Err(e) => {
                tracing::warn!(error = %e, "approval prompt failed; waiting for external decision");
                std::future::pending::<Verdict>().await
            }
        }
    }

    /// Resolves once the store shows APPROVED or REJECTED for this intent.
    async fn poll_store(&self, action: &Action) -> Verdict {
        let mut ticker = tokio::time::interval(self.poll_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let status = {
                let store = Arc::clone(&self.approvals);
                let action = action.clone();
                blocking(move || store.status(&action.agent_id, &action.action_name, &action.parameters))
                    .await
            };
            match status {
                Ok(Ok(Some(ApprovalStatus::Approved))) => return Verdict::Approved { interactive: false },
                Ok(Ok(Some(ApprovalStatus::Rejected))) => return Verdict::Rejected { interactive: false },
                Ok(Ok(_)) => tracing::debug!(action = %action.action_name, "approval still pending"),
                Ok(Err(e)) => tracing::warn!(error = %e, "approval poll failed"),
                Err(e) => tracing::warn!(error = %e, "approval poll failed"),
            }
        }
    }

    async fn persist(&self, action: &Action, status: ApprovalStatus) {
        let store = Arc::clone(&self.approvals);
        let action = action.clone();
        let saved = blocking(move || match status {
            ApprovalStatus::Approved => {
                store.approve(&action.agent_id, &action.action_name, &action.parameters)
            }
            _ => store.reject(&action.agent_id, &action.action_name, &action.parameters),
        })
        .await;
        match saved {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, status = %status, "could not persist approval decision"),
            Err(e) => tracing::warn!(error = %e, status = %status, "could not persist approval decision"),
        }
    }

    async fn execute(&self, action: &Action) -> Result<Value, ExecutorError> {
        let executors = Arc::clone(&self.executors);
        let name = action.action_name.clone();
        let params = action.parameters.clone();
        match tokio::task::spawn_blocking(move || executors.execute(&name, &params)).await {
            Ok(result) => result,
            Err(e) => Err(ExecutorError::Panicked(e.to_string())),
        }
    }

    /// Write the audit entry; in strict mode a failure fails the result.
    async fn record(&self, action: Action, result: &mut GatewayResult, dry_run: bool) {
        let entry = AuditLogEntry::new(
            action,
            result.decision,
            ExecutionResult {
                success: result.success,
                output: result.output.clone(),
                error: result.error.clone(),
                dry_run,
            },
        );
        let audit = Arc::clone(&self.audit);
        let error = match blocking(move || audit.log(entry)).await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(e) => e.to_string(),
        };
        if self.audit.is_strict() {
            result.success = false;
            result.error = Some(format!("audit log write failed: {}", error));
        } else {
            tracing::error!(error = %error, "failed to write audit entry");
        }
    }
}

impl std::fmt::Debug for ExecutionGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionGateway")
            .field("approvals", &self.approvals.path())
            .field("audit_log", &self.audit.path())
            .field("executors", &self.executors)
            .field("interactive", &self.prompt.is_some())
            .field("approval_timeout", &self.approval_timeout)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

async fn blocking<T, F>(f: F) -> Result<T, tokio::task::JoinError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::{StaticPrompt, TerminalPrompt};
    use permiscope_policy::{Params, PermissionScope};
    use serde_json::json;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{tempdir, TempDir};

    fn config(dir: &TempDir) -> GatewayConfig {
        let mut config = GatewayConfig::for_project(dir.path());
        config.approval_timeout_secs = 5;
        config.poll_interval_ms = 10;
        config
    }

    fn gateway(dir: &TempDir, scopes: Vec<PermissionScope>) -> ExecutionGateway {
        ExecutionGateway::new(Policy::new(scopes).unwrap(), &config(dir)).unwrap()
    }

    /// Registry whose `deploy` executor counts invocations.
    fn counting_registry() -> (ExecutorRegistry, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let registry = ExecutorRegistry::new().with(
            "deploy",
            move |params: &Params| -> Result<Value, ExecutorError> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!(format!("deployed {}", params["service"].as_str().unwrap_or("?"))))
            },
        );
        (registry, calls)
    }

    fn deploy(service: &str) -> Action {
        Action::new("agent-1", "deploy").with_param("service", service)
    }

    #[tokio::test]
    async fn allow_executes_and_audits() {
        let dir = tempdir().unwrap();
        let (registry, calls) = counting_registry();
        let gw = gateway(&dir, vec![PermissionScope::allow("deploy")]).with_executors(registry);

        let result = gw.run(deploy("api"), false).await;
        assert_eq!(result.decision, Decision::Allow);
        assert!(result.success);
        assert_eq!(result.output, Some(json!("deployed api")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let entries = gw.audit_log().entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].decision, Decision::Allow);
        assert!(entries[0].result.success);
        assert!(!entries[0].result.dry_run);
    }

    #[tokio::test]
    async fn block_reports_reason_and_skips_executor() {
        let dir = tempdir().unwrap();
        let (registry, calls) = counting_registry();
        let gw = gateway(&dir, vec![PermissionScope::block("deploy")]).with_executors(registry);

        let result = gw.run(deploy("api"), false).await;
        assert_eq!(result.decision, Decision::Block);
        assert!(!result.success);
        assert!(result.error.unwrap().contains("explicitly blocked"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(gw.audit_log().entries().unwrap()[0].decision, Decision::Block);
    }

    #[tokio::test]
    async fn unknown_action_is_default_denied() {
        let dir = tempdir().unwrap();
        let gw = gateway(&dir, vec![]);
        let result = gw.run(Action::new("agent-1", "send_email"), false).await;
        assert_eq!(result.decision, Decision::Block);
        assert!(result.error.unwrap().contains("no matching policy scope"));
    }

    #[tokio::test]
    async fn shadow_mode_fakes_success() {
        let dir = tempdir().unwrap();
        let (registry, calls) = counting_registry();
        let gw = gateway(&dir, vec![PermissionScope::block("deploy")]).with_executors(registry);

        let result = gw.run(deploy("api").shadowed(), false).await;
        assert_eq!(result.decision, Decision::ShadowBlock);
        assert!(result.success);
        assert_eq!(result.output, Some(json!(SHADOW_OUTPUT)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            gw.audit_log().entries().unwrap()[0].decision,
            Decision::ShadowBlock
        );
    }

    #[tokio::test]
    async fn shadow_mode_does_not_touch_allowed_actions() {
        let dir = tempdir().unwrap();
        let (registry, calls) = counting_registry();
        let gw = gateway(&dir, vec![PermissionScope::allow("deploy")]).with_executors(registry);
        let result = gw.run(deploy("api").shadowed(), false).await;
        assert_eq!(result.decision, Decision::Allow);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dry_run_allow_does_not_execute() {
        let dir = tempdir().unwrap();
        let (registry, calls) = counting_registry();
        let gw = gateway(&dir, vec![PermissionScope::allow("deploy")]).with_executors(registry);

        let result = gw.run(deploy("api"), true).await;
        assert_eq!(result.decision, Decision::Allow);
        assert!(result.success);
        assert_eq!(result.output, None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(gw.audit_log().entries().unwrap()[0].result.dry_run);
    }

    #[tokio::test]
    async fn dry_run_require_approval_asks_nobody() {
        let dir = tempdir().unwrap();
        let (registry, calls) = counting_registry();
        let gw = gateway(&dir, vec![PermissionScope::require_approval("deploy")])
            .with_executors(registry)
            .with_prompt(Arc::new(StaticPrompt::approve_all()));

        let result = gw.run(deploy("api"), true).await;
        assert_eq!(result.decision, Decision::RequireApproval);
        assert!(!result.success);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(gw.approvals().get_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn live_grant_skips_the_human() {
        let dir = tempdir().unwrap();
        let (registry, calls) = counting_registry();
        let gw = gateway(&dir, vec![PermissionScope::require_approval("deploy")])
            .with_executors(registry)
            .with_prompt(Arc::new(StaticPrompt::reject_all()));
        let action = deploy("api");
        gw.approvals()
            .approve(&action.agent_id, &action.action_name, &action.parameters)
            .unwrap();

        let result = gw.run(action, false).await;
        assert_eq!(result.decision, Decision::Allow);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn interactive_approval_persists_grant() {
        let dir = tempdir().unwrap();
        let (registry, calls) = counting_registry();
        let gw = gateway(&dir, vec![PermissionScope::require_approval("deploy")])
            .with_executors(registry)
            .with_prompt(Arc::new(TerminalPrompt::new(
                Box::new(Cursor::new(b"y\n".to_vec())),
                Box::new(std::io::sink()),
            )));

        let first = gw.run(deploy("api"), false).await;
        assert_eq!(first.decision, Decision::Allow);
        assert!(first.success);

        // The prompt has no more input; the grant carries the second run.
        let second = gw.run(deploy("api"), false).await;
        assert_eq!(second.decision, Decision::Allow);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // A different intent is not covered.
        let other = gw
            .with_approval_timeout_for_test(Duration::from_millis(50))
            .run(deploy("db"), false)
            .await;
        assert_eq!(other.decision, Decision::Block);
    }

    #[tokio::test]
    async fn interactive_rejection_blocks() {
        let dir = tempdir().unwrap();
        let (registry, calls) = counting_registry();
        let gw = gateway(&dir, vec![PermissionScope::require_approval("deploy")])
            .with_executors(registry)
            .with_prompt(Arc::new(StaticPrompt::reject_all()));
        let action = deploy("api");

        let result = gw.run(action.clone(), false).await;
        assert_eq!(result.decision, Decision::Block);
        assert_eq!(result.error.as_deref(), Some("approval rejected"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(gw
            .approvals()
            .is_rejected(&action.agent_id, &action.action_name, &action.parameters)
            .unwrap());
    }

    #[tokio::test]
    async fn external_approval_wins_the_race() {
        let dir = tempdir().unwrap();
        let (registry, calls) = counting_registry();
        let gw = Arc::new(
            gateway(&dir, vec![PermissionScope::require_approval("deploy")])
                .with_executors(registry)
                // Closed input: the prompt drops out and only the store can decide.
                .with_prompt(Arc::new(TerminalPrompt::new(
                    Box::new(Cursor::new(Vec::new())),
                    Box::new(std::io::sink()),
                ))),
        );

        let approver = {
            let store = ApprovalStore::open(&config(&dir).approvals_file).unwrap();
            tokio::spawn(async move {
                loop {
                    let pending = store.get_all().unwrap();
                    if let Some(request) = pending.first() {
                        store.update_status(&request.id, ApprovalStatus::Approved).unwrap();
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
        };

        let result = gw.run(deploy("api"), false).await;
        approver.await.unwrap();
        assert_eq!(result.decision, Decision::Allow);
        assert!(result.success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn external_rejection_blocks() {
        let dir = tempdir().unwrap();
        let gw = gateway(&dir, vec![PermissionScope::require_approval("deploy")]);
        let store = ApprovalStore::open(&config(&dir).approvals_file).unwrap();
        let rejecter = tokio::spawn(async move {
            loop {
                if let Some(request) = store.get_all().unwrap().first() {
                    store.update_status(&request.id, ApprovalStatus::Rejected).unwrap();
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let result = gw.run(deploy("api"), false).await;
        rejecter.await.unwrap();
        assert_eq!(result.decision, Decision::Block);
        assert_eq!(result.error.as_deref(), Some("approval rejected"));
    }

    #[tokio::test]
    async fn timeout_blocks_and_leaves_request_pending() {
        let dir = tempdir().unwrap();
        let (registry, calls) = counting_registry();
        let gw = gateway(&dir, vec![PermissionScope::require_approval("deploy")])
            .with_executors(registry)
            .with_approval_timeout(Duration::from_millis(50));

        let result = gw.run(deploy("api"), false).await;
        assert_eq!(result.decision, Decision::Block);
        assert_eq!(result.error.as_deref(), Some("approval timed out"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let records = gw.approvals().get_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ApprovalStatus::Pending);
    }

    #[tokio::test]
    async fn identical_concurrent_requests_share_one_approval() {
        let dir = tempdir().unwrap();
        let (registry, calls) = counting_registry();
        let gw = Arc::new(
            gateway(&dir, vec![PermissionScope::require_approval("deploy")]).with_executors(registry),
        );

        let runs: Vec<_> = (0..3)
            .map(|_| {
                let gw = Arc::clone(&gw);
                tokio::spawn(async move { gw.run(deploy("api"), false).await })
            })
            .collect();

        // Wait for the shared pending record, then approve it once.
        let store = ApprovalStore::open(&config(&dir).approvals_file).unwrap();
        let id = loop {
            if let Some(request) = store.get_all().unwrap().first() {
                break request.id.clone();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        store.update_status(&id, ApprovalStatus::Approved).unwrap();

        for run in runs {
            assert_eq!(run.await.unwrap().decision, Decision::Allow);
        }
        assert_eq!(store.get_all().unwrap().len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn executor_failure_keeps_allow_decision() {
        let dir = tempdir().unwrap();
        let registry = ExecutorRegistry::new()
            .with("deploy", |_: &Params| -> Result<Value, ExecutorError> {
                Err(ExecutorError::failed("cluster unreachable"))
            })
            .with("explode", |_: &Params| -> Result<Value, ExecutorError> {
                panic!("executor bug")
            });
        let gw = gateway(
            &dir,
            vec![PermissionScope::allow("deploy"), PermissionScope::allow("explode")],
        )
        .with_executors(registry);

        let failed = gw.run(deploy("api"), false).await;
        assert_eq!(failed.decision, Decision::Allow);
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("cluster unreachable"));

        let panicked = gw.run(Action::new("agent-1", "explode"), false).await;
        assert_eq!(panicked.decision, Decision::Allow);
        assert!(!panicked.success);
        assert!(panicked.error.unwrap().contains("executor bug"));

        let entries = gw.audit_log().entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(!entries[0].result.success);
    }

    #[tokio::test]
    async fn allowed_action_without_executor_fails() {
        let dir = tempdir().unwrap();
        let gw = gateway(&dir, vec![PermissionScope::allow("launch_rocket")]);
        let result = gw.run(Action::new("agent-1", "launch_rocket"), false).await;
        assert_eq!(result.decision, Decision::Allow);
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Unknown action type"));
    }

    #[tokio::test]
    async fn strict_audit_failure_fails_result_but_keeps_decision() {
        let dir = tempdir().unwrap();
        let mut cfg = config(&dir);
        cfg.strict_logging = true;
        let gw = ExecutionGateway::new(Policy::new(vec![PermissionScope::allow("deploy")]).unwrap(), &cfg)
            .unwrap()
            .with_executors(counting_registry().0);
        // A directory where the log file should be makes every append fail.
        std::fs::create_dir_all(&cfg.audit_log).unwrap();

        let result = gw.run(deploy("api"), false).await;
        assert_eq!(result.decision, Decision::Allow);
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("audit log write failed"));
    }

    #[tokio::test]
    async fn lenient_audit_failure_is_swallowed() {
        let dir = tempdir().unwrap();
        let cfg = config(&dir);
        let gw = ExecutionGateway::new(Policy::new(vec![PermissionScope::allow("deploy")]).unwrap(), &cfg)
            .unwrap()
            .with_executors(counting_registry().0);
        std::fs::create_dir_all(&cfg.audit_log).unwrap();

        let result = gw.run(deploy("api"), false).await;
        assert!(result.success);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn keyed_config_signs_the_chain() {
        let dir = tempdir().unwrap();
        let mut cfg = config(&dir);
        cfg.signing_secret = Some("s3cret".into());
        let gw = ExecutionGateway::new(Policy::new(vec![PermissionScope::allow("deploy")]).unwrap(), &cfg)
            .unwrap()
            .with_executors(counting_registry().0);

        gw.run(deploy("api"), false).await;
        gw.run(deploy("web"), false).await;
        assert!(gw.audit_log().is_keyed());
        assert!(gw.audit_log().verify_chain().unwrap().is_valid());
        assert!(gw
            .audit_log()
            .entries()
            .unwrap()
            .iter()
            .all(|e| e.signature.is_some()));
    }

    impl ExecutionGateway {
        /// Borrowing variant of `with_approval_timeout` for tests that keep
        /// using the same gateway.
        fn with_approval_timeout_for_test(&self, timeout: Duration) -> ExecutionGateway {
            ExecutionGateway {
                engine: Arc::clone(&self.engine),
                approvals: Arc::clone(&self.approvals),
                audit: Arc::clone(&self.audit),
                executors: Arc::clone(&self.executors),
                prompt: None,
                approval_timeout: timeout,
                poll_interval: self.poll_interval,
            }
        }
    }
}
