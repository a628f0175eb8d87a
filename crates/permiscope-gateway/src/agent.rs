// agent.rs — Caller-facing adapter over the gateway.
//
// Agent code wants "do this, give me the output or an error". `Agent::act`
// builds the Action (agent id, shadow flag, timestamp), runs it through the
// gateway, and turns any unsuccessful result into `GatewayError::Blocked`.

use std::sync::Arc;

use serde_json::Value;

use permiscope_policy::{Action, Params, Policy};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::executor::ExecutorRegistry;
use crate::gateway::ExecutionGateway;

pub const DEFAULT_AGENT_ID: &str = "permiscope-agent";

/// A named agent acting through a shared gateway.
#[derive(Debug, Clone)]
pub struct Agent {
    gateway: Arc<ExecutionGateway>,
    agent_id: String,
    shadow_mode: bool,
}

impl Agent {
    pub fn new(gateway: Arc<ExecutionGateway>) -> Self {
        Self {
            gateway,
            agent_id: DEFAULT_AGENT_ID.to_string(),
            shadow_mode: false,
        }
    }

    /// Build a gateway for `policy` and wrap it.
    pub fn from_policy(
        policy: Policy,
        config: &GatewayConfig,
        executors: ExecutorRegistry,
    ) -> Result<Self, GatewayError> {
        let gateway = ExecutionGateway::new(policy, config)?.with_executors(executors);
        Ok(Self::new(Arc::new(gateway)))
    }

    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }

    /// In shadow mode blocked actions report fake success instead of failing.
    pub fn with_shadow_mode(mut self, shadow_mode: bool) -> Self {
        self.shadow_mode = shadow_mode;
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn gateway(&self) -> &Arc<ExecutionGateway> {
        &self.gateway
    }

    /// Perform an action as this agent. Returns the executor's output.
    pub async fn act(&self, action_name: &str, params: Params) -> Result<Value, GatewayError> {
        self.act_as(&self.agent_id, action_name, params).await
    }

    /// Perform an action under a different agent id.
    pub async fn act_as(
        &self,
        agent_id: &str,
        action_name: &str,
        params: Params,
    ) -> Result<Value, GatewayError> {
        let mut action = Action::new(agent_id, action_name).with_params(params);
        action.shadow_mode = self.shadow_mode;

        let result = self.gateway.run(action, false).await;
        if !result.success {
            return Err(GatewayError::Blocked {
                decision: result.decision,
                reason: result.error.unwrap_or_else(|| "policy violation".to_string()),
            });
        }
        Ok(result.output.unwrap_or(Value::Null))
    }
}
