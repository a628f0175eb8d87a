// action.rs — The unit submitted for governance.
//
// An Action is built per call by whoever wants something done (an agent, a
// CLI, a workflow step) and handed to the gateway. It is never persisted on
// its own; it only appears inside audit entries.
//
// `action_name` is an open string rather than an enum: new action kinds need
// a policy scope and (optionally) an executor, never a change here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Parameter map attached to an action.
pub type Params = Map<String, Value>;

/// Built-in action: read a file (`path`).
pub const READ_FILE: &str = "read_file";
/// Built-in action: write a file (`path`, `content`).
pub const WRITE_FILE: &str = "write_file";
/// Built-in action: run a shell command (`command`).
pub const RUN_COMMAND: &str = "run_command";

/// A named, parameterized request to perform an external effect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    /// What the caller wants to do (e.g., "write_file", "send_email").
    pub action_name: String,

    /// Action arguments. Key order carries no meaning.
    #[serde(default)]
    pub parameters: Params,

    /// Which agent is asking.
    pub agent_id: String,

    /// Free-form justification shown to human approvers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// When the action was submitted.
    pub timestamp: DateTime<Utc>,

    /// If set, a blocked action is reported as successful without running.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub shadow_mode: bool,
}

impl Action {
    /// Create an action with no parameters, stamped with the current time.
    pub fn new(agent_id: impl Into<String>, action_name: impl Into<String>) -> Self {
        Self {
            action_name: action_name.into(),
            parameters: Params::new(),
            agent_id: agent_id.into(),
            reason: None,
            timestamp: Utc::now(),
            shadow_mode: false,
        }
    }

    /// Add one parameter and return self (builder pattern).
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Replace the whole parameter map.
    pub fn with_params(mut self, params: Params) -> Self {
        self.parameters = params;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Mark the action for shadow mode.
    pub fn shadowed(mut self) -> Self {
        self.shadow_mode = true;
        self
    }

    /// Look up a string parameter. Non-string values count as absent.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }
}

/// Serialize a JSON value with object keys sorted at every depth.
///
/// Two values that differ only in key insertion order produce the same
/// string. Used for approval request keys and audit signatures.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Value::String's Display produces a correctly escaped JSON string.
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
