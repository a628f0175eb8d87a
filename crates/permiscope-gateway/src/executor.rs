// executor.rs — Side-effect executors for allowed actions.
//
// The gateway never performs an effect itself. It looks the action name up
// in an ExecutorRegistry: caller-registered executors first, then the
// built-in read_file / write_file / run_command set. Executors are
// synchronous; the gateway runs them on a blocking thread.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::process::Command;
use std::sync::Arc;

use serde_json::Value;

use permiscope_policy::{Params, READ_FILE, RUN_COMMAND, WRITE_FILE};

use crate::error::ExecutorError;

/// Performs the side effect of one kind of action.
///
/// Any `Fn(&Params) -> Result<Value, ExecutorError>` closure is an executor.
pub trait ActionExecutor: Send + Sync {
    fn invoke(&self, params: &Params) -> Result<Value, ExecutorError>;
}

impl<F> ActionExecutor for F
where
    F: Fn(&Params) -> Result<Value, ExecutorError> + Send + Sync,
{
    fn invoke(&self, params: &Params) -> Result<Value, ExecutorError> {
        self(params)
    }
}

/// Reads `path` as UTF-8 text.
pub struct ReadFileExecutor;

impl ActionExecutor for ReadFileExecutor {
    fn invoke(&self, params: &Params) -> Result<Value, ExecutorError> {
        let path = require_str(params, "path")?;
        let content = std::fs::read_to_string(path).map_err(|source| ExecutorError::Io {
            path: path.to_string(),
            source,
        })?;
        Ok(Value::String(content))
    }
}

/// Writes `content` (default empty) to `path`.
pub struct WriteFileExecutor;

impl ActionExecutor for WriteFileExecutor {
    fn invoke(&self, params: &Params) -> Result<Value, ExecutorError> {
        let path = require_str(params, "path")?;
        let content = match params.get("content") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };
        std::fs::write(path, content).map_err(|source| ExecutorError::Io {
            path: path.to_string(),
            source,
        })?;
        Ok(Value::String(format!("File written to {}", path)))
    }
}

/// Runs `command` through the platform shell and returns trimmed stdout.
pub struct RunCommandExecutor;

impl ActionExecutor for RunCommandExecutor {
    fn invoke(&self, params: &Params) -> Result<Value, ExecutorError> {
        let command = require_str(params, "command")?;
        let output = shell(command)
            .output()
            .map_err(|e| ExecutorError::CommandFailed(e.to_string()))?;

        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            return Ok(Value::String(stdout.trim().to_string()));
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(ExecutorError::CommandFailed(if stderr.is_empty() {
            output.status.to_string()
        } else {
            stderr
        }))
    }
}

fn shell(command: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    }
}

fn require_str<'a>(params: &'a Params, key: &str) -> Result<&'a str, ExecutorError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ExecutorError::MissingParameter(key.to_string()))
}

/// Maps action names to executors.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    custom: HashMap<String, Arc<dyn ActionExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor for an action name, replacing any previous one.
    /// Registered executors take precedence over the built-ins.
    pub fn register(&mut self, action_name: impl Into<String>, executor: impl ActionExecutor + 'static) {
        self.custom.insert(action_name.into(), Arc::new(executor));
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, action_name: impl Into<String>, executor: impl ActionExecutor + 'static) -> Self {
        self.register(action_name, executor);
        self
    }

    pub fn resolve(&self, action_name: &str) -> Option<Arc<dyn ActionExecutor>> {
        if let Some(executor) = self.custom.get(action_name) {
            return Some(Arc::clone(executor));
        }
        match action_name {
            READ_FILE => Some(Arc::new(ReadFileExecutor)),
            WRITE_FILE => Some(Arc::new(WriteFileExecutor)),
            RUN_COMMAND => Some(Arc::new(RunCommandExecutor)),
            _ => None,
        }
    }

    /// Run the executor for `action_name`. Panics become `ExecutorError::Panicked`.
    pub fn execute(&self, action_name: &str, params: &Params) -> Result<Value, ExecutorError> {
        let executor = self
            .resolve(action_name)
            .ok_or_else(|| ExecutorError::UnknownAction(action_name.to_string()))?;
        match catch_unwind(AssertUnwindSafe(|| executor.invoke(params))) {
            Ok(result) => result,
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                tracing::warn!(action = %action_name, panic = %msg, "executor panicked");
                Err(ExecutorError::Panicked(msg))
            }
        }
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.custom.keys().collect();
        names.sort();
        f.debug_struct("ExecutorRegistry").field("custom", &names).finish()
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
