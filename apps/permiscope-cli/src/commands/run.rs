// run.rs — `permiscope run`: submit one action to the gateway.
//
// Builds the gateway from the project config with the built-in executors
// and the default policy (or a policy file), asks on the terminal when
// approval is required, and prints the executor output on stdout.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use serde_json::Value;

use permiscope_gateway::{ExecutionGateway, GatewayConfig, TerminalPrompt, DEFAULT_AGENT_ID};
use permiscope_policy::{default_policy, Action, Params, Policy};

#[derive(Args)]
pub struct RunArgs {
    /// Action name (e.g., run_command, read_file, write_file).
    pub action: String,

    /// Parameters as `key=value` (string) or `key:=json` (raw JSON value).
    pub params: Vec<String>,

    /// Agent id recorded in approvals and the audit log.
    #[arg(long, default_value = DEFAULT_AGENT_ID)]
    pub agent: String,

    /// Justification shown to the approver.
    #[arg(long)]
    pub reason: Option<String>,

    /// Policy file (YAML, or JSON by extension). Defaults to the built-in policy.
    #[arg(long)]
    pub policy: Option<PathBuf>,

    /// Evaluate and audit without executing or requesting approval.
    #[arg(long)]
    pub dry_run: bool,

    /// Report blocked actions as successful without running them.
    #[arg(long)]
    pub shadow: bool,

    /// Print the full gateway result as JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: &RunArgs, config: &GatewayConfig) -> anyhow::Result<()> {
    let policy = match &args.policy {
        Some(path) => Policy::load(path)
            .with_context(|| format!("failed to load policy {}", path.display()))?,
        None => default_policy()?,
    };

    let mut action = Action::new(&args.agent, &args.action).with_params(parse_params(&args.params)?);
    if let Some(reason) = &args.reason {
        action = action.with_reason(reason);
    }
    if args.shadow {
        action = action.shadowed();
    }

    let gateway = ExecutionGateway::new(policy, config)?.with_prompt(Arc::new(TerminalPrompt::stdio()));

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(gateway.run(action, args.dry_run));
    // A prompt abandoned for a store decision or timeout is still blocked on stdin.
    runtime.shutdown_background();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        match &result.output {
            Some(Value::String(s)) => println!("{}", s),
            Some(other) => println!("{}", serde_json::to_string_pretty(other)?),
            None if result.success => println!("{} (no output)", result.decision),
            None => {}
        }
    }

    if !result.success {
        anyhow::bail!(
            "{}: {}",
            result.decision,
            result.error.as_deref().unwrap_or("action did not run")
        );
    }
    Ok(())
}

/// Parse `key=value` / `key:=json` arguments. Later keys overwrite earlier ones.
fn parse_params(raw: &[String]) -> anyhow::Result<Params> {
    let mut params = Params::new();
    for arg in raw {
        if let Some((key, json)) = arg.split_once(":=") {
            let value = serde_json::from_str(json)
                .with_context(|| format!("invalid JSON for parameter '{}'", key))?;
            params.insert(checked_key(key, arg)?, value);
        } else if let Some((key, value)) = arg.split_once('=') {
            params.insert(checked_key(key, arg)?, Value::String(value.to_string()));
        } else {
            anyhow::bail!("parameter '{}' must be key=value or key:=json", arg);
        }
    }
    Ok(params)
}

fn checked_key(key: &str, arg: &str) -> anyhow::Result<String> {
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("parameter '{}' has an empty key", arg);
    }
    Ok(key.to_string())
}
