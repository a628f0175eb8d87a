//! # permiscope-cli
//!
//! Command-line interface for Permiscope.
//!
//! Operator tooling around the shared on-disk state:
//! - `permiscope audit verify/tail` — inspect the tamper-evident audit trail
//! - `permiscope approvals list/approve/reject/revoke/prune` — manage grants
//! - `permiscope run <action> [key=value...]` — run one action through the gateway

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use permiscope_gateway::GatewayConfig;
use tracing_subscriber::EnvFilter;

/// Permiscope CLI — policy-gated execution for agent actions.
#[derive(Parser)]
#[command(name = "permiscope", version, about)]
struct Cli {
    /// Project root directory (defaults to current directory).
    #[arg(long, default_value = ".")]
    project_root: PathBuf,

    /// Gateway config file (TOML). Overrides the project layout.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect the audit trail.
    Audit {
        #[command(subcommand)]
        command: commands::audit::AuditCommands,
    },
    /// Review and manage approval requests.
    Approvals {
        #[command(subcommand)]
        command: commands::approvals::ApprovalCommands,
    },
    /// Run a single action through the gateway under the default policy.
    Run(commands::run::RunArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries command output only.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("permiscope=info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let config = load_config(&cli)?;

    match &cli.command {
        Commands::Audit { command } => commands::audit::execute(command, &config),
        Commands::Approvals { command } => commands::approvals::execute(command, &config),
        Commands::Run(args) => commands::run::execute(args, &config),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<GatewayConfig> {
    let config = match &cli.config {
        Some(path) => GatewayConfig::load(path)?,
        None => {
            let project_root = cli
                .project_root
                .canonicalize()
                .unwrap_or_else(|_| cli.project_root.clone());
            GatewayConfig::for_project(&project_root)
        }
    };
    let config = config.with_env_overrides()?;
    tracing::debug!(
        approvals = %config.approvals_file.display(),
        audit_log = %config.audit_log.display(),
        "loaded gateway config"
    );
    Ok(config)
}
