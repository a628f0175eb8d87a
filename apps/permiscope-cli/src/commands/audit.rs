// audit.rs — Audit subcommands: verify, tail.

use std::path::PathBuf;

use clap::Subcommand;
use permiscope_audit::{verify_file, AuditLog, ChainHasher};
use permiscope_gateway::GatewayConfig;

#[derive(Subcommand)]
pub enum AuditCommands {
    /// Verify the audit log hash chain (and signatures, when a secret is configured).
    Verify {
        /// Path to audit log (defaults to .permiscope/audit.log).
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Show recent audit entries.
    Tail {
        /// Path to audit log (defaults to .permiscope/audit.log).
        #[arg(long)]
        log: Option<PathBuf>,
        /// Number of entries to show.
        #[arg(short, default_value = "10")]
        n: usize,
        /// Print raw JSON lines instead of a table.
        #[arg(long)]
        json: bool,
    },
}

pub fn execute(cmd: &AuditCommands, config: &GatewayConfig) -> anyhow::Result<()> {
    match cmd {
        AuditCommands::Verify { log } => {
            let path = log.clone().unwrap_or_else(|| config.audit_log.clone());
            if !path.exists() {
                println!("No audit log found at {}", path.display());
                return Ok(());
            }

            let hasher = ChainHasher::new(config.signing_secret.as_deref());
            let report = verify_file(&path, &hasher)?;
            if report.is_valid() {
                println!(
                    "Audit log verified: {} entr{}, hash chain intact{}.",
                    report.entries,
                    if report.entries == 1 { "y" } else { "ies" },
                    if hasher.is_keyed() { ", signatures valid" } else { "" },
                );
                return Ok(());
            }

            println!(
                "INTEGRITY VIOLATION: {} problem(s) in {} entr{}:",
                report.violations.len(),
                report.entries,
                if report.entries == 1 { "y" } else { "ies" },
            );
            for violation in &report.violations {
                println!("  {}", violation);
            }
            println!();
            println!("The audit log may have been tampered with.");
            anyhow::bail!("Audit log integrity check failed");
        }

        AuditCommands::Tail { log, n, json } => {
            let path = log.clone().unwrap_or_else(|| config.audit_log.clone());
            if !path.exists() {
                println!("No audit log found at {}", path.display());
                return Ok(());
            }

            let entries = AuditLog::read_all(&path)?;
            let start = entries.len().saturating_sub(*n);
            let recent = &entries[start..];

            if recent.is_empty() {
                println!("No audit entries.");
                return Ok(());
            }

            if *json {
                for entry in recent {
                    println!("{}", serde_json::to_string(entry)?);
                }
                return Ok(());
            }

            println!(
                "{:<20} {:<18} {:<14} {:<17} RESULT",
                "TIMESTAMP", "AGENT", "ACTION", "DECISION"
            );
            println!("{}", "-".repeat(90));

            for entry in recent {
                let outcome = match (&entry.result.error, entry.result.success) {
                    (_, true) if entry.result.dry_run => "dry run".to_string(),
                    (_, true) => "ok".to_string(),
                    (Some(error), false) => error.clone(),
                    (None, false) => "failed".to_string(),
                };
                println!(
                    "{:<20} {:<18} {:<14} {:<17} {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.agent_id,
                    entry.action.action_name,
                    entry.decision.to_string(),
                    outcome,
                );
            }
        }
    }

    Ok(())
}
