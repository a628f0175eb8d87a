// approvals.rs — Approval subcommands: list, approve, reject, revoke, prune.
//
// These operate on the shared approval store, so a decision made here is
// seen by any gateway currently waiting on the same file.

use clap::Subcommand;
use permiscope_approval::{ApprovalRequest, ApprovalStatus, ApprovalStore};
use permiscope_gateway::GatewayConfig;

#[derive(Subcommand)]
pub enum ApprovalCommands {
    /// List approval requests.
    List {
        /// Only show requests with this status (pending, approved, rejected).
        #[arg(long)]
        status: Option<String>,
    },
    /// Approve a pending request by id.
    Approve {
        /// Request id (see `permiscope approvals list`).
        id: String,
    },
    /// Reject a request by id.
    Reject {
        /// Request id (see `permiscope approvals list`).
        id: String,
    },
    /// Remove a request or grant by id.
    Revoke {
        /// Request id (see `permiscope approvals list`).
        id: String,
    },
    /// Remove approvals whose grant has expired.
    Prune,
}

pub fn execute(cmd: &ApprovalCommands, config: &GatewayConfig) -> anyhow::Result<()> {
    let store = ApprovalStore::open(&config.approvals_file)?.with_ttl(config.approval_ttl());

    match cmd {
        ApprovalCommands::List { status } => {
            let filter = status.as_deref().map(parse_status).transpose()?;
            let records: Vec<ApprovalRequest> = store
                .get_all()?
                .into_iter()
                .filter(|r| filter.map_or(true, |s| r.status == s))
                .collect();

            if records.is_empty() {
                println!("No approval requests.");
                return Ok(());
            }

            let now = chrono::Utc::now();
            println!(
                "{:<10} {:<18} {:<14} {:<20} {:<20} ID",
                "STATUS", "AGENT", "ACTION", "REQUESTED", "EXPIRES"
            );
            println!("{}", "-".repeat(100));
            for record in &records {
                let expires = match record.grant_expiry(store.ttl()) {
                    Some(at) if at <= now => "expired".to_string(),
                    Some(at) => at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    None => "-".to_string(),
                };
                println!(
                    "{:<10} {:<18} {:<14} {:<20} {:<20} {}",
                    record.status.to_string(),
                    record.agent_id,
                    record.action_name,
                    record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    expires,
                    record.id,
                );
            }
            println!();
            println!("{} request(s).", records.len());
        }

        ApprovalCommands::Approve { id } => decide(&store, id, ApprovalStatus::Approved)?,
        ApprovalCommands::Reject { id } => decide(&store, id, ApprovalStatus::Rejected)?,

        ApprovalCommands::Revoke { id } => {
            if !store.revoke(id)? {
                anyhow::bail!("No approval request with id {}", id);
            }
            println!("Revoked {}", id);
        }

        ApprovalCommands::Prune => {
            let removed = store.clear_expired()?;
            println!("Removed {} expired grant(s).", removed);
        }
    }

    Ok(())
}

fn decide(store: &ApprovalStore, id: &str, status: ApprovalStatus) -> anyhow::Result<()> {
    let Some(record) = store.update_status(id, status)? else {
        anyhow::bail!("No approval request with id {}", id);
    };
    println!(
        "{} {} for agent '{}' ({})",
        record.status, record.action_name, record.agent_id, record.id
    );
    Ok(())
}

fn parse_status(raw: &str) -> anyhow::Result<ApprovalStatus> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "pending" => Ok(ApprovalStatus::Pending),
        "approved" => Ok(ApprovalStatus::Approved),
        "rejected" => Ok(ApprovalStatus::Rejected),
        other => anyhow::bail!(
            "unknown status '{}' (expected pending, approved, or rejected)",
            other
        ),
    }
}
