//! Guardrail CLI commands.

use clap::Subcommand;
use uuid::Uuid;

use crate::cli::Runtime;

#[derive(Subcommand, Debug, Clone)]
pub enum GuardrailCommand {
    /// Show guardrail flags, budgets, and pending approvals
    Status,

    /// Turn dry-run mode on (actions are simulated, never executed)
    DryRun,

    /// Turn dry-run mode off
    Normal,

    /// Engage the emergency brake (denies every autonomous action)
    Brake,

    /// Release the emergency brake
    Release,

    /// Grant a pending approval (single use)
    Approve {
        /// Approval id from `guardrail status`
        approval_id: String,
    },

    /// Reject and remove a pending approval
    Deny {
        /// Approval id from `guardrail status`
        approval_id: String,
    },
}

/// Run a guardrail command.
pub async fn run_guardrail_command(cmd: GuardrailCommand) -> anyhow::Result<()> {
    let runtime = Runtime::init()?;
    let gate = &runtime.gate;

    match cmd {
        GuardrailCommand::Status => {
            let status = gate.status().await;
            println!(
                "dry_run: {}\nemergency_brake: {}",
                status.dry_run, status.emergency_brake
            );
            println!(
                "actions this hour: {}/{}{}",
                status.actions_this_hour,
                status.hourly_budget,
                status
                    .window_resets_at
                    .map(|t| format!(" (window resets {})", t.format("%H:%M:%S")))
                    .unwrap_or_default()
            );
            if status.blocked.is_empty() {
                println!("blocked actions: none");
            } else {
                println!("blocked actions: {}", status.blocked.join(", "));
            }
            if status.pending.is_empty() {
                println!("pending approvals: none");
            } else {
                println!("pending approvals:");
                for p in status.pending {
                    println!(
                        "  {}  {}  [{}]  {}",
                        p.approval_id,
                        p.action,
                        if p.approved { "approved" } else { "waiting" },
                        p.description
                    );
                }
            }
        }

        GuardrailCommand::DryRun => {
            gate.set_dry_run(true).await?;
            println!("Dry-run mode on: autonomous actions are simulated only.");
        }

        GuardrailCommand::Normal => {
            gate.set_dry_run(false).await?;
            println!("Dry-run mode off.");
        }

        GuardrailCommand::Brake => {
            gate.set_emergency_brake(true).await?;
            println!("Emergency brake engaged: every autonomous action is denied (emergency_brake_active).");
        }

        GuardrailCommand::Release => {
            gate.set_emergency_brake(false).await?;
            println!("Emergency brake released.");
        }

        GuardrailCommand::Approve { approval_id } => {
            let id = parse_approval_id(&approval_id)?;
            gate.approve(id).await?;
            println!("Approved {}. The grant is consumed by the next matching action.", id);
        }

        GuardrailCommand::Deny { approval_id } => {
            let id = parse_approval_id(&approval_id)?;
            gate.deny_approval(id).await?;
            println!("Denied {}.", id);
        }
    }

    Ok(())
}

fn parse_approval_id(s: &str) -> anyhow::Result<Uuid> {
    s.parse()
        .map_err(|_| anyhow::anyhow!("invalid approval id: {}", s))
}
