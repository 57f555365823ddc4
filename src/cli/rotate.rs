//! Rotation CLI commands
//!
//! Operator surface for the key rotation lifecycle: start a plan, drive it
//! through re-encryption and retirement, pause it, abort it before any
//! batch has committed, and inspect history.

use clap::Subcommand;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::error::{VaultError, VaultResult};
use crate::models::{PlanId, RotationPlan, RotationStatus};
use crate::rotation::RotationCoordinator;

use super::context::CryptoContext;
use super::migrate::format_instant;

/// Rotation subcommands
#[derive(Subcommand)]
pub enum RotateCommands {
    /// Install the next key version and plan the drain of the old one
    Start {
        /// Reason recorded with the plan
        #[arg(short, long)]
        reason: Option<String>,
    },
    /// Run a plan forward: re-encrypt, verify, retire the old key
    Run {
        /// Plan id; omit to use the active plan
        plan: Option<String>,
    },
    /// Ask the running plan to stop after its current batch
    Pause {
        /// Plan id; omit to use the active plan
        plan: Option<String>,
    },
    /// Abort a plan before any batch has committed
    Abort {
        /// Plan id; omit to use the active plan
        plan: Option<String>,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Rotate immediately in response to suspected key compromise
    Emergency {
        /// What prompted the rotation
        #[arg(short, long)]
        reason: String,
    },
    /// Show the active plan and rotation history
    Status,
}

/// Handle a rotation command
pub fn handle_rotate_command(ctx: &CryptoContext, cmd: RotateCommands) -> VaultResult<()> {
    let rotation = ctx.rotation();

    match cmd {
        RotateCommands::Start { reason } => {
            let plan = rotation.create_plan(reason)?;
            println!(
                "Created rotation plan {}: v{} -> v{}",
                plan.id, plan.from_version, plan.to_version
            );
            println!("  New writes already use v{}.", plan.to_version);
            println!("  Tables to re-encrypt: {}", plan.tables.join(", "));
            println!();
            println!("Run 'fieldvault rotate run' to drain v{}.", plan.from_version);
        }

        RotateCommands::Run { plan } => {
            let plan_id = resolve_or_active(&rotation, plan.as_deref())?;
            let done = rotation.execute(plan_id)?;
            match done.status {
                RotationStatus::Completed => {
                    println!(
                        "Rotation {} completed: v{} retired, v{} active.",
                        done.id, done.from_version, done.to_version
                    );
                }
                _ if done.pause_requested => {
                    println!(
                        "Rotation {} paused. Run it again to resume.",
                        done.id
                    );
                }
                _ => {
                    println!("Rotation {} is {}.", done.id, done.status);
                }
            }
        }

        RotateCommands::Pause { plan } => {
            let plan_id = resolve_or_active(&rotation, plan.as_deref())?;
            let paused = rotation.pause(plan_id)?;
            println!(
                "Pause requested for {}; it stops after the batch in flight.",
                paused.id
            );
        }

        RotateCommands::Abort { plan, yes } => {
            let plan_id = resolve_or_active(&rotation, plan.as_deref())?;

            if !yes {
                print!("This removes the new key version and reactivates the old one. Continue? (yes/no): ");
                std::io::Write::flush(&mut std::io::stdout())?;

                let mut confirm = String::new();
                std::io::stdin().read_line(&mut confirm)?;
                if confirm.trim().to_lowercase() != "yes" {
                    println!("Aborted.");
                    return Ok(());
                }
            }

            let reverted = rotation.abort(plan_id)?;
            println!(
                "Rotation {} aborted; v{} is active again.",
                reverted.id, reverted.from_version
            );
        }

        RotateCommands::Emergency { reason } => {
            let done = rotation.emergency_rotation(&reason)?;
            println!(
                "Emergency rotation {} completed: v{} retired, v{} active.",
                done.id, done.from_version, done.to_version
            );
        }

        RotateCommands::Status => {
            match rotation.active_plan()? {
                Some(plan) => print_plan_details(&plan),
                None => println!("No active rotation plan."),
            }

            let plans = rotation.list_plans()?;
            if !plans.is_empty() {
                println!();
                println!("History:");
                print_plan_table(&plans);
            }
        }
    }

    Ok(())
}

/// Accept a full id, a unique prefix, or fall back to the active plan
fn resolve_or_active(rotation: &RotationCoordinator, input: Option<&str>) -> VaultResult<PlanId> {
    let input = match input {
        Some(s) => s,
        None => {
            return rotation.active_plan()?.map(|plan| plan.id).ok_or_else(|| {
                VaultError::Validation(
                    "no active rotation plan; run `fieldvault rotate start` first".to_string(),
                )
            });
        }
    };

    if let Ok(id) = input.parse::<PlanId>() {
        return Ok(id);
    }

    let needle = input.strip_prefix("plan-").unwrap_or(input);
    let matches: Vec<PlanId> = rotation
        .list_plans()?
        .iter()
        .filter(|p| p.id.as_uuid().to_string().starts_with(needle))
        .map(|p| p.id)
        .collect();

    match matches.as_slice() {
        [only] => Ok(*only),
        [] => Err(VaultError::plan_not_found(input)),
        _ => Err(VaultError::Validation(format!(
            "'{}' matches more than one plan; use the full id",
            input
        ))),
    }
}

#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "Plan")]
    id: String,
    #[tabled(rename = "Versions")]
    versions: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Started")]
    started: String,
    #[tabled(rename = "Finished")]
    finished: String,
}

fn print_plan_table(plans: &[RotationPlan]) {
    let rows: Vec<PlanRow> = plans
        .iter()
        .map(|plan| PlanRow {
            id: plan.id.to_string(),
            versions: format!("v{} -> v{}", plan.from_version, plan.to_version),
            status: plan.status.to_string(),
            started: plan.started_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            finished: format_instant(&plan.completed_at),
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::sharp());
    println!("{}", table);
}

fn print_plan_details(plan: &RotationPlan) {
    println!("Rotation plan {}", plan.id);
    println!("  Versions: v{} -> v{}", plan.from_version, plan.to_version);
    println!("  Status:   {}", plan.status);
    if let Some(reason) = &plan.reason {
        println!("  Reason:   {}", reason);
    }
    if plan.pause_requested {
        println!("  Pause requested.");
    }
    for table in &plan.tables {
        println!("  {}: re-encrypted through rowid {}", table, plan.cursor_for(table));
    }
    if let Some(error) = &plan.last_error {
        println!("  Last error: {}", error);
    }
}
