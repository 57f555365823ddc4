//! Migration CLI commands
//!
//! Operator surface for moving existing plaintext columns into envelopes:
//! plan a table, run in batches, watch progress, pause, and roll back an
//! unfinished job.

use clap::Subcommand;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::error::{VaultError, VaultResult};
use crate::migration::Migrator;
use crate::models::{JobId, MigrationJob, MigrationStatus};

use super::context::CryptoContext;

/// Migration subcommands
#[derive(Subcommand)]
pub enum MigrateCommands {
    /// Plan a migration job for one table
    Plan {
        /// Table with declared sensitive columns
        table: String,
    },
    /// Run a job forward in batches until done or paused
    Run {
        /// Job id (full, or the short form shown in listings)
        job: String,
        /// Rows per batch
        #[arg(short, long)]
        batch_size: Option<usize>,
        /// Report what would happen without writing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Show one job, or all jobs
    Status {
        /// Job id; omit to list every job
        job: Option<String>,
    },
    /// Ask a running job to stop after its current batch
    Pause {
        /// Job id
        job: String,
    },
    /// Restore the committed rows of an unfinished job to plaintext
    Rollback {
        /// Job id
        job: String,
        /// Rows per batch
        #[arg(short, long)]
        batch_size: Option<usize>,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

/// Handle a migration command
pub fn handle_migrate_command(ctx: &CryptoContext, cmd: MigrateCommands) -> VaultResult<()> {
    let migrator = ctx.migrator();
    let default_batch = ctx.ops.settings.batch_size;

    match cmd {
        MigrateCommands::Plan { table } => {
            let job = migrator.plan(&table)?;
            println!("Planned migration {} for table '{}'", job.id, job.table);
            println!("  Rows to examine: {}", job.total_rows);
            println!();
            println!("Run 'fieldvault migrate run {}' to start.", job.id);
        }

        MigrateCommands::Run {
            job,
            batch_size,
            dry_run,
        } => {
            let job_id = resolve_job(&migrator, &job)?;
            let batch = batch_size.unwrap_or(default_batch);

            if dry_run {
                let report = migrator.dry_run(job_id, batch)?;
                println!("Dry run for {} on '{}':", report.job_id, report.table);
                println!("  Rows remaining:    {}", report.rows_remaining);
                println!("  Values to encrypt: {}", report.values_to_encrypt);
                println!("  Already encrypted: {}", report.values_already_encrypted);
                return Ok(());
            }

            let done = migrator.execute(job_id, batch)?;
            match done.status {
                MigrationStatus::Paused => {
                    println!(
                        "Migration {} paused at rowid {}. Run it again to resume.",
                        done.id, done.cursor
                    );
                }
                _ => {
                    println!(
                        "Migration {} completed: {} rows examined, {} value(s) already encrypted.",
                        done.id, done.processed_rows, done.skipped_values
                    );
                }
            }
        }

        MigrateCommands::Status { job } => match job {
            Some(input) => {
                let job = migrator.status(resolve_job(&migrator, &input)?)?;
                print_job_details(&job);
            }
            None => {
                let jobs = migrator.list_jobs()?;
                if jobs.is_empty() {
                    println!("No migration jobs.");
                } else {
                    print_job_table(&jobs);
                }
            }
        },

        MigrateCommands::Pause { job } => {
            let paused = migrator.pause(resolve_job(&migrator, &job)?)?;
            println!(
                "Pause requested for {}; it stops after the batch in flight.",
                paused.id
            );
        }

        MigrateCommands::Rollback {
            job,
            batch_size,
            yes,
        } => {
            let job_id = resolve_job(&migrator, &job)?;

            if !yes {
                print!("This restores already-encrypted values to plaintext. Continue? (yes/no): ");
                std::io::Write::flush(&mut std::io::stdout())?;

                let mut confirm = String::new();
                std::io::stdin().read_line(&mut confirm)?;
                if confirm.trim().to_lowercase() != "yes" {
                    println!("Aborted.");
                    return Ok(());
                }
            }

            let rolled = migrator.rollback(job_id, batch_size.unwrap_or(default_batch))?;
            println!(
                "Migration {} rolled back; rows up to the cursor hold plaintext again.",
                rolled.id
            );
        }
    }

    Ok(())
}

/// Accept a full id or a unique prefix of one
fn resolve_job(migrator: &Migrator, input: &str) -> VaultResult<JobId> {
    if let Ok(id) = input.parse::<JobId>() {
        return Ok(id);
    }

    let needle = input.strip_prefix("job-").unwrap_or(input);
    let matches: Vec<JobId> = migrator
        .list_jobs()?
        .iter()
        .filter(|j| j.id.as_uuid().to_string().starts_with(needle))
        .map(|j| j.id)
        .collect();

    match matches.as_slice() {
        [only] => Ok(*only),
        [] => Err(VaultError::job_not_found(input)),
        _ => Err(VaultError::Validation(format!(
            "'{}' matches more than one job; use the full id",
            input
        ))),
    }
}

#[derive(Tabled)]
struct JobRow {
    #[tabled(rename = "Job")]
    id: String,
    #[tabled(rename = "Table")]
    table: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Progress")]
    progress: String,
    #[tabled(rename = "Skipped")]
    skipped: u64,
    #[tabled(rename = "Started")]
    started: String,
}

fn print_job_table(jobs: &[MigrationJob]) {
    let rows: Vec<JobRow> = jobs
        .iter()
        .map(|job| JobRow {
            id: job.id.to_string(),
            table: job.table.clone(),
            status: job.status.to_string(),
            progress: format!(
                "{}/{} ({:.0}%)",
                job.processed_rows,
                job.total_rows,
                job.progress_percent()
            ),
            skipped: job.skipped_values,
            started: format_instant(&job.started_at),
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::sharp());
    println!("{}", table);
}

fn print_job_details(job: &MigrationJob) {
    println!("Migration {}", job.id);
    println!("  Table:          {}", job.table);
    println!("  Status:         {}", job.status);
    println!(
        "  Progress:       {}/{} rows ({:.1}%)",
        job.processed_rows,
        job.total_rows,
        job.progress_percent()
    );
    println!("  Cursor:         rowid {}", job.cursor);
    println!("  Skipped values: {}", job.skipped_values);
    println!("  Created:        {}", job.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Started:        {}", format_instant(&job.started_at));
    println!("  Finished:       {}", format_instant(&job.completed_at));
    if let Some(error) = &job.last_error {
        println!("  Last error:     {}", error);
    }
}

pub(super) fn format_instant(at: &Option<chrono::DateTime<chrono::Utc>>) -> String {
    match at {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => "-".to_string(),
    }
}
