//! Compliance report exports
//!
//! Turns the audit log into reviewable artifacts. CSV flattens optional
//! fields to empty cells so the column set stays fixed; JSON reproduces
//! the records as stored.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use chrono::{Duration as TimeDelta, Utc};
use clap::{Subcommand, ValueEnum};

use crate::audit::AuditRecord;
use crate::error::VaultResult;

use super::context::OpsContext;

/// Report subcommands
#[derive(Subcommand)]
pub enum ReportCommands {
    /// Export the audit log for compliance review
    Audit {
        /// Output format
        #[arg(short, long, value_enum, default_value = "csv")]
        output: ReportFormat,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        to: Option<PathBuf>,
        /// Only entries from the last N hours
        #[arg(long)]
        since_hours: Option<u32>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Csv,
    Json,
}

/// Handle a report command
pub fn handle_report_command(ctx: &OpsContext, cmd: ReportCommands) -> VaultResult<()> {
    match cmd {
        ReportCommands::Audit {
            output,
            to,
            since_hours,
        } => {
            let records = match since_hours {
                Some(hours) => ctx
                    .audit
                    .read_since(Utc::now() - TimeDelta::hours(hours as i64))?,
                None => ctx.audit.read_all()?,
            };

            match to {
                Some(path) => {
                    let file = File::create(&path)?;
                    write_report(&records, output, file)?;
                    println!(
                        "Wrote {} audit record(s) to {}",
                        records.len(),
                        path.display()
                    );
                }
                None => {
                    let stdout = std::io::stdout();
                    write_report(&records, output, stdout.lock())?;
                }
            }
        }
    }

    Ok(())
}

fn write_report<W: Write>(
    records: &[AuditRecord],
    format: ReportFormat,
    writer: W,
) -> VaultResult<()> {
    match format {
        ReportFormat::Csv => write_csv(records, writer),
        ReportFormat::Json => {
            serde_json::to_writer_pretty(writer, records)?;
            Ok(())
        }
    }
}

fn write_csv<W: Write>(records: &[AuditRecord], writer: W) -> VaultResult<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record([
        "timestamp",
        "operation",
        "actor",
        "success",
        "table",
        "column",
        "key_version",
        "error_kind",
        "duration_micros",
        "detail",
    ])?;

    for record in records {
        csv_writer.write_record([
            record.timestamp.to_rfc3339(),
            record.operation.to_string(),
            record.actor.clone(),
            record.success.to_string(),
            record.table.clone().unwrap_or_default(),
            record.column.clone().unwrap_or_default(),
            record
                .key_version
                .map(|v| v.to_string())
                .unwrap_or_default(),
            record.error_kind.clone().unwrap_or_default(),
            record
                .duration_micros
                .map(|d| d.to_string())
                .unwrap_or_default(),
            record.detail.clone().unwrap_or_default(),
        ])?;
    }

    csv_writer.flush()?;
    Ok(())
}
