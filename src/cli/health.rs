//! Health report CLI command

use std::time::Duration;

use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::error::VaultResult;
use crate::monitor::HealthReport;

use super::context::CryptoContext;
use super::migrate::format_instant;

/// Handle `fieldvault health`
pub fn handle_health_command(
    ctx: &CryptoContext,
    json: bool,
    watch: bool,
    interval_secs: u64,
) -> VaultResult<()> {
    let monitor = ctx.monitor();

    if watch {
        // Runs until interrupted
        return monitor.watch(Duration::from_secs(interval_secs.max(1)), |report| {
            if print_report(report, json).is_err() {
                return false;
            }
            println!();
            true
        });
    }

    let report = monitor.poll()?;
    print_report(&report, json)
}

fn print_report(report: &HealthReport, json: bool) -> VaultResult<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!(
        "fieldvault health at {} (window: last {} hours)",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
        report.window_hours
    );
    println!();
    println!(
        "Encrypt: {} op(s), {} failed, avg {}us, p95 {}us",
        report.encrypt.total,
        report.encrypt.failures,
        report.encrypt.avg_latency_micros,
        report.encrypt.p95_latency_micros
    );
    println!(
        "Decrypt: {} op(s), {} failed ({:.1}% failure rate), avg {}us, p95 {}us",
        report.decrypt.total,
        report.decrypt.failures,
        report.decrypt_failure_rate * 100.0,
        report.decrypt.avg_latency_micros,
        report.decrypt.p95_latency_micros
    );
    println!();
    println!(
        "Active key: v{} ({} version(s) in the ring)",
        report.active_key_version,
        report.key_versions.len()
    );
    match report.last_completed_rotation {
        Some(at) => println!(
            "Last rotation: {} ({} days ago, policy: every {} days)",
            at.format("%Y-%m-%d"),
            report.days_since_rotation,
            report.rotation_interval_days
        ),
        None => println!(
            "Last rotation: never ({} days on the initial key, policy: every {} days)",
            report.days_since_rotation, report.rotation_interval_days
        ),
    }
    if report.dropped_audit_entries > 0 {
        println!("Dropped audit entries: {}", report.dropped_audit_entries);
    }

    println!();
    print_coverage(report);

    println!();
    if report.alerts.is_empty() {
        println!("No compliance alerts.");
    } else {
        println!("Alerts:");
        for alert in &report.alerts {
            println!("  ! {}", alert);
        }
    }

    Ok(())
}

#[derive(Tabled)]
struct CoverageRow {
    #[tabled(rename = "Field")]
    field: String,
    #[tabled(rename = "Sensitivity")]
    sensitivity: String,
    #[tabled(rename = "Encrypted")]
    encrypted: String,
    #[tabled(rename = "Plaintext")]
    plaintext: String,
    #[tabled(rename = "Ops (window)")]
    ops: u64,
    #[tabled(rename = "Last encrypt")]
    last_encrypt: String,
}

fn print_coverage(report: &HealthReport) {
    let rows: Vec<CoverageRow> = report
        .coverage
        .iter()
        .map(|cov| CoverageRow {
            field: format!("{}.{}", cov.table, cov.column),
            sensitivity: cov.sensitivity.to_string(),
            encrypted: if cov.table_present {
                cov.encrypted_values.to_string()
            } else {
                "no table".to_string()
            },
            plaintext: if cov.table_present {
                cov.plaintext_values.to_string()
            } else {
                "no table".to_string()
            },
            ops: cov.encrypt_ops_in_window,
            last_encrypt: format_instant(&cov.last_encrypt_at),
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::sharp());
    println!("{}", table);
}
