//! Compliance monitoring
//!
//! Aggregates the audit log, key ring, and job tables into a point-in-time
//! `HealthReport`: operation latency and failure rates over a lookback
//! window, rotation recency against the configured interval, and per-field
//! encryption coverage. Anything out of policy becomes a `ComplianceAlert`.
//!
//! The service only ever reads. It observes the same audit log and key
//! ring the codec writes through, but never sits between a caller and its
//! field operation.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Duration as TimeDelta, Utc};
use serde::Serialize;

use crate::audit::{AuditLog, AuditRecord, Operation};
use crate::config::Settings;
use crate::error::{VaultError, VaultResult};
use crate::fields::{FieldRegistry, Sensitivity};
use crate::keystore::KeyStore;
use crate::models::{KeyVersion, PlanId};
use crate::storage::{jobs, records, Store};

/// Latency and failure counts for one operation kind over the window
#[derive(Debug, Clone, Default, Serialize)]
pub struct OperationStats {
    pub total: u64,
    pub failures: u64,
    pub avg_latency_micros: u64,
    pub p95_latency_micros: u64,
}

impl OperationStats {
    fn from_records<'a>(records: impl Iterator<Item = &'a AuditRecord>) -> Self {
        let mut latencies = Vec::new();
        let mut total = 0u64;
        let mut failures = 0u64;

        for record in records {
            // Field operations carry a duration; lifecycle events do not
            let duration = match record.duration_micros {
                Some(d) => d,
                None => continue,
            };
            total += 1;
            if !record.success {
                failures += 1;
            }
            latencies.push(duration);
        }

        latencies.sort_unstable();
        let avg = if latencies.is_empty() {
            0
        } else {
            latencies.iter().sum::<u64>() / latencies.len() as u64
        };

        Self {
            total,
            failures,
            avg_latency_micros: avg,
            p95_latency_micros: percentile(&latencies, 0.95),
        }
    }

    pub fn failure_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.failures as f64 / self.total as f64
        }
    }
}

/// Nearest-rank percentile over an ascending-sorted slice
fn percentile(sorted: &[u64], pct: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((sorted.len() as f64) * pct).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

/// How one declared field is actually doing on disk and in the window
#[derive(Debug, Clone, Serialize)]
pub struct FieldCoverage {
    pub table: String,
    pub column: String,
    pub sensitivity: Sensitivity,
    /// Stored values that are envelopes
    pub encrypted_values: u64,
    /// Non-null stored values that are not envelopes
    pub plaintext_values: u64,
    /// Successful encrypt operations for this field in the window
    pub encrypt_ops_in_window: u64,
    pub last_encrypt_at: Option<DateTime<Utc>>,
    /// False when the registry declares a table the schema lacks
    pub table_present: bool,
}

/// A condition the compliance policy wants acted on
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComplianceAlert {
    /// A declared-sensitive field saw no encrypt operations in the window
    FieldNeverEncrypted { table: String, column: String },
    /// The active key outlived the configured rotation interval
    RotationOverdue { days_since: i64, interval_days: u32 },
    /// Decrypt failures in the window crossed the configured rate
    DecryptFailures { failures: u64, rate: f64 },
    /// A rotation plan stopped making progress
    RotationStalled { plan_id: PlanId, message: String },
    /// Audit entries were lost since the process started
    AuditEntriesDropped { count: u64 },
}

impl fmt::Display for ComplianceAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FieldNeverEncrypted { table, column } => {
                write!(f, "field {}.{} saw no encrypt operations in the window", table, column)
            }
            Self::RotationOverdue { days_since, interval_days } => {
                write!(
                    f,
                    "last key rotation was {} days ago (policy: every {} days)",
                    days_since, interval_days
                )
            }
            Self::DecryptFailures { failures, rate } => {
                write!(
                    f,
                    "{} decrypt failure(s) in the window ({:.1}% of decrypts)",
                    failures,
                    rate * 100.0
                )
            }
            Self::RotationStalled { plan_id, message } => {
                write!(f, "rotation plan {} is stalled: {}", plan_id, message)
            }
            Self::AuditEntriesDropped { count } => {
                write!(f, "{} audit entr{} dropped since startup", count, if *count == 1 { "y" } else { "ies" })
            }
        }
    }
}

/// Point-in-time health snapshot, serializable for external observability
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub generated_at: DateTime<Utc>,
    pub window_hours: u32,
    pub encrypt: OperationStats,
    pub decrypt: OperationStats,
    pub decrypt_failure_rate: f64,
    pub active_key_version: u32,
    pub key_versions: Vec<KeyVersion>,
    pub last_completed_rotation: Option<DateTime<Utc>>,
    /// Days since the last completed rotation, or since the active key
    /// went live when no rotation has completed yet
    pub days_since_rotation: i64,
    pub rotation_interval_days: u32,
    pub coverage: Vec<FieldCoverage>,
    pub dropped_audit_entries: u64,
    pub alerts: Vec<ComplianceAlert>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.alerts.is_empty()
    }
}

/// Periodic health computation over the vault's observable state
pub struct MonitoringService {
    store: Arc<Store>,
    keystore: Arc<KeyStore>,
    registry: Arc<FieldRegistry>,
    audit: Arc<AuditLog>,
    enabled: bool,
    lookback_hours: u32,
    rotation_interval_days: u32,
    decrypt_failure_threshold: f64,
}

impl MonitoringService {
    pub fn new(
        store: Arc<Store>,
        keystore: Arc<KeyStore>,
        registry: Arc<FieldRegistry>,
        audit: Arc<AuditLog>,
        settings: &Settings,
    ) -> Self {
        Self {
            store,
            keystore,
            registry,
            audit,
            enabled: settings.monitoring.enabled,
            lookback_hours: settings.monitoring.lookback_hours,
            rotation_interval_days: settings.rotation_interval_days,
            decrypt_failure_threshold: settings.monitoring.decrypt_failure_threshold,
        }
    }

    /// Build a health report from the current audit window and key state
    pub fn health_check(&self) -> VaultResult<HealthReport> {
        let generated_at = Utc::now();
        let cutoff = generated_at - TimeDelta::hours(self.lookback_hours as i64);
        let window = self.audit.read_since(cutoff)?;

        let encrypt = OperationStats::from_records(
            window.iter().filter(|r| r.operation == Operation::Encrypt),
        );
        let decrypt = OperationStats::from_records(
            window.iter().filter(|r| r.operation == Operation::Decrypt),
        );
        let decrypt_failure_rate = decrypt.failure_rate();

        let active_key_version = self.keystore.active_version();
        let key_versions = self.keystore.versions();

        let last_completed_rotation = self
            .store
            .with_conn(|conn| jobs::latest_completed_rotation(conn))?
            .and_then(|plan| plan.completed_at);
        let rotation_baseline = last_completed_rotation
            .or_else(|| {
                key_versions
                    .iter()
                    .find(|v| v.version == active_key_version)
                    .map(|v| v.activated_at.unwrap_or(v.created_at))
            })
            .unwrap_or(generated_at);
        let days_since_rotation = (generated_at - rotation_baseline).num_days();

        let stalled_plan = self
            .store
            .with_conn(|conn| jobs::active_rotation_plan(conn))?
            .filter(|plan| plan.last_error.is_some());

        let coverage = self.collect_coverage(&window)?;

        let mut alerts = Vec::new();
        for field in &coverage {
            if field.encrypt_ops_in_window == 0 {
                alerts.push(ComplianceAlert::FieldNeverEncrypted {
                    table: field.table.clone(),
                    column: field.column.clone(),
                });
            }
        }
        if days_since_rotation > self.rotation_interval_days as i64 {
            alerts.push(ComplianceAlert::RotationOverdue {
                days_since: days_since_rotation,
                interval_days: self.rotation_interval_days,
            });
        }
        if decrypt.failures > 0 && decrypt_failure_rate >= self.decrypt_failure_threshold {
            alerts.push(ComplianceAlert::DecryptFailures {
                failures: decrypt.failures,
                rate: decrypt_failure_rate,
            });
        }
        if let Some(plan) = stalled_plan {
            if let Some(message) = plan.last_error {
                alerts.push(ComplianceAlert::RotationStalled {
                    plan_id: plan.id,
                    message,
                });
            }
        }
        let dropped_audit_entries = self.audit.dropped_count();
        if dropped_audit_entries > 0 {
            alerts.push(ComplianceAlert::AuditEntriesDropped {
                count: dropped_audit_entries,
            });
        }

        Ok(HealthReport {
            generated_at,
            window_hours: self.lookback_hours,
            encrypt,
            decrypt,
            decrypt_failure_rate,
            active_key_version,
            key_versions,
            last_completed_rotation,
            days_since_rotation,
            rotation_interval_days: self.rotation_interval_days,
            coverage,
            dropped_audit_entries,
            alerts,
        })
    }

    /// One monitoring cycle: compute a report and surface its alerts
    pub fn poll(&self) -> VaultResult<HealthReport> {
        let report = self.health_check()?;
        for alert in &report.alerts {
            tracing::warn!(%alert, "compliance alert");
        }
        tracing::debug!(
            encrypt_ops = report.encrypt.total,
            decrypt_ops = report.decrypt.total,
            alerts = report.alerts.len(),
            "health poll"
        );
        Ok(report)
    }

    /// Poll at a fixed interval until the callback asks to stop
    ///
    /// Runs on the caller's thread; the CLI spins this in the foreground,
    /// a host application would give it a thread of its own.
    pub fn watch<F>(&self, interval: Duration, mut on_report: F) -> VaultResult<()>
    where
        F: FnMut(&HealthReport) -> bool,
    {
        if !self.enabled {
            return Err(VaultError::Config(
                "monitoring is disabled in settings".to_string(),
            ));
        }
        loop {
            let report = self.poll()?;
            if !on_report(&report) {
                return Ok(());
            }
            thread::sleep(interval);
        }
    }

    fn collect_coverage(&self, window: &[AuditRecord]) -> VaultResult<Vec<FieldCoverage>> {
        let mut coverage = Vec::with_capacity(self.registry.len());

        for field in self.registry.iter() {
            let (encrypted_values, plaintext_values, table_present) =
                self.store.with_conn(|conn| {
                    if !records::table_exists(conn, &field.table)? {
                        return Ok((0, 0, false));
                    }
                    Ok((
                        records::count_encrypted(conn, &field.table, &field.column)?,
                        records::count_plaintext(conn, &field.table, &field.column)?,
                        true,
                    ))
                })?;

            let mut encrypt_ops_in_window = 0u64;
            let mut last_encrypt_at = None;
            for record in window {
                if record.operation == Operation::Encrypt
                    && record.success
                    && record.table.as_deref() == Some(field.table.as_str())
                    && record.column.as_deref() == Some(field.column.as_str())
                {
                    encrypt_ops_in_window += 1;
                    if last_encrypt_at.map_or(true, |seen| record.timestamp > seen) {
                        last_encrypt_at = Some(record.timestamp);
                    }
                }
            }

            coverage.push(FieldCoverage {
                table: field.table.clone(),
                column: field.column.clone(),
                sensitivity: field.sensitivity,
                encrypted_values,
                plaintext_values,
                encrypt_ops_in_window,
                last_encrypt_at,
                table_present,
            });
        }

        Ok(coverage)
    }
}
