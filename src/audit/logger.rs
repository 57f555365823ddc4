//! Audit logger for the append-only audit log
//!
//! Provides the AuditLog struct that writes audit records to a log file.
//! Each record is written as a single JSON line and flushed immediately.
//!
//! Appends must never fail the operation being audited: a failed append
//! increments a dropped-record counter and emits a `tracing` warning, and
//! monitoring reports the count.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::{VaultError, VaultResult};

use super::entry::AuditRecord;

/// Handles writing audit records to the audit log file
///
/// The log file uses a line-delimited JSON format (JSONL) where each line
/// is a complete JSON object representing one audit record. The file handle
/// is opened once and shared behind a mutex held only for the single line
/// write plus flush.
pub struct AuditLog {
    /// Path to the audit log file
    log_path: PathBuf,
    file: Mutex<File>,
    dropped: AtomicU64,
}

impl AuditLog {
    /// Open (or create) the audit log at the specified path
    pub fn open(log_path: impl Into<PathBuf>) -> VaultResult<Self> {
        let log_path = log_path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| VaultError::Audit(format!("failed to open audit log: {}", e)))?;

        Ok(Self {
            log_path,
            file: Mutex::new(file),
            dropped: AtomicU64::new(0),
        })
    }

    /// Append a record as a JSON line and flush
    ///
    /// Never fails: an append error is counted and logged as a warning so
    /// the audited operation itself proceeds unaffected.
    pub fn record(&self, record: &AuditRecord) {
        if let Err(e) = self.try_append(record) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                error = %e,
                operation = %record.operation,
                "dropped audit record"
            );
        }
    }

    fn try_append(&self, record: &AuditRecord) -> VaultResult<()> {
        let json = serde_json::to_string(record)
            .map_err(|e| VaultError::Audit(format!("failed to serialize audit record: {}", e)))?;

        let mut file = self.file.lock();
        writeln!(file, "{}", json)
            .map_err(|e| VaultError::Audit(format!("failed to write audit record: {}", e)))?;
        file.flush()
            .map_err(|e| VaultError::Audit(format!("failed to flush audit log: {}", e)))?;

        Ok(())
    }

    /// Number of records dropped by failed appends since this log was opened
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Read all audit records from the log file
    ///
    /// Returns records in chronological order (oldest first). A line that
    /// does not parse (e.g. torn by a crash mid-write) is skipped with a
    /// warning rather than wedging every future report.
    pub fn read_all(&self) -> VaultResult<Vec<AuditRecord>> {
        Self::read_file(&self.log_path)
    }

    /// Read all records with timestamps at or after `cutoff`
    pub fn read_since(&self, cutoff: DateTime<Utc>) -> VaultResult<Vec<AuditRecord>> {
        let mut records = self.read_all()?;
        records.retain(|r| r.timestamp >= cutoff);
        Ok(records)
    }

    /// Read the most recent N records from the log
    pub fn read_recent(&self, count: usize) -> VaultResult<Vec<AuditRecord>> {
        let all_records = self.read_all()?;
        let start = all_records.len().saturating_sub(count);
        Ok(all_records[start..].to_vec())
    }

    /// Get the number of records in the audit log
    pub fn record_count(&self) -> VaultResult<usize> {
        Ok(self.read_all()?.len())
    }

    /// Get the path to the audit log file
    pub fn path(&self) -> &Path {
        &self.log_path
    }

    fn read_file(path: &Path) -> VaultResult<Vec<AuditRecord>> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(path)
            .map_err(|e| VaultError::Audit(format!("failed to open audit log: {}", e)))?;

        let reader = BufReader::new(file);
        let mut records = Vec::new();

        for (line_num, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| {
                VaultError::Audit(format!(
                    "failed to read audit log line {}: {}",
                    line_num + 1,
                    e
                ))
            })?;

            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<AuditRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(
                        line = line_num + 1,
                        error = %e,
                        "skipping unparseable audit log line"
                    );
                }
            }
        }

        Ok(records)
    }
}
