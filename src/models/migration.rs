//! Migration job model
//!
//! A migration job converts one table's declared columns from plaintext to
//! envelopes, batch by batch in rowid order. The cursor is committed in the
//! same transaction as each batch, so an interrupted job resumes exactly
//! where it stopped and never re-encrypts a row twice.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::JobId;

/// State of a migration job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    /// Created, not yet started
    Planned,
    /// Walking the table
    Running,
    /// Stopped cooperatively between batches
    Paused,
    /// Every row processed
    Completed,
    /// Stopped by an unexpected batch error; a new job must take over
    Failed,
    /// Processed rows decrypted back to plaintext
    RolledBack,
}

impl MigrationStatus {
    /// Stable string form used in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        }
    }

    /// Parse a status from its database form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "planned" => Some(Self::Planned),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "rolled_back" => Some(Self::RolledBack),
            _ => None,
        }
    }

    /// Whether a job in this state occupies its table
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A plaintext-to-envelope conversion of one table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationJob {
    /// Unique identifier
    pub id: JobId,

    /// Table being migrated
    pub table: String,

    /// Last committed rowid; rows at or below it are done
    pub cursor: i64,

    /// Row count measured when the job was planned
    pub total_rows: u64,

    /// Rows whose columns were encrypted
    pub processed_rows: u64,

    /// Values skipped because they were already envelopes
    pub skipped_values: u64,

    /// Current state
    pub status: MigrationStatus,

    /// When the job was planned
    pub created_at: DateTime<Utc>,

    /// When execution first started
    pub started_at: Option<DateTime<Utc>>,

    /// When the job reached completed or rolled_back
    pub completed_at: Option<DateTime<Utc>>,

    /// Most recent error, kept for operator diagnosis
    pub last_error: Option<String>,
}

impl MigrationJob {
    /// Create a new job in the `planned` state
    pub fn new(table: impl Into<String>, total_rows: u64) -> Self {
        Self {
            id: JobId::new(),
            table: table.into(),
            cursor: 0,
            total_rows,
            processed_rows: 0,
            skipped_values: 0,
            status: MigrationStatus::Planned,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            last_error: None,
        }
    }

    /// Whether execute() may pick this job up
    pub fn can_execute(&self) -> bool {
        matches!(
            self.status,
            MigrationStatus::Planned | MigrationStatus::Running | MigrationStatus::Paused
        )
    }

    /// Whether rollback() may pick this job up
    pub fn can_rollback(&self) -> bool {
        self.status.is_active()
    }

    /// Rows processed as a share of the planned total
    pub fn progress_percent(&self) -> f64 {
        if self.total_rows == 0 {
            return 100.0;
        }
        (self.processed_rows as f64 / self.total_rows as f64) * 100.0
    }
}

impl fmt::Display for MigrationJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({}, {}/{} rows)",
            self.id, self.table, self.status, self.processed_rows, self.total_rows
        )
    }
}
