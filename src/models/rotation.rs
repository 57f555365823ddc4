//! Rotation plan model
//!
//! A rotation plan tracks one key rotation from creation through
//! re-encryption of every referencing envelope to retirement of the old
//! version. Per-table cursors make an interrupted plan resumable from the
//! last committed batch.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::PlanId;

/// State of a rotation plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationStatus {
    /// New key version installed, re-encryption not started
    Created,
    /// Walking protected tables, rewriting envelopes to the new version
    ReEncrypting,
    /// Re-encryption finished, verifying and retiring the old version
    RetiringOldKey,
    /// Old version retired; plan done
    Completed,
    /// Rolled back before re-encryption started
    Failed,
}

impl RotationStatus {
    /// Stable string form used in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::ReEncrypting => "re_encrypting",
            Self::RetiringOldKey => "retiring_old_key",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse a status from its database form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "re_encrypting" => Some(Self::ReEncrypting),
            "retiring_old_key" => Some(Self::RetiringOldKey),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether the plan can make no further progress
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for RotationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A key rotation in flight or finished
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationPlan {
    /// Unique identifier
    pub id: PlanId,

    /// Version being drained of references
    pub from_version: u32,

    /// Version envelopes are rewritten to
    pub to_version: u32,

    /// Protected tables this plan walks, in order
    pub tables: Vec<String>,

    /// Current state
    pub status: RotationStatus,

    /// Operator-supplied reason ("scheduled", "emergency", ...)
    pub reason: Option<String>,

    /// Last committed rowid per table; absent means not started
    #[serde(default)]
    pub cursors: BTreeMap<String, i64>,

    /// Cooperative pause flag checked between batches
    #[serde(default)]
    pub pause_requested: bool,

    /// When the plan was created
    pub started_at: DateTime<Utc>,

    /// When the plan reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,

    /// Most recent error, kept for operator diagnosis
    pub last_error: Option<String>,
}

impl RotationPlan {
    /// Create a new plan in the `created` state
    pub fn new(
        from_version: u32,
        to_version: u32,
        tables: Vec<String>,
        reason: Option<String>,
    ) -> Self {
        Self {
            id: PlanId::new(),
            from_version,
            to_version,
            tables,
            status: RotationStatus::Created,
            reason,
            cursors: BTreeMap::new(),
            pause_requested: false,
            started_at: Utc::now(),
            completed_at: None,
            last_error: None,
        }
    }

    /// Last committed rowid for a table (0 means the walk has not started)
    pub fn cursor_for(&self, table: &str) -> i64 {
        self.cursors.get(table).copied().unwrap_or(0)
    }

    /// Record progress for a table
    pub fn set_cursor(&mut self, table: &str, rowid: i64) {
        self.cursors.insert(table.to_string(), rowid);
    }

    /// Whether the plan can make no further progress
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl fmt::Display for RotationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} v{} -> v{} ({})",
            self.id, self.from_version, self.to_version, self.status
        )
    }
}
