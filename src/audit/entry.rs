//! Audit record data structures
//!
//! Defines the structure of audit log records including operation types
//! and the record format itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Types of operations that can be audited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// A field value was encrypted
    Encrypt,
    /// A field value was decrypted
    Decrypt,
    /// A key rotation lifecycle event
    Rotate,
    /// A plaintext migration lifecycle event
    Migrate,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Encrypt => write!(f, "ENCRYPT"),
            Operation::Decrypt => write!(f, "DECRYPT"),
            Operation::Rotate => write!(f, "ROTATE"),
            Operation::Migrate => write!(f, "MIGRATE"),
        }
    }
}

/// A single audit log record
///
/// Records one cryptographic or lifecycle operation. Field operations carry
/// the table/column they touched and their latency; lifecycle events carry a
/// free-form detail line instead. Plaintext values never appear here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// When the operation occurred (UTC)
    pub timestamp: DateTime<Utc>,

    /// Type of operation performed
    pub operation: Operation,

    /// Who performed it (settings actor, or the job name for batch work)
    pub actor: String,

    /// Whether the operation succeeded
    pub success: bool,

    /// Table the operation touched, for field operations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,

    /// Column the operation touched, for field operations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,

    /// Key version involved, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_version: Option<u32>,

    /// Stable error label for failures (e.g. "integrity", "unknown_key_version")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,

    /// Wall-clock duration of the operation in microseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_micros: Option<u64>,

    /// Free-form context for lifecycle events (plan id, reason, table)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditRecord {
    /// Record for a successful field operation
    pub fn field_success(
        operation: Operation,
        actor: impl Into<String>,
        table: &str,
        column: &str,
        key_version: u32,
        duration_micros: u64,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            actor: actor.into(),
            success: true,
            table: Some(table.to_string()),
            column: Some(column.to_string()),
            key_version: Some(key_version),
            error_kind: None,
            duration_micros: Some(duration_micros),
            detail: None,
        }
    }

    /// Record for a failed field operation
    ///
    /// `key_version` may be unknown when the failure happened before the
    /// envelope could be parsed.
    pub fn field_failure(
        operation: Operation,
        actor: impl Into<String>,
        table: &str,
        column: &str,
        key_version: Option<u32>,
        error_kind: &str,
        duration_micros: u64,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            actor: actor.into(),
            success: false,
            table: Some(table.to_string()),
            column: Some(column.to_string()),
            key_version,
            error_kind: Some(error_kind.to_string()),
            duration_micros: Some(duration_micros),
            detail: None,
        }
    }

    /// Record for a successful lifecycle event (rotation, migration)
    pub fn event(operation: Operation, actor: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            actor: actor.into(),
            success: true,
            table: None,
            column: None,
            key_version: None,
            error_kind: None,
            duration_micros: None,
            detail: Some(detail.into()),
        }
    }

    /// Record for a failed lifecycle event
    pub fn event_failure(
        operation: Operation,
        actor: impl Into<String>,
        detail: impl Into<String>,
        error_kind: &str,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            actor: actor.into(),
            success: false,
            table: None,
            column: None,
            key_version: None,
            error_kind: Some(error_kind.to_string()),
            duration_micros: None,
            detail: Some(detail.into()),
        }
    }

    /// Qualified `table.column` name, when this is a field operation
    pub fn field_name(&self) -> Option<String> {
        match (&self.table, &self.column) {
            (Some(table), Some(column)) => Some(format!("{}.{}", table, column)),
            _ => None,
        }
    }

    /// Format the record for human-readable output
    pub fn format_human_readable(&self) -> String {
        let mut output = format!(
            "[{}] {} {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.operation,
            if self.success { "ok" } else { "FAILED" },
        );

        if let Some(field) = self.field_name() {
            output.push_str(&format!(" {}", field));
        }

        if let Some(version) = self.key_version {
            output.push_str(&format!(" v{}", version));
        }

        if let Some(kind) = &self.error_kind {
            output.push_str(&format!(" [{}]", kind));
        }

        if let Some(detail) = &self.detail {
            output.push_str(&format!(" {}", detail));
        }

        output.push_str(&format!(" actor={}", self.actor));
        output
    }
}
