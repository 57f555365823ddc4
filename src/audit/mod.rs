//! Audit logging system for fieldvault
//!
//! Records every encrypt, decrypt, rotation, and migration operation in an
//! append-only audit log. Plaintext values are never written here.
//!
//! # Architecture
//!
//! The audit system consists of two components:
//!
//! - `AuditRecord`: Represents a single audit log record with timestamp,
//!   operation, field identity, key version, outcome, and latency.
//! - `AuditLog`: Writes records to the audit log file using a line-delimited
//!   JSON format (JSONL). Appends never fail the audited operation; failures
//!   are counted and surfaced through monitoring.
//!
//! # Example
//!
//! ```rust,ignore
//! use fieldvault::audit::{AuditLog, AuditRecord, Operation};
//!
//! let log = AuditLog::open(audit_log_path)?;
//!
//! // Record a successful decrypt
//! let record = AuditRecord::field_success(
//!     Operation::Decrypt,
//!     "api-server",
//!     "patients",
//!     "tax_code",
//!     2,
//!     140,
//! );
//! log.record(&record);
//!
//! // Record a rotation lifecycle event
//! let record = AuditRecord::event(Operation::Rotate, "rotation", "plan completed");
//! log.record(&record);
//! ```

mod entry;
mod logger;

pub use entry::{AuditRecord, Operation};
pub use logger::AuditLog;
