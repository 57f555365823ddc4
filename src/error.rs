//! Custom error types for fieldvault
//!
//! This module defines the error hierarchy for the crate using thiserror
//! for ergonomic error definitions.

use thiserror::Error;

/// The main error type for fieldvault operations
#[derive(Error, Debug)]
pub enum VaultError {
    /// Ciphertext or tag failed authentication during decryption
    #[error("Integrity failure for {table}.{column}: ciphertext failed authentication")]
    Integrity { table: String, column: String },

    /// Stored value is not a well-formed envelope
    #[error("Malformed envelope: {0}")]
    Format(String),

    /// Envelope carries an algorithm tag this build does not recognize
    #[error("Unsupported envelope algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Envelope references a key version absent from the key store
    #[error("Unknown key version: v{0}")]
    UnknownKeyVersion(u32),

    /// Encode was asked to encrypt a value that is already an envelope
    #[error("Value in {table}.{column} is already encrypted")]
    AlreadyEncrypted { table: String, column: String },

    /// Decode or rollback was given a value that is not an envelope
    #[error("Value in {table}.{column} is not encrypted")]
    NotEncrypted { table: String, column: String },

    /// A key version cannot be retired while envelopes still reference it
    #[error("Key version v{version} still referenced by {live_refs} envelope(s)")]
    KeyStillReferenced { version: u32, live_refs: u64 },

    /// A key lifecycle transition was requested from the wrong state
    #[error("Key version v{version} is {status}, expected {expected}")]
    InvalidKeyState {
        version: u32,
        status: String,
        expected: &'static str,
    },

    /// Another rotation plan is already in flight
    #[error("Rotation {plan_id} is already in progress")]
    RotationInProgress { plan_id: crate::models::PlanId },

    /// A rotation plan stopped making progress and needs operator attention
    #[error("Rotation {plan_id} stalled: {message}")]
    RotationStalled {
        plan_id: crate::models::PlanId,
        message: String,
    },

    /// A plan transition was requested from a state that does not allow it
    #[error("Plan {plan_id} is {status}: {message}")]
    InvalidPlanState {
        plan_id: crate::models::PlanId,
        status: String,
        message: &'static str,
    },

    /// A migration job on the same table is already in flight
    #[error("Migration already in progress for table '{0}'")]
    MigrationInProgress(String),

    /// A job transition was requested from a state that does not allow it
    #[error("Job {job_id} is {status}: {message}")]
    InvalidJobState {
        job_id: crate::models::JobId,
        status: String,
        message: &'static str,
    },

    /// Low-level cipher failures without field context
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Master key loading, derivation, or verification errors
    #[error("Master key error: {0}")]
    MasterKey(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// SQLite storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Audit log errors
    #[error("Audit log error: {0}")]
    Audit(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// YAML deserialization errors (field map files)
    #[error("YAML error: {0}")]
    Yaml(String),

    /// Entity not found errors
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },

    /// Validation errors for descriptors and operator input
    #[error("Validation error: {0}")]
    Validation(String),
}

impl VaultError {
    /// Create a "not found" error for field descriptors
    pub fn field_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Field",
            identifier: identifier.into(),
        }
    }

    /// Create a "not found" error for protected tables
    pub fn table_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Table",
            identifier: identifier.into(),
        }
    }

    /// Create a "not found" error for migration jobs
    pub fn job_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Migration job",
            identifier: identifier.into(),
        }
    }

    /// Create a "not found" error for rotation plans
    pub fn plan_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Rotation plan",
            identifier: identifier.into(),
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is an integrity failure
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity { .. })
    }

    /// Check if this is the already-encrypted guard
    pub fn is_already_encrypted(&self) -> bool {
        matches!(self, Self::AlreadyEncrypted { .. })
    }

    /// Short stable label for audit records and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Integrity { .. } => "integrity",
            Self::Format(_) => "format",
            Self::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            Self::UnknownKeyVersion(_) => "unknown_key_version",
            Self::AlreadyEncrypted { .. } => "already_encrypted",
            Self::NotEncrypted { .. } => "not_encrypted",
            Self::KeyStillReferenced { .. } => "key_still_referenced",
            Self::InvalidKeyState { .. } => "invalid_key_state",
            Self::RotationInProgress { .. } => "rotation_in_progress",
            Self::RotationStalled { .. } => "rotation_stalled",
            Self::InvalidPlanState { .. } => "invalid_plan_state",
            Self::MigrationInProgress(_) => "migration_in_progress",
            Self::InvalidJobState { .. } => "invalid_job_state",
            Self::Crypto(_) => "crypto",
            Self::MasterKey(_) => "master_key",
            Self::Config(_) => "config",
            Self::Storage(_) => "storage",
            Self::Audit(_) => "audit",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Yaml(_) => "yaml",
            Self::NotFound { .. } => "not_found",
            Self::Validation(_) => "validation",
        }
    }
}

// Implement From traits for common error types

impl From<std::io::Error> for VaultError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<serde_yaml::Error> for VaultError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml(err.to_string())
    }
}

impl From<rusqlite::Error> for VaultError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<csv::Error> for VaultError {
    fn from(err: csv::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Result type alias for fieldvault operations
pub type VaultResult<T> = Result<T, VaultError>;
