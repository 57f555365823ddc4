//! Key version model
//!
//! A key version is one generation of the data encryption key. Exactly one
//! version is active for writes at any time; superseded versions pass
//! through `retiring` (still available for reads) before ending `retired`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{VaultError, VaultResult};

/// Lifecycle state of a key version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    /// Current write key; also valid for reads
    Active,
    /// Superseded; valid for reads while re-encryption drains references
    Retiring,
    /// Unavailable; envelopes referencing it can no longer be decrypted
    Retired,
}

impl KeyStatus {
    /// Stable string form used in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Retiring => "retiring",
            Self::Retired => "retired",
        }
    }

    /// Parse a status from its database form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "retiring" => Some(Self::Retiring),
            "retired" => Some(Self::Retired),
            _ => None,
        }
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One generation of the data encryption key
///
/// The data key itself is stored only in wrapped form; this struct carries
/// the wrapped blob plus lifecycle metadata, never raw key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyVersion {
    /// Monotonically increasing version number, starting at 1
    pub version: u32,

    /// Data key encrypted under the master key (not serialized to JSON)
    #[serde(skip)]
    pub wrapped_key: Vec<u8>,

    /// Lifecycle state
    pub status: KeyStatus,

    /// When this version was created
    pub created_at: DateTime<Utc>,

    /// When this version became the write key
    pub activated_at: Option<DateTime<Utc>>,

    /// When this version was retired
    pub retired_at: Option<DateTime<Utc>>,
}

impl KeyVersion {
    /// Create a new active key version
    pub fn new_active(version: u32, wrapped_key: Vec<u8>) -> Self {
        let now = Utc::now();
        Self {
            version,
            wrapped_key,
            status: KeyStatus::Active,
            created_at: now,
            activated_at: Some(now),
            retired_at: None,
        }
    }

    /// Whether this version currently serves reads
    pub fn is_readable(&self) -> bool {
        matches!(self.status, KeyStatus::Active | KeyStatus::Retiring)
    }

    /// Move an active version into retiring
    pub fn begin_retiring(&mut self) -> VaultResult<()> {
        if self.status != KeyStatus::Active {
            return Err(VaultError::InvalidKeyState {
                version: self.version,
                status: self.status.to_string(),
                expected: "active",
            });
        }
        self.status = KeyStatus::Retiring;
        Ok(())
    }

    /// Return a retiring version to active
    ///
    /// Only valid while re-encryption to the replacement version has not
    /// started; used when an aborted rotation reinstates the old key.
    pub fn reactivate(&mut self) -> VaultResult<()> {
        if self.status != KeyStatus::Retiring {
            return Err(VaultError::InvalidKeyState {
                version: self.version,
                status: self.status.to_string(),
                expected: "retiring",
            });
        }
        self.status = KeyStatus::Active;
        Ok(())
    }

    /// Move a retiring version into retired
    ///
    /// Callers must have verified that no envelope still references this
    /// version; the model only guards the state transition.
    pub fn mark_retired(&mut self) -> VaultResult<()> {
        if self.status != KeyStatus::Retiring {
            return Err(VaultError::InvalidKeyState {
                version: self.version,
                status: self.status.to_string(),
                expected: "retiring",
            });
        }
        self.status = KeyStatus::Retired;
        self.retired_at = Some(Utc::now());
        Ok(())
    }
}

impl fmt::Display for KeyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{} ({})", self.version, self.status)
    }
}
