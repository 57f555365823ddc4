//! Envelope wire format for encrypted field values
//!
//! An encrypted field is stored as a dollar-delimited, self-describing
//! string in the style of PHC password hashes:
//!
//! ```text
//! $aes256gcm$v3$<nonce base64>$<ciphertext+tag base64>
//! ```
//!
//! The format fits in any TEXT column, survives copy/paste and CSV export,
//! and lets us tell plaintext from ciphertext with a cheap prefix check.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::error::{VaultError, VaultResult};

/// Size of the AES-GCM nonce in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag appended to the ciphertext
pub const TAG_SIZE: usize = 16;

/// Cipher algorithms the envelope format can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Aes256Gcm,
}

impl Algorithm {
    /// The tag written into the envelope's first segment
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aes256Gcm => "aes256gcm",
        }
    }

    fn from_tag(tag: &str) -> VaultResult<Self> {
        match tag {
            "aes256gcm" => Ok(Self::Aes256Gcm),
            other => Err(VaultError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed encrypted field value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Algorithm that produced the ciphertext
    pub algorithm: Algorithm,
    /// Key version the ciphertext was produced under
    pub key_version: u32,
    /// Per-value nonce
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext with the authentication tag appended
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    /// Create an envelope from freshly produced cipher output
    pub fn new(key_version: u32, nonce: [u8; NONCE_SIZE], ciphertext: Vec<u8>) -> Self {
        Self {
            algorithm: Algorithm::Aes256Gcm,
            key_version,
            nonce,
            ciphertext,
        }
    }

    /// Render the envelope as its stored string form
    pub fn encode(&self) -> String {
        format!(
            "${}$v{}${}${}",
            self.algorithm,
            self.key_version,
            STANDARD.encode(self.nonce),
            STANDARD.encode(&self.ciphertext)
        )
    }

    /// Parse a stored string back into an envelope
    ///
    /// Structural problems map to `Format`; a well-formed envelope whose
    /// algorithm tag this build does not know maps to `UnsupportedAlgorithm`.
    pub fn parse(stored: &str) -> VaultResult<Self> {
        let segments = split_segments(stored)
            .ok_or_else(|| VaultError::Format("expected $algo$vN$nonce$ciphertext".into()))?;
        let [algo_tag, version_tag, nonce_b64, ciphertext_b64] = segments;

        let algorithm = Algorithm::from_tag(algo_tag)?;
        let key_version = parse_version_tag(version_tag)?;

        let nonce_bytes = STANDARD
            .decode(nonce_b64)
            .map_err(|e| VaultError::Format(format!("invalid nonce encoding: {}", e)))?;
        let nonce: [u8; NONCE_SIZE] = nonce_bytes.as_slice().try_into().map_err(|_| {
            VaultError::Format(format!(
                "invalid nonce size: expected {}, got {}",
                NONCE_SIZE,
                nonce_bytes.len()
            ))
        })?;

        let ciphertext = STANDARD
            .decode(ciphertext_b64)
            .map_err(|e| VaultError::Format(format!("invalid ciphertext encoding: {}", e)))?;
        if ciphertext.len() < TAG_SIZE {
            return Err(VaultError::Format(format!(
                "ciphertext shorter than the {}-byte authentication tag",
                TAG_SIZE
            )));
        }

        Ok(Self {
            algorithm,
            key_version,
            nonce,
            ciphertext,
        })
    }

    /// Cheap structural check: does this stored value look like an envelope?
    ///
    /// Used as the idempotency guard before encrypting and as the skip test
    /// during migration. Deliberately algorithm-agnostic so values written
    /// by a newer build still register as encrypted.
    pub fn is_envelope(stored: &str) -> bool {
        match split_segments(stored) {
            Some([algo, version, nonce, ciphertext]) => {
                !algo.is_empty()
                    && algo.chars().all(|c| c.is_ascii_alphanumeric())
                    && parse_version_tag(version).is_ok()
                    && !nonce.is_empty()
                    && !ciphertext.is_empty()
            }
            None => false,
        }
    }

    /// SQL LIKE pattern matching every envelope written under one key version
    ///
    /// The prefix contains no LIKE metacharacters, so this is safe to use
    /// in reference-count scans.
    pub fn version_like_pattern(key_version: u32) -> String {
        format!("${}$v{}$%", Algorithm::Aes256Gcm, key_version)
    }

    /// SQL LIKE pattern matching every envelope regardless of version
    pub fn any_like_pattern() -> String {
        format!("${}$v%", Algorithm::Aes256Gcm)
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Split into the four dollar-delimited segments, or None if the shape is off
fn split_segments(stored: &str) -> Option<[&str; 4]> {
    let mut parts = stored.split('$');
    // A leading '$' yields an empty first element
    if !parts.next()?.is_empty() {
        return None;
    }
    let algo = parts.next()?;
    let version = parts.next()?;
    let nonce = parts.next()?;
    let ciphertext = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some([algo, version, nonce, ciphertext])
}

fn parse_version_tag(tag: &str) -> VaultResult<u32> {
    let digits = tag
        .strip_prefix('v')
        .ok_or_else(|| VaultError::Format(format!("invalid version tag: {}", tag)))?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(VaultError::Format(format!("invalid version tag: {}", tag)));
    }
    digits
        .parse::<u32>()
        .map_err(|e| VaultError::Format(format!("invalid version tag: {}", e)))
}
