//! Key material types and the master/data key hierarchy
//!
//! The master key never touches field data directly: it only wraps and
//! unwraps the per-version data keys held by the key store. It can come
//! from an environment variable (hex or base64) or be derived from an
//! operator passphrase with Argon2id, a memory-hard KDF resistant to
//! GPU/ASIC attacks.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use argon2::{
    password_hash::{rand_core::OsRng as SaltRng, PasswordHasher, SaltString},
    Argon2, Params,
};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{VaultError, VaultResult};

use super::envelope::{NONCE_SIZE, TAG_SIZE};

/// Size of AES-256 key material in bytes
pub const KEY_SIZE: usize = 32;

/// Parameters for passphrase-based master key derivation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfParams {
    /// Salt for key derivation (base64 encoded)
    pub salt: String,
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub memory_cost: u32,
    /// Time cost (iterations, default: 3)
    pub time_cost: u32,
    /// Parallelism degree (default: 4)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            salt: String::new(), // Generated on first use
            memory_cost: 65536,  // 64 MiB
            time_cost: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// Create new params with a random salt
    pub fn new() -> Self {
        let salt = SaltString::generate(&mut SaltRng);
        Self {
            salt: salt.to_string(),
            ..Default::default()
        }
    }
}

/// A per-version data encryption key
///
/// Data keys encrypt field values and are themselves stored only in wrapped
/// form. The raw bytes are zeroed on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DataKey {
    key: [u8; KEY_SIZE],
}

impl DataKey {
    /// Generate a fresh random data key
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Build a data key from raw bytes
    pub fn from_bytes(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Get the key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKey").finish_non_exhaustive()
    }
}

/// The master key that wraps data keys
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    key: [u8; KEY_SIZE],
}

impl MasterKey {
    /// Build a master key from raw bytes
    pub fn from_bytes(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Parse a master key from its environment-variable form
    ///
    /// Accepts 64 hex characters or standard base64 of exactly 32 bytes.
    pub fn from_encoded(encoded: &str) -> VaultResult<Self> {
        let encoded = encoded.trim();
        let bytes = if encoded.len() == KEY_SIZE * 2 && encoded.chars().all(|c| c.is_ascii_hexdigit())
        {
            decode_hex(encoded)?
        } else {
            use base64::{engine::general_purpose::STANDARD, Engine};
            STANDARD
                .decode(encoded)
                .map_err(|e| VaultError::MasterKey(format!("invalid key encoding: {}", e)))?
        };

        let key: [u8; KEY_SIZE] = bytes.as_slice().try_into().map_err(|_| {
            VaultError::MasterKey(format!(
                "master key must be {} bytes, got {}",
                KEY_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self { key })
    }

    /// Derive a master key from a passphrase with Argon2id
    pub fn from_passphrase(passphrase: &str, params: &KdfParams) -> VaultResult<Self> {
        let salt = SaltString::from_b64(&params.salt)
            .map_err(|e| VaultError::MasterKey(format!("invalid salt: {}", e)))?;

        let argon2_params = Params::new(
            params.memory_cost,
            params.time_cost,
            params.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| VaultError::MasterKey(format!("invalid Argon2 parameters: {}", e)))?;

        let argon2 = Argon2::new(
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            argon2_params,
        );

        let hash = argon2
            .hash_password(passphrase.as_bytes(), &salt)
            .map_err(|e| VaultError::MasterKey(format!("key derivation failed: {}", e)))?;

        let hash_output = hash
            .hash
            .ok_or_else(|| VaultError::MasterKey("no hash output generated".to_string()))?;
        let hash_bytes = hash_output.as_bytes();

        if hash_bytes.len() < KEY_SIZE {
            return Err(VaultError::MasterKey(
                "hash output too short for AES-256 key".to_string(),
            ));
        }

        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&hash_bytes[..KEY_SIZE]);
        Ok(Self { key })
    }

    /// Wrap a data key for at-rest storage
    ///
    /// The blob is `nonce || ciphertext+tag`, with the key version bound
    /// as associated data so a wrapped key cannot be replayed under a
    /// different version row.
    pub fn wrap_key(&self, data_key: &DataKey, key_version: u32) -> VaultResult<Vec<u8>> {
        self.seal(data_key.as_bytes(), wrap_aad(key_version).as_bytes())
    }

    /// Unwrap a stored data key blob
    pub fn unwrap_key(&self, wrapped: &[u8], key_version: u32) -> VaultResult<DataKey> {
        let plaintext = self
            .open(wrapped, wrap_aad(key_version).as_bytes())
            .map_err(|_| {
                VaultError::MasterKey(format!(
                    "failed to unwrap data key v{} (wrong master key or corrupted key record)",
                    key_version
                ))
            })?;

        let key: [u8; KEY_SIZE] = plaintext.as_slice().try_into().map_err(|_| {
            VaultError::MasterKey(format!(
                "unwrapped key v{} has wrong length: {}",
                key_version,
                plaintext.len()
            ))
        })?;
        Ok(DataKey::from_bytes(key))
    }

    /// Produce the stored verifier token checked at startup
    pub fn new_verifier(&self) -> VaultResult<String> {
        use base64::{engine::general_purpose::STANDARD, Engine};
        let blob = self.seal(VERIFIER_CANARY, VERIFIER_AAD)?;
        Ok(STANDARD.encode(blob))
    }

    /// Check a stored verifier token against this master key
    ///
    /// A mismatch means the operator supplied the wrong passphrase or key;
    /// failing here avoids surfacing the mistake as tag failures on data.
    pub fn check_verifier(&self, token: &str) -> VaultResult<()> {
        use base64::{engine::general_purpose::STANDARD, Engine};
        let blob = STANDARD
            .decode(token.trim())
            .map_err(|e| VaultError::MasterKey(format!("invalid verifier encoding: {}", e)))?;
        let plaintext = self
            .open(&blob, VERIFIER_AAD)
            .map_err(|_| VaultError::MasterKey("master key verification failed".to_string()))?;
        if plaintext != VERIFIER_CANARY {
            return Err(VaultError::MasterKey(
                "master key verification failed".to_string(),
            ));
        }
        Ok(())
    }

    fn seal(&self, plaintext: &[u8], aad: &[u8]) -> VaultResult<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| VaultError::Crypto(format!("failed to create cipher: {}", e)))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| VaultError::Crypto(format!("encryption failed: {}", e)))?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    fn open(&self, blob: &[u8], aad: &[u8]) -> VaultResult<Vec<u8>> {
        if blob.len() < NONCE_SIZE + TAG_SIZE {
            return Err(VaultError::Crypto(format!(
                "wrapped blob too short: {} bytes",
                blob.len()
            )));
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_SIZE);

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| VaultError::Crypto(format!("failed to create cipher: {}", e)))?;

        cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| VaultError::Crypto("authentication failed".to_string()))
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey").finish_non_exhaustive()
    }
}

const VERIFIER_CANARY: &[u8] = b"fieldvault master key verifier";
const VERIFIER_AAD: &[u8] = b"fieldvault/verify";

fn wrap_aad(key_version: u32) -> String {
    format!("fieldvault/key/v{}", key_version)
}

fn decode_hex(hex: &str) -> VaultResult<Vec<u8>> {
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|e| VaultError::MasterKey(format!("invalid hex: {}", e)))
        })
        .collect()
}
