//! AES-256-GCM field encryption engine
//!
//! Stateless value-level encryption: every call takes the key and the
//! associated-data context, generates a fresh nonce, and returns a
//! versioned [`Envelope`]. Nonce generation sits behind a small trait so
//! tests can produce deterministic ciphertexts.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};

use crate::error::{VaultError, VaultResult};

use super::envelope::{Envelope, NONCE_SIZE};
use super::keys::DataKey;

/// Source of per-value nonces
pub trait NonceSource: Send + Sync {
    fn next_nonce(&self) -> [u8; NONCE_SIZE];
}

/// Default nonce source backed by the operating system RNG
pub struct OsNonceSource;

impl NonceSource for OsNonceSource {
    fn next_nonce(&self) -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);
        nonce
    }
}

/// The stateless AEAD engine behind every field encryption
pub struct CipherEngine {
    nonces: Box<dyn NonceSource>,
}

impl CipherEngine {
    /// Create an engine with OS-random nonces
    pub fn new() -> Self {
        Self {
            nonces: Box::new(OsNonceSource),
        }
    }

    /// Create an engine with a caller-supplied nonce source
    pub fn with_nonce_source(nonces: Box<dyn NonceSource>) -> Self {
        Self { nonces }
    }

    /// Encrypt a plaintext under the given key and context
    ///
    /// `aad` is bound into the authentication tag but not stored; decryption
    /// must present the same context or fail.
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        aad: &[u8],
        key: &DataKey,
        key_version: u32,
    ) -> VaultResult<Envelope> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| VaultError::Crypto(format!("failed to create cipher: {}", e)))?;

        let nonce_bytes = self.nonces.next_nonce();
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

        Ok(Envelope::new(key_version, nonce_bytes, ciphertext))
    }

    /// Decrypt an envelope under the given key and context
    ///
    /// Any authentication failure (tampered ciphertext, wrong key, wrong
    /// context) surfaces as a `Crypto` error; the codec layer attaches the
    /// field identity and reports it as an integrity failure.
    pub fn decrypt(&self, envelope: &Envelope, aad: &[u8], key: &DataKey) -> VaultResult<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| VaultError::Crypto(format!("failed to create cipher: {}", e)))?;

        let nonce = Nonce::from_slice(&envelope.nonce);

        cipher
            .decrypt(
                nonce,
                Payload {
                    msg: envelope.ciphertext.as_slice(),
                    aad,
                },
            )
            .map_err(|_| VaultError::Crypto("authentication failed".to_string()))
    }
}

impl Default for CipherEngine {
    fn default() -> Self {
        Self::new()
    }
}
