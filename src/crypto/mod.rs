//! Cryptographic core for fieldvault
//!
//! AES-256-GCM field encryption behind a stateless engine, the envelope
//! wire format, and the master/data key hierarchy with Argon2id
//! passphrase derivation.

pub mod cipher;
pub mod envelope;
pub mod keys;
pub mod secure_memory;

pub use cipher::{CipherEngine, NonceSource, OsNonceSource};
pub use envelope::{Algorithm, Envelope, NONCE_SIZE, TAG_SIZE};
pub use keys::{DataKey, KdfParams, MasterKey, KEY_SIZE};
pub use secure_memory::SecureString;
