//! fieldvault - Transparent field-level encryption for relational records
//!
//! This library encrypts declared-sensitive columns at rest with
//! AES-256-GCM under versioned data keys, while keeping reads and writes
//! looking like plain strings to the application. Around that core it
//! carries the operational machinery a deployment needs: online key
//! rotation, plaintext-to-ciphertext migration, an append-only audit log,
//! and compliance monitoring.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Configuration and path management
//! - `error`: Custom error types
//! - `crypto`: Cipher engine, envelope format, master and data keys
//! - `fields`: The declared map of sensitive columns
//! - `keystore`: Versioned key ring over wrapped data keys
//! - `codec`: The encrypt-on-write / decrypt-on-read seam
//! - `models`: Key versions, rotation plans, migration jobs
//! - `storage`: SQLite persistence for control tables and record batches
//! - `rotation`: Key rotation coordinator
//! - `migration`: Plaintext migration runner
//! - `audit`: Append-only audit logging
//! - `monitor`: Health reports and compliance alerts
//! - `cli`: Operator command handlers
//!
//! # Example
//!
//! ```rust,ignore
//! use fieldvault::codec::FieldCodec;
//!
//! let field = registry.require("patients", "tax_code")?;
//! let stored = codec.encode(field, "RSSMRA80A01H501U")?;
//! let plain = codec.decode(field, &stored)?;
//! ```

pub mod audit;
pub mod cli;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod fields;
pub mod keystore;
pub mod migration;
pub mod models;
pub mod monitor;
pub mod rotation;
pub mod storage;

pub use error::{VaultError, VaultResult};
