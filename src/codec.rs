//! Field-level encode/decode at the persistence boundary
//!
//! The codec is the single entry point applications use to turn a plaintext
//! field value into a stored envelope and back. Callers invoke it explicitly
//! when writing or reading a protected column; nothing here hooks into query
//! machinery.
//!
//! Every call is audited with its outcome and latency, success or failure.
//! Decrypt failures surface as typed errors and are never masked as empty
//! values.

use std::sync::Arc;
use std::time::Instant;

use crate::audit::{AuditLog, AuditRecord, Operation};
use crate::crypto::{CipherEngine, Envelope};
use crate::error::{VaultError, VaultResult};
use crate::fields::FieldDescriptor;
use crate::keystore::KeyStore;

/// Encrypts and decrypts individual field values
///
/// Cheap to construct per call site; the key store and audit log are shared
/// by `Arc`. Encode and decode never touch the database, so concurrent field
/// operations only contend on the key ring's read lock and the audit file
/// mutex.
pub struct FieldCodec {
    engine: CipherEngine,
    keystore: Arc<KeyStore>,
    audit: Arc<AuditLog>,
    actor: String,
}

impl FieldCodec {
    pub fn new(keystore: Arc<KeyStore>, audit: Arc<AuditLog>, actor: impl Into<String>) -> Self {
        Self {
            engine: CipherEngine::new(),
            keystore,
            audit,
            actor: actor.into(),
        }
    }

    /// Construct with a specific cipher engine (deterministic nonces in tests)
    pub fn with_engine(
        engine: CipherEngine,
        keystore: Arc<KeyStore>,
        audit: Arc<AuditLog>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            keystore,
            audit,
            actor: actor.into(),
        }
    }

    /// A codec over the same key ring and audit log under a different actor
    ///
    /// Batch jobs use this so their audit records name the job rather than
    /// the interactive actor.
    pub fn with_actor(&self, actor: impl Into<String>) -> Self {
        Self {
            engine: CipherEngine::new(),
            keystore: Arc::clone(&self.keystore),
            audit: Arc::clone(&self.audit),
            actor: actor.into(),
        }
    }

    /// Encrypt a plaintext field value into an envelope string
    ///
    /// Always encrypts under the current active key version. Passing a value
    /// that is already an envelope is a caller bug and fails with
    /// `AlreadyEncrypted`; batch jobs check and skip before calling.
    pub fn encode(&self, field: &FieldDescriptor, plaintext: &str) -> VaultResult<String> {
        let started = Instant::now();
        let mut key_version = None;

        let result = (|| -> VaultResult<String> {
            if Envelope::is_envelope(plaintext) {
                return Err(VaultError::AlreadyEncrypted {
                    table: field.table.clone(),
                    column: field.column.clone(),
                });
            }

            let (version, key) = self.keystore.current_write_key()?;
            key_version = Some(version);

            let envelope = self.engine.encrypt(
                plaintext.as_bytes(),
                field.qualified_name().as_bytes(),
                &key,
                version,
            )?;
            Ok(envelope.encode())
        })();

        self.record_outcome(Operation::Encrypt, field, key_version, &result, started);
        result
    }

    /// Decrypt a stored envelope string back to the plaintext field value
    ///
    /// The envelope must carry a readable key version and authenticate under
    /// this field's context. A ciphertext copied from another column fails
    /// with `Integrity` here because the context no longer matches.
    pub fn decode(&self, field: &FieldDescriptor, stored: &str) -> VaultResult<String> {
        let started = Instant::now();
        let mut key_version = None;

        let result = (|| -> VaultResult<String> {
            if !Envelope::is_envelope(stored) {
                return Err(VaultError::NotEncrypted {
                    table: field.table.clone(),
                    column: field.column.clone(),
                });
            }

            let envelope = Envelope::parse(stored)?;
            key_version = Some(envelope.key_version);

            let key = self.keystore.key_for(envelope.key_version)?;
            let plaintext = self
                .engine
                .decrypt(&envelope, field.qualified_name().as_bytes(), &key)
                .map_err(|e| match e {
                    VaultError::Crypto(_) => VaultError::Integrity {
                        table: field.table.clone(),
                        column: field.column.clone(),
                    },
                    other => other,
                })?;

            String::from_utf8(plaintext)
                .map_err(|_| VaultError::Format("decrypted value is not valid UTF-8".to_string()))
        })();

        self.record_outcome(Operation::Decrypt, field, key_version, &result, started);
        result
    }

    /// Key version decode would need for this stored value, without decrypting
    pub fn stored_version(stored: &str) -> VaultResult<u32> {
        Ok(Envelope::parse(stored)?.key_version)
    }

    fn record_outcome<T>(
        &self,
        operation: Operation,
        field: &FieldDescriptor,
        key_version: Option<u32>,
        result: &VaultResult<T>,
        started: Instant,
    ) {
        let micros = started.elapsed().as_micros() as u64;
        let record = match result {
            Ok(_) => AuditRecord::field_success(
                operation,
                &self.actor,
                &field.table,
                &field.column,
                key_version.unwrap_or(0),
                micros,
            ),
            Err(e) => AuditRecord::field_failure(
                operation,
                &self.actor,
                &field.table,
                &field.column,
                key_version,
                e.kind(),
                micros,
            ),
        };
        self.audit.record(&record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::{MasterKey, KEY_SIZE};
    use crate::fields::{FieldType, Sensitivity};
    use crate::storage::Store;
    use tempfile::TempDir;

    fn setup() -> (FieldCodec, Arc<KeyStore>, Arc<AuditLog>, Store, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = Store::open_in_memory().unwrap();
        let master = MasterKey::from_bytes([7; KEY_SIZE]);
        let keystore = Arc::new(KeyStore::bootstrap(&store, master).unwrap());
        let audit = Arc::new(AuditLog::open(temp.path().join("audit.log")).unwrap());
        let codec = FieldCodec::new(Arc::clone(&keystore), Arc::clone(&audit), "test");
        (codec, keystore, audit, store, temp)
    }

    fn tax_code_field() -> FieldDescriptor {
        FieldDescriptor::new("patients", "tax_code", FieldType::TaxId, Sensitivity::Critical)
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let (codec, _keystore, audit, _store, _temp) = setup();
        let field = tax_code_field();

        let stored = codec.encode(&field, "RSSMRA80A01H501U").unwrap();
        assert!(stored.starts_with("$aes256gcm$v1$"));
        assert!(Envelope::is_envelope(&stored));

        let plaintext = codec.decode(&field, &stored).unwrap();
        assert_eq!(plaintext, "RSSMRA80A01H501U");

        let records = audit.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].operation, Operation::Encrypt);
        assert_eq!(records[1].operation, Operation::Decrypt);
        assert!(records.iter().all(|r| r.success));
        assert!(records.iter().all(|r| r.key_version == Some(1)));
    }

    #[test]
    fn test_encode_rejects_envelope_input() {
        let (codec, _keystore, audit, _store, _temp) = setup();
        let field = tax_code_field();

        let stored = codec.encode(&field, "RSSMRA80A01H501U").unwrap();
        let err = codec.encode(&field, &stored).unwrap_err();
        assert!(err.is_already_encrypted());

        let records = audit.read_all().unwrap();
        let failure = records.last().unwrap();
        assert!(!failure.success);
        assert_eq!(failure.error_kind.as_deref(), Some("already_encrypted"));
    }

    #[test]
    fn test_decode_rejects_plaintext() {
        let (codec, _keystore, _audit, _store, _temp) = setup();
        let field = tax_code_field();

        let err = codec.decode(&field, "not encrypted at all").unwrap_err();
        assert!(matches!(err, VaultError::NotEncrypted { .. }));
    }

    #[test]
    fn test_decode_wrong_column_fails_integrity() {
        let (codec, _keystore, audit, _store, _temp) = setup();
        let field = tax_code_field();
        let other = FieldDescriptor::new("patients", "email", FieldType::Email, Sensitivity::High);

        let stored = codec.encode(&field, "RSSMRA80A01H501U").unwrap();
        let err = codec.decode(&other, &stored).unwrap_err();
        assert!(err.is_integrity());

        let failure = audit.read_all().unwrap().pop().unwrap();
        assert_eq!(failure.error_kind.as_deref(), Some("integrity"));
        assert_eq!(failure.field_name().as_deref(), Some("patients.email"));
        assert_eq!(failure.key_version, Some(1));
    }

    #[test]
    fn test_decode_tampered_ciphertext_fails_integrity() {
        let (codec, _keystore, _audit, _store, _temp) = setup();
        let field = tax_code_field();

        let stored = codec.encode(&field, "mario.rossi@example.com").unwrap();
        let mut envelope = Envelope::parse(&stored).unwrap();
        envelope.ciphertext[0] ^= 0x01;

        let err = codec.decode(&field, &envelope.encode()).unwrap_err();
        assert!(err.is_integrity());
    }

    #[test]
    fn test_decode_unknown_version() {
        let (codec, _keystore, _audit, _store, _temp) = setup();
        let field = tax_code_field();

        let stored = codec.encode(&field, "hello").unwrap();
        let mut envelope = Envelope::parse(&stored).unwrap();
        envelope.key_version = 42;

        let err = codec.decode(&field, &envelope.encode()).unwrap_err();
        assert!(matches!(err, VaultError::UnknownKeyVersion(42)));
    }

    #[test]
    fn test_decode_after_retirement_fails() {
        let (codec, keystore, _audit, _store, _temp) = setup();
        let field = tax_code_field();

        let stored = codec.encode(&field, "secret").unwrap();

        // Rotate to v2 and retire v1
        let prepared = keystore.prepare_next_version().unwrap();
        let mut retiring = keystore.version(1).unwrap();
        retiring.begin_retiring().unwrap();
        keystore.adopt_version(prepared, retiring).unwrap();

        // Still readable while retiring
        assert_eq!(codec.decode(&field, &stored).unwrap(), "secret");

        let mut retired = keystore.version(1).unwrap();
        retired.mark_retired().unwrap();
        keystore.apply_retired(retired);

        let err = codec.decode(&field, &stored).unwrap_err();
        assert!(matches!(err, VaultError::UnknownKeyVersion(1)));
    }

    #[test]
    fn test_encode_uses_active_version_after_rotation() {
        let (codec, keystore, _audit, _store, _temp) = setup();
        let field = tax_code_field();

        let prepared = keystore.prepare_next_version().unwrap();
        let mut retiring = keystore.version(1).unwrap();
        retiring.begin_retiring().unwrap();
        keystore.adopt_version(prepared, retiring).unwrap();

        let stored = codec.encode(&field, "fresh write").unwrap();
        assert!(stored.starts_with("$aes256gcm$v2$"));
        assert_eq!(FieldCodec::stored_version(&stored).unwrap(), 2);
    }

    #[test]
    fn test_with_actor_names_batch_job() {
        let (codec, _keystore, audit, _store, _temp) = setup();
        let field = tax_code_field();

        let job_codec = codec.with_actor("migration/job-1234");
        job_codec.encode(&field, "value").unwrap();

        let record = audit.read_all().unwrap().pop().unwrap();
        assert_eq!(record.actor, "migration/job-1234");
    }
}
