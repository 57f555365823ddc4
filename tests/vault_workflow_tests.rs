//! End-to-end write and read paths over a file-backed vault
//!
//! These tests drive the codec the way an application would: values are
//! encrypted at the write boundary, stored in real tables, and read back
//! through the same chokepoint, including after every handle has been
//! rebuilt from disk.

mod support;

use fieldvault::audit::Operation;
use fieldvault::crypto::{Envelope, MasterKey, KEY_SIZE};
use fieldvault::keystore::KeyStore;
use fieldvault::VaultError;
use support::TestVault;

#[test]
fn test_write_and_read_protected_field() {
    let vault = TestVault::new();
    let codec = vault.codec("app");
    let field = vault.field("patients", "tax_code");

    let stored = codec.encode(&field, "RSSMRA80A01H501U").unwrap();
    let rowid = vault.insert_patient("Rossi", Some(&stored), None);

    // What sits in the database is an envelope, not the tax code
    let raw = vault.cell("patients", rowid, "tax_code").unwrap();
    assert!(raw.starts_with("$aes256gcm$v1$"));
    assert!(Envelope::is_envelope(&raw));
    assert!(!raw.contains("RSSMRA80A01H501U"));

    assert_eq!(codec.decode(&field, &raw).unwrap(), "RSSMRA80A01H501U");

    // Both operations made it into the audit trail
    let records = vault.audit.read_all().unwrap();
    let mine: Vec<_> = records.iter().filter(|r| r.actor == "app").collect();
    assert_eq!(mine.len(), 2);
    assert_eq!(mine[0].operation, Operation::Encrypt);
    assert_eq!(mine[1].operation, Operation::Decrypt);
    assert!(mine.iter().all(|r| r.success));
    assert!(mine.iter().all(|r| r.key_version == Some(1)));
    assert!(mine
        .iter()
        .all(|r| r.field_name().as_deref() == Some("patients.tax_code")));
}

#[test]
fn test_values_survive_restart() {
    let mut vault = TestVault::new();
    let codec = vault.codec("app");

    let tax_field = vault.field("patients", "tax_code");
    let email_field = vault.field("patients", "email");
    let tax = codec.encode(&tax_field, "VRDGPP75B02F205X").unwrap();
    let email = codec.encode(&email_field, "g.verdi@example.com").unwrap();
    let rowid = vault.insert_patient("Verdi", Some(&tax), Some(&email));

    // Drop every handle and rebuild from the files on disk
    vault.reopen();
    let codec = vault.codec("app");

    let tax = vault.cell("patients", rowid, "tax_code").unwrap();
    let email = vault.cell("patients", rowid, "email").unwrap();
    assert_eq!(codec.decode(&tax_field, &tax).unwrap(), "VRDGPP75B02F205X");
    assert_eq!(
        codec.decode(&email_field, &email).unwrap(),
        "g.verdi@example.com"
    );

    // The audit log kept the pre-restart entries
    assert!(vault.audit.read_all().unwrap().len() >= 4);
}

#[test]
fn test_wrong_master_key_rejected_at_open() {
    let vault = TestVault::new();

    let wrong = MasterKey::from_bytes([0x00; KEY_SIZE]);
    let err = KeyStore::open(&vault.store, wrong).unwrap_err();
    assert!(matches!(err, VaultError::MasterKey(_)));
}

#[test]
fn test_tampered_envelope_fails_closed() {
    let vault = TestVault::new();
    let codec = vault.codec("app");
    let field = vault.field("patients", "tax_code");

    let stored = codec.encode(&field, "BNCLRA90C43L219V").unwrap();
    let rowid = vault.insert_patient("Bianchi", Some(&stored), None);

    // Flip one ciphertext bit in place, as disk corruption would
    let mut envelope = Envelope::parse(&stored).unwrap();
    envelope.ciphertext[0] ^= 0x01;
    vault.set_cell("patients", rowid, "tax_code", &envelope.encode());

    let raw = vault.cell("patients", rowid, "tax_code").unwrap();
    let err = codec.decode(&field, &raw).unwrap_err();
    assert!(err.is_integrity());

    // The failure is in the trail with its kind; no plaintext anywhere
    let failure = vault.audit.read_all().unwrap().pop().unwrap();
    assert!(!failure.success);
    assert_eq!(failure.operation, Operation::Decrypt);
    assert_eq!(failure.error_kind.as_deref(), Some("integrity"));
    assert_eq!(failure.field_name().as_deref(), Some("patients.tax_code"));
}

#[test]
fn test_envelope_moved_between_tables_rejected() {
    let vault = TestVault::new();
    let codec = vault.codec("app");
    let tax_field = vault.field("patients", "tax_code");
    let iban_field = vault.field("billing", "iban");

    let stored = codec.encode(&tax_field, "RSSMRA80A01H501U").unwrap();
    let rowid = vault.insert_billing("Rossi", Some(&stored));

    // Same key version, wrong context: authentication must fail
    let raw = vault.cell("billing", rowid, "iban").unwrap();
    let err = codec.decode(&iban_field, &raw).unwrap_err();
    assert!(err.is_integrity());

    // Back in its own column it still decrypts
    assert_eq!(codec.decode(&tax_field, &raw).unwrap(), "RSSMRA80A01H501U");
}

#[test]
fn test_plaintext_in_protected_column_is_a_typed_error() {
    let vault = TestVault::new();
    let codec = vault.codec("app");
    let field = vault.field("patients", "tax_code");

    let rowid = vault.insert_patient("Legacy", Some("RSSMRA80A01H501U"), None);

    let raw = vault.cell("patients", rowid, "tax_code").unwrap();
    let err = codec.decode(&field, &raw).unwrap_err();
    assert!(matches!(err, VaultError::NotEncrypted { .. }));
}

#[test]
fn test_stored_envelope_is_never_reencrypted() {
    let vault = TestVault::new();
    let codec = vault.codec("app");
    let field = vault.field("patients", "email");

    let stored = codec.encode(&field, "m.rossi@example.com").unwrap();
    let err = codec.encode(&field, &stored).unwrap_err();
    assert!(err.is_already_encrypted());
}

#[test]
fn test_empty_and_unicode_values_round_trip() {
    let vault = TestVault::new();
    let codec = vault.codec("app");
    let field = vault.field("billing", "iban");

    let empty = codec.encode(&field, "").unwrap();
    assert!(Envelope::is_envelope(&empty));
    assert_eq!(codec.decode(&field, &empty).unwrap(), "");

    let note = "Überweisung – controllo n° 42 完了";
    let stored = codec.encode(&field, note).unwrap();
    assert_eq!(codec.decode(&field, &stored).unwrap(), note);
}

#[test]
fn test_same_value_never_produces_same_envelope() {
    let vault = TestVault::new();
    let codec = vault.codec("app");
    let field = vault.field("patients", "tax_code");

    let first = codec.encode(&field, "RSSMRA80A01H501U").unwrap();
    let second = codec.encode(&field, "RSSMRA80A01H501U").unwrap();
    assert_ne!(first, second);

    assert_eq!(codec.decode(&field, &first).unwrap(), "RSSMRA80A01H501U");
    assert_eq!(codec.decode(&field, &second).unwrap(), "RSSMRA80A01H501U");
}
