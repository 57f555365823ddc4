//! Shared fixture for the integration suite
//!
//! Builds a complete vault in a temp directory: a file-backed database
//! with two application tables, a bootstrapped key ring, declared fields,
//! and an audit log. `reopen` rebuilds every handle from disk the way a
//! process restart would, which is what most of these tests are about.

// Each test binary compiles this file separately and uses a different
// subset of the helpers.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use fieldvault::audit::AuditLog;
use fieldvault::codec::FieldCodec;
use fieldvault::config::Settings;
use fieldvault::crypto::{MasterKey, KEY_SIZE};
use fieldvault::fields::{FieldDescriptor, FieldRegistry, FieldType, Sensitivity};
use fieldvault::keystore::KeyStore;
use fieldvault::migration::Migrator;
use fieldvault::monitor::MonitoringService;
use fieldvault::rotation::RotationCoordinator;
use fieldvault::storage::{records, Store};
use tempfile::TempDir;

/// Deterministic master key shared by every handle in a test
pub const MASTER_BYTES: [u8; KEY_SIZE] = [0x5A; KEY_SIZE];

/// A vault deployment rooted in a temp directory
pub struct TestVault {
    pub store: Arc<Store>,
    pub keystore: Arc<KeyStore>,
    pub registry: Arc<FieldRegistry>,
    pub audit: Arc<AuditLog>,
    pub settings: Settings,
    temp: TempDir,
}

impl TestVault {
    /// Fresh vault: schema created, key ring at v1, no rows yet
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(Store::open(&temp.path().join("vault.db")).unwrap());
        let keystore =
            Arc::new(KeyStore::bootstrap(&store, MasterKey::from_bytes(MASTER_BYTES)).unwrap());
        let audit = Arc::new(AuditLog::open(temp.path().join("audit.log")).unwrap());
        let registry = Arc::new(
            FieldRegistry::from_descriptors(vec![
                FieldDescriptor::new(
                    "patients",
                    "tax_code",
                    FieldType::TaxId,
                    Sensitivity::Critical,
                ),
                FieldDescriptor::new("patients", "email", FieldType::Email, Sensitivity::High),
                FieldDescriptor::new("billing", "iban", FieldType::FreeText, Sensitivity::High),
            ])
            .unwrap(),
        );

        store
            .with_conn(|conn| {
                conn.execute_batch(
                    "CREATE TABLE patients (name TEXT, tax_code TEXT, email TEXT);
                     CREATE TABLE billing (patient TEXT, iban TEXT);",
                )?;
                Ok(())
            })
            .unwrap();

        Self {
            store,
            keystore,
            registry,
            audit,
            settings: Settings::default(),
            temp,
        }
    }

    /// Rebuild every handle from disk, as a fresh process would
    pub fn reopen(&mut self) {
        self.store = Arc::new(Store::open(&self.db_path()).unwrap());
        self.keystore =
            Arc::new(KeyStore::open(&self.store, MasterKey::from_bytes(MASTER_BYTES)).unwrap());
        self.audit = Arc::new(AuditLog::open(self.temp.path().join("audit.log")).unwrap());
    }

    pub fn db_path(&self) -> PathBuf {
        self.temp.path().join("vault.db")
    }

    pub fn codec(&self, actor: &str) -> FieldCodec {
        FieldCodec::new(Arc::clone(&self.keystore), Arc::clone(&self.audit), actor)
    }

    pub fn rotation(&self, batch_size: usize) -> RotationCoordinator {
        RotationCoordinator::new(
            Arc::clone(&self.store),
            Arc::clone(&self.keystore),
            Arc::clone(&self.registry),
            Arc::clone(&self.audit),
            batch_size,
        )
    }

    pub fn migrator(&self) -> Migrator {
        Migrator::new(
            Arc::clone(&self.store),
            Arc::clone(&self.keystore),
            Arc::clone(&self.registry),
            Arc::clone(&self.audit),
        )
    }

    pub fn monitor(&self) -> MonitoringService {
        MonitoringService::new(
            Arc::clone(&self.store),
            Arc::clone(&self.keystore),
            Arc::clone(&self.registry),
            Arc::clone(&self.audit),
            &self.settings,
        )
    }

    pub fn field(&self, table: &str, column: &str) -> FieldDescriptor {
        self.registry.require(table, column).unwrap().clone()
    }

    /// Insert a patient row with the given stored values, returning its rowid
    pub fn insert_patient(
        &self,
        name: &str,
        tax_code: Option<&str>,
        email: Option<&str>,
    ) -> i64 {
        self.store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO patients (name, tax_code, email) VALUES (?1, ?2, ?3)",
                    rusqlite::params![name, tax_code, email],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .unwrap()
    }

    /// Insert a billing row with the given stored value, returning its rowid
    pub fn insert_billing(&self, patient: &str, iban: Option<&str>) -> i64 {
        self.store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO billing (patient, iban) VALUES (?1, ?2)",
                    rusqlite::params![patient, iban],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .unwrap()
    }

    /// Raw stored value of one cell
    pub fn cell(&self, table: &str, rowid: i64, column: &str) -> Option<String> {
        self.store
            .with_conn(|conn| {
                Ok(conn.query_row(
                    &format!("SELECT {} FROM {} WHERE rowid = ?1", column, table),
                    rusqlite::params![rowid],
                    |row| row.get(0),
                )?)
            })
            .unwrap()
    }

    /// Overwrite one cell, bypassing the codec
    pub fn set_cell(&self, table: &str, rowid: i64, column: &str, value: &str) {
        self.store
            .with_conn(|conn| {
                records::update_value(conn, table, column, rowid, value)?;
                Ok(())
            })
            .unwrap()
    }

    /// Envelope count under one key version across every declared field
    pub fn version_refs(&self, version: u32) -> u64 {
        self.store
            .with_conn(|conn| {
                let mut total = 0;
                for field in self.registry.iter() {
                    total +=
                        records::count_version_refs(conn, &field.table, &field.column, version)?;
                }
                Ok(total)
            })
            .unwrap()
    }

    /// Non-null values in one column that are not envelopes
    pub fn plaintext_count(&self, table: &str, column: &str) -> u64 {
        self.store
            .with_conn(|conn| records::count_plaintext(conn, table, column))
            .unwrap()
    }

    /// Values in one column that are envelopes
    pub fn encrypted_count(&self, table: &str, column: &str) -> u64 {
        self.store
            .with_conn(|conn| records::count_encrypted(conn, table, column))
            .unwrap()
    }
}
