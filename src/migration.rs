//! Plaintext-to-envelope migration runner
//!
//! A migration job walks one table in rowid order and encrypts every
//! declared plaintext value through the codec. Row updates and the cursor
//! advance commit in the same transaction, so a crash mid-batch never
//! desynchronizes the two: on restart the job resumes from the last
//! committed batch, and re-examining a committed row just skips its
//! already-encrypted values.
//!
//! Values that are already envelopes when the walk reaches them are counted
//! as skips, never errors. Rollback is the inverse walk over the committed
//! range, restoring plaintext through the same codec.

use std::sync::Arc;
use std::thread;

use chrono::Utc;
use serde::Serialize;

use crate::audit::{AuditLog, AuditRecord, Operation};
use crate::codec::FieldCodec;
use crate::crypto::Envelope;
use crate::error::{VaultError, VaultResult};
use crate::fields::FieldRegistry;
use crate::keystore::KeyStore;
use crate::models::{JobId, MigrationJob, MigrationStatus};
use crate::storage::{jobs, records, Store};

/// Actor name under which lifecycle events are audited
const MIGRATION_ACTOR: &str = "migration";

/// What `dry_run` found without touching anything
#[derive(Debug, Clone, Serialize)]
pub struct DryRunReport {
    pub job_id: JobId,
    pub table: String,
    /// Rows past the job's cursor
    pub rows_remaining: u64,
    /// Plaintext values the job would encrypt
    pub values_to_encrypt: u64,
    /// Values it would skip because they are already envelopes
    pub values_already_encrypted: u64,
}

/// Runs migration jobs against one table at a time
pub struct Migrator {
    store: Arc<Store>,
    keystore: Arc<KeyStore>,
    registry: Arc<FieldRegistry>,
    audit: Arc<AuditLog>,
}

impl Migrator {
    pub fn new(
        store: Arc<Store>,
        keystore: Arc<KeyStore>,
        registry: Arc<FieldRegistry>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            store,
            keystore,
            registry,
            audit,
        }
    }

    /// Create a job for one declared table
    ///
    /// Counts rows but mutates nothing. Fails with `MigrationInProgress`
    /// while the table has a running or paused job and `RotationInProgress`
    /// while any rotation plan is non-terminal.
    pub fn plan(&self, table: &str) -> VaultResult<MigrationJob> {
        if !self.registry.contains_table(table) {
            return Err(VaultError::table_not_found(table));
        }

        let job = self.store.with_conn(|conn| {
            if let Some(existing) = jobs::active_migration_for_table(conn, table)? {
                return Err(VaultError::MigrationInProgress(existing.table));
            }
            if let Some(plan) = jobs::active_rotation_plan(conn)? {
                return Err(VaultError::RotationInProgress { plan_id: plan.id });
            }

            let total = records::count_rows(conn, table)?;
            let job = MigrationJob::new(table, total);
            jobs::insert_migration_job(conn, &job)?;
            Ok(job)
        })?;

        tracing::info!(job = %job.id, table, rows = job.total_rows, "migration job planned");
        self.audit.record(&AuditRecord::event(
            Operation::Migrate,
            MIGRATION_ACTOR,
            format!(
                "job {} planned for {} ({} rows)",
                job.id, job.table, job.total_rows
            ),
        ));

        Ok(job)
    }

    /// Run a job forward in bounded batches until done or paused
    ///
    /// Honors a cooperative pause by re-reading the job's status between
    /// batches; an unexpected batch error marks the job `failed` at the last
    /// committed cursor and a fresh job must take over (committed rows are
    /// skipped as already encrypted).
    pub fn execute(&self, job_id: JobId, batch_size: usize) -> VaultResult<MigrationJob> {
        let mut job = self.require_job(job_id)?;
        if !job.can_execute() {
            return Err(VaultError::InvalidJobState {
                job_id: job.id,
                status: job.status.to_string(),
                message: "job can no longer run",
            });
        }
        if let Some(plan) = self.store.with_conn(|conn| jobs::active_rotation_plan(conn))? {
            return Err(VaultError::RotationInProgress { plan_id: plan.id });
        }

        let fields = self.registry.fields_for_table(&job.table);
        if fields.is_empty() {
            return Err(VaultError::table_not_found(&job.table));
        }
        let columns: Vec<&str> = fields.iter().map(|f| f.column.as_str()).collect();
        let batch_size = batch_size.max(1);

        let resuming = job.status != MigrationStatus::Planned;
        job.status = MigrationStatus::Running;
        if job.started_at.is_none() {
            job.started_at = Some(Utc::now());
        }
        self.persist(&job)?;
        self.audit.record(&AuditRecord::event(
            Operation::Migrate,
            MIGRATION_ACTOR,
            if resuming {
                format!("job {} resumed at rowid {}", job.id, job.cursor)
            } else {
                format!("job {} started", job.id)
            },
        ));

        let codec = FieldCodec::new(
            Arc::clone(&self.keystore),
            Arc::clone(&self.audit),
            format!("migration/{}", job.id),
        );

        loop {
            // Another handle may have flipped the status to paused
            let current = self.require_job(job.id)?;
            if current.status == MigrationStatus::Paused {
                self.audit.record(&AuditRecord::event(
                    Operation::Migrate,
                    MIGRATION_ACTOR,
                    format!("job {} paused at rowid {}", current.id, current.cursor),
                ));
                return Ok(current);
            }

            let advanced = self.store.with_conn(|conn| {
                let tx = conn.transaction()?;
                let batch =
                    records::fetch_batch(&tx, &job.table, &columns, job.cursor, batch_size)?;

                let last = match batch.last() {
                    Some(row) => row.rowid,
                    None => return Ok(false),
                };

                let mut skipped = 0u64;
                for row in &batch {
                    for (idx, field) in fields.iter().enumerate() {
                        match row.values[idx].as_deref() {
                            None => {}
                            Some(v) if Envelope::is_envelope(v) => skipped += 1,
                            Some(v) => {
                                let stored = codec.encode(field, v)?;
                                records::update_value(
                                    &tx,
                                    &job.table,
                                    &field.column,
                                    row.rowid,
                                    &stored,
                                )?;
                            }
                        }
                    }
                }

                job.cursor = last;
                job.processed_rows += batch.len() as u64;
                job.skipped_values += skipped;
                jobs::update_migration_job(&tx, &job)?;
                tx.commit()?;
                Ok(true)
            });

            match advanced {
                Ok(true) => thread::yield_now(),
                Ok(false) => break,
                Err(e) => return Err(self.fail_job(&mut job, e)),
            }
        }

        job.status = MigrationStatus::Completed;
        job.completed_at = Some(Utc::now());
        job.last_error = None;
        self.persist(&job)?;

        tracing::info!(
            job = %job.id,
            table = %job.table,
            rows = job.processed_rows,
            skipped = job.skipped_values,
            "migration completed"
        );
        self.audit.record(&AuditRecord::event(
            Operation::Migrate,
            MIGRATION_ACTOR,
            format!(
                "job {} completed: {} rows, {} value(s) skipped",
                job.id, job.processed_rows, job.skipped_values
            ),
        ));

        Ok(job)
    }

    /// Report what `execute` would do from the job's current cursor
    ///
    /// Read-only: no row updates, no job mutation, no field audit records.
    pub fn dry_run(&self, job_id: JobId, batch_size: usize) -> VaultResult<DryRunReport> {
        let job = self.require_job(job_id)?;
        if !job.can_execute() {
            return Err(VaultError::InvalidJobState {
                job_id: job.id,
                status: job.status.to_string(),
                message: "job can no longer run",
            });
        }

        let fields = self.registry.fields_for_table(&job.table);
        if fields.is_empty() {
            return Err(VaultError::table_not_found(&job.table));
        }
        let columns: Vec<&str> = fields.iter().map(|f| f.column.as_str()).collect();
        let batch_size = batch_size.max(1);

        let mut report = DryRunReport {
            job_id: job.id,
            table: job.table.clone(),
            rows_remaining: 0,
            values_to_encrypt: 0,
            values_already_encrypted: 0,
        };

        let mut cursor = job.cursor;
        loop {
            let batch = self.store.with_conn(|conn| {
                records::fetch_batch(conn, &job.table, &columns, cursor, batch_size)
            })?;
            let last = match batch.last() {
                Some(row) => row.rowid,
                None => break,
            };

            for row in &batch {
                report.rows_remaining += 1;
                for value in row.values.iter().flatten() {
                    if Envelope::is_envelope(value) {
                        report.values_already_encrypted += 1;
                    } else {
                        report.values_to_encrypt += 1;
                    }
                }
            }
            cursor = last;
        }

        Ok(report)
    }

    /// Job by id
    pub fn status(&self, job_id: JobId) -> VaultResult<MigrationJob> {
        self.require_job(job_id)
    }

    /// Every job, newest first
    pub fn list_jobs(&self) -> VaultResult<Vec<MigrationJob>> {
        self.store.with_conn(|conn| jobs::list_migration_jobs(conn))
    }

    /// Jobs currently occupying a table
    pub fn active_jobs(&self) -> VaultResult<Vec<MigrationJob>> {
        self.store.with_conn(|conn| jobs::active_migrations(conn))
    }

    /// Flip a running job to paused
    ///
    /// The runner notices between batches and stops with all progress
    /// committed; `execute` on the paused job resumes it.
    pub fn pause(&self, job_id: JobId) -> VaultResult<MigrationJob> {
        let mut job = self.require_job(job_id)?;
        if job.status != MigrationStatus::Running {
            return Err(VaultError::InvalidJobState {
                job_id: job.id,
                status: job.status.to_string(),
                message: "only a running job can be paused",
            });
        }
        job.status = MigrationStatus::Paused;
        self.persist(&job)?;
        self.audit.record(&AuditRecord::event(
            Operation::Migrate,
            MIGRATION_ACTOR,
            format!("job {} pause requested", job.id),
        ));
        Ok(job)
    }

    /// Restore the committed range back to plaintext
    ///
    /// Defined only while the job is running or paused; a completed
    /// migration is permanent. Walks rows up to the job's cursor, decrypts
    /// every envelope value through the codec, and marks the job
    /// `rolled_back`.
    pub fn rollback(&self, job_id: JobId, batch_size: usize) -> VaultResult<MigrationJob> {
        let mut job = self.require_job(job_id)?;
        if !job.can_rollback() {
            return Err(VaultError::InvalidJobState {
                job_id: job.id,
                status: job.status.to_string(),
                message: "only a running or paused job can be rolled back",
            });
        }

        let fields = self.registry.fields_for_table(&job.table);
        if fields.is_empty() {
            return Err(VaultError::table_not_found(&job.table));
        }
        let columns: Vec<&str> = fields.iter().map(|f| f.column.as_str()).collect();
        let batch_size = batch_size.max(1);

        let codec = FieldCodec::new(
            Arc::clone(&self.keystore),
            Arc::clone(&self.audit),
            format!("migration/{}", job.id),
        );

        let limit = job.cursor;
        let mut cursor = 0i64;
        let mut restored = 0u64;

        while cursor < limit {
            let result = self.store.with_conn(|conn| {
                let tx = conn.transaction()?;
                let batch = records::fetch_batch(&tx, &job.table, &columns, cursor, batch_size)?;

                let mut reached_end = batch.is_empty();
                for row in &batch {
                    if row.rowid > limit {
                        reached_end = true;
                        break;
                    }
                    for (idx, field) in fields.iter().enumerate() {
                        if let Some(value) = row.values[idx].as_deref() {
                            if Envelope::is_envelope(value) {
                                let plaintext = codec.decode(field, value)?;
                                records::update_value(
                                    &tx,
                                    &job.table,
                                    &field.column,
                                    row.rowid,
                                    &plaintext,
                                )?;
                                restored += 1;
                            }
                        }
                    }
                    cursor = row.rowid;
                }

                tx.commit()?;
                Ok(reached_end)
            });

            match result {
                Ok(true) => break,
                Ok(false) => thread::yield_now(),
                Err(e) => {
                    // stay rollbackable; record what stopped us
                    job.last_error = Some(e.to_string());
                    self.persist(&job)?;
                    self.audit.record(&AuditRecord::event_failure(
                        Operation::Migrate,
                        MIGRATION_ACTOR,
                        format!("job {} rollback stopped at rowid {}", job.id, cursor),
                        e.kind(),
                    ));
                    return Err(e);
                }
            }
        }

        job.status = MigrationStatus::RolledBack;
        job.completed_at = Some(Utc::now());
        job.last_error = None;
        self.persist(&job)?;

        tracing::info!(job = %job.id, table = %job.table, restored, "migration rolled back");
        self.audit.record(&AuditRecord::event(
            Operation::Migrate,
            MIGRATION_ACTOR,
            format!("job {} rolled back: {} value(s) restored", job.id, restored),
        ));

        Ok(job)
    }

    fn require_job(&self, job_id: JobId) -> VaultResult<MigrationJob> {
        self.store
            .with_conn(|conn| jobs::get_migration_job(conn, job_id))?
            .ok_or_else(|| VaultError::job_not_found(job_id.to_string()))
    }

    fn persist(&self, job: &MigrationJob) -> VaultResult<()> {
        self.store
            .with_conn(|conn| jobs::update_migration_job(conn, job))
    }

    /// Record a batch failure, mark the job failed, hand back the error
    fn fail_job(&self, job: &mut MigrationJob, cause: VaultError) -> VaultError {
        job.status = MigrationStatus::Failed;
        job.completed_at = Some(Utc::now());
        job.last_error = Some(cause.to_string());
        if let Err(persist_err) = self.persist(job) {
            tracing::error!(error = %persist_err, "failed to record migration failure");
        }
        tracing::error!(job = %job.id, table = %job.table, error = %cause, "migration failed");
        self.audit.record(&AuditRecord::event_failure(
            Operation::Migrate,
            MIGRATION_ACTOR,
            format!("job {} failed at rowid {}", job.id, job.cursor),
            cause.kind(),
        ));
        cause
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::{MasterKey, KEY_SIZE};
    use crate::fields::{FieldDescriptor, FieldType, Sensitivity};
    use crate::models::RotationPlan;
    use tempfile::TempDir;

    struct Fixture {
        store: Arc<Store>,
        keystore: Arc<KeyStore>,
        registry: Arc<FieldRegistry>,
        audit: Arc<AuditLog>,
        codec: FieldCodec,
        _temp: TempDir,
    }

    impl Fixture {
        fn migrator(&self) -> Migrator {
            Migrator::new(
                Arc::clone(&self.store),
                Arc::clone(&self.keystore),
                Arc::clone(&self.registry),
                Arc::clone(&self.audit),
            )
        }

        fn cell(&self, rowid: i64, column: &str) -> Option<String> {
            self.store
                .with_conn(|conn| {
                    Ok(conn.query_row(
                        &format!("SELECT {} FROM patients WHERE rowid = ?1", column),
                        rusqlite::params![rowid],
                        |row| row.get(0),
                    )?)
                })
                .unwrap()
        }

        fn plaintext_count(&self, column: &str) -> u64 {
            self.store
                .with_conn(|conn| records::count_plaintext(conn, "patients", column))
                .unwrap()
        }

        fn encrypted_count(&self, column: &str) -> u64 {
            self.store
                .with_conn(|conn| records::count_encrypted(conn, "patients", column))
                .unwrap()
        }
    }

    /// Three patients, tax codes in plaintext. Rossi's email is already
    /// encrypted (a previous partial effort), Verdi's is NULL, Bianchi's is
    /// plaintext.
    fn setup() -> Fixture {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let master = MasterKey::from_bytes([3; KEY_SIZE]);
        let keystore = Arc::new(KeyStore::bootstrap(&store, master).unwrap());
        let audit = Arc::new(AuditLog::open(temp.path().join("audit.log")).unwrap());
        let registry = Arc::new(
            FieldRegistry::from_descriptors(vec![
                FieldDescriptor::new("patients", "tax_code", FieldType::TaxId, Sensitivity::Critical),
                FieldDescriptor::new("patients", "email", FieldType::Email, Sensitivity::High),
            ])
            .unwrap(),
        );
        let codec = FieldCodec::new(Arc::clone(&keystore), Arc::clone(&audit), "test");

        store
            .with_conn(|conn| {
                conn.execute_batch(
                    "CREATE TABLE patients (name TEXT, tax_code TEXT, email TEXT);",
                )?;
                Ok(())
            })
            .unwrap();

        let email_field = registry.require("patients", "email").unwrap().clone();
        let rossi_email = codec.encode(&email_field, "m.rossi@example.com").unwrap();

        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO patients (name, tax_code, email) VALUES
                        ('Rossi', 'RSSMRA80A01H501U', ?1),
                        ('Verdi', 'VRDGPP75B02F205X', NULL),
                        ('Bianchi', 'BNCLRA90C43L219V', 'b.bianchi@example.com')",
                    rusqlite::params![rossi_email],
                )?;
                Ok(())
            })
            .unwrap();

        Fixture {
            store,
            keystore,
            registry,
            audit,
            codec,
            _temp: temp,
        }
    }

    #[test]
    fn test_plan_counts_rows() {
        let fx = setup();
        let migrator = fx.migrator();

        let job = migrator.plan("patients").unwrap();
        assert_eq!(job.status, MigrationStatus::Planned);
        assert_eq!(job.total_rows, 3);
        assert_eq!(job.cursor, 0);

        // Planning mutated nothing
        assert_eq!(fx.plaintext_count("tax_code"), 3);

        let fetched = migrator.status(job.id).unwrap();
        assert_eq!(fetched.status, MigrationStatus::Planned);
    }

    #[test]
    fn test_plan_requires_declared_table() {
        let fx = setup();
        let err = fx.migrator().plan("users").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_plan_refuses_table_with_active_job() {
        let fx = setup();
        let migrator = fx.migrator();

        let job = migrator.plan("patients").unwrap();
        let mut running = migrator.status(job.id).unwrap();
        running.status = MigrationStatus::Running;
        fx.store
            .with_conn(|conn| jobs::update_migration_job(conn, &running))
            .unwrap();

        let err = migrator.plan("patients").unwrap_err();
        assert!(matches!(err, VaultError::MigrationInProgress(t) if t == "patients"));
    }

    #[test]
    fn test_plan_and_execute_blocked_by_rotation() {
        let fx = setup();
        let migrator = fx.migrator();

        let job = migrator.plan("patients").unwrap();

        let plan = RotationPlan::new(1, 2, vec!["patients".into()], None);
        fx.store
            .with_conn(|conn| jobs::insert_rotation_plan(conn, &plan))
            .unwrap();

        assert!(matches!(
            migrator.plan("patients").unwrap_err(),
            VaultError::RotationInProgress { .. }
        ));
        assert!(matches!(
            migrator.execute(job.id, 10).unwrap_err(),
            VaultError::RotationInProgress { .. }
        ));
    }

    #[test]
    fn test_execute_encrypts_plaintext() {
        let fx = setup();
        let migrator = fx.migrator();

        let job = migrator.plan("patients").unwrap();
        let done = migrator.execute(job.id, 2).unwrap();

        assert_eq!(done.status, MigrationStatus::Completed);
        assert_eq!(done.processed_rows, 3);
        assert_eq!(done.skipped_values, 1); // Rossi's pre-encrypted email
        assert_eq!(done.cursor, 3);
        assert!(done.completed_at.is_some());
        assert_eq!(done.progress_percent(), 100.0);

        assert_eq!(fx.plaintext_count("tax_code"), 0);
        assert_eq!(fx.encrypted_count("tax_code"), 3);
        assert_eq!(fx.plaintext_count("email"), 0);
        assert_eq!(fx.encrypted_count("email"), 2); // Verdi's NULL untouched

        // Values decode to the original plaintext through the codec
        let tax_field = fx.registry.require("patients", "tax_code").unwrap();
        let stored = fx.cell(1, "tax_code").unwrap();
        assert_eq!(fx.codec.decode(tax_field, &stored).unwrap(), "RSSMRA80A01H501U");
        assert!(fx.cell(2, "email").is_none());
    }

    #[test]
    fn test_execute_is_idempotent_over_encrypted_table() {
        let fx = setup();
        let migrator = fx.migrator();

        let first = migrator.plan("patients").unwrap();
        migrator.execute(first.id, 10).unwrap();
        let before: Option<String> = fx.cell(1, "tax_code");

        let second = migrator.plan("patients").unwrap();
        let done = migrator.execute(second.id, 10).unwrap();

        assert_eq!(done.status, MigrationStatus::Completed);
        assert_eq!(done.processed_rows, 3);
        // 3 tax codes + 2 emails, all already envelopes
        assert_eq!(done.skipped_values, 5);

        // Not re-encrypted: the stored bytes are unchanged
        assert_eq!(fx.cell(1, "tax_code"), before);
    }

    #[test]
    fn test_execute_resumes_after_crash() {
        let fx = setup();
        let migrator = fx.migrator();

        let planned = migrator.plan("patients").unwrap();

        // Simulate a crash after one committed batch: row 1 encrypted,
        // cursor and counters persisted, status still running
        let tax_field = fx.registry.require("patients", "tax_code").unwrap();
        let encrypted = fx.codec.encode(tax_field, "RSSMRA80A01H501U").unwrap();
        let mut crashed = migrator.status(planned.id).unwrap();
        crashed.status = MigrationStatus::Running;
        crashed.started_at = Some(Utc::now());
        crashed.cursor = 1;
        crashed.processed_rows = 1;
        crashed.skipped_values = 1;
        fx.store
            .with_conn(|conn| {
                records::update_value(conn, "patients", "tax_code", 1, &encrypted)?;
                jobs::update_migration_job(conn, &crashed)?;
                Ok(())
            })
            .unwrap();

        let done = migrator.execute(planned.id, 10).unwrap();
        assert_eq!(done.status, MigrationStatus::Completed);
        // Rows 2 and 3 on top of the committed row 1
        assert_eq!(done.processed_rows, 3);
        assert_eq!(fx.plaintext_count("tax_code"), 0);
    }

    #[test]
    fn test_pause_and_resume() {
        let fx = setup();
        let migrator = fx.migrator();

        let job = migrator.plan("patients").unwrap();

        // Pausing a job that is not running is refused
        assert!(matches!(
            migrator.pause(job.id).unwrap_err(),
            VaultError::InvalidJobState { .. }
        ));

        let mut running = migrator.status(job.id).unwrap();
        running.status = MigrationStatus::Running;
        fx.store
            .with_conn(|conn| jobs::update_migration_job(conn, &running))
            .unwrap();

        let paused = migrator.pause(job.id).unwrap();
        assert_eq!(paused.status, MigrationStatus::Paused);

        // Running the paused job resumes and completes it
        let done = migrator.execute(job.id, 10).unwrap();
        assert_eq!(done.status, MigrationStatus::Completed);
    }

    #[test]
    fn test_rollback_restores_committed_rows() {
        let fx = setup();
        let migrator = fx.migrator();

        let planned = migrator.plan("patients").unwrap();

        // One committed batch: row 1 fully encrypted, then paused
        let tax_field = fx.registry.require("patients", "tax_code").unwrap();
        let encrypted = fx.codec.encode(tax_field, "RSSMRA80A01H501U").unwrap();
        let mut paused = migrator.status(planned.id).unwrap();
        paused.status = MigrationStatus::Paused;
        paused.cursor = 1;
        paused.processed_rows = 1;
        fx.store
            .with_conn(|conn| {
                records::update_value(conn, "patients", "tax_code", 1, &encrypted)?;
                jobs::update_migration_job(conn, &paused)?;
                Ok(())
            })
            .unwrap();

        let rolled = migrator.rollback(planned.id, 10).unwrap();
        assert_eq!(rolled.status, MigrationStatus::RolledBack);
        assert!(rolled.completed_at.is_some());

        // Row 1 is plaintext again, including the pre-encrypted email
        assert_eq!(fx.cell(1, "tax_code").as_deref(), Some("RSSMRA80A01H501U"));
        assert_eq!(fx.cell(1, "email").as_deref(), Some("m.rossi@example.com"));
        // Rows beyond the cursor were never touched
        assert_eq!(fx.cell(3, "tax_code").as_deref(), Some("BNCLRA90C43L219V"));

        // A rolled-back job is spent
        assert!(matches!(
            migrator.execute(planned.id, 10).unwrap_err(),
            VaultError::InvalidJobState { .. }
        ));
    }

    #[test]
    fn test_rollback_requires_active_job() {
        let fx = setup();
        let migrator = fx.migrator();

        let job = migrator.plan("patients").unwrap();
        assert!(matches!(
            migrator.rollback(job.id, 10).unwrap_err(),
            VaultError::InvalidJobState { .. }
        ));

        let done = migrator.execute(job.id, 10).unwrap();
        assert_eq!(done.status, MigrationStatus::Completed);
        assert!(matches!(
            migrator.rollback(job.id, 10).unwrap_err(),
            VaultError::InvalidJobState { .. }
        ));
    }

    #[test]
    fn test_dry_run_reports_without_mutating() {
        let fx = setup();
        let migrator = fx.migrator();

        let job = migrator.plan("patients").unwrap();
        let report = migrator.dry_run(job.id, 2).unwrap();

        assert_eq!(report.table, "patients");
        assert_eq!(report.rows_remaining, 3);
        // 3 tax codes + Bianchi's email; Verdi's NULL does not count
        assert_eq!(report.values_to_encrypt, 4);
        assert_eq!(report.values_already_encrypted, 1);

        // Nothing moved
        assert_eq!(fx.plaintext_count("tax_code"), 3);
        let after = migrator.status(job.id).unwrap();
        assert_eq!(after.status, MigrationStatus::Planned);
        assert_eq!(after.processed_rows, 0);
    }

    #[test]
    fn test_batch_failure_marks_job_failed() {
        let fx = setup();
        let migrator = fx.migrator();

        let job = migrator.plan("patients").unwrap();
        fx.store
            .with_conn(|conn| {
                conn.execute_batch("ALTER TABLE patients DROP COLUMN email;")?;
                Ok(())
            })
            .unwrap();

        let err = migrator.execute(job.id, 10).unwrap_err();
        assert!(matches!(err, VaultError::Storage(_)));

        let failed = migrator.status(job.id).unwrap();
        assert_eq!(failed.status, MigrationStatus::Failed);
        assert!(failed.last_error.is_some());
        assert!(!failed.can_execute());

        // The table is free for a fresh job
        migrator.plan("patients").unwrap();
    }
}
