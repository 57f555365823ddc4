//! Key rotation coordinator
//!
//! Rotation installs a new key version, rewrites every envelope from the old
//! version to the new one, then retires the old version once a verification
//! scan proves nothing references it. The plan row is the source of truth:
//! per-table cursors are committed in the same transaction as each batch, so
//! an interrupted rotation resumes from the last committed batch after a
//! crash or pause.
//!
//! New writes switch to the new version the moment the plan is created, so
//! re-encryption only ever drains a shrinking set of old envelopes.

use std::sync::Arc;
use std::thread;

use chrono::Utc;

use crate::audit::{AuditLog, AuditRecord, Operation};
use crate::codec::FieldCodec;
use crate::crypto::Envelope;
use crate::error::{VaultError, VaultResult};
use crate::fields::{FieldDescriptor, FieldRegistry};
use crate::keystore::KeyStore;
use crate::models::{KeyStatus, PlanId, RotationPlan, RotationStatus};
use crate::storage::{jobs, keys as key_rows, records, Store};

/// Actor name under which lifecycle events are audited
const ROTATION_ACTOR: &str = "rotation";

/// Drives key rotation plans through their lifecycle
pub struct RotationCoordinator {
    store: Arc<Store>,
    keystore: Arc<KeyStore>,
    registry: Arc<FieldRegistry>,
    audit: Arc<AuditLog>,
    batch_size: usize,
}

impl RotationCoordinator {
    pub fn new(
        store: Arc<Store>,
        keystore: Arc<KeyStore>,
        registry: Arc<FieldRegistry>,
        audit: Arc<AuditLog>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            keystore,
            registry,
            audit,
            batch_size: batch_size.max(1),
        }
    }

    /// Install the next key version and create a plan to drain the old one
    ///
    /// The version swap and the plan row are committed in one transaction;
    /// only after the commit does the in-memory ring adopt the new version.
    /// Fails with `RotationInProgress` while another plan is non-terminal
    /// and with `MigrationInProgress` while any declared table has an
    /// active migration job.
    pub fn create_plan(&self, reason: Option<String>) -> VaultResult<RotationPlan> {
        let tables: Vec<String> = self.registry.tables().iter().map(|t| t.to_string()).collect();

        let (prepared, retiring, plan) = self.store.with_conn(|conn| {
            if let Some(existing) = jobs::active_rotation_plan(conn)? {
                return Err(VaultError::RotationInProgress {
                    plan_id: existing.id,
                });
            }
            for table in &tables {
                if jobs::active_migration_for_table(conn, table)?.is_some() {
                    return Err(VaultError::MigrationInProgress(table.clone()));
                }
            }

            let prepared = self.keystore.prepare_next_version()?;
            let from_version = self.keystore.active_version();
            let mut retiring = self.keystore.version(from_version).ok_or_else(|| {
                VaultError::Storage(format!("key ring missing v{}", from_version))
            })?;
            retiring.begin_retiring()?;

            let plan = RotationPlan::new(from_version, prepared.version(), tables.clone(), reason);

            let tx = conn.transaction()?;
            key_rows::insert_key_version(&tx, &prepared.meta)?;
            key_rows::update_key_version(&tx, &retiring)?;
            jobs::insert_rotation_plan(&tx, &plan)?;
            tx.commit()?;

            Ok((prepared, retiring, plan))
        })?;

        self.keystore.adopt_version(prepared, retiring)?;

        tracing::info!(
            plan = %plan.id,
            from = plan.from_version,
            to = plan.to_version,
            "rotation plan created"
        );
        let reason_note = plan
            .reason
            .as_deref()
            .map(|r| format!(" ({})", r))
            .unwrap_or_default();
        self.audit.record(&AuditRecord::event(
            Operation::Rotate,
            ROTATION_ACTOR,
            format!(
                "plan {} created: v{} -> v{}{}",
                plan.id, plan.from_version, plan.to_version, reason_note
            ),
        ));

        Ok(plan)
    }

    /// Run a plan forward as far as it will go
    ///
    /// Re-encrypts in bounded batches, then verifies and retires the old
    /// version. Returns the plan in its final state for this call:
    /// `completed`, or still `re_encrypting` when a pause was honored. A
    /// batch failure leaves the plan resumable at the last committed cursor
    /// and surfaces as `RotationStalled`.
    pub fn execute(&self, plan_id: PlanId) -> VaultResult<RotationPlan> {
        let mut plan = self.require_plan(plan_id)?;

        match plan.status {
            RotationStatus::Completed | RotationStatus::Failed => {
                return Err(VaultError::InvalidPlanState {
                    plan_id: plan.id,
                    status: plan.status.to_string(),
                    message: "plan is already finished",
                });
            }
            RotationStatus::Created => {
                plan.status = RotationStatus::ReEncrypting;
                plan.pause_requested = false;
                self.persist(&plan)?;
                self.audit.record(&AuditRecord::event(
                    Operation::Rotate,
                    ROTATION_ACTOR,
                    format!("plan {} re-encryption started", plan.id),
                ));
            }
            RotationStatus::ReEncrypting => {
                // Running again is the resume gesture; clear a stale pause
                if plan.pause_requested {
                    plan.pause_requested = false;
                    self.persist(&plan)?;
                }
            }
            RotationStatus::RetiringOldKey => {}
        }

        if plan.status == RotationStatus::ReEncrypting {
            if self.run_reencryption(&mut plan)? {
                self.audit.record(&AuditRecord::event(
                    Operation::Rotate,
                    ROTATION_ACTOR,
                    format!("plan {} paused", plan.id),
                ));
                return Ok(plan);
            }
            plan.status = RotationStatus::RetiringOldKey;
            plan.last_error = None;
            self.persist(&plan)?;
        }

        self.run_retirement(&mut plan)?;
        Ok(plan)
    }

    /// Request a cooperative pause
    ///
    /// The running execute notices the flag between batches and stops with
    /// all progress committed. Running the plan again resumes it.
    pub fn pause(&self, plan_id: PlanId) -> VaultResult<RotationPlan> {
        let mut plan = self.require_plan(plan_id)?;
        if plan.is_terminal() {
            return Err(VaultError::InvalidPlanState {
                plan_id: plan.id,
                status: plan.status.to_string(),
                message: "plan is already finished",
            });
        }
        if !plan.pause_requested {
            plan.pause_requested = true;
            self.persist(&plan)?;
            self.audit.record(&AuditRecord::event(
                Operation::Rotate,
                ROTATION_ACTOR,
                format!("plan {} pause requested", plan.id),
            ));
        }
        Ok(plan)
    }

    /// Abort a plan that has not re-encrypted anything yet
    ///
    /// Reinstates the old version as active, deletes the new version, and
    /// marks the plan failed. Refused once any batch has committed or any
    /// envelope exists under the new version; a plan that far along must be
    /// driven forward instead.
    pub fn abort(&self, plan_id: PlanId) -> VaultResult<RotationPlan> {
        let mut plan = self.require_plan(plan_id)?;

        match plan.status {
            RotationStatus::Created => {}
            RotationStatus::ReEncrypting if plan.cursors.values().all(|c| *c == 0) => {}
            RotationStatus::Completed | RotationStatus::Failed => {
                return Err(VaultError::InvalidPlanState {
                    plan_id: plan.id,
                    status: plan.status.to_string(),
                    message: "plan is already finished",
                });
            }
            _ => {
                return Err(VaultError::InvalidPlanState {
                    plan_id: plan.id,
                    status: plan.status.to_string(),
                    message: "re-encrypted batches already committed; run the plan forward instead",
                });
            }
        }

        let to_version = plan.to_version;
        let live_refs = self.count_refs(to_version)?;
        if live_refs > 0 {
            return Err(VaultError::KeyStillReferenced {
                version: to_version,
                live_refs,
            });
        }

        let mut restored = self.keystore.version(plan.from_version).ok_or_else(|| {
            VaultError::Storage(format!("key ring missing v{}", plan.from_version))
        })?;
        restored.reactivate()?;

        plan.status = RotationStatus::Failed;
        plan.completed_at = Some(Utc::now());
        plan.last_error = Some("aborted before re-encryption".to_string());

        self.store.with_conn(|conn| {
            let tx = conn.transaction()?;
            key_rows::delete_key_version(&tx, to_version)?;
            key_rows::update_key_version(&tx, &restored)?;
            jobs::update_rotation_plan(&tx, &plan)?;
            tx.commit()?;
            Ok(())
        })?;

        self.keystore.apply_reverted(restored, to_version);

        tracing::warn!(plan = %plan.id, "rotation aborted; old key reinstated");
        self.audit.record(&AuditRecord::event(
            Operation::Rotate,
            ROTATION_ACTOR,
            format!(
                "plan {} aborted: v{} reinstated, v{} discarded",
                plan.id, plan.from_version, to_version
            ),
        ));

        Ok(plan)
    }

    /// Create and immediately run a rotation in response to an incident
    ///
    /// Same state machine as a scheduled rotation; the reason lands in the
    /// plan and the audit trail.
    pub fn emergency_rotation(&self, reason: &str) -> VaultResult<RotationPlan> {
        tracing::warn!(reason, "emergency rotation requested");
        self.audit.record(&AuditRecord::event(
            Operation::Rotate,
            ROTATION_ACTOR,
            format!("emergency rotation requested: {}", reason),
        ));

        let plan = self.create_plan(Some(format!("emergency: {}", reason)))?;
        self.execute(plan.id)
    }

    /// Plan by id
    pub fn plan(&self, plan_id: PlanId) -> VaultResult<RotationPlan> {
        self.require_plan(plan_id)
    }

    /// The single non-terminal plan, if one exists
    pub fn active_plan(&self) -> VaultResult<Option<RotationPlan>> {
        self.store.with_conn(|conn| jobs::active_rotation_plan(conn))
    }

    /// Every plan, newest first
    pub fn list_plans(&self) -> VaultResult<Vec<RotationPlan>> {
        self.store.with_conn(|conn| jobs::list_rotation_plans(conn))
    }

    /// Most recently completed plan, if any
    pub fn last_completed(&self) -> VaultResult<Option<RotationPlan>> {
        self.store
            .with_conn(|conn| jobs::latest_completed_rotation(conn))
    }

    fn require_plan(&self, plan_id: PlanId) -> VaultResult<RotationPlan> {
        self.store
            .with_conn(|conn| jobs::get_rotation_plan(conn, plan_id))?
            .ok_or_else(|| VaultError::plan_not_found(plan_id.to_string()))
    }

    fn persist(&self, plan: &RotationPlan) -> VaultResult<()> {
        self.store
            .with_conn(|conn| jobs::update_rotation_plan(conn, plan))
    }

    /// Walk every table, rewriting old envelopes; true means paused
    fn run_reencryption(&self, plan: &mut RotationPlan) -> VaultResult<bool> {
        let codec = FieldCodec::new(
            Arc::clone(&self.keystore),
            Arc::clone(&self.audit),
            format!("rotation/{}", plan.id),
        );

        for table in plan.tables.clone() {
            let fields = self.registry.fields_for_table(&table);
            if fields.is_empty() {
                // table no longer declared; nothing to rewrite
                continue;
            }
            let columns: Vec<&str> = fields.iter().map(|f| f.column.as_str()).collect();

            loop {
                if self.pause_flag(plan.id)? {
                    plan.pause_requested = true;
                    return Ok(true);
                }

                match self.run_batch(plan, &table, &fields, &columns, &codec) {
                    Ok(Some(_)) => thread::yield_now(),
                    Ok(None) => break,
                    Err(e) => return Err(self.stall(plan, &table, e)),
                }
            }
        }

        Ok(false)
    }

    /// One batch: fetch, rewrite, advance cursor, commit. None = table done.
    fn run_batch(
        &self,
        plan: &mut RotationPlan,
        table: &str,
        fields: &[&FieldDescriptor],
        columns: &[&str],
        codec: &FieldCodec,
    ) -> VaultResult<Option<i64>> {
        let batch_size = self.batch_size;
        self.store.with_conn(|conn| {
            let tx = conn.transaction()?;
            let cursor = plan.cursor_for(table);
            let batch = records::fetch_batch(&tx, table, columns, cursor, batch_size)?;

            let last = match batch.last() {
                Some(row) => row.rowid,
                None => return Ok(None),
            };

            for row in &batch {
                for (idx, field) in fields.iter().enumerate() {
                    let value = match row.values[idx].as_deref() {
                        Some(v) => v,
                        None => continue,
                    };
                    // Plaintext stays plaintext here; migration owns that
                    if !Envelope::is_envelope(value) {
                        continue;
                    }
                    if Envelope::parse(value)?.key_version == plan.to_version {
                        continue;
                    }
                    let plaintext = codec.decode(field, value)?;
                    let fresh = codec.encode(field, &plaintext)?;
                    records::update_value(&tx, table, &field.column, row.rowid, &fresh)?;
                }
            }

            plan.set_cursor(table, last);
            jobs::update_rotation_plan(&tx, plan)?;
            tx.commit()?;
            Ok(Some(last))
        })
    }

    /// Verify nothing references the old version, then retire it
    fn run_retirement(&self, plan: &mut RotationPlan) -> VaultResult<()> {
        let from_version = plan.from_version;
        let live_refs = self.count_refs(from_version)?;

        if live_refs > 0 {
            // Walk the tables again; at-target envelopes are skipped, so the
            // second pass only touches the stragglers
            for table in plan.tables.clone() {
                plan.set_cursor(&table, 0);
            }
            plan.status = RotationStatus::ReEncrypting;
            plan.last_error = Some(format!(
                "verification found {} envelope(s) still at v{}",
                live_refs, from_version
            ));
            self.persist(plan)?;
            self.audit.record(&AuditRecord::event_failure(
                Operation::Rotate,
                ROTATION_ACTOR,
                format!("plan {} verification failed", plan.id),
                "key_still_referenced",
            ));
            return Err(VaultError::KeyStillReferenced {
                version: from_version,
                live_refs,
            });
        }

        // Tolerate a rerun after a crash between the retire commit and the
        // plan update: a version already retired just needs the plan closed
        let retired = match self.keystore.version(from_version) {
            Some(kv) if kv.status == KeyStatus::Retired => None,
            Some(mut kv) => {
                kv.mark_retired()?;
                Some(kv)
            }
            None => {
                return Err(VaultError::Storage(format!(
                    "key ring missing v{}",
                    from_version
                )))
            }
        };

        plan.status = RotationStatus::Completed;
        plan.completed_at = Some(Utc::now());
        plan.last_error = None;

        self.store.with_conn(|conn| {
            let tx = conn.transaction()?;
            if let Some(kv) = &retired {
                key_rows::update_key_version(&tx, kv)?;
            }
            jobs::update_rotation_plan(&tx, plan)?;
            tx.commit()?;
            Ok(())
        })?;

        if let Some(kv) = retired {
            self.keystore.apply_retired(kv);
        }

        tracing::info!(plan = %plan.id, version = from_version, "rotation completed; old key retired");
        self.audit.record(&AuditRecord::event(
            Operation::Rotate,
            ROTATION_ACTOR,
            format!("plan {} completed: v{} retired", plan.id, from_version),
        ));

        Ok(())
    }

    /// Envelope count under one version across every declared column
    fn count_refs(&self, version: u32) -> VaultResult<u64> {
        self.store.with_conn(|conn| {
            let mut total = 0u64;
            for field in self.registry.iter() {
                total += records::count_version_refs(conn, &field.table, &field.column, version)?;
            }
            Ok(total)
        })
    }

    fn pause_flag(&self, plan_id: PlanId) -> VaultResult<bool> {
        Ok(self
            .store
            .with_conn(|conn| jobs::get_rotation_plan(conn, plan_id))?
            .map(|p| p.pause_requested)
            .unwrap_or(false))
    }

    /// Record a batch failure and hand back the stall error
    fn stall(&self, plan: &mut RotationPlan, table: &str, cause: VaultError) -> VaultError {
        plan.last_error = Some(cause.to_string());
        if let Err(persist_err) = self.persist(plan) {
            tracing::error!(error = %persist_err, "failed to record rotation stall");
        }
        tracing::warn!(plan = %plan.id, table, error = %cause, "rotation stalled");
        self.audit.record(&AuditRecord::event_failure(
            Operation::Rotate,
            ROTATION_ACTOR,
            format!("plan {} stalled re-encrypting {}", plan.id, table),
            cause.kind(),
        ));
        VaultError::RotationStalled {
            plan_id: plan.id,
            message: cause.to_string(),
        }
    }
}
