//! Persistence for rotation plans and migration jobs
//!
//! Helpers take a plain `&Connection` so batch loops can update job rows
//! in the same transaction that rewrites record values.

use std::collections::BTreeMap;

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{VaultError, VaultResult};
use crate::models::{JobId, MigrationJob, MigrationStatus, PlanId, RotationPlan, RotationStatus};

use super::{parse_ts, parse_ts_opt, ts, ts_opt};

// ---- rotation plans ----

/// Insert a new rotation plan row
pub fn insert_rotation_plan(conn: &Connection, plan: &RotationPlan) -> VaultResult<()> {
    conn.execute(
        "INSERT INTO fv_rotation_plans
            (id, from_version, to_version, tables_json, status, reason,
             cursors_json, pause_requested, started_at, completed_at, last_error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            plan.id.as_uuid().to_string(),
            plan.from_version,
            plan.to_version,
            serde_json::to_string(&plan.tables)?,
            plan.status.as_str(),
            plan.reason,
            serde_json::to_string(&plan.cursors)?,
            plan.pause_requested,
            ts(&plan.started_at),
            ts_opt(&plan.completed_at),
            plan.last_error,
        ],
    )?;
    Ok(())
}

/// Update every mutable column of a plan row
pub fn update_rotation_plan(conn: &Connection, plan: &RotationPlan) -> VaultResult<()> {
    conn.execute(
        "UPDATE fv_rotation_plans
            SET status = ?2, cursors_json = ?3, pause_requested = ?4,
                completed_at = ?5, last_error = ?6
          WHERE id = ?1",
        params![
            plan.id.as_uuid().to_string(),
            plan.status.as_str(),
            serde_json::to_string(&plan.cursors)?,
            plan.pause_requested,
            ts_opt(&plan.completed_at),
            plan.last_error,
        ],
    )?;
    Ok(())
}

/// Load one plan by id
pub fn get_rotation_plan(conn: &Connection, id: PlanId) -> VaultResult<Option<RotationPlan>> {
    conn.query_row(
        "SELECT id, from_version, to_version, tables_json, status, reason,
                cursors_json, pause_requested, started_at, completed_at, last_error
           FROM fv_rotation_plans WHERE id = ?1",
        params![id.as_uuid().to_string()],
        plan_from_row,
    )
    .optional()?
    .transpose()
}

/// The non-terminal plan, if one exists (at most one by construction)
pub fn active_rotation_plan(conn: &Connection) -> VaultResult<Option<RotationPlan>> {
    conn.query_row(
        "SELECT id, from_version, to_version, tables_json, status, reason,
                cursors_json, pause_requested, started_at, completed_at, last_error
           FROM fv_rotation_plans
          WHERE status NOT IN ('completed', 'failed')
          ORDER BY started_at DESC LIMIT 1",
        [],
        plan_from_row,
    )
    .optional()?
    .transpose()
}

/// The most recently completed plan, if any
pub fn latest_completed_rotation(conn: &Connection) -> VaultResult<Option<RotationPlan>> {
    conn.query_row(
        "SELECT id, from_version, to_version, tables_json, status, reason,
                cursors_json, pause_requested, started_at, completed_at, last_error
           FROM fv_rotation_plans
          WHERE status = 'completed'
          ORDER BY completed_at DESC LIMIT 1",
        [],
        plan_from_row,
    )
    .optional()?
    .transpose()
}

/// Every plan, newest first
pub fn list_rotation_plans(conn: &Connection) -> VaultResult<Vec<RotationPlan>> {
    let mut stmt = conn.prepare(
        "SELECT id, from_version, to_version, tables_json, status, reason,
                cursors_json, pause_requested, started_at, completed_at, last_error
           FROM fv_rotation_plans
          ORDER BY started_at DESC",
    )?;
    let rows = stmt.query_map([], plan_from_row)?;
    let mut plans = Vec::new();
    for row in rows {
        plans.push(row??);
    }
    Ok(plans)
}

fn plan_from_row(row: &Row<'_>) -> rusqlite::Result<VaultResult<RotationPlan>> {
    let id: String = row.get(0)?;
    let from_version: u32 = row.get(1)?;
    let to_version: u32 = row.get(2)?;
    let tables_json: String = row.get(3)?;
    let status: String = row.get(4)?;
    let reason: Option<String> = row.get(5)?;
    let cursors_json: String = row.get(6)?;
    let pause_requested: bool = row.get(7)?;
    let started_at: String = row.get(8)?;
    let completed_at: Option<String> = row.get(9)?;
    let last_error: Option<String> = row.get(10)?;

    Ok(build_plan(
        id,
        from_version,
        to_version,
        tables_json,
        status,
        reason,
        cursors_json,
        pause_requested,
        started_at,
        completed_at,
        last_error,
    ))
}

#[allow(clippy::too_many_arguments)]
fn build_plan(
    id: String,
    from_version: u32,
    to_version: u32,
    tables_json: String,
    status: String,
    reason: Option<String>,
    cursors_json: String,
    pause_requested: bool,
    started_at: String,
    completed_at: Option<String>,
    last_error: Option<String>,
) -> VaultResult<RotationPlan> {
    let tables: Vec<String> = serde_json::from_str(&tables_json)?;
    let cursors: BTreeMap<String, i64> = serde_json::from_str(&cursors_json)?;
    Ok(RotationPlan {
        id: PlanId::parse(&id)
            .map_err(|e| VaultError::Storage(format!("bad plan id '{}': {}", id, e)))?,
        from_version,
        to_version,
        tables,
        status: RotationStatus::parse(&status)
            .ok_or_else(|| VaultError::Storage(format!("unknown rotation status '{}'", status)))?,
        reason,
        cursors,
        pause_requested,
        started_at: parse_ts(&started_at)?,
        completed_at: parse_ts_opt(completed_at)?,
        last_error,
    })
}

// ---- migration jobs ----

/// Insert a new migration job row
pub fn insert_migration_job(conn: &Connection, job: &MigrationJob) -> VaultResult<()> {
    conn.execute(
        "INSERT INTO fv_migration_jobs
            (id, table_name, cursor, total_rows, processed_rows, skipped_values,
             status, created_at, started_at, completed_at, last_error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            job.id.as_uuid().to_string(),
            job.table,
            job.cursor,
            job.total_rows,
            job.processed_rows,
            job.skipped_values,
            job.status.as_str(),
            ts(&job.created_at),
            ts_opt(&job.started_at),
            ts_opt(&job.completed_at),
            job.last_error,
        ],
    )?;
    Ok(())
}

/// Update every mutable column of a job row
pub fn update_migration_job(conn: &Connection, job: &MigrationJob) -> VaultResult<()> {
    conn.execute(
        "UPDATE fv_migration_jobs
            SET cursor = ?2, processed_rows = ?3, skipped_values = ?4, status = ?5,
                started_at = ?6, completed_at = ?7, last_error = ?8
          WHERE id = ?1",
        params![
            job.id.as_uuid().to_string(),
            job.cursor,
            job.processed_rows,
            job.skipped_values,
            job.status.as_str(),
            ts_opt(&job.started_at),
            ts_opt(&job.completed_at),
            job.last_error,
        ],
    )?;
    Ok(())
}

/// Load one job by id
pub fn get_migration_job(conn: &Connection, id: JobId) -> VaultResult<Option<MigrationJob>> {
    conn.query_row(
        "SELECT id, table_name, cursor, total_rows, processed_rows, skipped_values,
                status, created_at, started_at, completed_at, last_error
           FROM fv_migration_jobs WHERE id = ?1",
        params![id.as_uuid().to_string()],
        job_from_row,
    )
    .optional()?
    .transpose()
}

/// The running or paused job occupying a table, if any
pub fn active_migration_for_table(
    conn: &Connection,
    table: &str,
) -> VaultResult<Option<MigrationJob>> {
    conn.query_row(
        "SELECT id, table_name, cursor, total_rows, processed_rows, skipped_values,
                status, created_at, started_at, completed_at, last_error
           FROM fv_migration_jobs
          WHERE table_name = ?1 AND status IN ('running', 'paused')
          LIMIT 1",
        params![table],
        job_from_row,
    )
    .optional()?
    .transpose()
}

/// Every running or paused job
pub fn active_migrations(conn: &Connection) -> VaultResult<Vec<MigrationJob>> {
    let mut stmt = conn.prepare(
        "SELECT id, table_name, cursor, total_rows, processed_rows, skipped_values,
                status, created_at, started_at, completed_at, last_error
           FROM fv_migration_jobs
          WHERE status IN ('running', 'paused')
          ORDER BY created_at",
    )?;
    let rows = stmt.query_map([], job_from_row)?;
    let mut jobs = Vec::new();
    for row in rows {
        jobs.push(row??);
    }
    Ok(jobs)
}

/// Every job, newest first
pub fn list_migration_jobs(conn: &Connection) -> VaultResult<Vec<MigrationJob>> {
    let mut stmt = conn.prepare(
        "SELECT id, table_name, cursor, total_rows, processed_rows, skipped_values,
                status, created_at, started_at, completed_at, last_error
           FROM fv_migration_jobs
          ORDER BY created_at DESC",
    )?;
    let rows = stmt.query_map([], job_from_row)?;
    let mut jobs = Vec::new();
    for row in rows {
        jobs.push(row??);
    }
    Ok(jobs)
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<VaultResult<MigrationJob>> {
    let id: String = row.get(0)?;
    let table: String = row.get(1)?;
    let cursor: i64 = row.get(2)?;
    let total_rows: u64 = row.get(3)?;
    let processed_rows: u64 = row.get(4)?;
    let skipped_values: u64 = row.get(5)?;
    let status: String = row.get(6)?;
    let created_at: String = row.get(7)?;
    let started_at: Option<String> = row.get(8)?;
    let completed_at: Option<String> = row.get(9)?;
    let last_error: Option<String> = row.get(10)?;

    Ok((|| {
        Ok(MigrationJob {
            id: JobId::parse(&id)
                .map_err(|e| VaultError::Storage(format!("bad job id '{}': {}", id, e)))?,
            table,
            cursor,
            total_rows,
            processed_rows,
            skipped_values,
            status: MigrationStatus::parse(&status).ok_or_else(|| {
                VaultError::Storage(format!("unknown migration status '{}'", status))
            })?,
            created_at: parse_ts(&created_at)?,
            started_at: parse_ts_opt(started_at)?,
            completed_at: parse_ts_opt(completed_at)?,
            last_error,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Store;

    #[test]
    fn test_rotation_plan_round_trip() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                let mut plan =
                    RotationPlan::new(1, 2, vec!["patients".into(), "users".into()], None);
                plan.set_cursor("patients", 42);
                insert_rotation_plan(conn, &plan)?;

                let loaded = get_rotation_plan(conn, plan.id)?.unwrap();
                assert_eq!(loaded.from_version, 1);
                assert_eq!(loaded.to_version, 2);
                assert_eq!(loaded.tables, vec!["patients", "users"]);
                assert_eq!(loaded.cursor_for("patients"), 42);
                assert_eq!(loaded.status, RotationStatus::Created);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_active_rotation_plan() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                assert!(active_rotation_plan(conn)?.is_none());

                let mut plan = RotationPlan::new(1, 2, vec![], None);
                insert_rotation_plan(conn, &plan)?;
                assert!(active_rotation_plan(conn)?.is_some());

                plan.status = RotationStatus::Completed;
                plan.completed_at = Some(chrono::Utc::now());
                update_rotation_plan(conn, &plan)?;
                assert!(active_rotation_plan(conn)?.is_none());

                let latest = latest_completed_rotation(conn)?.unwrap();
                assert_eq!(latest.id, plan.id);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_migration_job_round_trip() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                let mut job = MigrationJob::new("patients", 1000);
                insert_migration_job(conn, &job)?;

                assert!(active_migration_for_table(conn, "patients")?.is_none());

                job.status = MigrationStatus::Running;
                job.started_at = Some(chrono::Utc::now());
                job.cursor = 250;
                job.processed_rows = 250;
                update_migration_job(conn, &job)?;

                let active = active_migration_for_table(conn, "patients")?.unwrap();
                assert_eq!(active.id, job.id);
                assert_eq!(active.cursor, 250);
                assert_eq!(active.status, MigrationStatus::Running);

                assert_eq!(active_migrations(conn)?.len(), 1);
                assert_eq!(list_migration_jobs(conn)?.len(), 1);
                Ok(())
            })
            .unwrap();
    }
}
