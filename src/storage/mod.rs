//! SQLite storage layer for fieldvault
//!
//! One database holds both the application's record tables and the vault's
//! own control tables (prefixed `fv_`): key versions, rotation plans, and
//! migration jobs. The connection sits behind a mutex; background jobs
//! take it per batch and release it between batches, so foreground work
//! is never blocked for the duration of a walk.

pub mod jobs;
pub mod keys;
pub mod records;

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::error::VaultResult;

/// Schema for the vault's control tables
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS fv_key_versions (
    version      INTEGER PRIMARY KEY,
    wrapped_key  BLOB NOT NULL,
    status       TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    activated_at TEXT,
    retired_at   TEXT
);

CREATE TABLE IF NOT EXISTS fv_rotation_plans (
    id              TEXT PRIMARY KEY,
    from_version    INTEGER NOT NULL,
    to_version      INTEGER NOT NULL,
    tables_json     TEXT NOT NULL,
    status          TEXT NOT NULL,
    reason          TEXT,
    cursors_json    TEXT NOT NULL DEFAULT '{}',
    pause_requested INTEGER NOT NULL DEFAULT 0,
    started_at      TEXT NOT NULL,
    completed_at    TEXT,
    last_error      TEXT
);

CREATE TABLE IF NOT EXISTS fv_migration_jobs (
    id             TEXT PRIMARY KEY,
    table_name     TEXT NOT NULL,
    cursor         INTEGER NOT NULL DEFAULT 0,
    total_rows     INTEGER NOT NULL DEFAULT 0,
    processed_rows INTEGER NOT NULL DEFAULT 0,
    skipped_values INTEGER NOT NULL DEFAULT 0,
    status         TEXT NOT NULL,
    created_at     TEXT NOT NULL,
    started_at     TEXT,
    completed_at   TEXT,
    last_error     TEXT
);

CREATE INDEX IF NOT EXISTS idx_fv_migration_jobs_table
    ON fv_migration_jobs(table_name, status);
"#;

/// Handle to the vault database
pub struct Store {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Store {
    /// Open (creating if needed) a file-backed store
    pub fn open(path: &Path) -> VaultResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory store (tests)
    pub fn open_in_memory() -> VaultResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Path of the backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run a closure with the connection
    ///
    /// The lock is held only for the closure's duration; batch jobs call
    /// this once per batch so other work can interleave.
    pub fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> VaultResult<T>) -> VaultResult<T> {
        let mut conn = self.conn.lock();
        f(&mut conn)
    }
}

/// Render a timestamp in the form stored in TEXT columns
pub(crate) fn ts(dt: &chrono::DateTime<chrono::Utc>) -> String {
    dt.to_rfc3339()
}

/// Render an optional timestamp
pub(crate) fn ts_opt(dt: &Option<chrono::DateTime<chrono::Utc>>) -> Option<String> {
    dt.as_ref().map(ts)
}

/// Parse a stored timestamp
pub(crate) fn parse_ts(s: &str) -> VaultResult<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| crate::error::VaultError::Storage(format!("bad timestamp '{}': {}", s, e)))
}

/// Parse an optional stored timestamp
pub(crate) fn parse_ts_opt(
    s: Option<String>,
) -> VaultResult<Option<chrono::DateTime<chrono::Utc>>> {
    match s {
        Some(s) => Ok(Some(parse_ts(&s)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory_creates_schema() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                let count: i64 = conn
                    .query_row(
                        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name LIKE 'fv_%'",
                        [],
                        |row| row.get(0),
                    )?;
                assert_eq!(count, 3);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_open_file_backed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.db");
        let store = Store::open(&path).unwrap();
        assert_eq!(store.path(), Some(path.as_path()));
        assert!(path.exists());

        // Reopening sees the same schema without error
        drop(store);
        Store::open(&path).unwrap();
    }

    #[test]
    fn test_timestamp_round_trip() {
        let now = chrono::Utc::now();
        let parsed = parse_ts(&ts(&now)).unwrap();
        assert_eq!(parsed, now);
        assert!(parse_ts("not a time").is_err());
    }
}
