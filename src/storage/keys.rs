//! Persistence for key versions
//!
//! Helpers take a plain `&Connection` so callers can compose them inside
//! their own transactions.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::VaultResult;
use crate::models::{KeyStatus, KeyVersion};

use super::{parse_ts, parse_ts_opt, ts, ts_opt};

/// Insert a new key version row
pub fn insert_key_version(conn: &Connection, kv: &KeyVersion) -> VaultResult<()> {
    conn.execute(
        "INSERT INTO fv_key_versions
            (version, wrapped_key, status, created_at, activated_at, retired_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            kv.version,
            kv.wrapped_key,
            kv.status.as_str(),
            ts(&kv.created_at),
            ts_opt(&kv.activated_at),
            ts_opt(&kv.retired_at),
        ],
    )?;
    Ok(())
}

/// Update the lifecycle columns of an existing version
pub fn update_key_version(conn: &Connection, kv: &KeyVersion) -> VaultResult<()> {
    conn.execute(
        "UPDATE fv_key_versions
            SET status = ?2, activated_at = ?3, retired_at = ?4
          WHERE version = ?1",
        params![
            kv.version,
            kv.status.as_str(),
            ts_opt(&kv.activated_at),
            ts_opt(&kv.retired_at),
        ],
    )?;
    Ok(())
}

/// Delete a version row (rollback of a failed plan creation)
pub fn delete_key_version(conn: &Connection, version: u32) -> VaultResult<()> {
    conn.execute(
        "DELETE FROM fv_key_versions WHERE version = ?1",
        params![version],
    )?;
    Ok(())
}

/// Load every key version, oldest first
pub fn load_key_versions(conn: &Connection) -> VaultResult<Vec<KeyVersion>> {
    let mut stmt = conn.prepare(
        "SELECT version, wrapped_key, status, created_at, activated_at, retired_at
           FROM fv_key_versions
          ORDER BY version",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, u32>(0)?,
            row.get::<_, Vec<u8>>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, Option<String>>(4)?,
            row.get::<_, Option<String>>(5)?,
        ))
    })?;

    let mut versions = Vec::new();
    for row in rows {
        let (version, wrapped_key, status, created_at, activated_at, retired_at) = row?;
        versions.push(KeyVersion {
            version,
            wrapped_key,
            status: KeyStatus::parse(&status).ok_or_else(|| {
                crate::error::VaultError::Storage(format!(
                    "unknown key status '{}' for v{}",
                    status, version
                ))
            })?,
            created_at: parse_ts(&created_at)?,
            activated_at: parse_ts_opt(activated_at)?,
            retired_at: parse_ts_opt(retired_at)?,
        });
    }
    Ok(versions)
}

/// Highest version number present, or 0 when the table is empty
pub fn max_version(conn: &Connection) -> VaultResult<u32> {
    let max: Option<u32> = conn
        .query_row("SELECT MAX(version) FROM fv_key_versions", [], |row| {
            row.get(0)
        })
        .optional()?
        .flatten();
    Ok(max.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Store;

    #[test]
    fn test_insert_and_load() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                let kv = KeyVersion::new_active(1, vec![0xAA; 60]);
                insert_key_version(conn, &kv)?;

                let loaded = load_key_versions(conn)?;
                assert_eq!(loaded.len(), 1);
                assert_eq!(loaded[0].version, 1);
                assert_eq!(loaded[0].wrapped_key, vec![0xAA; 60]);
                assert_eq!(loaded[0].status, KeyStatus::Active);
                assert_eq!(max_version(conn)?, 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_update_lifecycle() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                let mut kv = KeyVersion::new_active(1, vec![1]);
                insert_key_version(conn, &kv)?;

                kv.begin_retiring().unwrap();
                update_key_version(conn, &kv)?;
                kv.mark_retired().unwrap();
                update_key_version(conn, &kv)?;

                let loaded = load_key_versions(conn)?;
                assert_eq!(loaded[0].status, KeyStatus::Retired);
                assert!(loaded[0].retired_at.is_some());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_delete_and_empty_max() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                assert_eq!(max_version(conn)?, 0);

                insert_key_version(conn, &KeyVersion::new_active(3, vec![1]))?;
                assert_eq!(max_version(conn)?, 3);

                delete_key_version(conn, 3)?;
                assert_eq!(max_version(conn)?, 0);
                Ok(())
            })
            .unwrap();
    }
}
