//! Batch access to the application's protected tables
//!
//! Rotation and migration walk record tables in rowid order, a batch at a
//! time. Table and column names are interpolated into SQL here, which is
//! only sound because every name comes from the validated field registry;
//! the debug asserts below back that invariant up.

use rusqlite::{params, Connection};

use crate::crypto::envelope::Envelope;
use crate::error::VaultResult;
use crate::fields::is_valid_identifier;

/// One fetched row: rowid plus the requested column values in order
#[derive(Debug, Clone)]
pub struct RecordRow {
    pub rowid: i64,
    pub values: Vec<Option<String>>,
}

/// Fetch the next batch of rows after `cursor`, in rowid order
pub fn fetch_batch(
    conn: &Connection,
    table: &str,
    columns: &[&str],
    cursor: i64,
    limit: usize,
) -> VaultResult<Vec<RecordRow>> {
    debug_assert!(is_valid_identifier(table));
    debug_assert!(columns.iter().all(|c| is_valid_identifier(c)));

    let column_list = columns
        .iter()
        .map(|c| quoted(c))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT rowid, {} FROM {} WHERE rowid > ?1 ORDER BY rowid LIMIT ?2",
        column_list,
        quoted(table)
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![cursor, limit as i64], |row| {
        let rowid: i64 = row.get(0)?;
        let mut values = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            values.push(row.get::<_, Option<String>>(i + 1)?);
        }
        Ok(RecordRow { rowid, values })
    })?;

    let mut batch = Vec::new();
    for row in rows {
        batch.push(row?);
    }
    Ok(batch)
}

/// Rewrite one column of one row
pub fn update_value(
    conn: &Connection,
    table: &str,
    column: &str,
    rowid: i64,
    value: &str,
) -> VaultResult<()> {
    debug_assert!(is_valid_identifier(table));
    debug_assert!(is_valid_identifier(column));

    let sql = format!(
        "UPDATE {} SET {} = ?1 WHERE rowid = ?2",
        quoted(table),
        quoted(column)
    );
    conn.execute(&sql, params![value, rowid])?;
    Ok(())
}

/// Total rows in a table
pub fn count_rows(conn: &Connection, table: &str) -> VaultResult<u64> {
    debug_assert!(is_valid_identifier(table));
    let sql = format!("SELECT COUNT(*) FROM {}", quoted(table));
    let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
    Ok(count as u64)
}

/// Whether the application has created a table with this name
///
/// The field registry may declare columns ahead of the schema; health
/// checks use this to report on such fields instead of erroring out.
pub fn table_exists(conn: &Connection, table: &str) -> VaultResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Values in a column still written under one key version
pub fn count_version_refs(
    conn: &Connection,
    table: &str,
    column: &str,
    key_version: u32,
) -> VaultResult<u64> {
    count_like(conn, table, column, &Envelope::version_like_pattern(key_version))
}

/// Values in a column stored as envelopes (any version)
pub fn count_encrypted(conn: &Connection, table: &str, column: &str) -> VaultResult<u64> {
    count_like(conn, table, column, &Envelope::any_like_pattern())
}

/// Non-null values in a column not stored as envelopes
pub fn count_plaintext(conn: &Connection, table: &str, column: &str) -> VaultResult<u64> {
    debug_assert!(is_valid_identifier(table));
    debug_assert!(is_valid_identifier(column));
    let sql = format!(
        "SELECT COUNT(*) FROM {} WHERE {} IS NOT NULL AND {} NOT LIKE ?1",
        quoted(table),
        quoted(column),
        quoted(column)
    );
    let count: i64 = conn.query_row(&sql, params![Envelope::any_like_pattern()], |row| {
        row.get(0)
    })?;
    Ok(count as u64)
}

fn count_like(conn: &Connection, table: &str, column: &str, pattern: &str) -> VaultResult<u64> {
    debug_assert!(is_valid_identifier(table));
    debug_assert!(is_valid_identifier(column));
    let sql = format!(
        "SELECT COUNT(*) FROM {} WHERE {} LIKE ?1",
        quoted(table),
        quoted(column)
    );
    let count: i64 = conn.query_row(&sql, params![pattern], |row| row.get(0))?;
    Ok(count as u64)
}

fn quoted(ident: &str) -> String {
    format!("\"{}\"", ident)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Store;

    fn seed(conn: &Connection) {
        conn.execute_batch(
            "CREATE TABLE patients (name TEXT, tax_code TEXT, notes TEXT);
             INSERT INTO patients VALUES ('Rossi', 'RSSMRA80A01H501U', 'allergy: none');
             INSERT INTO patients VALUES ('Verdi', 'VRDGPP75B02F205X', NULL);
             INSERT INTO patients VALUES ('Bianchi', '$aes256gcm$v1$YWJjZGVmZ2hpamts$Y2lwaGVydGV4dA==', 'follow-up');",
        )
        .unwrap();
    }

    #[test]
    fn test_fetch_batch_in_rowid_order() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                seed(conn);

                let batch = fetch_batch(conn, "patients", &["tax_code", "notes"], 0, 2)?;
                assert_eq!(batch.len(), 2);
                assert_eq!(batch[0].rowid, 1);
                assert_eq!(batch[0].values[0].as_deref(), Some("RSSMRA80A01H501U"));
                assert_eq!(batch[1].values[1], None);

                let rest = fetch_batch(conn, "patients", &["tax_code", "notes"], 2, 10)?;
                assert_eq!(rest.len(), 1);
                assert_eq!(rest[0].rowid, 3);

                let empty = fetch_batch(conn, "patients", &["tax_code"], 3, 10)?;
                assert!(empty.is_empty());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_update_value() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                seed(conn);
                update_value(conn, "patients", "tax_code", 1, "replaced")?;

                let batch = fetch_batch(conn, "patients", &["tax_code"], 0, 1)?;
                assert_eq!(batch[0].values[0].as_deref(), Some("replaced"));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_table_exists() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                seed(conn);
                assert!(table_exists(conn, "patients")?);
                assert!(!table_exists(conn, "invoices")?);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_counters() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                seed(conn);

                assert_eq!(count_rows(conn, "patients")?, 3);
                assert_eq!(count_encrypted(conn, "patients", "tax_code")?, 1);
                assert_eq!(count_plaintext(conn, "patients", "tax_code")?, 2);
                assert_eq!(count_version_refs(conn, "patients", "tax_code", 1)?, 1);
                assert_eq!(count_version_refs(conn, "patients", "tax_code", 2)?, 0);
                // NULLs count as neither plaintext nor encrypted
                assert_eq!(count_plaintext(conn, "patients", "notes")?, 2);
                assert_eq!(count_encrypted(conn, "patients", "notes")?, 0);
                Ok(())
            })
            .unwrap();
    }
}
