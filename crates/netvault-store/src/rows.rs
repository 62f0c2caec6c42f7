//! Shared helpers for decoding rows and grouping statements.

use std::str::FromStr;

use rusqlite::types::Type;
use rusqlite::{Connection, Row};

use crate::error::{Result, SqliteResultExt};

/// Read a TEXT column and parse it with `FromStr`.
pub(crate) fn parsed<T>(row: &Row<'_>, column: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(column)?;
    parse_text(row, column, &raw)
}

/// Like [`parsed`], for nullable columns.
pub(crate) fn parsed_opt<T>(row: &Row<'_>, column: &str) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: Option<String> = row.get(column)?;
    raw.map(|raw| parse_text(row, column, &raw)).transpose()
}

/// Read an enum-like TEXT column, falling back to `T::default()` for NULL or
/// values this version does not know (older releases wrote other states).
pub(crate) fn lenient<T>(row: &Row<'_>, column: &str) -> rusqlite::Result<T>
where
    T: FromStr + Default,
{
    let raw: Option<String> = row.get(column)?;
    Ok(raw.map(|raw| lenient_text(column, &raw)).unwrap_or_default())
}

/// Like [`lenient`], for nullable columns: NULL stays `None`.
pub(crate) fn lenient_opt<T>(row: &Row<'_>, column: &str) -> rusqlite::Result<Option<T>>
where
    T: FromStr + Default,
{
    let raw: Option<String> = row.get(column)?;
    Ok(raw.map(|raw| lenient_text(column, &raw)))
}

fn lenient_text<T: FromStr + Default>(column: &str, raw: &str) -> T {
    raw.trim().parse().unwrap_or_else(|_| {
        tracing::debug!(column, value = raw, "Unrecognised value, using default");
        T::default()
    })
}

fn parse_text<T>(row: &Row<'_>, column: &str, raw: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim().parse::<T>().map_err(|e| {
        let index = row.as_ref().column_index(column).unwrap_or_default();
        rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e))
    })
}

/// Run `f` so its statements apply all-or-nothing.
///
/// Inside an enclosing transaction this is a SAVEPOINT. Outside one it opens
/// an IMMEDIATE transaction, so the write lock is held before the first read
/// and a concurrent commit cannot invalidate what `f` has already read.
pub(crate) fn atomically<T, F>(conn: &Connection, name: &'static str, f: F) -> Result<T>
where
    F: FnOnce(&Connection) -> Result<T>,
{
    let (begin, commit, rollback) = if conn.is_autocommit() {
        (
            "BEGIN IMMEDIATE".to_string(),
            "COMMIT".to_string(),
            "ROLLBACK".to_string(),
        )
    } else {
        (
            format!("SAVEPOINT {name}"),
            format!("RELEASE {name}"),
            format!("ROLLBACK TO {name}; RELEASE {name}"),
        )
    };

    conn.execute_batch(&begin).in_op("begin", name)?;

    let outcome = f(conn).and_then(|value| {
        conn.execute_batch(&commit).in_op("commit", name)?;
        Ok(value)
    });

    if outcome.is_err() && !conn.is_autocommit() {
        if let Err(e) = conn.execute_batch(&rollback) {
            tracing::warn!(scope = name, error = %e, "Rollback failed");
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    fn deferred_fk_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             CREATE TABLE parent (id INTEGER PRIMARY KEY);
             CREATE TABLE child (
                 id INTEGER PRIMARY KEY,
                 parent_id INTEGER REFERENCES parent(id) DEFERRABLE INITIALLY DEFERRED
             );",
        )
        .unwrap();
        conn
    }

    #[test]
    fn failed_commit_is_rolled_back() {
        let conn = deferred_fk_conn();

        let result = atomically(&conn, "orphan", |conn| {
            conn.execute("INSERT INTO child (id, parent_id) VALUES (1, 99)", [])
                .in_op("insert_child", 1)
        });

        assert!(matches!(result, Err(StoreError::ReferentialIntegrity { .. })));
        assert!(conn.is_autocommit());
        let children: i64 = conn
            .query_row("SELECT COUNT(*) FROM child", [], |row| row.get(0))
            .unwrap();
        assert_eq!(children, 0);
    }

    #[test]
    fn nested_failure_keeps_enclosing_transaction() {
        let conn = deferred_fk_conn();
        conn.execute_batch("BEGIN; INSERT INTO parent (id) VALUES (1);")
            .unwrap();

        let result: Result<()> = atomically(&conn, "inner", |conn| {
            conn.execute("INSERT INTO parent (id) VALUES (2)", [])
                .in_op("insert_parent", 2)?;
            Err(StoreError::Invalid("abort".to_string()))
        });

        assert!(result.is_err());
        assert!(!conn.is_autocommit());
        conn.execute_batch("COMMIT").unwrap();
        let ids: Vec<i64> = conn
            .prepare("SELECT id FROM parent ORDER BY id")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(ids, vec![1]);
    }
}
