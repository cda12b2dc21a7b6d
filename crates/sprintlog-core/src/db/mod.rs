//! SQLite store utilities.
//!
//! Runtime defaults are intentionally conservative:
//! - `journal_mode = WAL` to allow concurrent readers while writers append
//! - `busy_timeout = 5s` to reduce transient lock failures under contention
//! - `foreign_keys = ON` for the tables that declare them
//!
//! The connection returned by [`open_store`] is the one storage handle of the
//! process. Repositories borrow it; nothing holds it globally.

pub mod migrations;
pub mod schema;

use crate::error::{Error, Result};
use rusqlite::Connection;
use std::{path::Path, time::Duration};

/// Busy timeout used for store connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (or create) the store database, apply runtime pragmas, and migrate
/// the schema to the latest version.
///
/// # Errors
///
/// Returns an error if opening/configuring/migrating the database fails.
pub fn open_store(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| {
            Error::Config(format!(
                "create store directory {}: {err}",
                parent.display()
            ))
        })?;
    }

    let mut conn = Connection::open(path)?;
    configure_connection(&conn)?;
    migrations::migrate(&mut conn)?;
    tracing::debug!(path = %path.display(), "opened store");

    Ok(conn)
}

/// Open a store that must already exist.
///
/// # Errors
///
/// [`Error::NotInitialized`] when there is no file at `path`; otherwise the
/// same errors as [`open_store`].
pub fn open_existing(path: &Path) -> Result<Connection> {
    if !path.exists() {
        return Err(Error::NotInitialized(path.to_path_buf()));
    }
    open_store(path)
}

/// Open a fully migrated in-memory store (tests and dry runs).
///
/// # Errors
///
/// Returns an error if the schema cannot be applied.
pub fn open_in_memory() -> Result<Connection> {
    let mut conn = Connection::open_in_memory()?;
    configure_connection(&conn)?;
    migrations::migrate(&mut conn)?;
    Ok(conn)
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}

/// Run `f` inside an immediate write transaction.
///
/// `BEGIN IMMEDIATE` takes the write lock up front, so two interleaved
/// operations on the same aggregate serialize here instead of both reading
/// the same "next" number. When a transaction is already open on `conn`,
/// `f` simply joins it and the outer caller owns commit/rollback.
///
/// # Errors
///
/// Returns whatever `f` returns, or a storage error if the transaction
/// cannot be started or committed. On any error the transaction is rolled
/// back.
pub fn with_transaction<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> Result<T>,
) -> Result<T> {
    if !conn.is_autocommit() {
        return f(conn);
    }

    conn.execute_batch("BEGIN IMMEDIATE")?;
    let outcome = f(conn).and_then(|value| {
        conn.execute_batch("COMMIT")?;
        Ok(value)
    });

    if outcome.is_err() && !conn.is_autocommit() {
        if let Err(rollback) = conn.execute_batch("ROLLBACK") {
            tracing::error!(error = %rollback, "rollback failed");
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::{DEFAULT_BUSY_TIMEOUT, open_existing, open_in_memory, open_store, with_transaction};
    use crate::db::migrations;
    use crate::error::Error;
    use tempfile::TempDir;

    fn temp_db_path() -> (TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("nested").join("pm.db");
        (dir, path)
    }

    #[test]
    fn open_store_sets_wal_busy_timeout_and_fk() {
        let (_dir, path) = temp_db_path();
        let conn = open_store(&path).expect("open store");

        let journal_mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .expect("query journal_mode");
        assert_eq!(journal_mode.to_ascii_lowercase(), "wal");

        let busy_timeout_ms: u64 = conn
            .pragma_query_value(None, "busy_timeout", |row| row.get(0))
            .expect("query busy_timeout");
        assert_eq!(
            u128::from(busy_timeout_ms),
            DEFAULT_BUSY_TIMEOUT.as_millis()
        );

        let foreign_keys: i64 = conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .expect("query foreign_keys");
        assert_eq!(foreign_keys, 1);
    }

    #[test]
    fn open_store_runs_migrations() {
        let (_dir, path) = temp_db_path();
        let conn = open_store(&path).expect("open store");

        let version = migrations::current_schema_version(&conn).expect("schema version query");
        assert_eq!(version, migrations::LATEST_SCHEMA_VERSION);
    }

    #[test]
    fn open_existing_requires_a_store() {
        let (_dir, path) = temp_db_path();
        assert!(matches!(open_existing(&path), Err(Error::NotInitialized(_))));

        drop(open_store(&path).expect("create store"));
        assert!(open_existing(&path).is_ok());
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let conn = open_in_memory().expect("open store");

        let result: Result<(), Error> = with_transaction(&conn, |conn| {
            conn.execute(
                "INSERT INTO task_seq_counters (project_id, last_seq) VALUES ('p', 1)",
                [],
            )?;
            Err(Error::validation("boom"))
        });
        assert!(result.is_err());
        assert!(conn.is_autocommit());

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM task_seq_counters", [], |row| row.get(0))
            .expect("count");
        assert_eq!(rows, 0);
    }

    #[test]
    fn nested_transaction_joins_outer() {
        let conn = open_in_memory().expect("open store");

        with_transaction(&conn, |outer| {
            with_transaction(outer, |inner| {
                inner.execute(
                    "INSERT INTO task_seq_counters (project_id, last_seq) VALUES ('p', 3)",
                    [],
                )?;
                Ok(())
            })?;
            assert!(!outer.is_autocommit());
            Ok(())
        })
        .expect("transaction");

        let last: i64 = conn
            .query_row(
                "SELECT last_seq FROM task_seq_counters WHERE project_id = 'p'",
                [],
                |row| row.get(0),
            )
            .expect("counter");
        assert_eq!(last, 3);
    }
}
