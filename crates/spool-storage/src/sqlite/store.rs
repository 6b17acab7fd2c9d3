//! [`SqliteStore`] -- the engine handle.
//!
//! Owns the one process-wide resource (a mutex-guarded SQLite connection)
//! plus the transaction guards used by every mutating operation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::error::{Result, StorageError};
use crate::sqlite::{migrate, schema};

/// `BEGIN IMMEDIATE` attempts before giving up with [`StorageError::Busy`].
pub(crate) const MAX_BEGIN_ATTEMPTS: u32 = 5;

/// Initial backoff between `BEGIN` attempts; doubles per retry.
pub(crate) const INITIAL_BEGIN_BACKOFF: Duration = Duration::from_millis(10);

/// SQLite-backed implementation of the [`Storage`](crate::traits::Storage)
/// trait.
///
/// The connection is wrapped in a `Mutex`; every operation checks the guard
/// out for exactly the scope of the call. Multi-statement operations keep
/// the guard across their whole transaction so nested work reuses the held
/// connection.
pub struct SqliteStore {
    pub(crate) conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) a store at the given path.
    ///
    /// Sets pragmas, applies the schema, seeds default config, and runs
    /// pending migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(?path, "opening spool store");

        let conn = Connection::open(path).map_err(|e| {
            StorageError::Connection(format!("failed to open {}: {e}", path.display()))
        })?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.configure_connection()?;
        store.init_schema()?;
        Ok(store)
    }

    /// Opens an in-memory store (tests).
    pub fn open_in_memory() -> Result<Self> {
        debug!("opening in-memory spool store");
        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::Connection(format!("failed to open in-memory db: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.configure_connection()?;
        store.init_schema()?;
        Ok(store)
    }

    /// Connection pragmas: WAL, foreign keys, busy timeout, and the
    /// performance set that is safe under WAL.
    fn configure_connection(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;",
        )
        .map_err(|e| StorageError::Connection(format!("failed to set pragmas: {e}")))?;
        Ok(())
    }

    /// Creates tables/views, seeds default config, and runs the migration
    /// list. Idempotent.
    fn init_schema(&self) -> Result<()> {
        {
            let conn = self.lock_conn()?;

            for stmt in schema::SCHEMA_STATEMENTS {
                conn.execute_batch(stmt)
                    .map_err(|e| StorageError::Migration {
                        name: "init_schema".into(),
                        reason: format!("{e}\nstatement: {}", truncate(stmt, 120)),
                    })?;
            }

            for &(key, value) in schema::DEFAULT_CONFIG {
                conn.execute(
                    "INSERT OR IGNORE INTO config (key, value) VALUES (?1, ?2)",
                    rusqlite::params![key, value],
                )
                .map_err(|e| StorageError::Migration {
                    name: "default_config".into(),
                    reason: format!("failed to seed {key}: {e}"),
                })?;
            }
        }

        let applied = self.run_migrations(&CancelToken::new())?;
        if !applied.is_empty() {
            info!(?applied, "schema migrations applied");
        }
        Ok(())
    }

    /// Runs the pending tail of the migration list. See
    /// [`migrate`](crate::sqlite::migrate) for the step list and the
    /// orphan-cleanup / snapshot-verification protocol.
    pub fn run_migrations(&self, cancel: &CancelToken) -> Result<Vec<&'static str>> {
        let conn = self.lock_conn()?;
        migrate::run_migrations(&conn, cancel)
    }

    /// Acquires the connection guard. Helper used by all operation modules.
    pub(crate) fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Connection(format!("mutex poisoned: {e}")))
    }

    /// Embedding extension: runs a closure against the raw connection.
    ///
    /// Embedders may create auxiliary tables with foreign keys to
    /// `issues(id)`; they must not alter core tables. The scoped closure
    /// keeps the connection from outliving the call.
    pub fn with_underlying_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock_conn()?;
        f(&conn)
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Transaction guard
// ---------------------------------------------------------------------------

/// A manually managed transaction on a borrowed connection.
///
/// Rolls back on drop unless [`commit`](TxGuard::commit) ran; every exit
/// path -- success, error, cancellation, panic -- releases the writer slot.
#[derive(Debug)]
pub(crate) struct TxGuard<'c> {
    conn: &'c Connection,
    committed: bool,
}

impl<'c> TxGuard<'c> {
    /// Commits the transaction, consuming the guard.
    pub(crate) fn commit(mut self) -> Result<()> {
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| StorageError::Transaction(format!("failed to commit: {e}")))?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for TxGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

/// Opens a `BEGIN IMMEDIATE` transaction, retrying busy errors with
/// exponential backoff (checking the cancellation token between attempts).
pub(crate) fn begin_immediate<'c>(
    conn: &'c Connection,
    cancel: &CancelToken,
) -> Result<TxGuard<'c>> {
    begin_with_retry(conn, "BEGIN IMMEDIATE", cancel)
}

/// Opens a `BEGIN EXCLUSIVE` transaction (migration runner).
pub(crate) fn begin_exclusive<'c>(
    conn: &'c Connection,
    cancel: &CancelToken,
) -> Result<TxGuard<'c>> {
    begin_with_retry(conn, "BEGIN EXCLUSIVE", cancel)
}

fn begin_with_retry<'c>(
    conn: &'c Connection,
    begin_sql: &str,
    cancel: &CancelToken,
) -> Result<TxGuard<'c>> {
    let mut backoff = INITIAL_BEGIN_BACKOFF;
    for attempt in 0..MAX_BEGIN_ATTEMPTS {
        cancel.check(begin_sql)?;
        match conn.execute_batch(begin_sql) {
            Ok(()) => {
                return Ok(TxGuard {
                    conn,
                    committed: false,
                });
            }
            Err(e) if is_busy(&e) && attempt + 1 < MAX_BEGIN_ATTEMPTS => {
                debug!(attempt, ?backoff, "database busy, backing off");
                std::thread::sleep(backoff);
                backoff *= 2;
            }
            Err(e) if is_busy(&e) => {
                return Err(StorageError::Busy {
                    attempts: MAX_BEGIN_ATTEMPTS,
                });
            }
            Err(e) => {
                return Err(StorageError::Transaction(format!(
                    "{begin_sql} failed: {e}"
                )));
            }
        }
    }
    Err(StorageError::Busy {
        attempts: MAX_BEGIN_ATTEMPTS,
    })
}

/// Returns `true` for SQLITE_BUSY / SQLITE_LOCKED failures.
fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::DatabaseBusy
                || err.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

/// Truncates long SQL for error messages.
fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        format!("{}...", &s[..max])
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_seeds_config() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock_conn().unwrap();
        let count: i32 = conn
            .query_row("SELECT COUNT(*) FROM config", [], |row| row.get(0))
            .unwrap();
        assert!(count > 0, "default config should be seeded");
    }

    #[test]
    fn schema_creates_all_tables() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock_conn().unwrap();
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table'")
            .unwrap();
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();

        for required in [
            "issues",
            "dependencies",
            "labels",
            "comments",
            "events",
            "config",
            "metadata",
            "dirty_issues",
            "export_hashes",
            "child_counters",
            "repo_mtimes",
        ] {
            assert!(tables.contains(&required.to_string()), "missing {required}");
        }
    }

    #[test]
    fn schema_creates_views() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock_conn().unwrap();
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'view'")
            .unwrap();
        let views: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert!(views.contains(&"ready_issues".to_string()));
        assert!(views.contains(&"blocked_issues".to_string()));
    }

    #[test]
    fn idempotent_reinit() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.init_schema().unwrap();
        store.init_schema().unwrap();
    }

    #[test]
    fn closed_at_check_enforced() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock_conn().unwrap();

        // Closed without closed_at rejected at the engine level.
        let err = conn.execute(
            "INSERT INTO issues (id, title, status) VALUES ('sp-1', 'Closed', 'closed')",
            [],
        );
        assert!(err.is_err());

        // Tombstone without closed_at passes (with delete bookkeeping).
        conn.execute(
            "INSERT INTO issues (id, title, status, deleted_at, original_type)
             VALUES ('sp-2', 'Gone', 'tombstone', '2024-01-01T00:00:00.000Z', 'task')",
            [],
        )
        .unwrap();
    }

    #[test]
    fn tombstone_check_requires_bookkeeping() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock_conn().unwrap();
        let err = conn.execute(
            "INSERT INTO issues (id, title, status) VALUES ('sp-3', 'Bad', 'tombstone')",
            [],
        );
        assert!(err.is_err(), "tombstone without deleted_at must be rejected");
    }

    #[test]
    fn tx_guard_rolls_back_on_drop() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock_conn().unwrap();

        {
            let _tx = begin_immediate(&conn, &CancelToken::new()).unwrap();
            conn.execute(
                "INSERT INTO config (key, value) VALUES ('tx_test', '1')",
                [],
            )
            .unwrap();
            // Guard dropped without commit.
        }

        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM config WHERE key = 'tx_test'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 0, "uncommitted write must roll back");
    }

    #[test]
    fn tx_guard_commit_persists() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock_conn().unwrap();

        let tx = begin_immediate(&conn, &CancelToken::new()).unwrap();
        conn.execute(
            "INSERT INTO config (key, value) VALUES ('tx_test', '1')",
            [],
        )
        .unwrap();
        tx.commit().unwrap();

        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM config WHERE key = 'tx_test'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn begin_respects_cancellation() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock_conn().unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = begin_immediate(&conn, &cancel).unwrap_err();
        assert!(matches!(err, StorageError::Cancelled { .. }));
    }
}
