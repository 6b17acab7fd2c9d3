//! The migration runner.
//!
//! Migrations are an ordered list of named idempotent steps, each safe to
//! re-run and none depending on columns introduced by later steps except
//! through runtime introspection. Applied steps are recorded in the
//! `metadata` table under `migration:<name>`.
//!
//! Runner protocol:
//!
//! 1. Disable foreign-key enforcement (SQLite cannot toggle it mid
//!    transaction), re-enable on every exit path.
//! 2. `BEGIN EXCLUSIVE` to serialize parallel processes opening the file.
//! 3. Orphan cleanup: drop dependency/label/comment/event (and bookkeeping)
//!    rows whose issue is gone, so FK-cascade invariants hold afterwards.
//! 4. Snapshot row counts, run the pending steps, snapshot again, and verify
//!    that no table shrank unless an applied step declares row loss.
//! 5. Commit; any step failure rolls back the whole run.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::error::{Result, StorageError};
use crate::sqlite::store;

/// One named, idempotent migration step.
struct Migration {
    name: &'static str,
    /// Steps that legitimately remove rows (explicit drops) set this so the
    /// snapshot verification does not flag them.
    drops_rows: bool,
    run: fn(&Connection) -> rusqlite::Result<()>,
}

/// The ordered, forward-only migration list. New deployments run them all;
/// older stores run the pending tail.
const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "add_tombstone_columns",
        drops_rows: false,
        run: add_tombstone_columns,
    },
    Migration {
        name: "add_classification_columns",
        drops_rows: false,
        run: add_classification_columns,
    },
    Migration {
        name: "create_child_counters",
        drops_rows: false,
        run: |conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS child_counters (
                    parent_id  TEXT PRIMARY KEY,
                    last_child INTEGER NOT NULL DEFAULT 0,
                    FOREIGN KEY (parent_id) REFERENCES issues(id) ON DELETE CASCADE
                )",
            )
        },
    },
    Migration {
        name: "create_dirty_issues",
        drops_rows: false,
        run: |conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS dirty_issues (
                    issue_id  TEXT PRIMARY KEY,
                    marked_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                    FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
                )",
            )
        },
    },
    Migration {
        name: "create_export_hashes",
        drops_rows: false,
        run: |conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS export_hashes (
                    issue_id     TEXT PRIMARY KEY,
                    content_hash TEXT NOT NULL,
                    exported_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                    FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
                )",
            )
        },
    },
    Migration {
        name: "create_repo_mtimes",
        drops_rows: false,
        run: |conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS repo_mtimes (
                    repo_path    TEXT PRIMARY KEY,
                    jsonl_path   TEXT NOT NULL DEFAULT '',
                    mtime_ns     INTEGER NOT NULL DEFAULT 0,
                    last_checked TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
                )",
            )
        },
    },
    Migration {
        name: "backfill_original_type",
        drops_rows: false,
        run: |conn| {
            conn.execute(
                "UPDATE issues SET original_type = issue_type
                  WHERE status = 'tombstone' AND (original_type IS NULL OR original_type = '')",
                [],
            )?;
            Ok(())
        },
    },
    // Canonical rule: tombstoning clears closed_at. This step brings rows
    // tombstoned before that rule into line.
    Migration {
        name: "tombstone_closed_at",
        drops_rows: false,
        run: |conn| {
            conn.execute(
                "UPDATE issues SET closed_at = NULL
                  WHERE status = 'tombstone' AND closed_at IS NOT NULL",
                [],
            )?;
            Ok(())
        },
    },
];

fn add_tombstone_columns(conn: &Connection) -> rusqlite::Result<()> {
    ensure_columns(
        conn,
        "issues",
        &[
            ("deleted_at", "TEXT"),
            ("deleted_by", "TEXT NOT NULL DEFAULT ''"),
            ("delete_reason", "TEXT NOT NULL DEFAULT ''"),
            ("original_type", "TEXT NOT NULL DEFAULT ''"),
        ],
    )
}

fn add_classification_columns(conn: &Connection) -> rusqlite::Result<()> {
    ensure_columns(
        conn,
        "issues",
        &[
            ("crystallizes", "INTEGER NOT NULL DEFAULT 0"),
            ("mol_type", "TEXT NOT NULL DEFAULT ''"),
            ("work_type", "TEXT NOT NULL DEFAULT ''"),
            ("quality_score", "REAL"),
            ("event_kind", "TEXT NOT NULL DEFAULT ''"),
            ("actor", "TEXT NOT NULL DEFAULT ''"),
            ("target", "TEXT NOT NULL DEFAULT ''"),
            ("payload", "TEXT NOT NULL DEFAULT ''"),
        ],
    )
}

// ---------------------------------------------------------------------------
// Introspection helpers
// ---------------------------------------------------------------------------

pub(crate) fn table_exists(conn: &Connection, table: &str) -> bool {
    conn.prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")
        .and_then(|mut stmt| stmt.exists([table]))
        .unwrap_or(false)
}

pub(crate) fn column_exists(conn: &Connection, table: &str, column: &str) -> bool {
    let sql = format!("SELECT 1 FROM pragma_table_info('{table}') WHERE name = ?1");
    conn.prepare(&sql)
        .and_then(|mut stmt| stmt.exists([column]))
        .unwrap_or(false)
}

fn ensure_columns(
    conn: &Connection,
    table: &str,
    columns: &[(&str, &str)],
) -> rusqlite::Result<()> {
    if !table_exists(conn, table) {
        return Ok(());
    }
    for (name, definition) in columns {
        if !column_exists(conn, table, name) {
            conn.execute(&format!("ALTER TABLE {table} ADD COLUMN {name} {definition}"), [])?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Orphan cleanup and snapshots
// ---------------------------------------------------------------------------

/// Removes rows whose referenced issue is absent. Runs before the steps so
/// every FK-cascadable table is consistent when they execute.
fn orphan_cleanup(conn: &Connection) -> rusqlite::Result<usize> {
    let mut removed = 0;
    for (table, column) in [
        ("dependencies", "issue_id"),
        ("labels", "issue_id"),
        ("comments", "issue_id"),
        ("events", "issue_id"),
        ("dirty_issues", "issue_id"),
        ("export_hashes", "issue_id"),
        ("child_counters", "parent_id"),
    ] {
        if !table_exists(conn, table) {
            continue;
        }
        removed += conn.execute(
            &format!("DELETE FROM {table} WHERE {column} NOT IN (SELECT id FROM issues)"),
            [],
        )?;
    }
    Ok(removed)
}

/// Row counts captured around the step list.
#[derive(Debug, PartialEq, Eq)]
struct Snapshot {
    issues: i64,
    dependencies: i64,
    labels: i64,
    comments: i64,
    events: i64,
}

impl Snapshot {
    fn capture(conn: &Connection) -> rusqlite::Result<Self> {
        let count = |table: &str| -> rusqlite::Result<i64> {
            if !table_exists(conn, table) {
                return Ok(0);
            }
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })
        };
        Ok(Self {
            issues: count("issues")?,
            dependencies: count("dependencies")?,
            labels: count("labels")?,
            comments: count("comments")?,
            events: count("events")?,
        })
    }

    /// Row counts may only grow unless an applied step declared row loss.
    fn verify_against(&self, after: &Self, allow_loss: bool) -> Result<()> {
        if allow_loss {
            return Ok(());
        }
        for (name, before, now) in [
            ("issues", self.issues, after.issues),
            ("dependencies", self.dependencies, after.dependencies),
            ("labels", self.labels, after.labels),
            ("comments", self.comments, after.comments),
            ("events", self.events, after.events),
        ] {
            if now < before {
                return Err(StorageError::Migration {
                    name: "post-verify".into(),
                    reason: format!("{name} count shrank from {before} to {now}"),
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Runs the pending migration tail. Returns the names of applied steps.
pub fn run_migrations(conn: &Connection, cancel: &CancelToken) -> Result<Vec<&'static str>> {
    conn.pragma_update(None, "foreign_keys", "OFF")
        .map_err(|e| StorageError::Connection(format!("failed to disable foreign keys: {e}")))?;

    let result = run_locked(conn, cancel);

    // Re-enable on every exit path.
    let reenable = conn.pragma_update(None, "foreign_keys", "ON");
    match (result, reenable) {
        (Ok(applied), Ok(())) => Ok(applied),
        (Err(e), _) => Err(e),
        (Ok(_), Err(e)) => Err(StorageError::Connection(format!(
            "failed to re-enable foreign keys: {e}"
        ))),
    }
}

fn run_locked(conn: &Connection, cancel: &CancelToken) -> Result<Vec<&'static str>> {
    let tx = store::begin_exclusive(conn, cancel)?;

    let removed = orphan_cleanup(conn).map_err(|e| StorageError::Migration {
        name: "orphan_cleanup".into(),
        reason: e.to_string(),
    })?;
    if removed > 0 {
        info!(removed, "orphan cleanup removed dangling rows");
    }

    let before = Snapshot::capture(conn).map_err(|e| StorageError::Migration {
        name: "snapshot".into(),
        reason: e.to_string(),
    })?;

    let mut applied = Vec::new();
    let mut allow_loss = false;

    for migration in MIGRATIONS {
        cancel.check("run_migrations")?;

        if is_applied(conn, migration.name)? {
            debug!(name = migration.name, "migration already applied");
            continue;
        }

        debug!(name = migration.name, "applying migration");
        (migration.run)(conn).map_err(|e| StorageError::Migration {
            name: migration.name.to_string(),
            reason: e.to_string(),
        })?;
        mark_applied(conn, migration.name)?;

        allow_loss = allow_loss || migration.drops_rows;
        applied.push(migration.name);
    }

    let after = Snapshot::capture(conn).map_err(|e| StorageError::Migration {
        name: "snapshot".into(),
        reason: e.to_string(),
    })?;
    before.verify_against(&after, allow_loss)?;

    tx.commit()?;
    Ok(applied)
}

fn is_applied(conn: &Connection, name: &str) -> Result<bool> {
    let key = format!("migration:{name}");
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM metadata WHERE key = ?1",
        rusqlite::params![key],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn mark_applied(conn: &Connection, name: &str) -> Result<()> {
    let key = format!("migration:{name}");
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, 'applied')",
        rusqlite::params![key],
    )
    .map_err(|e| StorageError::Migration {
        name: name.to_string(),
        reason: format!("failed to mark applied: {e}"),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::store::SqliteStore;

    #[test]
    fn migrations_recorded_in_metadata() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock_conn().unwrap();

        for migration in MIGRATIONS {
            let applied = is_applied(&conn, migration.name).unwrap();
            assert!(applied, "{} should be recorded", migration.name);
        }
    }

    #[test]
    fn rerun_is_a_noop() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock_conn().unwrap();
        let applied = run_migrations(&conn, &CancelToken::new()).unwrap();
        assert!(applied.is_empty(), "second run should apply nothing");
    }

    #[test]
    fn orphan_cleanup_removes_dangling_rows() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock_conn().unwrap();

        // Plant a dangling dependency with FKs off.
        conn.pragma_update(None, "foreign_keys", "OFF").unwrap();
        conn.execute(
            "INSERT INTO dependencies (issue_id, depends_on_id, created_by)
             VALUES ('sp-gone', 'sp-also-gone', 'test')",
            [],
        )
        .unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();

        let removed = orphan_cleanup(&conn).unwrap();
        assert_eq!(removed, 1);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM dependencies", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn tombstone_closed_at_clears_legacy_rows() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock_conn().unwrap();

        // A legacy tombstone that kept its closed_at.
        conn.execute(
            "INSERT INTO issues (id, title, status, closed_at, deleted_at, original_type)
             VALUES ('sp-legacy', 'Old tombstone', 'tombstone',
                     '2023-01-01T00:00:00.000Z', '2023-06-01T00:00:00.000Z', 'task')",
            [],
        )
        .unwrap();

        // Force the step to re-run.
        conn.execute(
            "DELETE FROM metadata WHERE key = 'migration:tombstone_closed_at'",
            [],
        )
        .unwrap();
        let applied = run_migrations(&conn, &CancelToken::new()).unwrap();
        assert_eq!(applied, vec!["tombstone_closed_at"]);

        let closed_at: Option<String> = conn
            .query_row(
                "SELECT closed_at FROM issues WHERE id = 'sp-legacy'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(closed_at, None);
    }

    #[test]
    fn runner_respects_cancellation() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock_conn().unwrap();
        conn.execute(
            "DELETE FROM metadata WHERE key LIKE 'migration:%'",
            [],
        )
        .unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let err = run_migrations(&conn, &cancel).unwrap_err();
        assert!(matches!(err, StorageError::Cancelled { .. }));
    }

    #[test]
    fn column_introspection() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock_conn().unwrap();
        assert!(table_exists(&conn, "issues"));
        assert!(!table_exists(&conn, "no_such_table"));
        assert!(column_exists(&conn, "issues", "deleted_at"));
        assert!(!column_exists(&conn, "issues", "no_such_column"));
    }
}
