//! Dependency edge operations and cycle detection.

use std::collections::{HashSet, VecDeque};

use chrono::Utc;
use rusqlite::{Connection, params};

use spool_core::dependency::Dependency;
use spool_core::enums::{DependencyType, EventType};
use spool_core::issue::Issue;

use crate::error::{Result, StorageError};
use crate::sqlite::dirty::mark_dirty_on_conn;
use crate::sqlite::issues::{ISSUE_COLUMNS_PREFIXED, emit_event, format_datetime, scan_issue};
use crate::sqlite::store::SqliteStore;

// ---------------------------------------------------------------------------
// Connection-level helpers (shared with Transaction)
// ---------------------------------------------------------------------------

/// Inserts a dependency edge. Blocking-type edges are checked for cycles
/// first.
pub(crate) fn add_dependency_on_conn(
    conn: &Connection,
    dep: &Dependency,
    actor: &str,
) -> Result<()> {
    if dep.dep_type.affects_ready_work() {
        detect_cycle(conn, &dep.issue_id, &dep.depends_on_id)?;
    }

    let now_str = format_datetime(&Utc::now());
    let created_at_str = format_datetime(&dep.created_at);

    conn.execute(
        "INSERT OR REPLACE INTO dependencies
         (issue_id, depends_on_id, type, created_at, created_by, metadata, thread_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            dep.issue_id,
            dep.depends_on_id,
            dep.dep_type.as_str(),
            created_at_str,
            dep.created_by,
            dep.metadata,
            dep.thread_id,
        ],
    )?;

    emit_event(
        conn,
        &dep.issue_id,
        EventType::DependencyAdded,
        actor,
        None,
        Some(&dep.depends_on_id),
        Some(dep.dep_type.as_str()),
        &now_str,
    )?;
    mark_dirty_on_conn(conn, &dep.issue_id, &now_str)?;
    Ok(())
}

/// Removes a dependency edge.
pub(crate) fn remove_dependency_on_conn(
    conn: &Connection,
    issue_id: &str,
    depends_on_id: &str,
    actor: &str,
) -> Result<()> {
    let now_str = format_datetime(&Utc::now());

    let affected = conn.execute(
        "DELETE FROM dependencies WHERE issue_id = ?1 AND depends_on_id = ?2",
        params![issue_id, depends_on_id],
    )?;
    if affected == 0 {
        return Err(StorageError::not_found(
            "dependency",
            format!("{issue_id} -> {depends_on_id}"),
        ));
    }

    emit_event(
        conn,
        issue_id,
        EventType::DependencyRemoved,
        actor,
        Some(depends_on_id),
        None,
        None,
        &now_str,
    )?;
    mark_dirty_on_conn(conn, issue_id, &now_str)?;
    Ok(())
}

/// Raw dependency records for an issue.
pub(crate) fn get_dependency_records_on_conn(
    conn: &Connection,
    issue_id: &str,
) -> Result<Vec<Dependency>> {
    let mut stmt = conn.prepare(
        "SELECT issue_id, depends_on_id, type, created_at, created_by, metadata, thread_id
         FROM dependencies WHERE issue_id = ?1",
    )?;
    let rows = stmt.query_map(params![issue_id], |row| {
        Ok(Dependency {
            issue_id: row.get("issue_id")?,
            depends_on_id: row.get("depends_on_id")?,
            dep_type: DependencyType::from(row.get::<_, String>("type")?),
            created_at: crate::sqlite::issues::parse_datetime(
                &row.get::<_, String>("created_at")?,
            ),
            created_by: row.get("created_by")?,
            metadata: row.get("metadata")?,
            thread_id: row.get("thread_id")?,
        })
    })?;

    let mut deps = Vec::new();
    for row in rows {
        deps.push(row?);
    }
    Ok(deps)
}

/// Rejects an edge `issue_id -> depends_on_id` that would make `issue_id`
/// reachable from `depends_on_id` through blocking edges. BFS with a
/// visited set, so existing diamonds are fine.
fn detect_cycle(conn: &Connection, issue_id: &str, depends_on_id: &str) -> Result<()> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    queue.push_back(depends_on_id.to_string());

    while let Some(current) = queue.pop_front() {
        if current == issue_id {
            return Err(StorageError::CycleDetected {
                issue_id: issue_id.to_owned(),
                depends_on_id: depends_on_id.to_owned(),
            });
        }
        if !visited.insert(current.clone()) {
            continue;
        }
        let mut stmt = conn.prepare_cached(
            "SELECT depends_on_id FROM dependencies
             WHERE issue_id = ?1 AND type IN ('blocks', 'parent-child')",
        )?;
        let rows = stmt.query_map(params![current], |row| row.get::<_, String>(0))?;
        for row in rows {
            let next = row?;
            if !visited.contains(&next) {
                queue.push_back(next);
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// SqliteStore methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    /// Adds a dependency edge.
    pub fn add_dependency_impl(&self, dep: &Dependency, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        let tx = crate::sqlite::store::begin_immediate(&conn, &crate::cancel::CancelToken::new())?;
        add_dependency_on_conn(&conn, dep, actor)?;
        tx.commit()
    }

    /// Removes a dependency edge.
    pub fn remove_dependency_impl(
        &self,
        issue_id: &str,
        depends_on_id: &str,
        actor: &str,
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        let tx = crate::sqlite::store::begin_immediate(&conn, &crate::cancel::CancelToken::new())?;
        remove_dependency_on_conn(&conn, issue_id, depends_on_id, actor)?;
        tx.commit()
    }

    /// Issues the given issue depends on.
    pub fn get_dependencies_impl(&self, issue_id: &str) -> Result<Vec<Issue>> {
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {ISSUE_COLUMNS_PREFIXED} FROM issues
             INNER JOIN dependencies d ON issues.id = d.depends_on_id
             WHERE d.issue_id = ?1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![issue_id], scan_issue)?;
        let mut issues = Vec::new();
        for row in rows {
            issues.push(row?);
        }
        Ok(issues)
    }

    /// Issues depending on the given issue.
    pub fn get_dependents_impl(&self, issue_id: &str) -> Result<Vec<Issue>> {
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {ISSUE_COLUMNS_PREFIXED} FROM issues
             INNER JOIN dependencies d ON issues.id = d.issue_id
             WHERE d.depends_on_id = ?1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![issue_id], scan_issue)?;
        let mut issues = Vec::new();
        for row in rows {
            issues.push(row?);
        }
        Ok(issues)
    }
}
