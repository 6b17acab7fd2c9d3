//! Tombstoning and hard deletion.
//!
//! Normal deletion never removes rows: targets transition to tombstone
//! status so inbound references stay resolvable. Hard deletion exists for
//! cleanup contexts where the caller guarantees safety.

use std::collections::{HashSet, VecDeque};

use chrono::Utc;
use rusqlite::{Connection, params};

use spool_core::enums::EventType;

use crate::cancel::CancelToken;
use crate::error::{Result, StorageError};
use crate::sqlite::dirty::mark_dirty_on_conn;
use crate::sqlite::issues::{emit_event, format_datetime, issue_exists};
use crate::sqlite::store::{SqliteStore, begin_immediate};
use crate::traits::{DeleteOptions, DeleteResult};

/// Traversal bound shared with the ready-work view. A blocking graph deeper
/// than this violates the DAG contract.
const MAX_DEPENDENT_DEPTH: usize = 50;

/// Transitions one row to tombstone status: delete bookkeeping filled,
/// `original_type` preserved, `closed_at` cleared, outgoing dependencies
/// removed. Inbound edges stay for history.
pub(crate) fn tombstone_on_conn(
    conn: &Connection,
    id: &str,
    actor: &str,
    reason: &str,
    now_str: &str,
) -> Result<()> {
    let affected = conn.execute(
        "UPDATE issues SET
            status = 'tombstone',
            deleted_at = ?1,
            deleted_by = ?2,
            delete_reason = ?3,
            original_type = issue_type,
            closed_at = NULL,
            updated_at = ?1
         WHERE id = ?4",
        params![now_str, actor, reason, id],
    )?;
    if affected == 0 {
        return Err(StorageError::not_found("issue", id));
    }

    conn.execute("DELETE FROM dependencies WHERE issue_id = ?1", params![id])?;

    emit_event(
        conn,
        id,
        EventType::Tombstoned,
        actor,
        None,
        None,
        Some(reason),
        now_str,
    )?;
    mark_dirty_on_conn(conn, id, now_str)?;
    Ok(())
}

/// Issues with a live blocking edge (`blocks` / `parent-child`) on `id`.
/// Tombstones and closed rows never count as live.
fn live_dependents(conn: &Connection, id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT d.issue_id FROM dependencies d
         JOIN issues i ON i.id = d.issue_id
         WHERE d.depends_on_id = ?1
           AND d.type IN ('blocks', 'parent-child')
           AND i.status NOT IN ('tombstone', 'closed')
         ORDER BY d.issue_id",
    )?;
    let rows = stmt.query_map(params![id], |row| row.get::<_, String>(0))?;
    let mut ids = Vec::new();
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}

/// Breadth-first transitive closure of live dependents over the targets.
/// Bounded; a graph deeper than the bound is an integrity violation.
fn transitive_dependents(conn: &Connection, targets: &[String]) -> Result<Vec<String>> {
    let mut visited: HashSet<String> = targets.iter().cloned().collect();
    let mut discovered: Vec<String> = Vec::new();
    let mut queue: VecDeque<(String, usize)> =
        targets.iter().map(|t| (t.clone(), 0)).collect();

    while let Some((current, depth)) = queue.pop_front() {
        if depth >= MAX_DEPENDENT_DEPTH {
            return Err(StorageError::Integrity(format!(
                "dependent graph of {current} exceeds depth {MAX_DEPENDENT_DEPTH}"
            )));
        }
        for dependent in live_dependents(conn, &current)? {
            if visited.insert(dependent.clone()) {
                discovered.push(dependent.clone());
                queue.push_back((dependent, depth + 1));
            }
        }
    }
    Ok(discovered)
}

impl SqliteStore {
    /// Tombstones the targets per the cascade/force/dry-run matrix.
    pub fn delete_issues_impl(
        &self,
        ids: &[String],
        options: &DeleteOptions,
        actor: &str,
        cancel: &CancelToken,
    ) -> Result<DeleteResult> {
        const OP: &str = "delete_issues";

        if ids.is_empty() {
            return Ok(DeleteResult::default());
        }

        let conn = self.lock_conn()?;
        let tx = begin_immediate(&conn, cancel)?;

        for id in ids {
            if !issue_exists(&conn, id)? {
                return Err(StorageError::not_found("issue", id));
            }
        }

        let targets: Vec<String> = ids.to_vec();
        let target_set: HashSet<&str> = targets.iter().map(String::as_str).collect();

        let mut delete_set: Vec<String> = targets.clone();
        let mut orphaned: Vec<String> = Vec::new();

        if options.cascade {
            delete_set.extend(transitive_dependents(&conn, &targets)?);
        } else {
            // Dependents outside the target set would be stranded.
            let mut stranded: Vec<String> = Vec::new();
            for id in &targets {
                for dependent in live_dependents(&conn, id)? {
                    if !target_set.contains(dependent.as_str()) && !stranded.contains(&dependent)
                    {
                        stranded.push(dependent);
                    }
                }
            }
            if !stranded.is_empty() {
                if !options.force {
                    return Err(StorageError::DependencyBlockedDelete {
                        id: targets[0].clone(),
                        dependents: stranded,
                    });
                }
                orphaned = stranded;
            }
        }
        cancel.check(OP)?;

        if options.dry_run {
            // Computed, nothing mutated; the guard rolls the empty
            // transaction back.
            return Ok(DeleteResult {
                deleted_count: delete_set.len(),
                orphaned_issues: orphaned,
            });
        }

        let now_str = format_datetime(&Utc::now());
        for id in &delete_set {
            cancel.check(OP)?;
            tombstone_on_conn(&conn, id, actor, "deleted", &now_str)?;
        }

        tx.commit()?;
        Ok(DeleteResult {
            deleted_count: delete_set.len(),
            orphaned_issues: orphaned,
        })
    }

    /// Transitions a single row to tombstone status.
    pub fn create_tombstone_impl(&self, id: &str, actor: &str, reason: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        let tx = begin_immediate(&conn, &CancelToken::new())?;
        let now_str = format_datetime(&Utc::now());
        tombstone_on_conn(&conn, id, actor, reason, &now_str)?;
        tx.commit()
    }

    /// Physically removes an issue and its related rows.
    pub fn delete_issue_impl(&self, id: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        let tx = begin_immediate(&conn, &CancelToken::new())?;

        // depends_on_id carries no FK, so inbound edges need an explicit
        // sweep; everything else cascades.
        conn.execute(
            "DELETE FROM dependencies WHERE depends_on_id = ?1",
            params![id],
        )?;
        let affected = conn.execute("DELETE FROM issues WHERE id = ?1", params![id])?;
        if affected == 0 {
            return Err(StorageError::not_found("issue", id));
        }
        tx.commit()
    }
}
