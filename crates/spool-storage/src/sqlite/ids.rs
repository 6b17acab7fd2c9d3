//! The DB-side ID service: unique top-level ID assignment and hierarchical
//! child counters.

use std::collections::HashSet;

use rusqlite::{Connection, params};

use spool_core::idgen::{self, adaptive_defaults};
use spool_core::issue::Issue;

use crate::error::{Result, StorageError};
use crate::sqlite::issues::issue_exists;
use crate::sqlite::store::SqliteStore;
use crate::traits::ResurrectHook;

/// Generates a unique content-addressed ID for `issue`.
///
/// The base length adapts to the current store size; on collision the nonce
/// grid (0..10) is walked, then the length grows up to the maximum. IDs
/// already claimed by the surrounding batch are treated as taken.
pub(crate) fn generate_unique_id(
    conn: &Connection,
    prefix: &str,
    issue: &Issue,
    reserved: &HashSet<String>,
) -> Result<String> {
    let num_issues: i64 = conn.query_row("SELECT COUNT(*) FROM issues", [], |row| row.get(0))?;
    let base_length = idgen::compute_adaptive_length(
        num_issues as usize,
        adaptive_defaults::MIN_LENGTH,
        adaptive_defaults::MAX_LENGTH,
        adaptive_defaults::MAX_COLLISION_PROB,
    );

    for length in base_length..=adaptive_defaults::MAX_LENGTH {
        for nonce in 0..adaptive_defaults::NONCE_ATTEMPTS {
            let candidate = idgen::generate_hash_id(
                prefix,
                &issue.title,
                &issue.description,
                &issue.created_by,
                issue.created_at,
                length,
                nonce,
            );
            if reserved.contains(&candidate) {
                continue;
            }
            if !issue_exists(conn, &candidate)? {
                return Ok(candidate);
            }
        }
    }

    Err(StorageError::IdGenerationExhausted {
        prefix: prefix.to_owned(),
    })
}

/// Atomically bumps `child_counters[parent]` and returns the new value.
pub(crate) fn increment_child_counter(conn: &Connection, parent: &str) -> Result<u32> {
    let n: i64 = conn.query_row(
        "INSERT INTO child_counters (parent_id, last_child) VALUES (?1, 1)
         ON CONFLICT(parent_id) DO UPDATE SET last_child = last_child + 1
         RETURNING last_child",
        params![parent],
        |row| row.get(0),
    )?;
    Ok(n as u32)
}

/// Raises `child_counters[parent]` to at least `n`. Used when explicit
/// child IDs arrive in an import.
pub(crate) fn ensure_child_counter_at_least_on_conn(
    conn: &Connection,
    parent: &str,
    n: u32,
) -> Result<()> {
    conn.execute(
        "INSERT INTO child_counters (parent_id, last_child) VALUES (?1, ?2)
         ON CONFLICT(parent_id) DO UPDATE
             SET last_child = MAX(last_child, excluded.last_child)",
        params![parent, n],
    )?;
    Ok(())
}

impl SqliteStore {
    /// Allocates the next child ID under `parent`.
    ///
    /// A missing parent is offered to the resurrect hook (a caller-provided
    /// import-history lookup); if no hook is given or it declines, the
    /// operation fails with `ParentMissing`. The depth cap applies to the
    /// allocated child.
    pub fn next_child_id_impl(
        &self,
        parent: &str,
        resurrect: Option<ResurrectHook<'_>>,
    ) -> Result<String> {
        let max_depth = self.max_hierarchy_depth_impl()?;

        if idgen::hierarchy_depth(parent) + 1 > max_depth {
            return Err(StorageError::HierarchyTooDeep {
                id: parent.to_owned(),
                max_depth,
            });
        }

        let parent_known = {
            let conn = self.lock_conn()?;
            issue_exists(&conn, parent)?
        };
        if !parent_known {
            // The hook runs caller code against the store, so no guard may
            // be held while it executes.
            let resurrected = resurrect.is_some_and(|hook| hook(parent));
            if !resurrected {
                return Err(StorageError::ParentMissing {
                    id: format!("{parent}.<next>"),
                    parent: parent.to_owned(),
                });
            }
        }

        let conn = self.lock_conn()?;
        if !issue_exists(&conn, parent)? {
            return Err(StorageError::ParentMissing {
                id: format!("{parent}.<next>"),
                parent: parent.to_owned(),
            });
        }
        let n = increment_child_counter(&conn, parent)?;
        Ok(format!("{parent}.{n}"))
    }

    /// Raises a parent's child counter to at least `n`.
    pub fn ensure_child_counter_at_least_impl(&self, parent: &str, n: u32) -> Result<()> {
        let conn = self.lock_conn()?;
        ensure_child_counter_at_least_on_conn(&conn, parent, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::issues::insert_issue_row;
    use crate::sqlite::store::SqliteStore;
    use spool_core::content_hash::compute_content_hash;
    use spool_core::issue::IssueBuilder;

    fn store_with_parent(id: &str) -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock_conn().unwrap();
        let mut parent = IssueBuilder::new("Parent").id(id).build();
        parent.content_hash = compute_content_hash(&parent);
        insert_issue_row(&conn, &parent).unwrap();
        drop(conn);
        store
    }

    #[test]
    fn child_ids_are_sequential() {
        let store = store_with_parent("sp-par");
        assert_eq!(store.next_child_id_impl("sp-par", None).unwrap(), "sp-par.1");
        assert_eq!(store.next_child_id_impl("sp-par", None).unwrap(), "sp-par.2");
        assert_eq!(store.next_child_id_impl("sp-par", None).unwrap(), "sp-par.3");
    }

    #[test]
    fn missing_parent_fails_without_hook() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store.next_child_id_impl("sp-ghost", None).unwrap_err();
        assert!(matches!(err, StorageError::ParentMissing { .. }));
    }

    #[test]
    fn declined_hook_still_fails() {
        let store = SqliteStore::open_in_memory().unwrap();
        let hook = |_: &str| false;
        let err = store
            .next_child_id_impl("sp-ghost", Some(&hook))
            .unwrap_err();
        assert!(matches!(err, StorageError::ParentMissing { .. }));
    }

    #[test]
    fn counter_respects_explicit_imports() {
        let store = store_with_parent("sp-imp");
        // An import brought in sp-imp.7; the next allocation must not
        // collide with it.
        store.ensure_child_counter_at_least_impl("sp-imp", 7).unwrap();
        assert_eq!(store.next_child_id_impl("sp-imp", None).unwrap(), "sp-imp.8");
    }

    #[test]
    fn ensure_never_lowers_the_counter() {
        let store = store_with_parent("sp-low");
        store.ensure_child_counter_at_least_impl("sp-low", 5).unwrap();
        store.ensure_child_counter_at_least_impl("sp-low", 2).unwrap();
        assert_eq!(store.next_child_id_impl("sp-low", None).unwrap(), "sp-low.6");
    }

    #[test]
    fn depth_cap_enforced() {
        let store = store_with_parent("sp-deep");
        let conn = store.lock_conn().unwrap();
        for id in ["sp-deep.1", "sp-deep.1.1", "sp-deep.1.1.1"] {
            let mut child = IssueBuilder::new("child").id(id).build();
            child.content_hash = compute_content_hash(&child);
            insert_issue_row(&conn, &child).unwrap();
        }
        drop(conn);

        // Default max depth is 3; a child of sp-deep.1.1.1 would be depth 4.
        let err = store
            .next_child_id_impl("sp-deep.1.1.1", None)
            .unwrap_err();
        assert!(matches!(err, StorageError::HierarchyTooDeep { .. }));
    }

    #[test]
    fn generated_ids_avoid_reserved_set() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock_conn().unwrap();
        let issue = IssueBuilder::new("Collider").build();

        let free = generate_unique_id(&conn, "sp", &issue, &HashSet::new()).unwrap();

        let mut reserved = HashSet::new();
        reserved.insert(free.clone());
        let other = generate_unique_id(&conn, "sp", &issue, &reserved).unwrap();
        assert_ne!(free, other);
    }
}
