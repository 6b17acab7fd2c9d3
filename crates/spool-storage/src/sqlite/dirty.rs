//! The dirty-set tracker and exporter bookkeeping.
//!
//! Every mutation records its target in `dirty_issues`; an external
//! exporter reads the set, serializes, then clears the IDs it handled.
//! `export_hashes` and `repo_mtimes` are exporter-owned companions: the
//! former for content-level dedup, the latter for multi-repo scan state.

use std::collections::HashMap;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::Result;
use crate::sqlite::issues::{format_datetime, parse_datetime};
use crate::sqlite::store::SqliteStore;
use crate::traits::RepoMtime;

/// Records an issue in the dirty set. Re-marking refreshes `marked_at`.
pub(crate) fn mark_dirty_on_conn(conn: &Connection, issue_id: &str, marked_at: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO dirty_issues (issue_id, marked_at) VALUES (?1, ?2)",
        params![issue_id, marked_at],
    )?;
    Ok(())
}

impl SqliteStore {
    /// IDs mutated since the last export clear, oldest mark first.
    pub fn get_dirty_issues_impl(&self) -> Result<Vec<String>> {
        let conn = self.lock_conn()?;
        let mut stmt =
            conn.prepare("SELECT issue_id FROM dirty_issues ORDER BY marked_at, issue_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    /// Atomically removes the given IDs from the dirty set.
    pub fn clear_dirty_issues_by_id_impl(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let conn = self.lock_conn()?;
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("DELETE FROM dirty_issues WHERE issue_id IN ({placeholders})");
        conn.execute(&sql, rusqlite::params_from_iter(ids.iter()))?;
        Ok(())
    }

    /// Records the content hash the exporter last wrote for an issue.
    pub fn set_export_hash_impl(&self, issue_id: &str, content_hash: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        let now_str = format_datetime(&Utc::now());
        conn.execute(
            "INSERT INTO export_hashes (issue_id, content_hash, exported_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(issue_id) DO UPDATE
                 SET content_hash = excluded.content_hash,
                     exported_at = excluded.exported_at",
            params![issue_id, content_hash, now_str],
        )?;
        Ok(())
    }

    /// All recorded export hashes, keyed by issue ID.
    pub fn get_export_hashes_impl(&self) -> Result<HashMap<String, String>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT issue_id, content_hash FROM export_hashes")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut map = HashMap::new();
        for row in rows {
            let (id, hash) = row?;
            map.insert(id, hash);
        }
        Ok(map)
    }

    /// Upserts the scan bookkeeping for a repo path.
    pub fn touch_repo_mtime_impl(
        &self,
        repo_path: &str,
        jsonl_path: &str,
        mtime_ns: i64,
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        let now_str = format_datetime(&Utc::now());
        conn.execute(
            "INSERT INTO repo_mtimes (repo_path, jsonl_path, mtime_ns, last_checked)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(repo_path) DO UPDATE
                 SET jsonl_path = excluded.jsonl_path,
                     mtime_ns = excluded.mtime_ns,
                     last_checked = excluded.last_checked",
            params![repo_path, jsonl_path, mtime_ns, now_str],
        )?;
        Ok(())
    }

    /// Reads the scan bookkeeping for a repo path.
    pub fn get_repo_mtime_impl(&self, repo_path: &str) -> Result<Option<RepoMtime>> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                "SELECT repo_path, jsonl_path, mtime_ns, last_checked
                 FROM repo_mtimes WHERE repo_path = ?1",
                params![repo_path],
                |row| {
                    let last_checked: String = row.get(3)?;
                    Ok(RepoMtime {
                        repo_path: row.get(0)?,
                        jsonl_path: row.get(1)?,
                        mtime_ns: row.get(2)?,
                        last_checked: parse_datetime(&last_checked),
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::issues::insert_issue_row;
    use spool_core::content_hash::compute_content_hash;
    use spool_core::issue::IssueBuilder;

    fn store_with_issues(ids: &[&str]) -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock_conn().unwrap();
        for id in ids {
            let mut issue = IssueBuilder::new(format!("issue {id}")).id(*id).build();
            issue.content_hash = compute_content_hash(&issue);
            insert_issue_row(&conn, &issue).unwrap();
        }
        drop(conn);
        store
    }

    #[test]
    fn mark_and_clear() {
        let store = store_with_issues(&["sp-d1", "sp-d2"]);
        {
            let conn = store.lock_conn().unwrap();
            let now = format_datetime(&Utc::now());
            mark_dirty_on_conn(&conn, "sp-d1", &now).unwrap();
            mark_dirty_on_conn(&conn, "sp-d2", &now).unwrap();
        }

        let dirty = store.get_dirty_issues_impl().unwrap();
        assert_eq!(dirty.len(), 2);

        store
            .clear_dirty_issues_by_id_impl(&["sp-d1".to_string()])
            .unwrap();
        let dirty = store.get_dirty_issues_impl().unwrap();
        assert_eq!(dirty, vec!["sp-d2"]);
    }

    #[test]
    fn remark_is_idempotent() {
        let store = store_with_issues(&["sp-d3"]);
        {
            let conn = store.lock_conn().unwrap();
            let now = format_datetime(&Utc::now());
            mark_dirty_on_conn(&conn, "sp-d3", &now).unwrap();
            mark_dirty_on_conn(&conn, "sp-d3", &now).unwrap();
        }
        assert_eq!(store.get_dirty_issues_impl().unwrap().len(), 1);
    }

    #[test]
    fn export_hash_upsert() {
        let store = store_with_issues(&["sp-e1"]);
        store.set_export_hash_impl("sp-e1", "aaa").unwrap();
        store.set_export_hash_impl("sp-e1", "bbb").unwrap();

        let hashes = store.get_export_hashes_impl().unwrap();
        assert_eq!(hashes.get("sp-e1").map(String::as_str), Some("bbb"));
    }

    #[test]
    fn repo_mtime_roundtrip() {
        let store = store_with_issues(&[]);
        assert!(store.get_repo_mtime_impl("/work/app").unwrap().is_none());

        store
            .touch_repo_mtime_impl("/work/app", "/work/app/.spool/issues.jsonl", 42)
            .unwrap();
        let row = store.get_repo_mtime_impl("/work/app").unwrap().unwrap();
        assert_eq!(row.jsonl_path, "/work/app/.spool/issues.jsonl");
        assert_eq!(row.mtime_ns, 42);

        store
            .touch_repo_mtime_impl("/work/app", "/work/app/.spool/issues.jsonl", 99)
            .unwrap();
        let row = store.get_repo_mtime_impl("/work/app").unwrap().unwrap();
        assert_eq!(row.mtime_ns, 99);
    }
}
