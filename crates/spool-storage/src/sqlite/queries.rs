//! Readers over the derived views, plus aggregate statistics.

use chrono::Utc;
use rusqlite::Connection;

use spool_core::filter::WorkFilter;
use spool_core::issue::Issue;

use crate::error::Result;
use crate::sqlite::issues::{format_datetime, scan_issue};
use crate::sqlite::store::SqliteStore;
use crate::traits::{BlockedIssue, Statistics};

/// Appends the WorkFilter clauses shared by both view readers.
fn push_work_filter_clauses(
    filter: &WorkFilter,
    where_clauses: &mut Vec<String>,
    param_values: &mut Vec<Box<dyn rusqlite::types::ToSql>>,
    param_idx: &mut usize,
) {
    if let Some(ref issue_type) = filter.issue_type {
        where_clauses.push(format!("issue_type = ?{param_idx}"));
        param_values.push(Box::new(issue_type.clone()));
        *param_idx += 1;
    }
    if let Some(priority) = filter.priority {
        where_clauses.push(format!("priority = ?{param_idx}"));
        param_values.push(Box::new(priority));
        *param_idx += 1;
    }
    if let Some(ref assignee) = filter.assignee {
        where_clauses.push(format!("assignee = ?{param_idx}"));
        param_values.push(Box::new(assignee.clone()));
        *param_idx += 1;
    }
    if filter.unassigned {
        where_clauses.push("assignee = ''".to_string());
    }

    for label in &filter.labels {
        where_clauses.push(format!(
            "EXISTS (SELECT 1 FROM labels l WHERE l.issue_id = id AND l.label = ?{param_idx})"
        ));
        param_values.push(Box::new(label.clone()));
        *param_idx += 1;
    }
    if !filter.labels_any.is_empty() {
        let placeholders: Vec<String> = filter
            .labels_any
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", *param_idx + i))
            .collect();
        where_clauses.push(format!(
            "EXISTS (SELECT 1 FROM labels l WHERE l.issue_id = id AND l.label IN ({}))",
            placeholders.join(",")
        ));
        for label in &filter.labels_any {
            param_values.push(Box::new(label.clone()));
        }
        *param_idx += filter.labels_any.len();
    }
}

fn collect_issues(
    conn: &Connection,
    sql: &str,
    param_values: &[Box<dyn rusqlite::types::ToSql>],
) -> Result<Vec<Issue>> {
    let param_refs: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), scan_issue)?;
    let mut issues = Vec::new();
    for row in rows {
        issues.push(row?);
    }
    Ok(issues)
}

impl SqliteStore {
    /// Open, non-ephemeral issues with no transitive blocker, via the
    /// `ready_issues` view.
    pub fn get_ready_issues_impl(&self, filter: &WorkFilter) -> Result<Vec<Issue>> {
        let conn = self.lock_conn()?;

        let mut where_clauses: Vec<String> = vec!["is_template = 0".to_string()];
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut param_idx = 1;

        if !filter.include_deferred {
            where_clauses.push(format!(
                "(defer_until IS NULL OR defer_until <= ?{param_idx})"
            ));
            param_values.push(Box::new(format_datetime(&Utc::now())));
            param_idx += 1;
        }

        push_work_filter_clauses(filter, &mut where_clauses, &mut param_values, &mut param_idx);

        let limit_sql = filter
            .limit
            .map(|l| format!(" LIMIT {l}"))
            .unwrap_or_default();
        let sql = format!(
            "SELECT * FROM ready_issues WHERE {} ORDER BY priority ASC, created_at ASC{limit_sql}",
            where_clauses.join(" AND ")
        );

        collect_issues(&conn, &sql, &param_values)
    }

    /// Issues with at least one active blocker, via the `blocked_issues`
    /// view.
    pub fn get_blocked_issues_impl(&self, filter: &WorkFilter) -> Result<Vec<BlockedIssue>> {
        let conn = self.lock_conn()?;

        let mut where_clauses: Vec<String> = vec!["1 = 1".to_string()];
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut param_idx = 1;
        push_work_filter_clauses(filter, &mut where_clauses, &mut param_values, &mut param_idx);

        let limit_sql = filter
            .limit
            .map(|l| format!(" LIMIT {l}"))
            .unwrap_or_default();
        let sql = format!(
            "SELECT * FROM blocked_issues WHERE {} ORDER BY priority ASC, created_at ASC{limit_sql}",
            where_clauses.join(" AND ")
        );

        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            let issue = scan_issue(row)?;
            let blocked_by_count: i32 = row.get("blocked_by_count")?;
            Ok(BlockedIssue {
                issue,
                blocked_by_count,
            })
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Aggregate counts.
    pub fn get_statistics_impl(&self) -> Result<Statistics> {
        let conn = self.lock_conn()?;
        let mut stats = Statistics::default();

        let count_status = |status: &str| -> Result<i64> {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM issues WHERE status = ?1",
                rusqlite::params![status],
                |row| row.get(0),
            )?)
        };

        stats.total_issues =
            conn.query_row("SELECT COUNT(*) FROM issues", [], |row| row.get(0))?;
        stats.open_issues = count_status("open")?;
        stats.in_progress_issues = count_status("in_progress")?;
        stats.blocked_issues = count_status("blocked")?;
        stats.closed_issues = count_status("closed")?;
        stats.tombstone_issues = count_status("tombstone")?;

        {
            let mut stmt = conn.prepare(
                "SELECT issue_type, COUNT(*) FROM issues
                 GROUP BY issue_type ORDER BY COUNT(*) DESC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                stats.by_type.push(row?);
            }
        }

        {
            let mut stmt = conn.prepare(
                "SELECT priority, COUNT(*) FROM issues
                 GROUP BY priority ORDER BY priority ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, i32>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                stats.by_priority.push(row?);
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spool_core::dependency::Dependency;
    use spool_core::enums::{DependencyType, Status};
    use spool_core::issue::IssueBuilder;

    fn initialized_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set_config_impl("issue_prefix", "sp").unwrap();
        store
    }

    fn create(store: &SqliteStore, id: &str) {
        let mut issue = IssueBuilder::new(format!("issue {id}")).id(id).build();
        store.create_issue_impl(&mut issue, "alice").unwrap();
    }

    fn link(store: &SqliteStore, from: &str, to: &str, dep_type: DependencyType) {
        let dep = Dependency::new(from, to, dep_type, "alice");
        store.add_dependency_impl(&dep, "alice").unwrap();
    }

    #[test]
    fn blocked_issue_is_not_ready() {
        let store = initialized_store();
        create(&store, "sp-blk");
        create(&store, "sp-tgt");
        create(&store, "sp-free");
        link(&store, "sp-tgt", "sp-blk", DependencyType::Blocks);

        let ready = store.get_ready_issues_impl(&WorkFilter::default()).unwrap();
        let ids: Vec<&str> = ready.iter().map(|i| i.id.as_str()).collect();
        // The blocker itself is ready; its target is not.
        assert!(ids.contains(&"sp-blk"));
        assert!(ids.contains(&"sp-free"));
        assert!(!ids.contains(&"sp-tgt"));
    }

    #[test]
    fn block_propagates_through_parent_child() {
        let store = initialized_store();
        create(&store, "sp-blocker");
        create(&store, "sp-parent");
        create(&store, "sp-parent.1");
        link(&store, "sp-parent", "sp-blocker", DependencyType::Blocks);
        link(&store, "sp-parent.1", "sp-parent", DependencyType::ParentChild);

        let ready = store.get_ready_issues_impl(&WorkFilter::default()).unwrap();
        let ids: Vec<&str> = ready.iter().map(|i| i.id.as_str()).collect();
        assert!(!ids.contains(&"sp-parent"), "directly blocked");
        assert!(!ids.contains(&"sp-parent.1"), "blocked through parent-child");
    }

    #[test]
    fn closed_blocker_releases_target() {
        let store = initialized_store();
        create(&store, "sp-b1");
        create(&store, "sp-t1");
        link(&store, "sp-t1", "sp-b1", DependencyType::Blocks);

        store
            .close_issue_impl("sp-b1", "done", "alice", "s")
            .unwrap();

        let ready = store.get_ready_issues_impl(&WorkFilter::default()).unwrap();
        let ids: Vec<&str> = ready.iter().map(|i| i.id.as_str()).collect();
        assert!(ids.contains(&"sp-t1"));
    }

    #[test]
    fn ephemeral_rows_excluded_from_ready() {
        let store = initialized_store();
        let mut wisp = IssueBuilder::new("wisp").id("sp-w1").ephemeral(true).build();
        store.create_issue_impl(&mut wisp, "alice").unwrap();

        let ready = store.get_ready_issues_impl(&WorkFilter::default()).unwrap();
        assert!(ready.iter().all(|i| i.id != "sp-w1"));
    }

    #[test]
    fn blocked_view_reports_count() {
        let store = initialized_store();
        create(&store, "sp-v1");
        create(&store, "sp-v2");
        create(&store, "sp-v3");
        link(&store, "sp-v3", "sp-v1", DependencyType::Blocks);
        link(&store, "sp-v3", "sp-v2", DependencyType::Blocks);

        let blocked = store
            .get_blocked_issues_impl(&WorkFilter::default())
            .unwrap();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].issue.id, "sp-v3");
        assert_eq!(blocked[0].blocked_by_count, 2);
    }

    #[test]
    fn statistics_counts_statuses() {
        let store = initialized_store();
        create(&store, "sp-st1");
        create(&store, "sp-st2");
        store
            .close_issue_impl("sp-st2", "done", "alice", "s")
            .unwrap();

        let stats = store.get_statistics_impl().unwrap();
        assert_eq!(stats.total_issues, 2);
        assert_eq!(stats.open_issues, 1);
        assert_eq!(stats.closed_issues, 1);
        assert!(!stats.by_type.is_empty());
    }

    #[test]
    fn ready_respects_status_changes() {
        let store = initialized_store();
        create(&store, "sp-ip");
        let updates = crate::traits::IssueUpdates {
            status: Some(Status::InProgress),
            ..Default::default()
        };
        store.update_issue_impl("sp-ip", &updates, "alice").unwrap();

        let ready = store.get_ready_issues_impl(&WorkFilter::default()).unwrap();
        assert!(ready.iter().all(|i| i.id != "sp-ip"), "only open rows are ready");
    }
}
