//! Issue row operations: scan, insert, get, update, close, search.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};

use spool_core::enums::{EventType, IssueType, Status};
use spool_core::filter::IssueFilter;
use spool_core::issue::Issue;

use crate::error::{Result, StorageError};
use crate::sqlite::dirty::mark_dirty_on_conn;
use crate::sqlite::store::SqliteStore;
use crate::traits::IssueUpdates;

// ---------------------------------------------------------------------------
// Column list (shared between INSERT and SELECT)
// ---------------------------------------------------------------------------

/// All issue columns in a deterministic order.
pub(crate) const ISSUE_COLUMNS: &str = r#"
    id, content_hash, title, description, design, acceptance_criteria, notes,
    status, priority, issue_type, assignee, owner, estimated_minutes,
    created_at, created_by, updated_at, closed_at, close_reason, closed_by_session,
    deleted_at, deleted_by, delete_reason, original_type,
    due_at, defer_until,
    external_ref, source_system, source_repo, metadata,
    sender, ephemeral, pinned, is_template, crystallizes,
    mol_type, work_type, quality_score,
    event_kind, actor, target, payload
"#;

/// Same list prefixed with `issues.` for JOIN queries where bare column
/// names would be ambiguous.
pub(crate) const ISSUE_COLUMNS_PREFIXED: &str = r#"
    issues.id, issues.content_hash, issues.title, issues.description, issues.design,
    issues.acceptance_criteria, issues.notes,
    issues.status, issues.priority, issues.issue_type, issues.assignee, issues.owner,
    issues.estimated_minutes,
    issues.created_at, issues.created_by, issues.updated_at, issues.closed_at,
    issues.close_reason, issues.closed_by_session,
    issues.deleted_at, issues.deleted_by, issues.delete_reason, issues.original_type,
    issues.due_at, issues.defer_until,
    issues.external_ref, issues.source_system, issues.source_repo, issues.metadata,
    issues.sender, issues.ephemeral, issues.pinned, issues.is_template, issues.crystallizes,
    issues.mol_type, issues.work_type, issues.quality_score,
    issues.event_kind, issues.actor, issues.target, issues.payload
"#;

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Formats a `DateTime<Utc>` as ISO 8601 TEXT for storage.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Parses stored TEXT back into a `DateTime<Utc>`, tolerating the formats
/// SQLite defaults produce.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    s.parse::<DateTime<Utc>>().unwrap_or_else(|_| {
        chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ")
            .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ"))
            .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
            .map(|ndt| ndt.and_utc())
            .unwrap_or_else(|_| Utc::now())
    })
}

// ---------------------------------------------------------------------------
// Row scanning
// ---------------------------------------------------------------------------

/// Deserializes a row into an [`Issue`]. Columns are read by name, so any
/// query selecting [`ISSUE_COLUMNS`] (or `issues.*` from a view) works.
pub(crate) fn scan_issue(row: &Row<'_>) -> rusqlite::Result<Issue> {
    let status_str: String = row.get("status")?;
    let issue_type_str: String = row.get("issue_type")?;

    let created_at_str: String = row.get("created_at")?;
    let updated_at_str: String = row.get("updated_at")?;
    let closed_at_str: Option<String> = row.get("closed_at")?;
    let deleted_at_str: Option<String> = row.get("deleted_at")?;
    let due_at_str: Option<String> = row.get("due_at")?;
    let defer_until_str: Option<String> = row.get("defer_until")?;

    let metadata_str: String = row.get("metadata")?;
    let metadata = if metadata_str.is_empty() || metadata_str == "{}" {
        None
    } else {
        serde_json::value::RawValue::from_string(metadata_str).ok()
    };

    let ephemeral: i32 = row.get("ephemeral")?;
    let pinned: i32 = row.get("pinned")?;
    let is_template: i32 = row.get("is_template")?;
    let crystallizes: i32 = row.get("crystallizes")?;

    Ok(Issue {
        id: row.get("id")?,
        content_hash: row.get("content_hash")?,
        title: row.get("title")?,
        description: row.get("description")?,
        design: row.get("design")?,
        acceptance_criteria: row.get("acceptance_criteria")?,
        notes: row.get("notes")?,
        status: Status::from(status_str),
        priority: row.get("priority")?,
        issue_type: IssueType::from(issue_type_str),
        assignee: row.get("assignee")?,
        owner: row.get("owner")?,
        estimated_minutes: row.get("estimated_minutes")?,
        created_at: parse_datetime(&created_at_str),
        created_by: row.get("created_by")?,
        updated_at: parse_datetime(&updated_at_str),
        closed_at: closed_at_str.as_deref().map(parse_datetime),
        close_reason: row.get("close_reason")?,
        closed_by_session: row.get("closed_by_session")?,
        deleted_at: deleted_at_str.as_deref().map(parse_datetime),
        deleted_by: row.get("deleted_by")?,
        delete_reason: row.get("delete_reason")?,
        original_type: row.get("original_type")?,
        due_at: due_at_str.as_deref().map(parse_datetime),
        defer_until: defer_until_str.as_deref().map(parse_datetime),
        external_ref: row.get("external_ref")?,
        source_system: row.get("source_system")?,
        source_repo: row.get("source_repo")?,
        metadata,
        sender: row.get("sender")?,
        ephemeral: ephemeral != 0,
        pinned: pinned != 0,
        is_template: is_template != 0,
        crystallizes: crystallizes != 0,
        mol_type: row.get("mol_type")?,
        work_type: row.get("work_type")?,
        quality_score: row.get("quality_score")?,
        event_kind: row.get("event_kind")?,
        actor: row.get("actor")?,
        target: row.get("target")?,
        payload: row.get("payload")?,
        labels: Vec::new(),
        dependencies: Vec::new(),
        comments: Vec::new(),
    })
}

// ---------------------------------------------------------------------------
// Connection-level helpers (shared by SqliteStore and Transaction)
// ---------------------------------------------------------------------------

/// Inserts a single issue row. The issue must already carry its id and
/// content hash; events and dirty marks are the caller's concern.
pub(crate) fn insert_issue_row(conn: &Connection, issue: &Issue) -> Result<()> {
    let metadata_str = issue
        .metadata
        .as_ref()
        .map(|m| m.get().to_string())
        .unwrap_or_else(|| "{}".to_string());

    conn.execute(
        &format!(
            "INSERT INTO issues ({ISSUE_COLUMNS}) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7,
                ?8, ?9, ?10, ?11, ?12, ?13,
                ?14, ?15, ?16, ?17, ?18, ?19,
                ?20, ?21, ?22, ?23,
                ?24, ?25,
                ?26, ?27, ?28, ?29,
                ?30, ?31, ?32, ?33, ?34,
                ?35, ?36, ?37,
                ?38, ?39, ?40, ?41
            )"
        ),
        params![
            issue.id,                                       // 1
            issue.content_hash,                             // 2
            issue.title,                                    // 3
            issue.description,                              // 4
            issue.design,                                   // 5
            issue.acceptance_criteria,                      // 6
            issue.notes,                                    // 7
            issue.status.as_str(),                          // 8
            issue.priority,                                 // 9
            issue.issue_type.as_str(),                      // 10
            issue.assignee,                                 // 11
            issue.owner,                                    // 12
            issue.estimated_minutes,                        // 13
            format_datetime(&issue.created_at),             // 14
            issue.created_by,                               // 15
            format_datetime(&issue.updated_at),             // 16
            issue.closed_at.as_ref().map(format_datetime),  // 17
            issue.close_reason,                             // 18
            issue.closed_by_session,                        // 19
            issue.deleted_at.as_ref().map(format_datetime), // 20
            issue.deleted_by,                               // 21
            issue.delete_reason,                            // 22
            issue.original_type,                            // 23
            issue.due_at.as_ref().map(format_datetime),     // 24
            issue.defer_until.as_ref().map(format_datetime), // 25
            issue.external_ref,                             // 26
            issue.source_system,                            // 27
            issue.source_repo,                              // 28
            metadata_str,                                   // 29
            issue.sender,                                   // 30
            issue.ephemeral as i32,                         // 31
            issue.pinned as i32,                            // 32
            issue.is_template as i32,                       // 33
            issue.crystallizes as i32,                      // 34
            issue.mol_type,                                 // 35
            issue.work_type,                                // 36
            issue.quality_score,                            // 37
            issue.event_kind,                               // 38
            issue.actor,                                    // 39
            issue.target,                                   // 40
            issue.payload,                                  // 41
        ],
    )?;
    Ok(())
}

/// Appends an event row.
#[allow(clippy::too_many_arguments)]
pub(crate) fn emit_event(
    conn: &Connection,
    issue_id: &str,
    event_type: EventType,
    actor: &str,
    old_value: Option<&str>,
    new_value: Option<&str>,
    comment: Option<&str>,
    created_at: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO events (issue_id, event_type, actor, old_value, new_value, comment, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            issue_id,
            event_type.as_str(),
            actor,
            old_value,
            new_value,
            comment,
            created_at,
        ],
    )?;
    Ok(())
}

/// Retrieves a single issue by ID.
pub(crate) fn get_issue_on_conn(conn: &Connection, id: &str) -> Result<Issue> {
    let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?1");
    conn.query_row(&sql, params![id], scan_issue)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StorageError::not_found("issue", id),
            other => StorageError::Query(other),
        })
}

/// Returns `true` if an issue row with this ID exists.
pub(crate) fn issue_exists(conn: &Connection, id: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM issues WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Applies a typed partial update, bumps `updated_at`, emits an `updated`
/// event, and marks the issue dirty.
pub(crate) fn update_issue_on_conn(
    conn: &Connection,
    id: &str,
    updates: &IssueUpdates,
    actor: &str,
) -> Result<()> {
    let now = Utc::now();
    let now_str = format_datetime(&now);

    let mut set_clauses: Vec<String> = Vec::new();
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    macro_rules! set_field {
        ($field:ident, $col:expr) => {
            if let Some(ref val) = updates.$field {
                set_clauses.push(format!("{} = ?", $col));
                param_values.push(Box::new(val.clone()));
            }
        };
    }

    macro_rules! set_bool_field {
        ($field:ident, $col:expr) => {
            if let Some(val) = updates.$field {
                set_clauses.push(format!("{} = ?", $col));
                param_values.push(Box::new(val as i32));
            }
        };
    }

    set_field!(title, "title");
    set_field!(description, "description");
    set_field!(design, "design");
    set_field!(acceptance_criteria, "acceptance_criteria");
    set_field!(notes, "notes");
    set_field!(assignee, "assignee");
    set_field!(owner, "owner");
    set_field!(close_reason, "close_reason");
    set_field!(closed_by_session, "closed_by_session");
    set_field!(sender, "sender");
    set_field!(mol_type, "mol_type");
    set_field!(work_type, "work_type");
    set_field!(event_kind, "event_kind");
    set_field!(actor, "actor");
    set_field!(target, "target");
    set_field!(payload, "payload");

    if let Some(ref status) = updates.status {
        set_clauses.push("status = ?".to_string());
        param_values.push(Box::new(status.as_str().to_string()));

        // Keep the closed_at CHECK satisfied on status transitions.
        if *status == Status::Closed {
            set_clauses.push("closed_at = COALESCE(closed_at, ?)".to_string());
            param_values.push(Box::new(now_str.clone()));
        } else if *status != Status::Tombstone {
            set_clauses.push("closed_at = NULL".to_string());
        }
    }
    if let Some(ref issue_type) = updates.issue_type {
        set_clauses.push("issue_type = ?".to_string());
        param_values.push(Box::new(issue_type.as_str().to_string()));
    }
    if let Some(priority) = updates.priority {
        set_clauses.push("priority = ?".to_string());
        param_values.push(Box::new(priority));
    }

    // Nullable columns: outer Some means "write", inner value is the target.
    if let Some(ref est) = updates.estimated_minutes {
        set_clauses.push("estimated_minutes = ?".to_string());
        param_values.push(Box::new(*est));
    }
    if let Some(ref ext) = updates.external_ref {
        set_clauses.push("external_ref = ?".to_string());
        param_values.push(Box::new(ext.clone()));
    }
    if let Some(ref meta) = updates.metadata {
        set_clauses.push("metadata = ?".to_string());
        param_values.push(Box::new(
            meta.clone().unwrap_or_else(|| "{}".to_string()),
        ));
    }
    if let Some(ref qs) = updates.quality_score {
        set_clauses.push("quality_score = ?".to_string());
        param_values.push(Box::new(*qs));
    }
    if let Some(ref due) = updates.due_at {
        set_clauses.push("due_at = ?".to_string());
        param_values.push(Box::new(due.as_ref().map(format_datetime)));
    }
    if let Some(ref defer) = updates.defer_until {
        set_clauses.push("defer_until = ?".to_string());
        param_values.push(Box::new(defer.as_ref().map(format_datetime)));
    }

    set_bool_field!(ephemeral, "ephemeral");
    set_bool_field!(pinned, "pinned");
    set_bool_field!(is_template, "is_template");
    set_bool_field!(crystallizes, "crystallizes");

    if set_clauses.is_empty() {
        return Ok(());
    }

    set_clauses.push("updated_at = ?".to_string());
    param_values.push(Box::new(now_str.clone()));

    let sql = format!("UPDATE issues SET {} WHERE id = ?", set_clauses.join(", "));
    param_values.push(Box::new(id.to_string()));

    let param_refs: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();

    let affected = conn.execute(&sql, param_refs.as_slice())?;
    if affected == 0 {
        return Err(StorageError::not_found("issue", id));
    }

    emit_event(conn, id, EventType::Updated, actor, None, None, None, &now_str)?;
    mark_dirty_on_conn(conn, id, &now_str)?;
    Ok(())
}

/// Closes an issue: status=closed, closed_at=now, reason and session
/// recorded, `closed` event, dirty mark.
pub(crate) fn close_issue_on_conn(
    conn: &Connection,
    id: &str,
    reason: &str,
    actor: &str,
    session: &str,
) -> Result<()> {
    let now = Utc::now();
    let now_str = format_datetime(&now);

    let affected = conn.execute(
        "UPDATE issues SET status = 'closed', closed_at = ?1, close_reason = ?2,
         closed_by_session = ?3, updated_at = ?1 WHERE id = ?4",
        params![now_str, reason, session, id],
    )?;
    if affected == 0 {
        return Err(StorageError::not_found("issue", id));
    }

    emit_event(
        conn,
        id,
        EventType::Closed,
        actor,
        None,
        Some(reason),
        None,
        &now_str,
    )?;
    mark_dirty_on_conn(conn, id, &now_str)?;
    Ok(())
}

/// Text search plus structured filtering.
pub(crate) fn search_issues_on_conn(
    conn: &Connection,
    query: &str,
    filter: &IssueFilter,
) -> Result<Vec<Issue>> {
    let mut where_clauses: Vec<String> = Vec::new();
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
    let mut param_idx = 1;

    if !query.is_empty() {
        where_clauses.push(format!(
            "(title LIKE ?{pi} OR description LIKE ?{pi} OR notes LIKE ?{pi})",
            pi = param_idx
        ));
        param_values.push(Box::new(format!("%{query}%")));
        param_idx += 1;
    }

    if let Some(ref status) = filter.status {
        where_clauses.push(format!("status = ?{param_idx}"));
        param_values.push(Box::new(status.as_str().to_string()));
        param_idx += 1;
    }
    if let Some(priority) = filter.priority {
        where_clauses.push(format!("priority = ?{param_idx}"));
        param_values.push(Box::new(priority));
        param_idx += 1;
    }
    if let Some(ref issue_type) = filter.issue_type {
        where_clauses.push(format!("issue_type = ?{param_idx}"));
        param_values.push(Box::new(issue_type.as_str().to_string()));
        param_idx += 1;
    }
    if let Some(ref assignee) = filter.assignee {
        where_clauses.push(format!("assignee = ?{param_idx}"));
        param_values.push(Box::new(assignee.clone()));
        param_idx += 1;
    }
    if let Some(ref title_contains) = filter.title_contains {
        where_clauses.push(format!("title LIKE ?{param_idx}"));
        param_values.push(Box::new(format!("%{title_contains}%")));
        param_idx += 1;
    }
    if let Some(ref desc_contains) = filter.description_contains {
        where_clauses.push(format!("description LIKE ?{param_idx}"));
        param_values.push(Box::new(format!("%{desc_contains}%")));
        param_idx += 1;
    }
    if let Some(ref created_after) = filter.created_after {
        where_clauses.push(format!("created_at >= ?{param_idx}"));
        param_values.push(Box::new(format_datetime(created_after)));
        param_idx += 1;
    }
    if let Some(ref created_before) = filter.created_before {
        where_clauses.push(format!("created_at <= ?{param_idx}"));
        param_values.push(Box::new(format_datetime(created_before)));
        param_idx += 1;
    }
    if let Some(ref updated_after) = filter.updated_after {
        where_clauses.push(format!("updated_at >= ?{param_idx}"));
        param_values.push(Box::new(format_datetime(updated_after)));
        param_idx += 1;
    }
    if let Some(ref updated_before) = filter.updated_before {
        where_clauses.push(format!("updated_at <= ?{param_idx}"));
        param_values.push(Box::new(format_datetime(updated_before)));
        param_idx += 1;
    }
    if filter.no_assignee {
        where_clauses.push("assignee = ''".to_string());
    }
    if let Some(ref id_prefix) = filter.id_prefix {
        where_clauses.push(format!("id LIKE ?{param_idx}"));
        param_values.push(Box::new(format!("{id_prefix}%")));
        param_idx += 1;
    }
    if let Some(ephemeral) = filter.ephemeral {
        where_clauses.push(format!("ephemeral = ?{param_idx}"));
        param_values.push(Box::new(ephemeral as i32));
        param_idx += 1;
    }
    if let Some(pinned) = filter.pinned {
        where_clauses.push(format!("pinned = ?{param_idx}"));
        param_values.push(Box::new(pinned as i32));
        param_idx += 1;
    }
    if let Some(is_template) = filter.is_template {
        where_clauses.push(format!("is_template = ?{param_idx}"));
        param_values.push(Box::new(is_template as i32));
        param_idx += 1;
    }
    if let Some(ref source_repo) = filter.source_repo {
        where_clauses.push(format!("source_repo = ?{param_idx}"));
        param_values.push(Box::new(source_repo.clone()));
        param_idx += 1;
    }

    for status in &filter.exclude_status {
        where_clauses.push(format!("status != ?{param_idx}"));
        param_values.push(Box::new(status.as_str().to_string()));
        param_idx += 1;
    }
    for itype in &filter.exclude_types {
        where_clauses.push(format!("issue_type != ?{param_idx}"));
        param_values.push(Box::new(itype.as_str().to_string()));
        param_idx += 1;
    }

    if !filter.ids.is_empty() {
        let placeholders: Vec<String> = filter
            .ids
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", param_idx + i))
            .collect();
        where_clauses.push(format!("id IN ({})", placeholders.join(",")));
        for id in &filter.ids {
            param_values.push(Box::new(id.clone()));
        }
        param_idx += filter.ids.len();
    }

    for label in &filter.labels {
        where_clauses.push(format!(
            "EXISTS (SELECT 1 FROM labels WHERE labels.issue_id = issues.id AND labels.label = ?{param_idx})"
        ));
        param_values.push(Box::new(label.clone()));
        param_idx += 1;
    }

    if !filter.labels_any.is_empty() {
        let placeholders: Vec<String> = filter
            .labels_any
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", param_idx + i))
            .collect();
        where_clauses.push(format!(
            "EXISTS (SELECT 1 FROM labels WHERE labels.issue_id = issues.id AND labels.label IN ({}))",
            placeholders.join(",")
        ));
        for label in &filter.labels_any {
            param_values.push(Box::new(label.clone()));
        }
        param_idx += filter.labels_any.len();
    }

    if filter.no_labels {
        where_clauses
            .push("NOT EXISTS (SELECT 1 FROM labels WHERE labels.issue_id = issues.id)".to_string());
    }

    let where_sql = if where_clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", where_clauses.join(" AND "))
    };
    let limit_sql = filter
        .limit
        .map(|l| format!(" LIMIT {l}"))
        .unwrap_or_default();

    let sql = format!(
        "SELECT {ISSUE_COLUMNS} FROM issues {where_sql} ORDER BY created_at DESC{limit_sql}"
    );

    let param_refs: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), scan_issue)?;

    let mut issues = Vec::new();
    for row in rows {
        issues.push(row?);
    }

    let _ = param_idx;
    Ok(issues)
}

// ---------------------------------------------------------------------------
// SqliteStore methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    /// Retrieves an issue by ID.
    pub fn get_issue_impl(&self, id: &str) -> Result<Issue> {
        let conn = self.lock_conn()?;
        get_issue_on_conn(&conn, id)
    }

    /// Retrieves multiple issues by ID.
    pub fn get_issues_by_ids_impl(&self, ids: &[String]) -> Result<Vec<Issue>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock_conn()?;
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id IN ({placeholders})");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), scan_issue)?;
        let mut issues = Vec::new();
        for row in rows {
            issues.push(row?);
        }
        Ok(issues)
    }

    /// Applies partial updates to an issue.
    pub fn update_issue_impl(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        let tx = crate::sqlite::store::begin_immediate(&conn, &crate::cancel::CancelToken::new())?;
        update_issue_on_conn(&conn, id, updates, actor)?;
        tx.commit()
    }

    /// Closes an issue.
    pub fn close_issue_impl(&self, id: &str, reason: &str, actor: &str, session: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        let tx = crate::sqlite::store::begin_immediate(&conn, &crate::cancel::CancelToken::new())?;
        close_issue_on_conn(&conn, id, reason, actor, session)?;
        tx.commit()
    }

    /// Searches issues.
    pub fn search_issues_impl(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>> {
        let conn = self.lock_conn()?;
        search_issues_on_conn(&conn, query, filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::store::SqliteStore;
    use spool_core::content_hash::compute_content_hash;
    use spool_core::issue::IssueBuilder;

    fn store_with_issue(id: &str, title: &str) -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock_conn().unwrap();
        let mut issue = IssueBuilder::new(title).id(id).build();
        issue.content_hash = compute_content_hash(&issue);
        insert_issue_row(&conn, &issue).unwrap();
        drop(conn);
        store
    }

    #[test]
    fn insert_and_get() {
        let store = store_with_issue("sp-get1", "Find me");
        let got = store.get_issue_impl("sp-get1").unwrap();
        assert_eq!(got.title, "Find me");
        assert!(!got.content_hash.is_empty());
    }

    #[test]
    fn get_missing_is_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store.get_issue_impl("sp-nope").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn partial_update() {
        let store = store_with_issue("sp-upd1", "Original");
        let updates = IssueUpdates {
            title: Some("Updated".into()),
            priority: Some(3),
            ..Default::default()
        };
        store.update_issue_impl("sp-upd1", &updates, "bob").unwrap();

        let got = store.get_issue_impl("sp-upd1").unwrap();
        assert_eq!(got.title, "Updated");
        assert_eq!(got.priority, 3);
    }

    #[test]
    fn update_marks_dirty_and_records_event() {
        let store = store_with_issue("sp-upd2", "Watch me");
        let updates = IssueUpdates {
            notes: Some("touched".into()),
            ..Default::default()
        };
        store.update_issue_impl("sp-upd2", &updates, "bob").unwrap();

        let conn = store.lock_conn().unwrap();
        let dirty: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM dirty_issues WHERE issue_id = 'sp-upd2'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(dirty, 1);

        let events: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM events WHERE issue_id = 'sp-upd2' AND event_type = 'updated'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(events, 1);
    }

    #[test]
    fn status_update_to_closed_fills_closed_at() {
        let store = store_with_issue("sp-upd3", "Close via update");
        let updates = IssueUpdates {
            status: Some(spool_core::enums::Status::Closed),
            ..Default::default()
        };
        store.update_issue_impl("sp-upd3", &updates, "bob").unwrap();

        let got = store.get_issue_impl("sp-upd3").unwrap();
        assert_eq!(got.status, spool_core::enums::Status::Closed);
        assert!(got.closed_at.is_some());
    }

    #[test]
    fn close_issue_sets_fields() {
        let store = store_with_issue("sp-close1", "To close");
        store
            .close_issue_impl("sp-close1", "done", "alice", "session-9")
            .unwrap();

        let got = store.get_issue_impl("sp-close1").unwrap();
        assert_eq!(got.status, spool_core::enums::Status::Closed);
        assert!(got.closed_at.is_some());
        assert_eq!(got.close_reason, "done");
        assert_eq!(got.closed_by_session, "session-9");
    }

    #[test]
    fn search_by_text() {
        let store = store_with_issue("sp-s1", "Fix login flow");
        {
            let conn = store.lock_conn().unwrap();
            let mut other = IssueBuilder::new("Add dashboard").id("sp-s2").build();
            other.content_hash = compute_content_hash(&other);
            insert_issue_row(&conn, &other).unwrap();
        }

        let results = store
            .search_issues_impl("login", &IssueFilter::default())
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "sp-s1");
    }

    #[test]
    fn search_excludes_status() {
        let store = store_with_issue("sp-s3", "Visible");
        {
            let conn = store.lock_conn().unwrap();
            let mut gone = IssueBuilder::new("Hidden").id("sp-s4").build();
            gone.status = spool_core::enums::Status::Tombstone;
            gone.deleted_at = Some(Utc::now());
            gone.original_type = "task".into();
            gone.content_hash = compute_content_hash(&gone);
            insert_issue_row(&conn, &gone).unwrap();
        }

        let filter = IssueFilter {
            exclude_status: vec![spool_core::enums::Status::Tombstone],
            ..Default::default()
        };
        let results = store.search_issues_impl("", &filter).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "sp-s3");
    }

    #[test]
    fn datetime_roundtrip() {
        let now = Utc::now();
        let s = format_datetime(&now);
        let back = parse_datetime(&s);
        assert_eq!(back.timestamp_millis(), now.timestamp_millis());
    }
}
