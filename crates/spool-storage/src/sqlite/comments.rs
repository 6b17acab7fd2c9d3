//! Comment and audit-event operations.
//!
//! The events table is append-only; nothing in the engine updates or
//! deletes an event row (cascade on hard delete excepted). Comments are the
//! human-visible relation with stable numeric ids; adding one also appends
//! a `commented` event, bumps the issue's `updated_at`, and marks it dirty.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};

use spool_core::comment::{Comment, Event};
use spool_core::enums::EventType;

use crate::error::Result;
use crate::sqlite::dirty::mark_dirty_on_conn;
use crate::sqlite::issues::{emit_event, format_datetime, parse_datetime};
use crate::sqlite::store::SqliteStore;

// ---------------------------------------------------------------------------
// Connection-level helpers (shared with Transaction)
// ---------------------------------------------------------------------------

/// Adds a comment at the current time, with the full side-effect set.
pub(crate) fn add_comment_on_conn(
    conn: &Connection,
    issue_id: &str,
    author: &str,
    text: &str,
) -> Result<Comment> {
    let now = Utc::now();
    let now_str = format_datetime(&now);

    conn.execute(
        "INSERT INTO comments (issue_id, author, text, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![issue_id, author, text, now_str],
    )?;
    let id = conn.last_insert_rowid();

    conn.execute(
        "UPDATE issues SET updated_at = ?1 WHERE id = ?2",
        params![now_str, issue_id],
    )?;

    emit_event(
        conn,
        issue_id,
        EventType::Commented,
        author,
        None,
        None,
        Some(text),
        &now_str,
    )?;
    mark_dirty_on_conn(conn, issue_id, &now_str)?;

    Ok(Comment {
        id,
        issue_id: issue_id.to_string(),
        author: author.to_string(),
        text: text.to_string(),
        created_at: now,
    })
}

/// Inserts a comment with a caller-supplied timestamp. Import path: no
/// `commented` event, no `updated_at` bump, but the issue is still dirty.
pub(crate) fn import_comment_on_conn(
    conn: &Connection,
    issue_id: &str,
    author: &str,
    text: &str,
    created_at: DateTime<Utc>,
) -> Result<Comment> {
    let created_at_str = format_datetime(&created_at);

    conn.execute(
        "INSERT INTO comments (issue_id, author, text, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![issue_id, author, text, created_at_str],
    )?;
    let id = conn.last_insert_rowid();

    let now_str = format_datetime(&Utc::now());
    mark_dirty_on_conn(conn, issue_id, &now_str)?;

    Ok(Comment {
        id,
        issue_id: issue_id.to_string(),
        author: author.to_string(),
        text: text.to_string(),
        created_at,
    })
}

/// All comments for an issue, oldest first.
pub(crate) fn get_comments_on_conn(conn: &Connection, issue_id: &str) -> Result<Vec<Comment>> {
    let mut stmt = conn.prepare(
        "SELECT id, issue_id, author, text, created_at
         FROM comments WHERE issue_id = ?1 ORDER BY created_at ASC, id ASC",
    )?;
    let rows = stmt.query_map(params![issue_id], scan_comment)?;
    let mut comments = Vec::new();
    for row in rows {
        comments.push(row?);
    }
    Ok(comments)
}

fn scan_comment(row: &Row<'_>) -> rusqlite::Result<Comment> {
    let created_at_str: String = row.get(4)?;
    Ok(Comment {
        id: row.get(0)?,
        issue_id: row.get(1)?,
        author: row.get(2)?,
        text: row.get(3)?,
        created_at: parse_datetime(&created_at_str),
    })
}

fn scan_event(row: &Row<'_>) -> rusqlite::Result<Event> {
    let event_type_str: String = row.get(2)?;
    let created_at_str: String = row.get(7)?;
    Ok(Event {
        id: row.get(0)?,
        issue_id: row.get(1)?,
        event_type: EventType::from(event_type_str.as_str()),
        actor: row.get(3)?,
        old_value: row.get(4)?,
        new_value: row.get(5)?,
        comment: row.get(6)?,
        created_at: parse_datetime(&created_at_str),
    })
}

// ---------------------------------------------------------------------------
// SqliteStore methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    /// Adds a comment and returns it.
    pub fn add_issue_comment_impl(
        &self,
        issue_id: &str,
        author: &str,
        text: &str,
    ) -> Result<Comment> {
        let conn = self.lock_conn()?;
        let tx = crate::sqlite::store::begin_immediate(&conn, &crate::cancel::CancelToken::new())?;
        let comment = add_comment_on_conn(&conn, issue_id, author, text)?;
        tx.commit()?;
        Ok(comment)
    }

    /// Inserts a comment with its original timestamp (import cycles).
    pub fn import_issue_comment_impl(
        &self,
        issue_id: &str,
        author: &str,
        text: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Comment> {
        let conn = self.lock_conn()?;
        let tx = crate::sqlite::store::begin_immediate(&conn, &crate::cancel::CancelToken::new())?;
        let comment = import_comment_on_conn(&conn, issue_id, author, text, created_at)?;
        tx.commit()?;
        Ok(comment)
    }

    /// All comments for an issue.
    pub fn get_issue_comments_impl(&self, issue_id: &str) -> Result<Vec<Comment>> {
        let conn = self.lock_conn()?;
        get_comments_on_conn(&conn, issue_id)
    }

    /// Batch comment fetch, keyed by issue ID.
    pub fn get_comments_for_issues_impl(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<Comment>>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let conn = self.lock_conn()?;
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT id, issue_id, author, text, created_at
             FROM comments WHERE issue_id IN ({placeholders})
             ORDER BY created_at ASC, id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), scan_comment)?;

        let mut map: HashMap<String, Vec<Comment>> = HashMap::new();
        for row in rows {
            let comment = row?;
            map.entry(comment.issue_id.clone()).or_default().push(comment);
        }
        Ok(map)
    }

    /// Recent events for an issue, most recent first. `limit <= 0` returns
    /// everything.
    pub fn get_events_impl(&self, issue_id: &str, limit: i32) -> Result<Vec<Event>> {
        let conn = self.lock_conn()?;
        let effective_limit = if limit <= 0 { -1 } else { limit };
        let mut stmt = conn.prepare(
            "SELECT id, issue_id, event_type, actor, old_value, new_value, comment, created_at
             FROM events WHERE issue_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![issue_id, effective_limit], scan_event)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// The global event stream above `since_id`, ascending by id (the
    /// cross-batch ordering tiebreak).
    pub fn get_all_events_since_impl(&self, since_id: i64) -> Result<Vec<Event>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, issue_id, event_type, actor, old_value, new_value, comment, created_at
             FROM events WHERE id > ?1
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![since_id], scan_event)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }
}
