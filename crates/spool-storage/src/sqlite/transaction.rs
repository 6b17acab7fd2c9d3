//! The transaction-scoped variant of the operation surface.

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use spool_core::comment::Comment;
use spool_core::dependency::Dependency;
use spool_core::enums::EventType;
use spool_core::filter::IssueFilter;
use spool_core::issue::Issue;

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::sqlite::store::{SqliteStore, begin_immediate};
use crate::sqlite::{comments, config, dependencies, dirty, issues, labels};
use crate::traits::{IssueUpdates, Transaction};

/// A [`Transaction`] implementation over a connection that already has an
/// active `BEGIN IMMEDIATE`. Delegates to the same connection-level helpers
/// the store uses directly, so both variants share one behavior.
pub(crate) struct SpoolTx<'a> {
    pub(crate) conn: &'a Connection,
}

impl Transaction for SpoolTx<'_> {
    fn create_issue(&self, issue: &Issue, actor: &str) -> Result<()> {
        let now_str = issues::format_datetime(&Utc::now());
        issues::insert_issue_row(self.conn, issue)?;
        issues::emit_event(
            self.conn,
            &issue.id,
            EventType::Created,
            actor,
            None,
            None,
            None,
            &now_str,
        )?;
        dirty::mark_dirty_on_conn(self.conn, &issue.id, &now_str)
    }

    fn get_issue(&self, id: &str) -> Result<Issue> {
        issues::get_issue_on_conn(self.conn, id)
    }

    fn update_issue(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()> {
        issues::update_issue_on_conn(self.conn, id, updates, actor)
    }

    fn close_issue(&self, id: &str, reason: &str, actor: &str, session: &str) -> Result<()> {
        issues::close_issue_on_conn(self.conn, id, reason, actor, session)
    }

    fn delete_issue(&self, id: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM dependencies WHERE depends_on_id = ?1",
            rusqlite::params![id],
        )?;
        let affected = self
            .conn
            .execute("DELETE FROM issues WHERE id = ?1", rusqlite::params![id])?;
        if affected == 0 {
            return Err(crate::error::StorageError::not_found("issue", id));
        }
        Ok(())
    }

    fn search_issues(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>> {
        issues::search_issues_on_conn(self.conn, query, filter)
    }

    fn add_dependency(&self, dep: &Dependency, actor: &str) -> Result<()> {
        dependencies::add_dependency_on_conn(self.conn, dep, actor)
    }

    fn remove_dependency(&self, issue_id: &str, depends_on_id: &str, actor: &str) -> Result<()> {
        dependencies::remove_dependency_on_conn(self.conn, issue_id, depends_on_id, actor)
    }

    fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>> {
        dependencies::get_dependency_records_on_conn(self.conn, issue_id)
    }

    fn add_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        labels::add_label_on_conn(self.conn, issue_id, label, actor)
    }

    fn remove_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        labels::remove_label_on_conn(self.conn, issue_id, label, actor)
    }

    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>> {
        labels::get_labels_on_conn(self.conn, issue_id)
    }

    fn add_comment(&self, issue_id: &str, author: &str, text: &str) -> Result<Comment> {
        comments::add_comment_on_conn(self.conn, issue_id, author, text)
    }

    fn import_comment(
        &self,
        issue_id: &str,
        author: &str,
        text: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Comment> {
        comments::import_comment_on_conn(self.conn, issue_id, author, text, created_at)
    }

    fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>> {
        comments::get_comments_on_conn(self.conn, issue_id)
    }

    fn set_config(&self, key: &str, value: &str) -> Result<()> {
        config::set_config_on_conn(self.conn, key, value)
    }

    fn get_config(&self, key: &str) -> Result<String> {
        config::get_config_on_conn(self.conn, key)
    }

    fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        config::set_metadata_on_conn(self.conn, key, value)
    }

    fn get_metadata(&self, key: &str) -> Result<String> {
        config::get_metadata_on_conn(self.conn, key)
    }
}

impl SqliteStore {
    /// Runs a closure inside one immediate transaction, committing on `Ok`
    /// and rolling back on `Err`.
    pub fn run_in_transaction_impl(
        &self,
        f: &dyn Fn(&dyn Transaction) -> Result<()>,
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        let tx = begin_immediate(&conn, &CancelToken::new())?;

        let spool_tx = SpoolTx { conn: &conn };
        f(&spool_tx)?;
        tx.commit()
    }
}
