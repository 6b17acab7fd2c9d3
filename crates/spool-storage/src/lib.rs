//! SQLite storage engine for the spool issue datastore.
//!
//! Provides the [`Storage`] trait and its SQLite implementation
//! ([`SqliteStore`]), plus the transaction-scoped [`Transaction`] surface.

pub mod cancel;
pub mod error;
pub mod sqlite;
pub mod traits;

// Re-exports for convenience.
pub use cancel::CancelToken;
pub use error::StorageError;
pub use sqlite::SqliteStore;
pub use traits::{
    BatchOutcome, BlockedIssue, CreateOptions, DeleteOptions, DeleteResult, IssueUpdates,
    RepoMtime, Statistics, Storage, Transaction,
};

// ---------------------------------------------------------------------------
// Storage trait implementation for SqliteStore
// ---------------------------------------------------------------------------

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use spool_core::comment::{Comment, Event};
use spool_core::dependency::Dependency;
use spool_core::enums::OrphanPolicy;
use spool_core::filter::{IssueFilter, WorkFilter};
use spool_core::issue::Issue;

use crate::error::Result;
use crate::traits::ResurrectHook;

impl Storage for SqliteStore {
    fn create_issue(&self, issue: &mut Issue, actor: &str) -> Result<()> {
        self.create_issue_impl(issue, actor)
    }

    fn create_issues(&self, issues: &mut [Issue], actor: &str) -> Result<BatchOutcome> {
        self.create_issues_with_options(issues, actor, OrphanPolicy::Resurrect)
    }

    fn create_issues_with_options(
        &self,
        issues: &mut [Issue],
        actor: &str,
        orphan_policy: OrphanPolicy,
    ) -> Result<BatchOutcome> {
        self.create_issues_with_full_options_impl(
            issues,
            actor,
            &CreateOptions::with_policy(orphan_policy),
            &CancelToken::new(),
        )
    }

    fn create_issues_with_full_options(
        &self,
        issues: &mut [Issue],
        actor: &str,
        options: &CreateOptions,
        cancel: &CancelToken,
    ) -> Result<BatchOutcome> {
        self.create_issues_with_full_options_impl(issues, actor, options, cancel)
    }

    fn get_issue(&self, id: &str) -> Result<Issue> {
        self.get_issue_impl(id)
    }

    fn get_issues_by_ids(&self, ids: &[String]) -> Result<Vec<Issue>> {
        self.get_issues_by_ids_impl(ids)
    }

    fn search_issues(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>> {
        self.search_issues_impl(query, filter)
    }

    fn update_issue(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()> {
        self.update_issue_impl(id, updates, actor)
    }

    fn close_issue(&self, id: &str, reason: &str, actor: &str, session: &str) -> Result<()> {
        self.close_issue_impl(id, reason, actor, session)
    }

    fn delete_issue(&self, id: &str) -> Result<()> {
        self.delete_issue_impl(id)
    }

    fn delete_issues(
        &self,
        ids: &[String],
        options: &DeleteOptions,
        actor: &str,
        cancel: &CancelToken,
    ) -> Result<DeleteResult> {
        self.delete_issues_impl(ids, options, actor, cancel)
    }

    fn create_tombstone(&self, id: &str, actor: &str, reason: &str) -> Result<()> {
        self.create_tombstone_impl(id, actor, reason)
    }

    fn next_child_id(&self, parent: &str, resurrect: Option<ResurrectHook<'_>>) -> Result<String> {
        self.next_child_id_impl(parent, resurrect)
    }

    fn ensure_child_counter_at_least(&self, parent: &str, n: u32) -> Result<()> {
        self.ensure_child_counter_at_least_impl(parent, n)
    }

    fn add_dependency(&self, dep: &Dependency, actor: &str) -> Result<()> {
        self.add_dependency_impl(dep, actor)
    }

    fn remove_dependency(&self, issue_id: &str, depends_on_id: &str, actor: &str) -> Result<()> {
        self.remove_dependency_impl(issue_id, depends_on_id, actor)
    }

    fn get_dependencies(&self, issue_id: &str) -> Result<Vec<Issue>> {
        self.get_dependencies_impl(issue_id)
    }

    fn get_dependents(&self, issue_id: &str) -> Result<Vec<Issue>> {
        self.get_dependents_impl(issue_id)
    }

    fn add_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        self.add_label_impl(issue_id, label, actor)
    }

    fn remove_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        self.remove_label_impl(issue_id, label, actor)
    }

    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>> {
        self.get_labels_impl(issue_id)
    }

    fn get_labels_for_issues(&self, ids: &[String]) -> Result<HashMap<String, Vec<String>>> {
        self.get_labels_for_issues_impl(ids)
    }

    fn add_issue_comment(&self, issue_id: &str, author: &str, text: &str) -> Result<Comment> {
        self.add_issue_comment_impl(issue_id, author, text)
    }

    fn import_issue_comment(
        &self,
        issue_id: &str,
        author: &str,
        text: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Comment> {
        self.import_issue_comment_impl(issue_id, author, text, created_at)
    }

    fn get_issue_comments(&self, issue_id: &str) -> Result<Vec<Comment>> {
        self.get_issue_comments_impl(issue_id)
    }

    fn get_comments_for_issues(&self, ids: &[String]) -> Result<HashMap<String, Vec<Comment>>> {
        self.get_comments_for_issues_impl(ids)
    }

    fn get_events(&self, issue_id: &str, limit: i32) -> Result<Vec<Event>> {
        self.get_events_impl(issue_id, limit)
    }

    fn get_all_events_since(&self, since_id: i64) -> Result<Vec<Event>> {
        self.get_all_events_since_impl(since_id)
    }

    fn get_ready_issues(&self, filter: &WorkFilter) -> Result<Vec<Issue>> {
        self.get_ready_issues_impl(filter)
    }

    fn get_blocked_issues(&self, filter: &WorkFilter) -> Result<Vec<BlockedIssue>> {
        self.get_blocked_issues_impl(filter)
    }

    fn get_statistics(&self) -> Result<Statistics> {
        self.get_statistics_impl()
    }

    fn get_dirty_issues(&self) -> Result<Vec<String>> {
        self.get_dirty_issues_impl()
    }

    fn clear_dirty_issues_by_id(&self, ids: &[String]) -> Result<()> {
        self.clear_dirty_issues_by_id_impl(ids)
    }

    fn set_export_hash(&self, issue_id: &str, content_hash: &str) -> Result<()> {
        self.set_export_hash_impl(issue_id, content_hash)
    }

    fn get_export_hashes(&self) -> Result<HashMap<String, String>> {
        self.get_export_hashes_impl()
    }

    fn touch_repo_mtime(&self, repo_path: &str, jsonl_path: &str, mtime_ns: i64) -> Result<()> {
        self.touch_repo_mtime_impl(repo_path, jsonl_path, mtime_ns)
    }

    fn get_repo_mtime(&self, repo_path: &str) -> Result<Option<RepoMtime>> {
        self.get_repo_mtime_impl(repo_path)
    }

    fn set_config(&self, key: &str, value: &str) -> Result<()> {
        self.set_config_impl(key, value)
    }

    fn get_config(&self, key: &str) -> Result<String> {
        self.get_config_impl(key)
    }

    fn get_all_config(&self) -> Result<HashMap<String, String>> {
        self.get_all_config_impl()
    }

    fn run_in_transaction(&self, f: &dyn Fn(&dyn Transaction) -> Result<()>) -> Result<()> {
        self.run_in_transaction_impl(f)
    }

    fn close(&self) -> Result<()> {
        // The connection closes when the store is dropped; the mutex
        // guarantees no operation is mid-flight.
        Ok(())
    }
}
