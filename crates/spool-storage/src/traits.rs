//! Storage and Transaction traits -- the public contract for persistence.
//!
//! Callers depend on these traits rather than on the concrete SQLite store,
//! so mocks and proxies can be substituted.
//! The two traits share one capability surface; the transaction variant is
//! scoped to a held connection and composed by explicit passing.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use spool_core::comment::{Comment, Event};
use spool_core::dependency::Dependency;
use spool_core::enums::OrphanPolicy;
use spool_core::filter::{IssueFilter, WorkFilter};
use spool_core::issue::Issue;

use crate::cancel::CancelToken;
use crate::error::Result;

// ---------------------------------------------------------------------------
// Option / outcome types
// ---------------------------------------------------------------------------

/// Typed partial update for an issue.
///
/// `None` leaves the column untouched. Nullable columns use `Option<Option<_>>`:
/// the outer `Some` means "write", the inner value is what gets written.
#[derive(Debug, Clone, Default)]
pub struct IssueUpdates {
    pub title: Option<String>,
    pub description: Option<String>,
    pub design: Option<String>,
    pub acceptance_criteria: Option<String>,
    pub notes: Option<String>,
    pub status: Option<spool_core::enums::Status>,
    pub priority: Option<i32>,
    pub issue_type: Option<spool_core::enums::IssueType>,
    pub assignee: Option<String>,
    pub owner: Option<String>,
    pub estimated_minutes: Option<Option<i32>>,
    pub external_ref: Option<Option<String>>,
    pub close_reason: Option<String>,
    pub closed_by_session: Option<String>,
    pub due_at: Option<Option<DateTime<Utc>>>,
    pub defer_until: Option<Option<DateTime<Utc>>>,
    pub sender: Option<String>,
    pub ephemeral: Option<bool>,
    pub pinned: Option<bool>,
    pub is_template: Option<bool>,
    pub crystallizes: Option<bool>,
    pub metadata: Option<Option<String>>,
    pub mol_type: Option<String>,
    pub work_type: Option<String>,
    pub quality_score: Option<Option<f64>>,
    pub event_kind: Option<String>,
    pub actor: Option<String>,
    pub target: Option<String>,
    pub payload: Option<String>,
}

/// Options for the batch-create pipeline.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// How to treat hierarchical children whose parent is absent.
    pub orphan_policy: OrphanPolicy,
    /// Accept IDs that do not carry the configured prefix (multi-repo
    /// merges).
    pub skip_prefix_validation: bool,
}

impl CreateOptions {
    /// Options with the given policy and prefix validation enabled.
    pub fn with_policy(orphan_policy: OrphanPolicy) -> Self {
        Self {
            orphan_policy,
            skip_prefix_validation: false,
        }
    }
}

/// What a committed batch actually did.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// IDs persisted, in input order.
    pub created: Vec<String>,
    /// IDs dropped by the Skip orphan policy (non-fatal).
    pub skipped: Vec<String>,
}

/// Options for [`Storage::delete_issues`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOptions {
    /// Tombstone all transitive dependents along with the targets.
    pub cascade: bool,
    /// Tombstone the targets even if live dependents remain (reported as
    /// orphans).
    pub force: bool,
    /// Compute the result without mutating.
    pub dry_run: bool,
}

/// Result of a (possibly dry-run) tombstoning pass.
#[derive(Debug, Clone, Default)]
pub struct DeleteResult {
    /// Rows transitioned (or, under dry-run, that would transition).
    pub deleted_count: usize,
    /// Live dependents left behind by a forced delete.
    pub orphaned_issues: Vec<String>,
}

/// An issue with the count of its active blockers.
#[derive(Debug, Clone)]
pub struct BlockedIssue {
    pub issue: Issue,
    pub blocked_by_count: i32,
}

/// Aggregate statistics about the store.
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    pub total_issues: i64,
    pub open_issues: i64,
    pub in_progress_issues: i64,
    pub blocked_issues: i64,
    pub closed_issues: i64,
    pub tombstone_issues: i64,

    /// Breakdown by issue type: `(type_name, count)`.
    pub by_type: Vec<(String, i64)>,
    /// Breakdown by priority: `(priority, count)`.
    pub by_priority: Vec<(i32, i64)>,
}

/// Bookkeeping row for multi-repo export scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoMtime {
    pub repo_path: String,
    pub jsonl_path: String,
    pub mtime_ns: i64,
    pub last_checked: DateTime<Utc>,
}

/// Hook consulted when a hierarchical parent is absent at child-ID
/// allocation time. Returns `true` if it resurrected the parent row.
pub type ResurrectHook<'a> = &'a dyn Fn(&str) -> bool;

// ---------------------------------------------------------------------------
// Storage trait
// ---------------------------------------------------------------------------

/// Primary persistence interface.
pub trait Storage: Send + Sync {
    // -- Issue creation ------------------------------------------------------

    /// Creates a single issue (a one-element batch). Assigns the ID and
    /// content hash in place.
    fn create_issue(&self, issue: &mut Issue, actor: &str) -> Result<()>;

    /// Creates a batch with the default `Resurrect` orphan policy.
    fn create_issues(&self, issues: &mut [Issue], actor: &str) -> Result<BatchOutcome>;

    /// Creates a batch under the given orphan policy.
    fn create_issues_with_options(
        &self,
        issues: &mut [Issue],
        actor: &str,
        orphan_policy: OrphanPolicy,
    ) -> Result<BatchOutcome>;

    /// Full-control batch create. All-or-nothing: any error rolls back the
    /// whole batch.
    fn create_issues_with_full_options(
        &self,
        issues: &mut [Issue],
        actor: &str,
        options: &CreateOptions,
        cancel: &CancelToken,
    ) -> Result<BatchOutcome>;

    // -- Issue reads ---------------------------------------------------------

    /// Retrieves an issue by ID.
    fn get_issue(&self, id: &str) -> Result<Issue>;

    /// Retrieves multiple issues by ID. Missing IDs are silently absent.
    fn get_issues_by_ids(&self, ids: &[String]) -> Result<Vec<Issue>>;

    /// Text search plus structured filtering.
    fn search_issues(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>>;

    // -- Issue mutation ------------------------------------------------------

    /// Applies a typed partial update and emits an `updated` event.
    fn update_issue(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()>;

    /// Closes an issue (status=closed, closed_at=now) and emits a `closed`
    /// event.
    fn close_issue(&self, id: &str, reason: &str, actor: &str, session: &str) -> Result<()>;

    /// Physically removes an issue and its related rows. Cleanup contexts
    /// only; normal deletion goes through [`Storage::delete_issues`].
    fn delete_issue(&self, id: &str) -> Result<()>;

    /// Tombstones the targets per the cascade/force/dry-run policy matrix.
    fn delete_issues(
        &self,
        ids: &[String],
        options: &DeleteOptions,
        actor: &str,
        cancel: &CancelToken,
    ) -> Result<DeleteResult>;

    /// Transitions a single row to tombstone status.
    fn create_tombstone(&self, id: &str, actor: &str, reason: &str) -> Result<()>;

    // -- ID service ----------------------------------------------------------

    /// Allocates the next child ID under `parent`, consulting the resurrect
    /// hook when the parent row is absent.
    fn next_child_id(&self, parent: &str, resurrect: Option<ResurrectHook<'_>>) -> Result<String>;

    /// Raises `child_counters[parent]` to at least `n` (explicit child
    /// imports).
    fn ensure_child_counter_at_least(&self, parent: &str, n: u32) -> Result<()>;

    // -- Dependencies --------------------------------------------------------

    /// Adds a dependency edge, rejecting cycles in the blocking graph.
    fn add_dependency(&self, dep: &Dependency, actor: &str) -> Result<()>;

    /// Removes a dependency edge.
    fn remove_dependency(&self, issue_id: &str, depends_on_id: &str, actor: &str) -> Result<()>;

    /// Issues the given issue depends on.
    fn get_dependencies(&self, issue_id: &str) -> Result<Vec<Issue>>;

    /// Issues depending on the given issue.
    fn get_dependents(&self, issue_id: &str) -> Result<Vec<Issue>>;

    // -- Labels --------------------------------------------------------------

    fn add_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()>;
    fn remove_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()>;
    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>>;

    /// Batch label fetch, keyed by issue ID.
    fn get_labels_for_issues(&self, ids: &[String]) -> Result<HashMap<String, Vec<String>>>;

    // -- Comments and events -------------------------------------------------

    /// Adds a comment, bumps `updated_at`, emits a `commented` event, and
    /// marks the issue dirty.
    fn add_issue_comment(&self, issue_id: &str, author: &str, text: &str) -> Result<Comment>;

    /// Inserts a comment with a caller-supplied timestamp (import path).
    fn import_issue_comment(
        &self,
        issue_id: &str,
        author: &str,
        text: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Comment>;

    fn get_issue_comments(&self, issue_id: &str) -> Result<Vec<Comment>>;

    /// Batch comment fetch, keyed by issue ID.
    fn get_comments_for_issues(&self, ids: &[String]) -> Result<HashMap<String, Vec<Comment>>>;

    /// Recent events for one issue, most recent first. `limit <= 0` means
    /// unlimited.
    fn get_events(&self, issue_id: &str, limit: i32) -> Result<Vec<Event>>;

    /// The global event stream above `since_id`, ascending by event id.
    fn get_all_events_since(&self, since_id: i64) -> Result<Vec<Event>>;

    // -- Derived views -------------------------------------------------------

    /// Open, non-ephemeral issues not transitively blocked.
    fn get_ready_issues(&self, filter: &WorkFilter) -> Result<Vec<Issue>>;

    /// Issues with at least one active blocker.
    fn get_blocked_issues(&self, filter: &WorkFilter) -> Result<Vec<BlockedIssue>>;

    /// Aggregate counts.
    fn get_statistics(&self) -> Result<Statistics>;

    // -- Dirty set and export bookkeeping ------------------------------------

    /// IDs mutated since the last export clear.
    fn get_dirty_issues(&self) -> Result<Vec<String>>;

    /// Atomically removes the given IDs from the dirty set.
    fn clear_dirty_issues_by_id(&self, ids: &[String]) -> Result<()>;

    /// Records the content hash the exporter last wrote for an issue.
    fn set_export_hash(&self, issue_id: &str, content_hash: &str) -> Result<()>;

    /// All recorded export hashes, keyed by issue ID.
    fn get_export_hashes(&self) -> Result<HashMap<String, String>>;

    /// Upserts the scan bookkeeping for a repo path.
    fn touch_repo_mtime(&self, repo_path: &str, jsonl_path: &str, mtime_ns: i64) -> Result<()>;

    /// Reads the scan bookkeeping for a repo path, if any.
    fn get_repo_mtime(&self, repo_path: &str) -> Result<Option<RepoMtime>>;

    // -- Configuration -------------------------------------------------------

    fn set_config(&self, key: &str, value: &str) -> Result<()>;
    fn get_config(&self, key: &str) -> Result<String>;
    fn get_all_config(&self) -> Result<HashMap<String, String>>;

    // -- Transactions --------------------------------------------------------

    /// Runs a closure inside one immediate transaction. `Ok` commits, `Err`
    /// rolls back.
    fn run_in_transaction(&self, f: &dyn Fn(&dyn Transaction) -> Result<()>) -> Result<()>;

    // -- Lifecycle -----------------------------------------------------------

    /// Releases the underlying connection.
    fn close(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Transaction trait
// ---------------------------------------------------------------------------

/// The capability surface available inside [`Storage::run_in_transaction`].
///
/// All operations run on the one held connection and commit or roll back
/// together. Issues passed to `create_issue` must already carry their IDs;
/// ID assignment and orphan policy belong to the batch pipeline.
pub trait Transaction {
    // -- Issues --------------------------------------------------------------

    fn create_issue(&self, issue: &Issue, actor: &str) -> Result<()>;
    fn get_issue(&self, id: &str) -> Result<Issue>;
    fn update_issue(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()>;
    fn close_issue(&self, id: &str, reason: &str, actor: &str, session: &str) -> Result<()>;
    fn delete_issue(&self, id: &str) -> Result<()>;
    fn search_issues(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>>;

    // -- Dependencies --------------------------------------------------------

    fn add_dependency(&self, dep: &Dependency, actor: &str) -> Result<()>;
    fn remove_dependency(&self, issue_id: &str, depends_on_id: &str, actor: &str) -> Result<()>;
    fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>>;

    // -- Labels --------------------------------------------------------------

    fn add_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()>;
    fn remove_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()>;
    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>>;

    // -- Comments ------------------------------------------------------------

    fn add_comment(&self, issue_id: &str, author: &str, text: &str) -> Result<Comment>;
    fn import_comment(
        &self,
        issue_id: &str,
        author: &str,
        text: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Comment>;
    fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>>;

    // -- Config / metadata ---------------------------------------------------

    fn set_config(&self, key: &str, value: &str) -> Result<()>;
    fn get_config(&self, key: &str) -> Result<String>;
    fn set_metadata(&self, key: &str, value: &str) -> Result<()>;
    fn get_metadata(&self, key: &str) -> Result<String>;
}
