//! The batch-create pipeline.
//!
//! Ordered phases, all-or-nothing:
//!
//! 1. Fetch custom status/type whitelists from config.
//! 2. Fill missing timestamps with one batch-wide `now`, apply defensive
//!    lifecycle fix-ups, validate in memory.
//! 3. `BEGIN IMMEDIATE` with bounded backoff retry.
//! 4. Read the configured prefix (`NotInitialized` when absent).
//! 5. Assign missing IDs, validate explicit ones, apply the orphan policy,
//!    compute content hashes.
//! 6. Uniqueness: in-batch duplicates, then one `IN (...)` probe against the
//!    store. Catching collisions here keeps them out of the FK/constraint
//!    layer.
//! 7. Bulk insert.
//! 8. Upsert child counters for hierarchical IDs (after insert, so the
//!    counter FK sees the parent rows).
//! 9. One `created` event per issue, in input order.
//! 10. Mark every ID dirty.
//! 11. Commit; any earlier error rolls the whole batch back.

use std::collections::HashSet;

use chrono::Utc;
use tracing::debug;

use spool_core::content_hash::compute_content_hash;
use spool_core::enums::{EventType, OrphanPolicy};
use spool_core::idgen;
use spool_core::issue::Issue;
use spool_core::validation;

use crate::cancel::CancelToken;
use crate::error::{Result, StorageError};
use crate::sqlite::config::{custom_statuses_on_conn, custom_types_on_conn, require_prefix_on_conn};
use crate::sqlite::dirty::mark_dirty_on_conn;
use crate::sqlite::ids;
use crate::sqlite::issues::{emit_event, format_datetime, insert_issue_row, issue_exists};
use crate::sqlite::store::{SqliteStore, begin_immediate};
use crate::traits::{BatchOutcome, CreateOptions};

impl SqliteStore {
    /// Creates a single issue: a one-element batch under the default
    /// policy.
    pub fn create_issue_impl(&self, issue: &mut Issue, actor: &str) -> Result<()> {
        let batch = std::slice::from_mut(issue);
        self.create_issues_with_full_options_impl(
            batch,
            actor,
            &CreateOptions::with_policy(OrphanPolicy::Resurrect),
            &CancelToken::new(),
        )?;
        Ok(())
    }

    /// Full-control batch create. Assigned IDs and content hashes are
    /// written back into the input slice; issues dropped by the Skip policy
    /// have their IDs cleared and are reported in the outcome.
    pub fn create_issues_with_full_options_impl(
        &self,
        issues: &mut [Issue],
        actor: &str,
        options: &CreateOptions,
        cancel: &CancelToken,
    ) -> Result<BatchOutcome> {
        const OP: &str = "create_issues";

        if issues.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let conn = self.lock_conn()?;
        let now = Utc::now();
        let now_str = format_datetime(&now);

        // Phase 1: whitelists.
        let custom_statuses = custom_statuses_on_conn(&conn)?;
        let custom_types = custom_types_on_conn(&conn)?;
        let status_refs: Vec<&str> = custom_statuses.iter().map(String::as_str).collect();
        let type_refs: Vec<&str> = custom_types.iter().map(String::as_str).collect();

        // Phase 2: timestamps, fix-ups, validation. In memory, before any
        // write, so a failed batch leaves no partial state.
        for issue in issues.iter_mut() {
            validation::fill_missing_timestamps(issue, now);
            validation::fix_up_lifecycle_timestamps(issue);
            validation::validate_with_custom(issue, &status_refs, &type_refs)?;
        }
        cancel.check(OP)?;

        // Phase 3: one immediate transaction for the rest of the pipeline.
        let tx = begin_immediate(&conn, cancel)?;

        // Phase 4: the store must be initialized.
        let prefix = require_prefix_on_conn(&conn)?;
        let max_depth = {
            match crate::sqlite::config::get_config_on_conn(
                &conn,
                crate::sqlite::config::keys::HIERARCHY_MAX_DEPTH,
            ) {
                Ok(v) => v.trim().parse().unwrap_or(idgen::DEFAULT_MAX_DEPTH),
                Err(e) if e.is_not_found() => idgen::DEFAULT_MAX_DEPTH,
                Err(e) => return Err(e),
            }
        };

        // Phase 5: ID assignment and policy checks.
        let explicit_ids: HashSet<String> = issues
            .iter()
            .filter(|i| !i.id.is_empty())
            .map(|i| i.id.clone())
            .collect();

        let mut skipped: Vec<String> = Vec::new();
        let mut dropped: Vec<bool> = vec![false; issues.len()];
        let mut assigned: HashSet<String> = HashSet::new();

        for (idx, issue) in issues.iter_mut().enumerate() {
            cancel.check(OP)?;

            if issue.id.is_empty() {
                let reserved: HashSet<String> =
                    assigned.union(&explicit_ids).cloned().collect();
                issue.id = ids::generate_unique_id(&conn, &prefix, issue, &reserved)?;
            } else {
                if !options.skip_prefix_validation
                    && !idgen::has_valid_prefix(&issue.id, &prefix)
                {
                    return Err(StorageError::PrefixMismatch {
                        id: issue.id.clone(),
                        prefix: prefix.clone(),
                    });
                }

                if let Some((parent, _)) = idgen::parse_hierarchical(&issue.id) {
                    if idgen::hierarchy_depth(&issue.id) > max_depth {
                        return Err(StorageError::HierarchyTooDeep {
                            id: issue.id.clone(),
                            max_depth,
                        });
                    }

                    if !issue_exists(&conn, parent)? {
                        match options.orphan_policy {
                            OrphanPolicy::Strict => {
                                return Err(StorageError::ParentMissing {
                                    id: issue.id.clone(),
                                    parent: parent.to_owned(),
                                });
                            }
                            OrphanPolicy::Resurrect => {
                                // The parent is acceptable if it is being
                                // created alongside in this batch.
                                if !explicit_ids.contains(parent) {
                                    return Err(StorageError::ParentMissing {
                                        id: issue.id.clone(),
                                        parent: parent.to_owned(),
                                    });
                                }
                            }
                            OrphanPolicy::Skip => {
                                skipped.push(issue.id.clone());
                                issue.id.clear();
                                dropped[idx] = true;
                                continue;
                            }
                            OrphanPolicy::Allow => {}
                        }
                    }
                }
            }

            assigned.insert(issue.id.clone());

            if issue.content_hash.is_empty() {
                issue.content_hash = compute_content_hash(issue);
            }
        }

        // Phase 6: uniqueness, in-batch then against the store.
        let mut seen: HashSet<&str> = HashSet::new();
        for (idx, issue) in issues.iter().enumerate() {
            if dropped[idx] {
                continue;
            }
            if !seen.insert(issue.id.as_str()) {
                return Err(StorageError::DuplicateIdInBatch {
                    id: issue.id.clone(),
                });
            }
        }

        let live_ids: Vec<&str> = issues
            .iter()
            .enumerate()
            .filter(|(idx, _)| !dropped[*idx])
            .map(|(_, i)| i.id.as_str())
            .collect();
        if !live_ids.is_empty() {
            let placeholders = live_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let sql = format!("SELECT id FROM issues WHERE id IN ({placeholders}) LIMIT 1");
            use rusqlite::OptionalExtension;
            let existing: Option<String> = conn
                .query_row(
                    &sql,
                    rusqlite::params_from_iter(live_ids.iter()),
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(id) = existing {
                return Err(StorageError::IdAlreadyExists { id });
            }
        }
        cancel.check(OP)?;

        // Phase 7: bulk insert.
        for (idx, issue) in issues.iter().enumerate() {
            if dropped[idx] {
                continue;
            }
            insert_issue_row(&conn, issue)?;
        }
        cancel.check(OP)?;

        // Phase 8: child counters, now that parent rows (if any) exist.
        for (idx, issue) in issues.iter().enumerate() {
            if dropped[idx] {
                continue;
            }
            if let Some((parent, n)) = idgen::parse_hierarchical(&issue.id) {
                // Under Allow the parent row may genuinely be absent; the
                // counter FK cannot hold a row for it.
                if issue_exists(&conn, parent)? {
                    ids::ensure_child_counter_at_least_on_conn(&conn, parent, n)?;
                }
            }
        }

        // Phases 9 and 10: audit trail and dirty set, in input order.
        for (idx, issue) in issues.iter().enumerate() {
            if dropped[idx] {
                continue;
            }
            emit_event(
                &conn,
                &issue.id,
                EventType::Created,
                actor,
                None,
                None,
                None,
                &now_str,
            )?;
            mark_dirty_on_conn(&conn, &issue.id, &now_str)?;
        }
        cancel.check(OP)?;

        // Phase 11.
        tx.commit()?;

        let created: Vec<String> = issues
            .iter()
            .enumerate()
            .filter(|(idx, _)| !dropped[*idx])
            .map(|(_, i)| i.id.clone())
            .collect();
        debug!(
            created = created.len(),
            skipped = skipped.len(),
            "batch committed"
        );
        Ok(BatchOutcome { created, skipped })
    }
}
