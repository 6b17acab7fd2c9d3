//! Filter types for issue queries.

use chrono::{DateTime, Utc};

use crate::enums::{IssueType, Status};

/// Filter for issue searches.
#[derive(Debug, Clone, Default)]
pub struct IssueFilter {
    pub status: Option<Status>,
    pub priority: Option<i32>,
    pub issue_type: Option<IssueType>,
    pub assignee: Option<String>,

    /// AND semantics: issue must have ALL these labels.
    pub labels: Vec<String>,
    /// OR semantics: issue must have AT LEAST ONE of these labels.
    pub labels_any: Vec<String>,
    pub no_labels: bool,

    pub title_contains: Option<String>,
    pub description_contains: Option<String>,
    pub no_assignee: bool,

    /// Restrict to specific issue IDs.
    pub ids: Vec<String>,
    /// Restrict to IDs with this prefix (e.g. "sp-").
    pub id_prefix: Option<String>,

    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub updated_after: Option<DateTime<Utc>>,
    pub updated_before: Option<DateTime<Utc>>,

    pub ephemeral: Option<bool>,
    pub pinned: Option<bool>,
    pub is_template: Option<bool>,
    pub source_repo: Option<String>,

    /// Exclude issues with these statuses.
    pub exclude_status: Vec<Status>,
    /// Exclude issues with these types.
    pub exclude_types: Vec<IssueType>,

    pub limit: Option<i32>,
}

/// Filter for the ready-work and blocked-issues views.
#[derive(Debug, Clone, Default)]
pub struct WorkFilter {
    pub issue_type: Option<String>,
    pub priority: Option<i32>,
    pub assignee: Option<String>,
    pub unassigned: bool,

    pub labels: Vec<String>,
    pub labels_any: Vec<String>,

    /// Include issues with future defer_until timestamps.
    pub include_deferred: bool,

    pub limit: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_filter_defaults() {
        let f = IssueFilter::default();
        assert!(f.status.is_none());
        assert!(f.labels.is_empty());
        assert!(f.limit.is_none());
    }

    #[test]
    fn work_filter_defaults() {
        let f = WorkFilter::default();
        assert!(!f.unassigned);
        assert!(!f.include_deferred);
    }
}
