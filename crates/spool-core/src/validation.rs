//! Issue validation rules and defensive lifecycle fix-ups.
//!
//! Validation runs entirely in memory, before any database write, so a
//! failed batch leaves no partial state.

use chrono::{DateTime, Duration, Utc};

use crate::enums::Status;
use crate::issue::Issue;

/// Maximum title length in bytes.
pub const MAX_TITLE_LEN: usize = 500;

/// A field-level constraint violation.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("title is required")]
    TitleRequired,

    #[error("title must be {MAX_TITLE_LEN} characters or less (got {0})")]
    TitleTooLong(usize),

    #[error("priority must be between 0 and 4 (got {0})")]
    InvalidPriority(i32),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("invalid issue type: {0}")]
    InvalidIssueType(String),

    #[error("estimated_minutes cannot be negative")]
    NegativeEstimate,

    #[error("closed issues must have a closed_at timestamp")]
    ClosedWithoutTimestamp,

    #[error("non-closed issues cannot have a closed_at timestamp")]
    NotClosedWithTimestamp,

    #[error("tombstones must have a deleted_at timestamp")]
    TombstoneWithoutDeletedAt,

    #[error("metadata must be valid JSON")]
    InvalidMetadata,
}

/// Validates an issue using built-in rules only.
pub fn validate(issue: &Issue) -> Result<(), ValidationError> {
    validate_with_custom(issue, &[], &[])
}

/// Validates an issue, accepting the given custom statuses and types
/// (the `statuses.custom` / `types.custom` config whitelists).
pub fn validate_with_custom(
    issue: &Issue,
    custom_statuses: &[&str],
    custom_types: &[&str],
) -> Result<(), ValidationError> {
    if issue.title.is_empty() {
        return Err(ValidationError::TitleRequired);
    }
    if issue.title.len() > MAX_TITLE_LEN {
        return Err(ValidationError::TitleTooLong(issue.title.len()));
    }
    if !(0..=4).contains(&issue.priority) {
        return Err(ValidationError::InvalidPriority(issue.priority));
    }
    if !issue.status.is_valid_with_custom(custom_statuses) {
        return Err(ValidationError::InvalidStatus(
            issue.status.as_str().to_owned(),
        ));
    }
    if !issue.issue_type.is_valid_with_custom(custom_types) {
        return Err(ValidationError::InvalidIssueType(
            issue.issue_type.as_str().to_owned(),
        ));
    }
    if let Some(est) = issue.estimated_minutes {
        if est < 0 {
            return Err(ValidationError::NegativeEstimate);
        }
    }

    // closed_at invariant. Tombstones may retain a prior closed_at.
    if issue.status == Status::Closed && issue.closed_at.is_none() {
        return Err(ValidationError::ClosedWithoutTimestamp);
    }
    if issue.status != Status::Closed
        && issue.status != Status::Tombstone
        && issue.closed_at.is_some()
    {
        return Err(ValidationError::NotClosedWithTimestamp);
    }
    if issue.status == Status::Tombstone && issue.deleted_at.is_none() {
        return Err(ValidationError::TombstoneWithoutDeletedAt);
    }

    if let Some(ref meta) = issue.metadata {
        if serde_json::from_str::<serde_json::Value>(meta.get()).is_err() {
            return Err(ValidationError::InvalidMetadata);
        }
    }

    Ok(())
}

/// Fills unset `created_at` / `updated_at` with the given batch-wide `now`.
///
/// "Unset" is the epoch zero value, matching what deserializers produce for
/// absent timestamp fields in legacy exports.
pub fn fill_missing_timestamps(issue: &mut Issue, now: DateTime<Utc>) {
    if issue.created_at.timestamp() == 0 {
        issue.created_at = now;
    }
    if issue.updated_at.timestamp() == 0 {
        issue.updated_at = now;
    }
}

/// Repairs lifecycle timestamps on imported records before validation.
///
/// - `status = closed` without `closed_at` gets
///   `max(created_at, updated_at) + 1s`.
/// - `status = tombstone` without `deleted_at` gets
///   `max(created_at, updated_at) + 1s`, and an empty `original_type` is
///   backfilled from `issue_type`.
pub fn fix_up_lifecycle_timestamps(issue: &mut Issue) {
    let fallback = issue.created_at.max(issue.updated_at) + Duration::seconds(1);

    if issue.status == Status::Closed && issue.closed_at.is_none() {
        issue.closed_at = Some(fallback);
    }
    if issue.status == Status::Tombstone {
        if issue.deleted_at.is_none() {
            issue.deleted_at = Some(fallback);
        }
        if issue.original_type.is_empty() {
            issue.original_type = issue.issue_type.as_str().to_owned();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::IssueType;
    use crate::issue::IssueBuilder;
    use chrono::TimeZone;

    #[test]
    fn valid_issue_passes() {
        let issue = IssueBuilder::new("Valid").priority(2).build();
        assert!(validate(&issue).is_ok());
    }

    #[test]
    fn empty_title_fails() {
        let issue = IssueBuilder::new("").build();
        assert!(matches!(
            validate(&issue),
            Err(ValidationError::TitleRequired)
        ));
    }

    #[test]
    fn long_title_fails() {
        let issue = IssueBuilder::new("x".repeat(501)).build();
        assert!(matches!(
            validate(&issue),
            Err(ValidationError::TitleTooLong(501))
        ));
    }

    #[test]
    fn priority_out_of_range_fails() {
        for p in [-1, 5] {
            let issue = IssueBuilder::new("P").priority(p).build();
            assert!(matches!(
                validate(&issue),
                Err(ValidationError::InvalidPriority(_))
            ));
        }
    }

    #[test]
    fn custom_status_needs_whitelist() {
        let issue = IssueBuilder::new("S")
            .status(Status::Custom("triage".into()))
            .build();
        assert!(matches!(
            validate(&issue),
            Err(ValidationError::InvalidStatus(_))
        ));
        assert!(validate_with_custom(&issue, &["triage"], &[]).is_ok());
    }

    #[test]
    fn custom_type_needs_whitelist() {
        let issue = IssueBuilder::new("T")
            .issue_type(IssueType::Custom("molecule".into()))
            .build();
        assert!(matches!(
            validate(&issue),
            Err(ValidationError::InvalidIssueType(_))
        ));
        assert!(validate_with_custom(&issue, &[], &["molecule"]).is_ok());
    }

    #[test]
    fn closed_without_timestamp_fails() {
        let issue = IssueBuilder::new("C").status(Status::Closed).build();
        assert!(matches!(
            validate(&issue),
            Err(ValidationError::ClosedWithoutTimestamp)
        ));
    }

    #[test]
    fn open_with_closed_at_fails() {
        let issue = IssueBuilder::new("O").closed_at(Utc::now()).build();
        assert!(matches!(
            validate(&issue),
            Err(ValidationError::NotClosedWithTimestamp)
        ));
    }

    #[test]
    fn tombstone_may_retain_closed_at() {
        let mut issue = IssueBuilder::new("T").closed_at(Utc::now()).build();
        issue.status = Status::Tombstone;
        issue.deleted_at = Some(Utc::now());
        issue.original_type = "task".into();
        assert!(validate(&issue).is_ok());
    }

    #[test]
    fn tombstone_without_deleted_at_fails() {
        let mut issue = IssueBuilder::new("T").build();
        issue.status = Status::Tombstone;
        assert!(matches!(
            validate(&issue),
            Err(ValidationError::TombstoneWithoutDeletedAt)
        ));
    }

    #[test]
    fn fix_up_sets_closed_at_one_second_after_latest() {
        // Spec scenario: created at T, updated T+1h, closed with no
        // timestamp -> closed_at = T+1h+1s.
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut issue = IssueBuilder::new("Imported closed")
            .status(Status::Closed)
            .created_at(t)
            .updated_at(t + Duration::hours(1))
            .build();

        fix_up_lifecycle_timestamps(&mut issue);
        assert_eq!(
            issue.closed_at,
            Some(t + Duration::hours(1) + Duration::seconds(1))
        );
        assert!(validate(&issue).is_ok());
    }

    #[test]
    fn fix_up_repairs_tombstone() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut issue = IssueBuilder::new("Imported tombstone")
            .issue_type(IssueType::Bug)
            .created_at(t)
            .updated_at(t)
            .build();
        issue.status = Status::Tombstone;

        fix_up_lifecycle_timestamps(&mut issue);
        assert_eq!(issue.deleted_at, Some(t + Duration::seconds(1)));
        assert_eq!(issue.original_type, "bug");
    }

    #[test]
    fn fill_missing_timestamps_only_touches_epoch() {
        let now = Utc::now();
        let explicit = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let mut issue = IssueBuilder::new("TS")
            .created_at(Utc.timestamp_opt(0, 0).unwrap())
            .updated_at(explicit)
            .build();

        fill_missing_timestamps(&mut issue, now);
        assert_eq!(issue.created_at, now);
        assert_eq!(issue.updated_at, explicit);
    }

    #[test]
    fn negative_estimate_fails() {
        let mut issue = IssueBuilder::new("E").build();
        issue.estimated_minutes = Some(-10);
        assert!(matches!(
            validate(&issue),
            Err(ValidationError::NegativeEstimate)
        ));
    }
}
