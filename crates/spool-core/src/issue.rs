//! The [`Issue`] struct -- the central record of the datastore.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::comment::Comment;
use crate::dependency::Dependency;
use crate::enums::{IssueType, Status};

fn is_false(b: &bool) -> bool {
    !b
}

fn is_empty_vec<T>(v: &Vec<T>) -> bool {
    v.is_empty()
}

/// A trackable work item.
///
/// Rows are never physically deleted while referenced; a delete transitions
/// the row to [`Status::Tombstone`] and fills the `deleted_*` fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    // ===== Identity =====
    #[serde(default)]
    pub id: String,

    /// SHA-256 of canonical content. Internal; never exported.
    #[serde(skip)]
    pub content_hash: String,

    // ===== Content =====
    #[serde(default)]
    pub title: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub design: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub acceptance_criteria: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,

    // ===== Workflow =====
    #[serde(default, skip_serializing_if = "Status::is_default")]
    pub status: Status,

    /// Priority 0-4. 0 is valid (critical), so it is always serialized.
    #[serde(default)]
    pub priority: i32,

    #[serde(default, skip_serializing_if = "IssueType::is_default")]
    pub issue_type: IssueType,

    // ===== Assignment =====
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub assignee: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_minutes: Option<i32>,

    // ===== Timestamps =====
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_by: String,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub close_reason: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub closed_by_session: String,

    // ===== Tombstone lifecycle =====
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub deleted_by: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub delete_reason: String,

    /// The issue_type the row had before it was tombstoned.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub original_type: String,

    // ===== Scheduling =====
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defer_until: Option<DateTime<Utc>>,

    // ===== External integration =====
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_system: String,

    /// Which repo owns this issue (multi-repo routing). Internal.
    #[serde(skip)]
    pub source_repo: String,

    /// Arbitrary JSON for extension points. Stored verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Box<serde_json::value::RawValue>>,

    // ===== Messaging / markers =====
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sender: String,

    #[serde(default, skip_serializing_if = "is_false")]
    pub ephemeral: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub pinned: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub is_template: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub crystallizes: bool,

    // ===== Opaque classification columns =====
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mol_type: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub work_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,

    // ===== Event payload columns =====
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub event_kind: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub actor: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub payload: String,

    // ===== Relational data (populated for export/import) =====
    #[serde(default, skip_serializing_if = "is_empty_vec")]
    pub labels: Vec<String>,

    #[serde(default, skip_serializing_if = "is_empty_vec")]
    pub dependencies: Vec<Dependency>,

    #[serde(default, skip_serializing_if = "is_empty_vec")]
    pub comments: Vec<Comment>,
}

impl Default for Issue {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            content_hash: String::new(),
            title: String::new(),
            description: String::new(),
            design: String::new(),
            acceptance_criteria: String::new(),
            notes: String::new(),
            status: Status::Open,
            priority: 2,
            issue_type: IssueType::Task,
            assignee: String::new(),
            owner: String::new(),
            estimated_minutes: None,
            created_at: now,
            created_by: String::new(),
            updated_at: now,
            closed_at: None,
            close_reason: String::new(),
            closed_by_session: String::new(),
            deleted_at: None,
            deleted_by: String::new(),
            delete_reason: String::new(),
            original_type: String::new(),
            due_at: None,
            defer_until: None,
            external_ref: None,
            source_system: String::new(),
            source_repo: String::new(),
            metadata: None,
            sender: String::new(),
            ephemeral: false,
            pinned: false,
            is_template: false,
            crystallizes: false,
            mol_type: String::new(),
            work_type: String::new(),
            quality_score: None,
            event_kind: String::new(),
            actor: String::new(),
            target: String::new(),
            payload: String::new(),
            labels: Vec::new(),
            dependencies: Vec::new(),
            comments: Vec::new(),
        }
    }
}

impl Issue {
    /// Returns `true` if the row has been soft-deleted.
    pub fn is_tombstone(&self) -> bool {
        self.status == Status::Tombstone
    }
}

/// Fluent constructor for [`Issue`].
pub struct IssueBuilder {
    issue: Issue,
}

impl IssueBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        let issue = Issue {
            title: title.into(),
            ..Issue::default()
        };
        Self { issue }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.issue.id = id.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.issue.description = description.into();
        self
    }

    pub fn design(mut self, design: impl Into<String>) -> Self {
        self.issue.design = design.into();
        self
    }

    pub fn acceptance_criteria(mut self, ac: impl Into<String>) -> Self {
        self.issue.acceptance_criteria = ac.into();
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.issue.notes = notes.into();
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.issue.status = status;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.issue.priority = priority;
        self
    }

    pub fn issue_type(mut self, issue_type: IssueType) -> Self {
        self.issue.issue_type = issue_type;
        self
    }

    pub fn assignee(mut self, assignee: impl Into<String>) -> Self {
        self.issue.assignee = assignee.into();
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.issue.owner = owner.into();
        self
    }

    pub fn created_by(mut self, by: impl Into<String>) -> Self {
        self.issue.created_by = by.into();
        self
    }

    pub fn created_at(mut self, t: DateTime<Utc>) -> Self {
        self.issue.created_at = t;
        self
    }

    pub fn updated_at(mut self, t: DateTime<Utc>) -> Self {
        self.issue.updated_at = t;
        self
    }

    pub fn closed_at(mut self, t: DateTime<Utc>) -> Self {
        self.issue.closed_at = Some(t);
        self
    }

    pub fn close_reason(mut self, reason: impl Into<String>) -> Self {
        self.issue.close_reason = reason.into();
        self
    }

    pub fn due_at(mut self, t: DateTime<Utc>) -> Self {
        self.issue.due_at = Some(t);
        self
    }

    pub fn defer_until(mut self, t: DateTime<Utc>) -> Self {
        self.issue.defer_until = Some(t);
        self
    }

    pub fn external_ref(mut self, ext: impl Into<String>) -> Self {
        self.issue.external_ref = Some(ext.into());
        self
    }

    pub fn source_system(mut self, sys: impl Into<String>) -> Self {
        self.issue.source_system = sys.into();
        self
    }

    pub fn estimated_minutes(mut self, minutes: i32) -> Self {
        self.issue.estimated_minutes = Some(minutes);
        self
    }

    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.issue.sender = sender.into();
        self
    }

    pub fn ephemeral(mut self, ephemeral: bool) -> Self {
        self.issue.ephemeral = ephemeral;
        self
    }

    pub fn pinned(mut self, pinned: bool) -> Self {
        self.issue.pinned = pinned;
        self
    }

    pub fn is_template(mut self, is_template: bool) -> Self {
        self.issue.is_template = is_template;
        self
    }

    pub fn labels(mut self, labels: Vec<String>) -> Self {
        self.issue.labels = labels;
        self
    }

    /// Consumes the builder.
    pub fn build(self) -> Issue {
        self.issue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_issue() {
        let issue = Issue::default();
        assert_eq!(issue.status, Status::Open);
        assert_eq!(issue.issue_type, IssueType::Task);
        assert_eq!(issue.priority, 2);
        assert!(issue.closed_at.is_none());
        assert!(!issue.is_tombstone());
    }

    #[test]
    fn builder_basic() {
        let issue = IssueBuilder::new("Fix the parser")
            .priority(1)
            .status(Status::InProgress)
            .issue_type(IssueType::Bug)
            .assignee("alice")
            .build();

        assert_eq!(issue.title, "Fix the parser");
        assert_eq!(issue.priority, 1);
        assert_eq!(issue.status, Status::InProgress);
        assert_eq!(issue.issue_type, IssueType::Bug);
        assert_eq!(issue.assignee, "alice");
    }

    #[test]
    fn serde_roundtrip() {
        let issue = IssueBuilder::new("Round trip")
            .id("sp-abc123")
            .priority(1)
            .description("body text")
            .build();

        let json = serde_json::to_string(&issue).unwrap();
        let back: Issue = serde_json::from_str(&json).unwrap();

        assert_eq!(back.title, "Round trip");
        assert_eq!(back.id, "sp-abc123");
        assert_eq!(back.priority, 1);
        assert_eq!(back.description, "body text");
    }

    #[test]
    fn content_hash_never_serialized() {
        let mut issue = IssueBuilder::new("Hash hidden").id("sp-h1").build();
        issue.content_hash = "deadbeef".into();
        let json = serde_json::to_string(&issue).unwrap();
        assert!(!json.contains("deadbeef"));
    }

    #[test]
    fn tombstone_predicate() {
        let mut issue = IssueBuilder::new("Gone").build();
        issue.status = Status::Tombstone;
        assert!(issue.is_tombstone());
    }
}
