//! Dependency edges between issues.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::DependencyType;

/// A directed relationship: `issue_id` depends on `depends_on_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub issue_id: String,

    pub depends_on_id: String,

    /// Serialized as "type" on the wire.
    #[serde(rename = "type")]
    pub dep_type: DependencyType,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_by: String,

    /// Type-specific edge data, opaque JSON.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub metadata: String,

    /// Groups conversation edges (`replies-to`) into threads.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub thread_id: String,
}

impl Dependency {
    /// A plain edge with the current timestamp and no metadata.
    pub fn new(
        issue_id: impl Into<String>,
        depends_on_id: impl Into<String>,
        dep_type: DependencyType,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            issue_id: issue_id.into(),
            depends_on_id: depends_on_id.into(),
            dep_type,
            created_at: Utc::now(),
            created_by: created_by.into(),
            metadata: String::new(),
            thread_id: String::new(),
        }
    }
}
