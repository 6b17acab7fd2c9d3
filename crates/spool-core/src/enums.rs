//! String-backed enum types for the spool datastore.
//!
//! Every enum serializes as its wire string and deserializes unknown values
//! into a `Custom(String)` variant, so imported data from newer or foreign
//! stores never fails to parse.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

// ---------------------------------------------------------------------------
// Macro: a string enum with known variants plus a Custom(String) catch-all.
// ---------------------------------------------------------------------------
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident, default = $default:ident,
        variants: [
            $( ($variant:ident, $str:expr) ),+ $(,)?
        ]
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $variant, )+
            Custom(String),
        }

        impl $name {
            /// Returns the wire string.
            pub fn as_str(&self) -> &str {
                match self {
                    $( Self::$variant => $str, )+
                    Self::Custom(s) => s.as_str(),
                }
            }

            /// Returns `true` if this is the default variant.
            pub fn is_default(&self) -> bool {
                *self == Self::$default
            }

            /// Returns `true` for a known (non-custom) variant.
            pub fn is_builtin(&self) -> bool {
                !matches!(self, Self::Custom(_))
            }

            /// Returns `true` for built-ins and for custom values present in
            /// the given whitelist (the `*.custom` config keys).
            pub fn is_valid_with_custom(&self, whitelist: &[&str]) -> bool {
                match self {
                    Self::Custom(s) => whitelist.contains(&s.as_str()),
                    _ => true,
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::$default
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Ok(Self::from(s))
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                match s {
                    $( $str => Self::$variant, )+
                    other => Self::Custom(other.to_owned()),
                }
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                match s.as_str() {
                    $( $str => Self::$variant, )+
                    _ => Self::Custom(s),
                }
            }
        }
    };
}

// ===========================================================================
// Status
// ===========================================================================

string_enum! {
    /// Lifecycle state of an issue.
    ///
    /// `Tombstone` is a soft-deleted row kept in place so inbound references
    /// stay resolvable.
    Status, default = Open,
    variants: [
        (Open, "open"),
        (InProgress, "in_progress"),
        (Blocked, "blocked"),
        (Deferred, "deferred"),
        (Hooked, "hooked"),
        (Closed, "closed"),
        (Tombstone, "tombstone"),
    ]
}

impl Status {
    /// Returns `true` for statuses that count as an active blocker in the
    /// ready-work computation.
    pub fn blocks_ready_work(&self) -> bool {
        matches!(
            self,
            Self::Open | Self::InProgress | Self::Blocked | Self::Deferred | Self::Hooked
        )
    }
}

// ===========================================================================
// IssueType
// ===========================================================================

string_enum! {
    /// Categorises the kind of work an issue represents.
    IssueType, default = Task,
    variants: [
        (Bug, "bug"),
        (Feature, "feature"),
        (Task, "task"),
        (Epic, "epic"),
        (Chore, "chore"),
    ]
}

// ===========================================================================
// DependencyType
// ===========================================================================

string_enum! {
    /// Relationship between two issues.
    DependencyType, default = Blocks,
    variants: [
        (Blocks, "blocks"),
        (ParentChild, "parent-child"),
        (Relates, "relates"),
        (DuplicateOf, "duplicate-of"),
        (SupersededBy, "superseded-by"),
        (RepliesTo, "replies-to"),
        (DiscoveredFrom, "discovered-from"),
    ]
}

impl DependencyType {
    /// Returns `true` if edges of this type participate in the blocking
    /// graph (ready-work computation and delete-dependent checks).
    pub fn affects_ready_work(&self) -> bool {
        matches!(self, Self::Blocks | Self::ParentChild)
    }
}

// ===========================================================================
// EventType
// ===========================================================================

/// Kind of an audit-trail entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    Created,
    Updated,
    Commented,
    LabelAdded,
    LabelRemoved,
    Closed,
    Reopened,
    DependencyAdded,
    DependencyRemoved,
    Tombstoned,
    /// Catch-all for unknown / future event kinds.
    Other(String),
}

impl EventType {
    /// Returns the wire string.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Commented => "commented",
            Self::LabelAdded => "label_added",
            Self::LabelRemoved => "label_removed",
            Self::Closed => "closed",
            Self::Reopened => "reopened",
            Self::DependencyAdded => "dependency_added",
            Self::DependencyRemoved => "dependency_removed",
            Self::Tombstoned => "tombstoned",
            Self::Other(s) => s.as_str(),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from(s.as_str()))
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        match s {
            "created" => Self::Created,
            "updated" => Self::Updated,
            "commented" => Self::Commented,
            "label_added" => Self::LabelAdded,
            "label_removed" => Self::LabelRemoved,
            "closed" => Self::Closed,
            "reopened" => Self::Reopened,
            "dependency_added" => Self::DependencyAdded,
            "dependency_removed" => Self::DependencyRemoved,
            "tombstoned" => Self::Tombstoned,
            other => Self::Other(other.to_owned()),
        }
    }
}

// ===========================================================================
// OrphanPolicy
// ===========================================================================

/// How a batch ingest reacts to a hierarchical child whose parent is not in
/// the database.
///
/// Configured via the `import.orphan_handling` key; anything unrecognised
/// falls back to `Allow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrphanPolicy {
    /// Abort the batch.
    Strict,
    /// Accept the child if its parent is created in the same batch.
    Resurrect,
    /// Drop the child from the batch and report it.
    Skip,
    /// Persist the child without a parent row.
    #[default]
    Allow,
}

impl OrphanPolicy {
    /// Returns the wire string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Resurrect => "resurrect",
            Self::Skip => "skip",
            Self::Allow => "allow",
        }
    }

    /// Parses a config value. Unknown or empty input yields `Allow`.
    pub fn from_config(value: &str) -> Self {
        match value.trim() {
            "strict" => Self::Strict,
            "resurrect" => Self::Resurrect,
            "skip" => Self::Skip,
            _ => Self::Allow,
        }
    }
}

impl fmt::Display for OrphanPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_default_is_open() {
        assert_eq!(Status::default(), Status::Open);
        assert!(Status::Open.is_default());
        assert!(!Status::Tombstone.is_default());
    }

    #[test]
    fn status_serde_roundtrip() {
        let s = Status::InProgress;
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, r#""in_progress""#);
        let back: Status = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn status_custom_roundtrip() {
        let json = r#""triage""#;
        let s: Status = serde_json::from_str(json).unwrap();
        assert_eq!(s, Status::Custom("triage".into()));
        assert_eq!(serde_json::to_string(&s).unwrap(), json);
    }

    #[test]
    fn status_blockers() {
        assert!(Status::Open.blocks_ready_work());
        assert!(Status::Hooked.blocks_ready_work());
        assert!(!Status::Closed.blocks_ready_work());
        assert!(!Status::Tombstone.blocks_ready_work());
    }

    #[test]
    fn custom_status_whitelist() {
        let s = Status::Custom("triage".into());
        assert!(!s.is_valid_with_custom(&[]));
        assert!(s.is_valid_with_custom(&["triage"]));
        assert!(Status::Open.is_valid_with_custom(&[]));
    }

    #[test]
    fn dependency_type_strings() {
        assert_eq!(DependencyType::ParentChild.as_str(), "parent-child");
        assert_eq!(DependencyType::DuplicateOf.as_str(), "duplicate-of");
        assert_eq!(
            DependencyType::from("superseded-by"),
            DependencyType::SupersededBy
        );
    }

    #[test]
    fn dependency_type_blocking() {
        assert!(DependencyType::Blocks.affects_ready_work());
        assert!(DependencyType::ParentChild.affects_ready_work());
        assert!(!DependencyType::Relates.affects_ready_work());
        assert!(!DependencyType::RepliesTo.affects_ready_work());
    }

    #[test]
    fn event_type_roundtrip() {
        let e = EventType::from("dependency_added");
        assert_eq!(e, EventType::DependencyAdded);
        assert_eq!(EventType::Tombstoned.as_str(), "tombstoned");

        let other = EventType::from("merged");
        assert_eq!(other, EventType::Other("merged".into()));
    }

    #[test]
    fn orphan_policy_from_config() {
        assert_eq!(OrphanPolicy::from_config("strict"), OrphanPolicy::Strict);
        assert_eq!(
            OrphanPolicy::from_config("resurrect"),
            OrphanPolicy::Resurrect
        );
        assert_eq!(OrphanPolicy::from_config("skip"), OrphanPolicy::Skip);
        assert_eq!(OrphanPolicy::from_config("allow"), OrphanPolicy::Allow);
        // Unknown and empty fall back to Allow.
        assert_eq!(OrphanPolicy::from_config(""), OrphanPolicy::Allow);
        assert_eq!(OrphanPolicy::from_config("bogus"), OrphanPolicy::Allow);
    }
}
