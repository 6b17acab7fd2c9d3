//! Storage error types.

use spool_core::validation::ValidationError;

/// Errors surfaced by storage operations.
///
/// Every recoverable condition carries enough context (operation, offending
/// id) for the caller to act on it without string matching.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested entity was not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity ("issue", "config", "dependency", ...).
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// The store has no `issue_prefix` configured; it must be initialized
    /// before issues can be created.
    #[error("store not initialized: {reason}")]
    NotInitialized {
        /// Why the store is considered uninitialized.
        reason: String,
    },

    /// An explicit issue ID does not carry the configured prefix.
    #[error("issue {id} does not match configured prefix {prefix}")]
    PrefixMismatch {
        /// The offending issue ID.
        id: String,
        /// The expected prefix.
        prefix: String,
    },

    /// The same ID appears twice within one batch.
    #[error("duplicate id in batch: {id}")]
    DuplicateIdInBatch {
        /// The duplicated ID.
        id: String,
    },

    /// An ID in the batch already exists in the store.
    #[error("id already exists: {id}")]
    IdAlreadyExists {
        /// The colliding ID.
        id: String,
    },

    /// A field-level constraint violation.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A hierarchical ID references a parent that is absent (and the orphan
    /// policy does not permit it).
    #[error("parent {parent} of {id} does not exist")]
    ParentMissing {
        /// The child ID.
        id: String,
        /// The missing parent ID.
        parent: String,
    },

    /// A hierarchical ID exceeds the configured depth cap.
    #[error("id {id} exceeds hierarchy depth limit of {max_depth}")]
    HierarchyTooDeep {
        /// The offending ID.
        id: String,
        /// The configured `hierarchy.max-depth`.
        max_depth: usize,
    },

    /// The nonce/length collision grid was exhausted without producing a
    /// free ID.
    #[error("could not generate a unique id with prefix {prefix}")]
    IdGenerationExhausted {
        /// The configured prefix.
        prefix: String,
    },

    /// Tombstoning the target would strand live dependents and neither
    /// cascade nor force was requested.
    #[error("cannot delete {id}: live dependents remain ({dependents:?})")]
    DependencyBlockedDelete {
        /// The delete target.
        id: String,
        /// The live dependents that would be stranded.
        dependents: Vec<String>,
    },

    /// Adding a dependency would create a cycle in the blocking graph.
    #[error("dependency {issue_id} -> {depends_on_id} would create a cycle")]
    CycleDetected {
        issue_id: String,
        depends_on_id: String,
    },

    /// The engine stayed busy through every retry attempt.
    #[error("database busy after {attempts} attempts")]
    Busy {
        /// Number of `BEGIN IMMEDIATE` attempts made.
        attempts: u32,
    },

    /// The operation was cancelled via its token.
    #[error("{operation} cancelled")]
    Cancelled {
        /// The operation that observed the cancellation.
        operation: String,
    },

    /// An unexpected FK or CHECK violation. Indicates a bug: the pipelines
    /// are supposed to reject these conditions before the engine sees them.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Failed to establish or use a connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// A transaction could not be started, committed, or rolled back.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// A schema migration step failed.
    #[error("migration {name} failed: {reason}")]
    Migration {
        /// Name of the failing step.
        name: String,
        /// Underlying error description.
        reason: String,
    },

    /// A raw SQLite query error.
    #[error("query error: {0}")]
    Query(#[from] rusqlite::Error),

    /// JSON serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used throughout the storage crate.
pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    /// Creates a [`StorageError::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Returns `true` if this is a [`StorageError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if the error is transient and the operation may
    /// succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Busy { .. } | Self::Connection(_) | Self::Transaction(_)
        )
    }
}
