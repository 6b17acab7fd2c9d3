//! End-to-end scenarios for the batch-create and tombstoning pipelines.

use chrono::{Duration, TimeZone, Utc};

use spool_core::dependency::Dependency;
use spool_core::enums::{DependencyType, OrphanPolicy, Status};
use spool_core::issue::{Issue, IssueBuilder};
use spool_storage::{
    CancelToken, CreateOptions, DeleteOptions, SqliteStore, Storage, StorageError,
};

fn open_store(prefix: &str) -> SqliteStore {
    let store = SqliteStore::open_in_memory().unwrap();
    store.set_config("issue_prefix", prefix).unwrap();
    store
}

fn create_batch(
    store: &SqliteStore,
    issues: &mut [Issue],
    policy: OrphanPolicy,
) -> spool_storage::error::Result<spool_storage::BatchOutcome> {
    store.create_issues_with_full_options(
        issues,
        "test-actor",
        &CreateOptions::with_policy(policy),
        &CancelToken::new(),
    )
}

#[test]
fn batch_create_with_generated_ids() {
    let store = open_store("bd");
    let mut batch = vec![
        IssueBuilder::new("A").priority(1).issue_type("task".into()).build(),
        IssueBuilder::new("B").priority(2).issue_type("bug".into()).build(),
        IssueBuilder::new("C").priority(1).issue_type("feature".into()).build(),
    ];

    let outcome = create_batch(&store, &mut batch, OrphanPolicy::Resurrect).unwrap();
    assert_eq!(outcome.created.len(), 3);

    let mut seen = std::collections::HashSet::new();
    for issue in &batch {
        // bd-[0-9a-z]{3,8}
        let suffix = issue
            .id
            .strip_prefix("bd-")
            .unwrap_or_else(|| panic!("{} lacks prefix", issue.id));
        assert!((3..=8).contains(&suffix.len()));
        assert!(
            suffix
                .bytes()
                .all(|b| b.is_ascii_digit() || b.is_ascii_lowercase())
        );
        assert!(seen.insert(issue.id.clone()), "ids must be distinct");

        let row = store.get_issue(&issue.id).unwrap();
        assert!(!row.content_hash.is_empty());

        let events = store.get_events(&issue.id, 0).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, spool_core::enums::EventType::Created);
    }

    let dirty = store.get_dirty_issues().unwrap();
    for issue in &batch {
        assert!(dirty.contains(&issue.id), "{} must be dirty", issue.id);
    }
}

#[test]
fn rollback_on_invalid_member() {
    let store = open_store("bd");
    let mut batch = vec![
        IssueBuilder::new("ok").build(),
        IssueBuilder::new("").build(),
    ];

    let err = create_batch(&store, &mut batch, OrphanPolicy::Resurrect).unwrap_err();
    assert!(matches!(err, StorageError::Validation(_)));

    // Nothing landed: no rows, no events, no dirty marks.
    let all = store.search_issues("", &Default::default()).unwrap();
    assert!(all.is_empty());
    assert!(store.get_all_events_since(0).unwrap().is_empty());
    assert!(store.get_dirty_issues().unwrap().is_empty());
}

#[test]
fn duplicate_existing_id_is_collision_not_integrity() {
    let store = open_store("bd");
    let mut first = vec![IssueBuilder::new("first").id("bd-x").build()];
    create_batch(&store, &mut first, OrphanPolicy::Resurrect).unwrap();
    let events_before = store.get_all_events_since(0).unwrap().len();

    let mut batch = vec![
        IssueBuilder::new("new").build(),
        IssueBuilder::new("dup").id("bd-x").build(),
    ];
    let err = create_batch(&store, &mut batch, OrphanPolicy::Resurrect).unwrap_err();
    assert!(
        matches!(err, StorageError::IdAlreadyExists { ref id } if id == "bd-x"),
        "expected a clean collision error, got {err:?}"
    );

    let row = store.get_issue("bd-x").unwrap();
    assert_eq!(row.title, "first");
    assert_eq!(store.get_all_events_since(0).unwrap().len(), events_before);
}

#[test]
fn hierarchical_child_under_each_policy() {
    // Strict: abort.
    let store = open_store("test");
    let mut batch = vec![IssueBuilder::new("child").id("test-abc.1").build()];
    let err = create_batch(&store, &mut batch, OrphanPolicy::Strict).unwrap_err();
    assert!(matches!(err, StorageError::ParentMissing { .. }));

    // Allow: child persisted without a parent row.
    let store = open_store("test");
    let mut batch = vec![IssueBuilder::new("child").id("test-abc.1").build()];
    create_batch(&store, &mut batch, OrphanPolicy::Allow).unwrap();
    assert!(store.get_issue("test-abc.1").is_ok());

    // Resurrect with the parent in the same batch: both land.
    let store = open_store("test");
    let mut batch = vec![
        IssueBuilder::new("child").id("test-abc.1").build(),
        IssueBuilder::new("parent").id("test-abc").build(),
    ];
    let outcome = create_batch(&store, &mut batch, OrphanPolicy::Resurrect).unwrap();
    assert_eq!(outcome.created.len(), 2);
    assert!(store.get_issue("test-abc").is_ok());
    assert!(store.get_issue("test-abc.1").is_ok());

    // Skip: the child is silently dropped and reported.
    let store = open_store("test");
    let mut batch = vec![IssueBuilder::new("child").id("test-abc.1").build()];
    let outcome = create_batch(&store, &mut batch, OrphanPolicy::Skip).unwrap();
    assert!(outcome.created.is_empty());
    assert_eq!(outcome.skipped, vec!["test-abc.1"]);
    assert!(store.get_issue("test-abc.1").unwrap_err().is_not_found());
}

#[test]
fn tombstoning_closed_issue_clears_closed_at() {
    let store = open_store("bd");
    let t = Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap();
    let mut batch = vec![
        IssueBuilder::new("was closed")
            .id("bd-closed-10")
            .status(Status::Closed)
            .created_at(t)
            .updated_at(t)
            .closed_at(t)
            .build(),
    ];
    create_batch(&store, &mut batch, OrphanPolicy::Resurrect).unwrap();

    let result = store
        .delete_issues(
            &["bd-closed-10".to_string()],
            &DeleteOptions {
                cascade: false,
                force: true,
                dry_run: false,
            },
            "test-actor",
            &CancelToken::new(),
        )
        .unwrap();
    assert_eq!(result.deleted_count, 1);

    let row = store.get_issue("bd-closed-10").unwrap();
    assert_eq!(row.status, Status::Tombstone);
    assert!(row.deleted_at.is_some());
    assert_eq!(row.closed_at, None, "tombstoning must clear closed_at");
    assert_eq!(row.original_type, "task");
}

#[test]
fn cascade_delete_of_blocking_chain() {
    let store = open_store("bd");
    for id in ["bd-1", "bd-2", "bd-3"] {
        let mut issue = IssueBuilder::new(format!("issue {id}")).id(id).build();
        store.create_issue(&mut issue, "test-actor").unwrap();
    }
    // bd-1 <- bd-2 <- bd-3 over blocks edges.
    store
        .add_dependency(
            &Dependency::new("bd-2", "bd-1", DependencyType::Blocks, "test-actor"),
            "test-actor",
        )
        .unwrap();
    store
        .add_dependency(
            &Dependency::new("bd-3", "bd-2", DependencyType::Blocks, "test-actor"),
            "test-actor",
        )
        .unwrap();

    let result = store
        .delete_issues(
            &["bd-1".to_string()],
            &DeleteOptions {
                cascade: true,
                force: false,
                dry_run: false,
            },
            "test-actor",
            &CancelToken::new(),
        )
        .unwrap();
    assert_eq!(result.deleted_count, 3);

    for id in ["bd-1", "bd-2", "bd-3"] {
        assert_eq!(store.get_issue(id).unwrap().status, Status::Tombstone);
    }
}

#[test]
fn defensive_closed_at_on_import() {
    let store = open_store("bd");
    let t = Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap();
    let mut batch = vec![
        IssueBuilder::new("imported closed")
            .status(Status::Closed)
            .created_at(t)
            .updated_at(t + Duration::hours(1))
            .build(),
    ];
    create_batch(&store, &mut batch, OrphanPolicy::Resurrect).unwrap();

    let row = store.get_issue(&batch[0].id).unwrap();
    assert_eq!(
        row.closed_at,
        Some(t + Duration::hours(1) + Duration::seconds(1)),
        "closed_at = max(created_at, updated_at) + 1s"
    );
}

#[test]
fn dotted_prefix_ids_stay_top_level() {
    let store = open_store("my.project");
    let mut batch = vec![IssueBuilder::new("top").id("my.project-abc123").build()];
    // Not hierarchical: no parent lookup even under Strict.
    create_batch(&store, &mut batch, OrphanPolicy::Strict).unwrap();
    assert!(store.get_issue("my.project-abc123").is_ok());

    // The dotted-suffix form IS hierarchical with the dotted top as parent.
    let mut child = vec![IssueBuilder::new("child").id("my.project-abc123.1").build()];
    create_batch(&store, &mut child, OrphanPolicy::Strict).unwrap();

    let child = store.get_issue("my.project-abc123.1").unwrap();
    assert_eq!(child.id, "my.project-abc123.1");
}

#[test]
fn skip_outcome_commits_the_rest_of_the_batch() {
    let store = open_store("test");
    let mut batch = vec![
        IssueBuilder::new("keeper one").build(),
        IssueBuilder::new("orphan child").id("test-missing.2").build(),
        IssueBuilder::new("keeper two").build(),
    ];
    let outcome = create_batch(&store, &mut batch, OrphanPolicy::Skip).unwrap();

    assert_eq!(outcome.created.len(), 2);
    assert_eq!(outcome.skipped, vec!["test-missing.2"]);
    for id in &outcome.created {
        assert!(store.get_issue(id).is_ok());
    }
}
