//! DDL statements and default configuration for the SQLite schema.
//!
//! Timestamps are stored as TEXT in ISO 8601 (SQLite has no native datetime
//! type). Booleans are INTEGER 0/1. JSON blobs are TEXT. Constraints the
//! engine can express live in the DDL itself: title length, priority range,
//! and the closed_at invariant (tombstones exempt, since they may retain a
//! pre-delete closed_at until the `tombstone_closed_at` migration clears it).

/// Core DDL, executed at first open. All statements are idempotent.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // -- Issues table --------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS issues (
        id                  TEXT PRIMARY KEY,
        content_hash        TEXT NOT NULL DEFAULT '',
        title               TEXT NOT NULL CHECK(length(title) <= 500),
        description         TEXT NOT NULL DEFAULT '',
        design              TEXT NOT NULL DEFAULT '',
        acceptance_criteria TEXT NOT NULL DEFAULT '',
        notes               TEXT NOT NULL DEFAULT '',
        status              TEXT NOT NULL DEFAULT 'open',
        priority            INTEGER NOT NULL DEFAULT 2 CHECK(priority >= 0 AND priority <= 4),
        issue_type          TEXT NOT NULL DEFAULT 'task',
        assignee            TEXT NOT NULL DEFAULT '',
        owner               TEXT NOT NULL DEFAULT '',
        estimated_minutes   INTEGER,
        created_at          TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        created_by          TEXT NOT NULL DEFAULT '',
        updated_at          TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        closed_at           TEXT,
        close_reason        TEXT NOT NULL DEFAULT '',
        closed_by_session   TEXT NOT NULL DEFAULT '',
        -- Tombstone lifecycle
        deleted_at          TEXT,
        deleted_by          TEXT NOT NULL DEFAULT '',
        delete_reason       TEXT NOT NULL DEFAULT '',
        original_type       TEXT NOT NULL DEFAULT '',
        -- Scheduling
        due_at              TEXT,
        defer_until         TEXT,
        -- External integration
        external_ref        TEXT,
        source_system       TEXT NOT NULL DEFAULT '',
        source_repo         TEXT NOT NULL DEFAULT '',
        -- Extension metadata (opaque JSON)
        metadata            TEXT NOT NULL DEFAULT '{}',
        -- Messaging / markers
        sender              TEXT NOT NULL DEFAULT '',
        ephemeral           INTEGER NOT NULL DEFAULT 0,
        pinned              INTEGER NOT NULL DEFAULT 0,
        is_template         INTEGER NOT NULL DEFAULT 0,
        crystallizes        INTEGER NOT NULL DEFAULT 0,
        -- Opaque classification
        mol_type            TEXT NOT NULL DEFAULT '',
        work_type           TEXT NOT NULL DEFAULT '',
        quality_score       REAL,
        -- Event payload columns
        event_kind          TEXT NOT NULL DEFAULT '',
        actor               TEXT NOT NULL DEFAULT '',
        target              TEXT NOT NULL DEFAULT '',
        payload             TEXT NOT NULL DEFAULT '',
        -- closed_at invariant: closed rows carry a timestamp, open rows do
        -- not; tombstones may carry either.
        CHECK (
            (status = 'closed' AND closed_at IS NOT NULL) OR
            (status = 'tombstone') OR
            (status NOT IN ('closed', 'tombstone') AND closed_at IS NULL)
        ),
        -- Tombstones always carry their delete bookkeeping.
        CHECK (
            status != 'tombstone' OR
            (deleted_at IS NOT NULL AND original_type != '')
        )
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_issues_status ON issues(status)",
    "CREATE INDEX IF NOT EXISTS idx_issues_priority ON issues(priority)",
    "CREATE INDEX IF NOT EXISTS idx_issues_issue_type ON issues(issue_type)",
    "CREATE INDEX IF NOT EXISTS idx_issues_assignee ON issues(assignee) WHERE assignee != ''",
    "CREATE INDEX IF NOT EXISTS idx_issues_created_at ON issues(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_issues_updated_at ON issues(updated_at)",
    "CREATE INDEX IF NOT EXISTS idx_issues_content_hash ON issues(content_hash)",
    "CREATE INDEX IF NOT EXISTS idx_issues_external_ref ON issues(external_ref) WHERE external_ref IS NOT NULL",
    "CREATE INDEX IF NOT EXISTS idx_issues_tombstone ON issues(status) WHERE status = 'tombstone'",
    // -- Dependencies --------------------------------------------------------
    // depends_on_id carries no FK so edges may point at issues that arrive
    // later (imports, external references); the pre-migration orphan sweep
    // keeps the table consistent.
    r#"
    CREATE TABLE IF NOT EXISTS dependencies (
        issue_id      TEXT NOT NULL,
        depends_on_id TEXT NOT NULL,
        type          TEXT NOT NULL DEFAULT 'blocks',
        created_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        created_by    TEXT NOT NULL DEFAULT '',
        metadata      TEXT NOT NULL DEFAULT '{}',
        thread_id     TEXT NOT NULL DEFAULT '',
        PRIMARY KEY (issue_id, depends_on_id),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_dependencies_issue ON dependencies(issue_id)",
    "CREATE INDEX IF NOT EXISTS idx_dependencies_depends_on ON dependencies(depends_on_id)",
    "CREATE INDEX IF NOT EXISTS idx_dependencies_depends_on_type ON dependencies(depends_on_id, type)",
    "CREATE INDEX IF NOT EXISTS idx_dependencies_thread ON dependencies(thread_id) WHERE thread_id != ''",
    // -- Labels --------------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS labels (
        issue_id TEXT NOT NULL,
        label    TEXT NOT NULL,
        PRIMARY KEY (issue_id, label),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_labels_label ON labels(label)",
    // -- Comments ------------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS comments (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        issue_id   TEXT NOT NULL,
        author     TEXT NOT NULL,
        text       TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_comments_issue ON comments(issue_id)",
    "CREATE INDEX IF NOT EXISTS idx_comments_created_at ON comments(created_at)",
    // -- Events (audit trail) ------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS events (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        issue_id    TEXT NOT NULL,
        event_type  TEXT NOT NULL,
        actor       TEXT NOT NULL DEFAULT '',
        old_value   TEXT,
        new_value   TEXT,
        comment     TEXT,
        created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_events_issue ON events(issue_id)",
    "CREATE INDEX IF NOT EXISTS idx_events_created_at ON events(created_at)",
    // -- Config and metadata -------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS config (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS metadata (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
    // -- Dirty set (incremental export) --------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS dirty_issues (
        issue_id  TEXT PRIMARY KEY,
        marked_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_dirty_issues_marked_at ON dirty_issues(marked_at)",
    // -- Export hashes (content-level dedup) ---------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS export_hashes (
        issue_id     TEXT PRIMARY KEY,
        content_hash TEXT NOT NULL,
        exported_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    // -- Child counters (hierarchical IDs) -----------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS child_counters (
        parent_id  TEXT PRIMARY KEY,
        last_child INTEGER NOT NULL DEFAULT 0,
        FOREIGN KEY (parent_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    // -- Repo mtimes (multi-repo scan bookkeeping) ---------------------------
    r#"
    CREATE TABLE IF NOT EXISTS repo_mtimes (
        repo_path    TEXT PRIMARY KEY,
        jsonl_path   TEXT NOT NULL DEFAULT '',
        mtime_ns     INTEGER NOT NULL DEFAULT 0,
        last_checked TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
    )
    "#,
    // -- Derived views -------------------------------------------------------
    // An issue is blocked when an active-status blocker reaches it through a
    // 'blocks' edge; the block propagates downward through 'parent-child'
    // edges, bounded at depth 50.
    r#"
    CREATE VIEW IF NOT EXISTS ready_issues AS
    WITH RECURSIVE blocked_set(issue_id, depth) AS (
        SELECT d.issue_id, 1
          FROM dependencies d
          JOIN issues blocker ON blocker.id = d.depends_on_id
         WHERE d.type = 'blocks'
           AND blocker.status IN ('open', 'in_progress', 'blocked', 'deferred', 'hooked')
        UNION
        SELECT d.issue_id, b.depth + 1
          FROM dependencies d
          JOIN blocked_set b ON b.issue_id = d.depends_on_id
         WHERE d.type = 'parent-child'
           AND b.depth < 50
    )
    SELECT i.* FROM issues i
     WHERE i.status = 'open'
       AND i.ephemeral = 0
       AND i.id NOT IN (SELECT issue_id FROM blocked_set)
    "#,
    r#"
    CREATE VIEW IF NOT EXISTS blocked_issues AS
    SELECT i.*,
           (SELECT COUNT(*)
              FROM dependencies d
              JOIN issues blocker ON blocker.id = d.depends_on_id
             WHERE d.issue_id = i.id
               AND d.type = 'blocks'
               AND blocker.status IN ('open', 'in_progress', 'blocked', 'deferred', 'hooked')
           ) AS blocked_by_count
      FROM issues i
     WHERE i.status IN ('open', 'in_progress', 'blocked', 'deferred', 'hooked')
       AND EXISTS (SELECT 1
              FROM dependencies d
              JOIN issues blocker ON blocker.id = d.depends_on_id
             WHERE d.issue_id = i.id
               AND d.type = 'blocks'
               AND blocker.status IN ('open', 'in_progress', 'blocked', 'deferred', 'hooked'))
    "#,
];

/// Default configuration seeded with `INSERT OR IGNORE` at first open.
///
/// `issue_prefix` is deliberately absent: creating issues before an explicit
/// prefix is configured is a `NotInitialized` error.
pub const DEFAULT_CONFIG: &[(&str, &str)] = &[
    ("hierarchy.max-depth", "3"),
    ("import.orphan_handling", "allow"),
    ("types.custom", ""),
    ("statuses.custom", ""),
    ("compaction_enabled", "false"),
    ("compact_tier1_days", "30"),
    ("compact_tier2_days", "90"),
    ("compact_model", ""),
    ("compact_batch_size", "50"),
    ("compact_parallel_workers", "5"),
    ("auto_compact_enabled", "false"),
];
