//! Canonical SQLite schema for sprintlog.
//!
//! One database file holds both halves of the model:
//! - `events` is the append-only log and the only source of truth
//! - `projects`, `sprints`, `tasks` are disposable read models rebuilt by
//!   replaying `events` for an aggregate
//! - `task_seq_counters` remembers the highest `seq` ever handed out per
//!   project so deleted tasks never free their number
//! - `velocity_history` holds append-only facts written at sprint completion
//! - `project_config`, `task_sync_state`, `sync_queue` back the GitHub sync

/// Migration v1: event log, projections, sequence counters, velocity facts.
pub const MIGRATION_V1_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL,
    created_at_us INTEGER NOT NULL DEFAULT 0
);

INSERT OR IGNORE INTO store_meta (id, schema_version, created_at_us)
VALUES (1, 1, CAST(strftime('%s', 'now') AS INTEGER) * 1000000);

CREATE TABLE IF NOT EXISTS events (
    event_id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_type TEXT NOT NULL CHECK (length(trim(event_type)) > 0),
    aggregate_type TEXT NOT NULL CHECK (aggregate_type IN ('project', 'sprint', 'task')),
    aggregate_id TEXT NOT NULL CHECK (length(trim(aggregate_id)) > 0),
    sequence_number INTEGER NOT NULL CHECK (sequence_number > 0),
    payload TEXT NOT NULL,
    metadata TEXT,
    recorded_at_us INTEGER NOT NULL,
    UNIQUE (aggregate_type, aggregate_id, sequence_number)
);

CREATE TRIGGER IF NOT EXISTS events_no_update
BEFORE UPDATE ON events
BEGIN
    SELECT RAISE(ABORT, 'events are append-only');
END;

CREATE TRIGGER IF NOT EXISTS events_no_delete
BEFORE DELETE ON events
BEGIN
    SELECT RAISE(ABORT, 'events are append-only');
END;

CREATE TABLE IF NOT EXISTS projects (
    project_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    settings_json TEXT,
    created_at_us INTEGER NOT NULL,
    updated_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS sprints (
    sprint_id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    name TEXT NOT NULL,
    goal TEXT,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'planning',
    velocity_committed INTEGER NOT NULL DEFAULT 0,
    velocity_completed INTEGER NOT NULL DEFAULT 0,
    created_at_us INTEGER NOT NULL,
    updated_at_us INTEGER NOT NULL,
    started_at_us INTEGER,
    completed_at_us INTEGER
);

CREATE TABLE IF NOT EXISTS tasks (
    task_id TEXT PRIMARY KEY,
    seq INTEGER NOT NULL CHECK (seq > 0),
    project_id TEXT NOT NULL,
    sprint_id TEXT,
    parent_id TEXT,
    title TEXT NOT NULL,
    description TEXT,
    status TEXT NOT NULL,
    priority TEXT NOT NULL,
    task_type TEXT NOT NULL,
    estimate_points INTEGER,
    estimate_hours REAL,
    actual_hours REAL,
    assignee TEXT,
    labels_json TEXT NOT NULL DEFAULT '[]',
    due_date TEXT,
    blocked_by TEXT,
    branch_name TEXT,
    linked_commits_json TEXT NOT NULL DEFAULT '[]',
    linked_issues_json TEXT NOT NULL DEFAULT '[]',
    created_at_us INTEGER NOT NULL,
    updated_at_us INTEGER NOT NULL,
    started_at_us INTEGER,
    completed_at_us INTEGER,
    UNIQUE (project_id, seq)
);

CREATE TABLE IF NOT EXISTS task_seq_counters (
    project_id TEXT PRIMARY KEY,
    last_seq INTEGER NOT NULL CHECK (last_seq >= 0)
);

CREATE TABLE IF NOT EXISTS velocity_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id TEXT NOT NULL,
    sprint_id TEXT NOT NULL UNIQUE,
    committed_points INTEGER NOT NULL,
    completed_points INTEGER NOT NULL,
    completion_rate REAL NOT NULL,
    recorded_at_us INTEGER NOT NULL
);

CREATE TRIGGER IF NOT EXISTS velocity_history_no_update
BEFORE UPDATE ON velocity_history
BEGIN
    SELECT RAISE(ABORT, 'velocity history is append-only');
END;

CREATE INDEX IF NOT EXISTS idx_events_type_recorded
    ON events(event_type, recorded_at_us, event_id);

CREATE INDEX IF NOT EXISTS idx_sprints_project_status
    ON sprints(project_id, status);

CREATE INDEX IF NOT EXISTS idx_tasks_project_status
    ON tasks(project_id, status);

CREATE INDEX IF NOT EXISTS idx_tasks_sprint
    ON tasks(sprint_id);

CREATE INDEX IF NOT EXISTS idx_velocity_project_recorded
    ON velocity_history(project_id, recorded_at_us DESC);
"#;

/// Migration v2: GitHub integration settings, per-task sync markers, retry queue.
pub const MIGRATION_V2_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS project_config (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id TEXT NOT NULL UNIQUE,
    github_enabled INTEGER NOT NULL DEFAULT 0 CHECK (github_enabled IN (0, 1)),
    github_repo TEXT,
    github_project_id TEXT,
    github_project_number INTEGER,
    field_mappings TEXT,
    status_options TEXT,
    sync_mode TEXT NOT NULL DEFAULT 'read_only'
        CHECK (sync_mode IN ('read_only', 'bidirectional', 'push_only')),
    last_sync_at_us INTEGER,
    last_sync_cursor TEXT,
    created_at_us INTEGER NOT NULL,
    updated_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS task_sync_state (
    task_id TEXT PRIMARY KEY,
    issue_number INTEGER NOT NULL,
    last_synced_at_us INTEGER NOT NULL,
    remote_updated_at_us INTEGER
);

CREATE TABLE IF NOT EXISTS sync_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    action TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    payload TEXT NOT NULL DEFAULT '{}',
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'processing', 'completed', 'failed')),
    retry_count INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    created_at_us INTEGER NOT NULL,
    processed_at_us INTEGER
);

CREATE INDEX IF NOT EXISTS idx_sync_queue_status_created
    ON sync_queue(status, created_at_us, id);

CREATE INDEX IF NOT EXISTS idx_sync_queue_entity
    ON sync_queue(entity_type, entity_id);

CREATE INDEX IF NOT EXISTS idx_task_sync_state_issue
    ON task_sync_state(issue_number);
"#;

/// Indexes expected by list/board/queue query paths.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_events_type_recorded",
    "idx_sprints_project_status",
    "idx_tasks_project_status",
    "idx_tasks_sprint",
    "idx_velocity_project_recorded",
    "idx_sync_queue_status_created",
    "idx_sync_queue_entity",
    "idx_task_sync_state_issue",
];

/// Tables every fully migrated store must contain.
pub const REQUIRED_TABLES: &[&str] = &[
    "store_meta",
    "events",
    "projects",
    "sprints",
    "tasks",
    "task_seq_counters",
    "velocity_history",
    "project_config",
    "task_sync_state",
    "sync_queue",
];
