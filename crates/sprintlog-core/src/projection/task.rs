//! Task read model, `seq` allocation and the board view.
//!
//! `seq` is a project-scoped number handed out the first time a task is
//! materialized. It survives every later resync, and `task_seq_counters`
//! keeps the high-water mark so a deleted task's number is never reissued.

use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use serde::{Deserialize, Serialize};

use super::decode_json_column;
use crate::db::with_transaction;
use crate::error::{EntityKind, Error, Result};
use crate::event::{AggregateType, EventStore};
use crate::model::TaskStatus;
use crate::reduce::{Reducer, TaskReducer, TaskState};

/// Page size used by [`TaskRepository::list`] when the filter has no limit.
pub const DEFAULT_LIST_LIMIT: u32 = 50;

const TASK_COLUMNS: &str = "task_id, seq, project_id, sprint_id, parent_id, title, description, \
     status, priority, task_type, estimate_points, estimate_hours, actual_hours, assignee, \
     labels_json, due_date, blocked_by, branch_name, linked_commits_json, linked_issues_json, \
     created_at_us, updated_at_us, started_at_us, completed_at_us";

const PRIORITY_ORDER: &str = "CASE priority \
     WHEN 'critical' THEN 1 WHEN 'high' THEN 2 WHEN 'medium' THEN 3 WHEN 'low' THEN 4 \
     ELSE 5 END";

/// A materialized task row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Project-scoped human-friendly number (`#42`).
    pub seq: i64,
    #[serde(flatten)]
    pub state: TaskState,
}

impl Task {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.state.task_id
    }

    /// Short reference used in terminal output and branch names.
    #[must_use]
    pub fn display_ref(&self) -> String {
        format!("#{}", self.seq)
    }
}

/// AND-combined list filter. `None` fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub project_id: Option<String>,
    pub sprint_id: Option<String>,
    pub status: Option<String>,
    pub assignee: Option<String>,
    pub task_type: Option<String>,
    pub priority: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl TaskFilter {
    #[must_use]
    pub fn for_project(project_id: &str) -> Self {
        Self {
            project_id: Some(project_id.to_string()),
            ..Self::default()
        }
    }
}

/// Direct, non-event-sourced field patch.
///
/// Only these columns may be patched. Status is absent on purpose: every
/// status transition goes through a `TaskStatusChanged` event. A later
/// resync rewrites the row from events, so an event-sourced field patched
/// here reverts on the next replay.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub task_type: Option<String>,
    pub estimate_points: Option<i64>,
    pub estimate_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    pub assignee: Option<String>,
    pub due_date: Option<String>,
    pub sprint_id: Option<String>,
}

/// Tasks grouped by status column. Statuses outside the five known columns
/// land in `other` instead of being dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Board {
    pub todo: Vec<Task>,
    pub in_progress: Vec<Task>,
    pub in_review: Vec<Task>,
    pub done: Vec<Task>,
    pub blocked: Vec<Task>,
    pub other: Vec<Task>,
}

impl Board {
    fn place(&mut self, task: Task) {
        let column = match task.state.status.parse::<TaskStatus>() {
            Ok(TaskStatus::Todo) => &mut self.todo,
            Ok(TaskStatus::InProgress) => &mut self.in_progress,
            Ok(TaskStatus::InReview) => &mut self.in_review,
            Ok(TaskStatus::Done) => &mut self.done,
            Ok(TaskStatus::Blocked) => &mut self.blocked,
            Err(_) => &mut self.other,
        };
        column.push(task);
    }

    /// Columns in display order, with their names.
    #[must_use]
    pub fn columns(&self) -> [(&'static str, &[Task]); 6] {
        [
            ("todo", self.todo.as_slice()),
            ("in_progress", self.in_progress.as_slice()),
            ("in_review", self.in_review.as_slice()),
            ("done", self.done.as_slice()),
            ("blocked", self.blocked.as_slice()),
            ("other", self.other.as_slice()),
        ]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns().iter().map(|(_, tasks)| tasks.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Tasks projection (`tasks` table).
#[derive(Debug, Clone, Copy)]
pub struct TaskRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> TaskRepository<'conn> {
    #[must_use]
    pub const fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Replay one task's events and upsert its row.
    ///
    /// An existing `seq` is kept. A first materialization allocates the next
    /// number for the task's project inside the same immediate transaction as
    /// the insert. Returns `None` when the task has no events or was deleted
    /// (any stale row is removed).
    ///
    /// # Errors
    ///
    /// Returns an error if reading events or writing the row fails.
    pub fn sync_from_events(&self, task_id: &str) -> Result<Option<Task>> {
        with_transaction(self.conn, |conn| {
            let events = EventStore::new(conn).get_events(AggregateType::Task, task_id, None)?;
            let Some(state) = TaskReducer::reduce(&events) else {
                conn.execute("DELETE FROM tasks WHERE task_id = ?1", params![task_id])?;
                return Ok(None);
            };

            let existing: Option<i64> = conn
                .query_row(
                    "SELECT seq FROM tasks WHERE task_id = ?1",
                    params![task_id],
                    |row| row.get(0),
                )
                .optional()?;
            let seq = match existing {
                Some(seq) => seq,
                None => allocate_seq(conn, &state.project_id)?,
            };

            upsert(conn, seq, &state)?;
            tracing::debug!(task_id, seq, "resynced task projection");
            Ok(Some(Task { seq, state }))
        })
    }

    /// # Errors
    ///
    /// Returns an error if the query fails or a JSON column is corrupt.
    pub fn get_by_id(&self, task_id: &str) -> Result<Option<Task>> {
        self.query_one("task_id = ?1", params![task_id])
    }

    /// # Errors
    ///
    /// Returns an error if the query fails or a JSON column is corrupt.
    pub fn get_by_seq(&self, project_id: &str, seq: i64) -> Result<Option<Task>> {
        self.query_one("project_id = ?1 AND seq = ?2", params![project_id, seq])
    }

    /// Look a task up by id, or by `seq` when the input is `42` or `#42`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn find_task(&self, project_id: &str, id_or_seq: &str) -> Result<Option<Task>> {
        match parse_seq_ref(id_or_seq) {
            Some(seq) => self.get_by_seq(project_id, seq),
            None => self.get_by_id(id_or_seq),
        }
    }

    /// Filtered page of tasks, most urgent first, then newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let limit = filter.limit.unwrap_or(DEFAULT_LIST_LIMIT);
        let offset = filter.offset.unwrap_or(0);
        self.select(filter, &format!(" LIMIT {limit} OFFSET {offset}"))
    }

    /// Every task in a sprint, unpaged.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_for_sprint(&self, sprint_id: &str) -> Result<Vec<Task>> {
        let filter = TaskFilter {
            sprint_id: Some(sprint_id.to_string()),
            ..TaskFilter::default()
        };
        self.select(&filter, "")
    }

    /// Tasks that link at least one tracker issue.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_with_issue_links(&self, project_id: &str) -> Result<Vec<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE project_id = ?1 AND linked_issues_json NOT IN ('', '[]')
             ORDER BY seq ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![project_id], TaskRow::from_row)?;
        rows.map(|row| row?.decode()).collect()
    }

    /// Board view for a project, optionally narrowed to one sprint.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_by_status(&self, project_id: &str, sprint_id: Option<&str>) -> Result<Board> {
        let filter = TaskFilter {
            project_id: Some(project_id.to_string()),
            sprint_id: sprint_id.map(str::to_string),
            ..TaskFilter::default()
        };
        let mut board = Board::default();
        for task in self.select(&filter, "")? {
            board.place(task);
        }
        Ok(board)
    }

    /// Apply a direct patch from the allow-list in [`TaskPatch`].
    ///
    /// Returns the row after patching, or `None` if the task does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn update(&self, task_id: &str, patch: &TaskPatch) -> Result<Option<Task>> {
        let mut sets: Vec<String> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        let mut set = |column: &str, value: Box<dyn rusqlite::types::ToSql>| {
            values.push(value);
            sets.push(format!("{column} = ?{}", values.len()));
        };

        if let Some(v) = &patch.title {
            set("title", Box::new(v.clone()));
        }
        if let Some(v) = &patch.description {
            set("description", Box::new(v.clone()));
        }
        if let Some(v) = &patch.priority {
            set("priority", Box::new(v.clone()));
        }
        if let Some(v) = &patch.task_type {
            set("task_type", Box::new(v.clone()));
        }
        if let Some(v) = patch.estimate_points {
            set("estimate_points", Box::new(v));
        }
        if let Some(v) = patch.estimate_hours {
            set("estimate_hours", Box::new(v));
        }
        if let Some(v) = patch.actual_hours {
            set("actual_hours", Box::new(v));
        }
        if let Some(v) = &patch.assignee {
            set("assignee", Box::new(v.clone()));
        }
        if let Some(v) = &patch.due_date {
            set("due_date", Box::new(v.clone()));
        }
        if let Some(v) = &patch.sprint_id {
            set("sprint_id", Box::new(v.clone()));
        }

        if !sets.is_empty() {
            values.push(Box::new(task_id.to_string()));
            let sql = format!(
                "UPDATE tasks SET {} WHERE task_id = ?{}",
                sets.join(", "),
                values.len()
            );
            let refs: Vec<&dyn rusqlite::types::ToSql> = values.iter().map(AsRef::as_ref).collect();
            self.conn.execute(&sql, params_from_iter(refs))?;
        }

        self.get_by_id(task_id)
    }

    /// Remove the projection row. Events and the `seq` high-water mark stay.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if there is no row for `task_id`.
    pub fn delete(&self, task_id: &str) -> Result<()> {
        let removed = self
            .conn
            .execute("DELETE FROM tasks WHERE task_id = ?1", params![task_id])?;
        if removed == 0 {
            return Err(Error::not_found(EntityKind::Task, task_id));
        }
        Ok(())
    }

    fn query_one(&self, condition: &str, params: impl rusqlite::Params) -> Result<Option<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE {condition}");
        let raw = self
            .conn
            .query_row(&sql, params, TaskRow::from_row)
            .optional()?;
        raw.map(TaskRow::decode).transpose()
    }

    fn select(&self, filter: &TaskFilter, page: &str) -> Result<Vec<Task>> {
        let mut conditions: Vec<String> = Vec::new();
        let mut values: Vec<String> = Vec::new();

        for (column, value) in [
            ("project_id", &filter.project_id),
            ("sprint_id", &filter.sprint_id),
            ("status", &filter.status),
            ("assignee", &filter.assignee),
            ("task_type", &filter.task_type),
            ("priority", &filter.priority),
        ] {
            if let Some(value) = value {
                values.push(value.clone());
                conditions.push(format!("{column} = ?{}", values.len()));
            }
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks{where_clause}
             ORDER BY {PRIORITY_ORDER}, created_at_us DESC, seq DESC{page}"
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), TaskRow::from_row)?;
        rows.map(|row| row?.decode()).collect()
    }
}

/// `42` or `#42` → `Some(42)`; anything else is treated as an id.
fn parse_seq_ref(raw: &str) -> Option<i64> {
    let digits = raw.strip_prefix('#').unwrap_or(raw);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Next `seq` for a project: one past both the live maximum and the
/// high-water mark, which is advanced in the same transaction.
fn allocate_seq(conn: &Connection, project_id: &str) -> Result<i64> {
    let live_max: i64 = conn.query_row(
        "SELECT COALESCE(MAX(seq), 0) FROM tasks WHERE project_id = ?1",
        params![project_id],
        |row| row.get(0),
    )?;
    let high_water: i64 = conn
        .query_row(
            "SELECT last_seq FROM task_seq_counters WHERE project_id = ?1",
            params![project_id],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0);

    let next = live_max.max(high_water) + 1;
    conn.execute(
        "INSERT INTO task_seq_counters (project_id, last_seq) VALUES (?1, ?2)
         ON CONFLICT(project_id) DO UPDATE SET last_seq = excluded.last_seq",
        params![project_id, next],
    )?;
    Ok(next)
}

fn upsert(conn: &Connection, seq: i64, state: &TaskState) -> Result<()> {
    let labels = serde_json::to_string(&state.labels)?;
    let commits = serde_json::to_string(&state.linked_commits)?;
    let issues = serde_json::to_string(&state.linked_issues)?;
    conn.execute(
        "INSERT INTO tasks (task_id, seq, project_id, sprint_id, parent_id, title, description,
                            status, priority, task_type, estimate_points, estimate_hours,
                            actual_hours, assignee, labels_json, due_date, blocked_by,
                            branch_name, linked_commits_json, linked_issues_json,
                            created_at_us, updated_at_us, started_at_us, completed_at_us)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                 ?18, ?19, ?20, ?21, ?22, ?23, ?24)
         ON CONFLICT(task_id) DO UPDATE SET
             project_id = excluded.project_id,
             sprint_id = excluded.sprint_id,
             parent_id = excluded.parent_id,
             title = excluded.title,
             description = excluded.description,
             status = excluded.status,
             priority = excluded.priority,
             task_type = excluded.task_type,
             estimate_points = excluded.estimate_points,
             estimate_hours = excluded.estimate_hours,
             actual_hours = excluded.actual_hours,
             assignee = excluded.assignee,
             labels_json = excluded.labels_json,
             due_date = excluded.due_date,
             blocked_by = excluded.blocked_by,
             branch_name = excluded.branch_name,
             linked_commits_json = excluded.linked_commits_json,
             linked_issues_json = excluded.linked_issues_json,
             created_at_us = excluded.created_at_us,
             updated_at_us = excluded.updated_at_us,
             started_at_us = excluded.started_at_us,
             completed_at_us = excluded.completed_at_us",
        params![
            state.task_id,
            seq,
            state.project_id,
            state.sprint_id,
            state.parent_id,
            state.title,
            state.description,
            state.status,
            state.priority,
            state.task_type,
            state.estimate_points,
            state.estimate_hours,
            state.actual_hours,
            state.assignee,
            labels,
            state.due_date,
            state.blocked_by,
            state.branch_name,
            commits,
            issues,
            state.created_at_us,
            state.updated_at_us,
            state.started_at_us,
            state.completed_at_us,
        ],
    )?;
    Ok(())
}

/// Row shape before JSON columns are decoded.
struct TaskRow {
    task_id: String,
    seq: i64,
    project_id: String,
    sprint_id: Option<String>,
    parent_id: Option<String>,
    title: String,
    description: Option<String>,
    status: String,
    priority: String,
    task_type: String,
    estimate_points: Option<i64>,
    estimate_hours: Option<f64>,
    actual_hours: Option<f64>,
    assignee: Option<String>,
    labels_json: Option<String>,
    due_date: Option<String>,
    blocked_by: Option<String>,
    branch_name: Option<String>,
    linked_commits_json: Option<String>,
    linked_issues_json: Option<String>,
    created_at_us: i64,
    updated_at_us: i64,
    started_at_us: Option<i64>,
    completed_at_us: Option<i64>,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            task_id: row.get(0)?,
            seq: row.get(1)?,
            project_id: row.get(2)?,
            sprint_id: row.get(3)?,
            parent_id: row.get(4)?,
            title: row.get(5)?,
            description: row.get(6)?,
            status: row.get(7)?,
            priority: row.get(8)?,
            task_type: row.get(9)?,
            estimate_points: row.get(10)?,
            estimate_hours: row.get(11)?,
            actual_hours: row.get(12)?,
            assignee: row.get(13)?,
            labels_json: row.get(14)?,
            due_date: row.get(15)?,
            blocked_by: row.get(16)?,
            branch_name: row.get(17)?,
            linked_commits_json: row.get(18)?,
            linked_issues_json: row.get(19)?,
            created_at_us: row.get(20)?,
            updated_at_us: row.get(21)?,
            started_at_us: row.get(22)?,
            completed_at_us: row.get(23)?,
        })
    }

    fn decode(self) -> Result<Task> {
        Ok(Task {
            seq: self.seq,
            state: TaskState {
                labels: decode_json_column(self.labels_json.as_deref())?,
                linked_commits: decode_json_column(self.linked_commits_json.as_deref())?,
                linked_issues: decode_json_column(self.linked_issues_json.as_deref())?,
                task_id: self.task_id,
                project_id: self.project_id,
                sprint_id: self.sprint_id,
                parent_id: self.parent_id,
                title: self.title,
                description: self.description,
                status: self.status,
                priority: self.priority,
                task_type: self.task_type,
                estimate_points: self.estimate_points,
                estimate_hours: self.estimate_hours,
                actual_hours: self.actual_hours,
                assignee: self.assignee,
                due_date: self.due_date,
                blocked_by: self.blocked_by,
                branch_name: self.branch_name,
                created_at_us: self.created_at_us,
                updated_at_us: self.updated_at_us,
                started_at_us: self.started_at_us,
                completed_at_us: self.completed_at_us,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::event::EventKind;
    use serde_json::{Value, json};

    fn append(conn: &Connection, task_id: &str, kind: EventKind, payload: Value) {
        EventStore::new(conn)
            .append(kind, task_id, payload, None)
            .expect("append");
    }

    fn create(conn: &Connection, task_id: &str, project: &str, payload: Value) -> Task {
        let mut body = json!({"projectId": project, "title": task_id});
        if let (Some(target), Value::Object(extra)) = (body.as_object_mut(), payload) {
            target.extend(extra);
        }
        append(conn, task_id, EventKind::TaskCreated, body);
        TaskRepository::new(conn)
            .sync_from_events(task_id)
            .expect("sync")
            .expect("task")
    }

    fn raw_row(conn: &Connection, task_id: &str) -> Vec<String> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = ?1");
        conn.query_row(&sql, params![task_id], |row| {
            (0..24_usize)
                .map(|i| row.get::<_, rusqlite::types::Value>(i).map(|v| format!("{v:?}")))
                .collect()
        })
        .expect("row")
    }

    #[test]
    fn seq_is_allocated_per_project() {
        let conn = open_in_memory().expect("store");
        assert_eq!(create(&conn, "a", "p1", json!({})).seq, 1);
        assert_eq!(create(&conn, "b", "p1", json!({})).seq, 2);
        assert_eq!(create(&conn, "c", "p2", json!({})).seq, 1);
    }

    #[test]
    fn resync_is_byte_identical_and_keeps_seq() {
        let conn = open_in_memory().expect("store");
        create(&conn, "a", "p1", json!({}));
        let task = create(&conn, "b", "p1", json!({"labels": ["x"]}));
        let repo = TaskRepository::new(&conn);

        let before = raw_row(&conn, "b");
        let again = repo.sync_from_events("b").expect("sync").expect("task");
        assert_eq!(again.seq, task.seq);
        assert_eq!(raw_row(&conn, "b"), before);

        append(&conn, "b", EventKind::TaskUpdated, json!({"title": "renamed"}));
        let updated = repo.sync_from_events("b").expect("sync").expect("task");
        assert_eq!(updated.seq, 2);
        assert_eq!(updated.state.title, "renamed");
    }

    #[test]
    fn deleted_seq_is_never_reused() {
        let conn = open_in_memory().expect("store");
        let repo = TaskRepository::new(&conn);
        create(&conn, "a", "p1", json!({}));
        create(&conn, "b", "p1", json!({}));
        repo.delete("b").expect("delete");
        assert_eq!(create(&conn, "c", "p1", json!({})).seq, 3);
        assert!(matches!(repo.delete("b"), Err(Error::NotFound { .. })));
    }

    #[test]
    fn deleted_event_removes_row_on_resync() {
        let conn = open_in_memory().expect("store");
        let repo = TaskRepository::new(&conn);
        create(&conn, "a", "p1", json!({}));
        append(&conn, "a", EventKind::TaskDeleted, json!({}));
        assert_eq!(repo.sync_from_events("a").expect("sync"), None);
        assert_eq!(repo.get_by_id("a").expect("get"), None);
    }

    #[test]
    fn find_task_accepts_seq_forms() {
        let conn = open_in_memory().expect("store");
        let repo = TaskRepository::new(&conn);
        create(&conn, "uuid-a", "p1", json!({}));
        create(&conn, "uuid-b", "p1", json!({}));

        let by_hash = repo.find_task("p1", "#2").expect("find").expect("task");
        assert_eq!(by_hash.id(), "uuid-b");
        let by_number = repo.find_task("p1", "1").expect("find").expect("task");
        assert_eq!(by_number.id(), "uuid-a");
        let by_id = repo.find_task("p1", "uuid-b").expect("find").expect("task");
        assert_eq!(by_id.seq, 2);
        assert_eq!(repo.find_task("p1", "#9").expect("find"), None);
        assert_eq!(parse_seq_ref("#"), None);
        assert_eq!(parse_seq_ref("12a"), None);
    }

    #[test]
    fn list_orders_by_priority_then_newest() {
        let conn = open_in_memory().expect("store");
        let repo = TaskRepository::new(&conn);
        create(&conn, "low", "p1", json!({"priority": "low"}));
        create(&conn, "crit", "p1", json!({"priority": "critical"}));
        create(&conn, "med-old", "p1", json!({}));
        create(&conn, "med-new", "p1", json!({}));
        create(&conn, "elsewhere", "p2", json!({"priority": "critical"}));

        let ids: Vec<String> = repo
            .list(&TaskFilter::for_project("p1"))
            .expect("list")
            .into_iter()
            .map(|t| t.state.task_id)
            .collect();
        assert_eq!(ids, vec!["crit", "med-new", "med-old", "low"]);

        let page = TaskFilter {
            limit: Some(2),
            offset: Some(1),
            ..TaskFilter::for_project("p1")
        };
        assert_eq!(repo.list(&page).expect("page").len(), 2);

        let filtered = TaskFilter {
            priority: Some("medium".into()),
            ..TaskFilter::for_project("p1")
        };
        assert_eq!(repo.list(&filtered).expect("filtered").len(), 2);
    }

    #[test]
    fn board_keeps_unknown_statuses_in_other() {
        let conn = open_in_memory().expect("store");
        let repo = TaskRepository::new(&conn);
        create(&conn, "a", "p1", json!({}));
        create(&conn, "b", "p1", json!({"status": "in_review"}));
        create(&conn, "c", "p1", json!({"status": "parked"}));

        let board = repo.get_by_status("p1", None).expect("board");
        assert_eq!(board.todo.len(), 1);
        assert_eq!(board.in_review.len(), 1);
        assert_eq!(board.other.len(), 1);
        assert_eq!(board.len(), 3);
    }

    #[test]
    fn direct_patch_respects_allow_list() {
        let conn = open_in_memory().expect("store");
        let repo = TaskRepository::new(&conn);
        create(&conn, "a", "p1", json!({}));

        let patched = repo
            .update(
                "a",
                &TaskPatch {
                    actual_hours: Some(3.5),
                    assignee: Some("ana".into()),
                    ..TaskPatch::default()
                },
            )
            .expect("update")
            .expect("task");
        assert_eq!(patched.state.actual_hours, Some(3.5));
        assert_eq!(patched.state.assignee.as_deref(), Some("ana"));
        assert_eq!(patched.state.status, "todo");

        let untouched = repo.update("a", &TaskPatch::default()).expect("noop");
        assert_eq!(untouched, Some(patched));
        assert_eq!(repo.update("missing", &TaskPatch::default()).expect("noop"), None);
    }

    #[test]
    fn issue_link_listing() {
        let conn = open_in_memory().expect("store");
        let repo = TaskRepository::new(&conn);
        create(&conn, "a", "p1", json!({}));
        create(&conn, "b", "p1", json!({}));
        append(&conn, "b", EventKind::TaskLinkedToIssue, json!({"issueNumber": 12}));
        repo.sync_from_events("b").expect("sync");

        let linked = repo.list_with_issue_links("p1").expect("linked");
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0].state.linked_issues, vec![12]);
    }
}
