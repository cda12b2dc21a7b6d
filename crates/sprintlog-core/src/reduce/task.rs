//! Task aggregate fold.
//!
//! Overlay events (`TaskUpdated`, `TaskEstimated`) only touch the fields they
//! carry. A field that is absent or `null` in the payload means "unchanged",
//! never "clear". Links accumulate; re-linking the same commit or issue is a
//! no-op.

use serde::{Deserialize, Serialize};

use super::{Folded, Reducer, decode_payload, instant_or_recorded};
use crate::event::{AggregateType, Event, EventKind};

/// Current state of a task, as materialized into the `tasks` projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub task_id: String,
    pub project_id: String,
    pub sprint_id: Option<String>,
    pub parent_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub priority: String,
    pub task_type: String,
    pub estimate_points: Option<i64>,
    pub estimate_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    pub assignee: Option<String>,
    pub labels: Vec<String>,
    pub due_date: Option<String>,
    pub blocked_by: Option<String>,
    pub branch_name: Option<String>,
    pub linked_commits: Vec<String>,
    pub linked_issues: Vec<i64>,
    pub created_at_us: i64,
    pub updated_at_us: i64,
    pub started_at_us: Option<i64>,
    pub completed_at_us: Option<i64>,
}

/// `TaskCreated` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCreated {
    pub project_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, rename = "type", alias = "taskType", skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sprint_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimate_points: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
}

/// `TaskUpdated` payload. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdated {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, rename = "type", alias = "taskType", skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_hours: Option<f64>,
}

impl TaskUpdated {
    /// True when the payload would change nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// `TaskEstimated` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEstimated {
    #[serde(default, alias = "estimatePoints", skip_serializing_if = "Option::is_none")]
    pub points: Option<i64>,
    #[serde(default, alias = "estimateHours", skip_serializing_if = "Option::is_none")]
    pub hours: Option<f64>,
}

/// `TaskStatusChanged` payload. The target may be written as `to`, `status`
/// or `toStatus`; the first present one wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusChanged {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl TaskStatusChanged {
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        self.to
            .as_deref()
            .or(self.status.as_deref())
            .or(self.to_status.as_deref())
    }
}

/// `TaskAddedToSprint` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAddedToSprint {
    pub sprint_id: String,
}

/// `TaskLinkedToCommit` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskLinkedToCommit {
    #[serde(alias = "sha")]
    pub commit_sha: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

/// `TaskLinkedToIssue` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskLinkedToIssue {
    pub issue_number: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Decoded task event.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    Created(TaskCreated),
    Updated(TaskUpdated),
    Estimated(TaskEstimated),
    StatusChanged(TaskStatusChanged),
    AddedToSprint(TaskAddedToSprint),
    RemovedFromSprint,
    LinkedToCommit(TaskLinkedToCommit),
    LinkedToIssue(TaskLinkedToIssue),
    Deleted,
    Unknown,
}

impl TaskEvent {
    #[must_use]
    pub fn decode(event: &Event) -> Self {
        if event.aggregate_type != AggregateType::Task {
            return Self::Unknown;
        }
        let decoded = match event.kind() {
            Some(EventKind::TaskCreated) => decode_payload(event).map(Self::Created),
            Some(EventKind::TaskUpdated) => decode_payload(event).map(Self::Updated),
            Some(EventKind::TaskEstimated) => decode_payload(event).map(Self::Estimated),
            Some(EventKind::TaskStatusChanged) => decode_payload(event).map(Self::StatusChanged),
            Some(EventKind::TaskAddedToSprint) => decode_payload(event).map(Self::AddedToSprint),
            Some(EventKind::TaskRemovedFromSprint) => Some(Self::RemovedFromSprint),
            Some(EventKind::TaskLinkedToCommit) => decode_payload(event).map(Self::LinkedToCommit),
            Some(EventKind::TaskLinkedToIssue) => decode_payload(event).map(Self::LinkedToIssue),
            Some(EventKind::TaskDeleted) => Some(Self::Deleted),
            _ => None,
        };
        decoded.unwrap_or(Self::Unknown)
    }
}

/// Fold for task histories.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskReducer;

impl Reducer for TaskReducer {
    type State = TaskState;

    fn apply(acc: Folded<TaskState>, event: &Event) -> Folded<TaskState> {
        let at = event.recorded_at_us;
        let decoded = TaskEvent::decode(event);
        match (decoded, acc) {
            (TaskEvent::Created(created), Folded::Absent) => Folded::Live(seed(created, event)),
            (TaskEvent::Deleted, Folded::Live(_)) => Folded::Deleted,
            (TaskEvent::Unknown | TaskEvent::Created(_) | TaskEvent::Deleted, acc) => acc,
            (other, acc) => acc.map_live(|mut state| {
                overlay(&mut state, other, event);
                state.updated_at_us = at;
                state
            }),
        }
    }
}

fn seed(created: TaskCreated, event: &Event) -> TaskState {
    let at = event.recorded_at_us;
    let status = created.status.unwrap_or_else(|| "todo".to_string());
    let started_at_us = (status == "in_progress").then_some(at);
    let completed_at_us = (status == "done").then_some(at);
    TaskState {
        task_id: event.aggregate_id.clone(),
        project_id: created.project_id,
        sprint_id: created.sprint_id,
        parent_id: created.parent_id,
        title: created.title,
        description: created.description,
        status,
        priority: created.priority.unwrap_or_else(|| "medium".to_string()),
        task_type: created.task_type.unwrap_or_else(|| "task".to_string()),
        estimate_points: created.estimate_points,
        estimate_hours: None,
        actual_hours: None,
        assignee: created.assignee,
        labels: created.labels.unwrap_or_default(),
        due_date: created.due_date,
        blocked_by: None,
        branch_name: created.branch_name,
        linked_commits: Vec::new(),
        linked_issues: Vec::new(),
        created_at_us: at,
        updated_at_us: at,
        started_at_us,
        completed_at_us,
    }
}

fn overlay(state: &mut TaskState, event: TaskEvent, raw: &Event) {
    match event {
        TaskEvent::Updated(patch) => apply_update(state, patch),
        TaskEvent::Estimated(estimate) => {
            if let Some(points) = estimate.points {
                state.estimate_points = Some(points);
            }
            if let Some(hours) = estimate.hours {
                state.estimate_hours = Some(hours);
            }
        }
        TaskEvent::StatusChanged(change) => apply_status(state, &change, raw),
        TaskEvent::AddedToSprint(added) => state.sprint_id = Some(added.sprint_id),
        TaskEvent::RemovedFromSprint => state.sprint_id = None,
        TaskEvent::LinkedToCommit(link) => {
            if !state.linked_commits.contains(&link.commit_sha) {
                state.linked_commits.push(link.commit_sha);
            }
        }
        TaskEvent::LinkedToIssue(link) => {
            if !state.linked_issues.contains(&link.issue_number) {
                state.linked_issues.push(link.issue_number);
            }
        }
        TaskEvent::Created(_) | TaskEvent::Deleted | TaskEvent::Unknown => {}
    }
}

fn apply_update(state: &mut TaskState, patch: TaskUpdated) {
    let TaskUpdated {
        title,
        description,
        priority,
        task_type,
        assignee,
        labels,
        due_date,
        parent_id,
        blocked_by,
        branch_name,
        actual_hours,
    } = patch;

    if let Some(title) = title {
        state.title = title;
    }
    if let Some(priority) = priority {
        state.priority = priority;
    }
    if let Some(task_type) = task_type {
        state.task_type = task_type;
    }
    if let Some(labels) = labels {
        state.labels = labels;
    }
    if let Some(hours) = actual_hours {
        state.actual_hours = Some(hours);
    }
    for (slot, value) in [
        (&mut state.description, description),
        (&mut state.assignee, assignee),
        (&mut state.due_date, due_date),
        (&mut state.parent_id, parent_id),
        (&mut state.blocked_by, blocked_by),
        (&mut state.branch_name, branch_name),
    ] {
        if value.is_some() {
            *slot = value;
        }
    }
}

fn apply_status(state: &mut TaskState, change: &TaskStatusChanged, event: &Event) {
    let Some(target) = change.target() else {
        return;
    };
    let when = instant_or_recorded(
        change
            .changed_at
            .as_deref()
            .or(change.completed_at.as_deref()),
        event,
    );

    match target {
        "in_progress" => {
            state.started_at_us.get_or_insert(when);
            state.completed_at_us = None;
        }
        "done" => {
            state.completed_at_us = Some(when);
        }
        "todo" => {
            state.started_at_us = None;
            state.completed_at_us = None;
        }
        _ => state.completed_at_us = None,
    }
    state.status = target.to_string();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reduce::test_support::event;
    use crate::timestamp::parse_rfc3339_us;
    use serde_json::{Value, json};

    fn task_event(seq: i64, kind: &str, payload: Value) -> Event {
        event(AggregateType::Task, "t1", seq, kind, payload)
    }

    fn created(payload: Value) -> Event {
        task_event(1, "TaskCreated", payload)
    }

    #[test]
    fn partial_update_keeps_priority() {
        let events = [
            created(json!({"projectId": "p1", "title": "A", "priority": "high"})),
            task_event(2, "TaskUpdated", json!({"title": "B"})),
        ];
        let state = TaskReducer::reduce(&events).expect("state");
        assert_eq!(state.title, "B");
        assert_eq!(state.priority, "high");
    }

    #[test]
    fn null_fields_do_not_clear_state() {
        let events = [
            created(json!({"projectId": "p1", "title": "A", "assignee": "ana"})),
            task_event(2, "TaskUpdated", json!({"assignee": null, "description": "d"})),
        ];
        let state = TaskReducer::reduce(&events).expect("state");
        assert_eq!(state.assignee.as_deref(), Some("ana"));
        assert_eq!(state.description.as_deref(), Some("d"));
    }

    #[test]
    fn created_applies_defaults() {
        let state = TaskReducer::reduce(&[created(json!({"projectId": "p1", "title": "A"}))])
            .expect("state");
        assert_eq!(state.status, "todo");
        assert_eq!(state.priority, "medium");
        assert_eq!(state.task_type, "task");
        assert!(state.labels.is_empty());
    }

    #[test]
    fn status_transitions_stamp_times() {
        let events = [
            created(json!({"projectId": "p1", "title": "A"})),
            task_event(2, "TaskStatusChanged", json!({"from": "todo", "to": "in_progress"})),
            task_event(3, "TaskStatusChanged", json!({"status": "in_review"})),
            task_event(4, "TaskStatusChanged", json!({"toStatus": "in_progress"})),
            task_event(5, "TaskStatusChanged", json!({"to": "done", "changedAt": "2026-03-05T10:00:00Z"})),
        ];
        let state = TaskReducer::reduce(&events).expect("state");
        assert_eq!(state.status, "done");
        assert_eq!(state.started_at_us, Some(2_000_000), "first start is kept");
        assert_eq!(state.completed_at_us, parse_rfc3339_us("2026-03-05T10:00:00Z"));
    }

    #[test]
    fn reopen_to_todo_clears_timestamps() {
        let events = [
            created(json!({"projectId": "p1", "title": "A"})),
            task_event(2, "TaskStatusChanged", json!({"to": "in_progress"})),
            task_event(3, "TaskStatusChanged", json!({"to": "done"})),
            task_event(4, "TaskStatusChanged", json!({"to": "todo"})),
        ];
        let state = TaskReducer::reduce(&events).expect("state");
        assert_eq!(state.started_at_us, None);
        assert_eq!(state.completed_at_us, None);
    }

    #[test]
    fn links_accumulate_without_duplicates() {
        let events = [
            created(json!({"projectId": "p1", "title": "A"})),
            task_event(2, "TaskLinkedToCommit", json!({"commitSha": "abc"})),
            task_event(3, "TaskLinkedToCommit", json!({"sha": "def"})),
            task_event(4, "TaskLinkedToCommit", json!({"commitSha": "abc"})),
            task_event(5, "TaskLinkedToIssue", json!({"issueNumber": 42})),
            task_event(6, "TaskLinkedToIssue", json!({"issueNumber": 7})),
        ];
        let state = TaskReducer::reduce(&events).expect("state");
        assert_eq!(state.linked_commits, vec!["abc", "def"]);
        assert_eq!(state.linked_issues, vec![42, 7]);
    }

    #[test]
    fn sprint_membership_and_estimates() {
        let events = [
            created(json!({"projectId": "p1", "title": "A"})),
            task_event(2, "TaskAddedToSprint", json!({"sprintId": "s1"})),
            task_event(3, "TaskEstimated", json!({"points": 5})),
            task_event(4, "TaskEstimated", json!({"hours": 2.5})),
        ];
        let state = TaskReducer::reduce(&events).expect("state");
        assert_eq!(state.sprint_id.as_deref(), Some("s1"));
        assert_eq!(state.estimate_points, Some(5));
        assert_eq!(state.estimate_hours, Some(2.5));

        let mut removed = events.to_vec();
        removed.push(task_event(5, "TaskRemovedFromSprint", json!({})));
        let state = TaskReducer::reduce(&removed).expect("state");
        assert_eq!(state.sprint_id, None);
    }

    #[test]
    fn unknown_events_are_noops() {
        let base = [created(json!({"projectId": "p1", "title": "A"}))];
        let with_unknown = [
            base[0].clone(),
            task_event(2, "TaskTeleported", json!({"to": "mars"})),
        ];
        let a = TaskReducer::reduce(&base).expect("state");
        let b = TaskReducer::reduce(&with_unknown).expect("state");
        assert_eq!(a, b);
    }

    #[test]
    fn deleted_is_terminal() {
        let events = [
            created(json!({"projectId": "p1", "title": "A"})),
            task_event(2, "TaskDeleted", json!({})),
            task_event(3, "TaskUpdated", json!({"title": "B"})),
            task_event(4, "TaskCreated", json!({"projectId": "p1", "title": "C"})),
        ];
        assert_eq!(TaskReducer::reduce(&events), None);
    }

    #[test]
    fn events_before_creation_are_ignored() {
        let events = [
            task_event(1, "TaskUpdated", json!({"title": "B"})),
            task_event(2, "TaskCreated", json!({"projectId": "p1", "title": "A"})),
        ];
        let state = TaskReducer::reduce(&events).expect("state");
        assert_eq!(state.title, "A");
        assert_eq!(state.created_at_us, 2_000_000);
    }

    #[test]
    fn reduce_is_deterministic() {
        let events = [
            created(json!({"projectId": "p1", "title": "A", "labels": ["x"]})),
            task_event(2, "TaskStatusChanged", json!({"to": "blocked"})),
            task_event(3, "TaskUpdated", json!({"blockedBy": "t0"})),
        ];
        assert_eq!(TaskReducer::reduce(&events), TaskReducer::reduce(&events));
    }
}
