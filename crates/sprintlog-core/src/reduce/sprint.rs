//! Sprint aggregate fold.

use serde::{Deserialize, Serialize};

use super::{Folded, Reducer, decode_payload, instant_or_recorded};
use crate::event::{AggregateType, Event, EventKind};

/// Current state of a sprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SprintState {
    pub sprint_id: String,
    pub project_id: String,
    pub name: String,
    pub goal: Option<String>,
    pub start_date: String,
    pub end_date: String,
    pub status: String,
    pub velocity_committed: i64,
    pub velocity_completed: i64,
    pub created_at_us: i64,
    pub updated_at_us: i64,
    pub started_at_us: Option<i64>,
    pub completed_at_us: Option<i64>,
}

/// `SprintCreated` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SprintCreated {
    pub project_id: String,
    pub name: String,
    pub start_date: String,
    pub end_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
}

/// `SprintUpdated` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SprintUpdated {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
}

/// `SprintStarted` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SprintStarted {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
}

/// `SprintCompleted` payload, carrying the velocity snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SprintCompleted {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_points: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_points: Option<i64>,
}

/// Decoded sprint event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SprintEvent {
    Created(SprintCreated),
    Updated(SprintUpdated),
    Started(SprintStarted),
    Completed(SprintCompleted),
    Unknown,
}

impl SprintEvent {
    #[must_use]
    pub fn decode(event: &Event) -> Self {
        if event.aggregate_type != AggregateType::Sprint {
            return Self::Unknown;
        }
        let decoded = match event.kind() {
            Some(EventKind::SprintCreated) => decode_payload(event).map(Self::Created),
            Some(EventKind::SprintUpdated) => decode_payload(event).map(Self::Updated),
            Some(EventKind::SprintStarted) => decode_payload(event).map(Self::Started),
            Some(EventKind::SprintCompleted) => decode_payload(event).map(Self::Completed),
            _ => None,
        };
        decoded.unwrap_or(Self::Unknown)
    }
}

/// Fold for sprint histories.
#[derive(Debug, Clone, Copy, Default)]
pub struct SprintReducer;

impl Reducer for SprintReducer {
    type State = SprintState;

    fn apply(acc: Folded<SprintState>, event: &Event) -> Folded<SprintState> {
        let at = event.recorded_at_us;
        match (SprintEvent::decode(event), acc) {
            (SprintEvent::Created(created), Folded::Absent) => Folded::Live(SprintState {
                sprint_id: event.aggregate_id.clone(),
                project_id: created.project_id,
                name: created.name,
                goal: created.goal,
                start_date: created.start_date,
                end_date: created.end_date,
                status: "planning".to_string(),
                velocity_committed: 0,
                velocity_completed: 0,
                created_at_us: at,
                updated_at_us: at,
                started_at_us: None,
                completed_at_us: None,
            }),
            (SprintEvent::Updated(patch), acc) => acc.map_live(|mut state| {
                if let Some(name) = patch.name {
                    state.name = name;
                }
                if let Some(goal) = patch.goal {
                    state.goal = Some(goal);
                }
                if let Some(start) = patch.start_date {
                    state.start_date = start;
                }
                if let Some(end) = patch.end_date {
                    state.end_date = end;
                }
                state.updated_at_us = at;
                state
            }),
            (SprintEvent::Started(started), acc) => acc.map_live(|mut state| {
                state.status = "active".to_string();
                state.started_at_us = Some(instant_or_recorded(started.started_at.as_deref(), event));
                state.updated_at_us = at;
                state
            }),
            (SprintEvent::Completed(done), acc) => acc.map_live(|mut state| {
                state.status = "completed".to_string();
                state.completed_at_us =
                    Some(instant_or_recorded(done.completed_at.as_deref(), event));
                if let Some(total) = done.total_points {
                    state.velocity_committed = total;
                }
                if let Some(completed) = done.completed_points {
                    state.velocity_completed = completed;
                }
                state.updated_at_us = at;
                state
            }),
            (SprintEvent::Created(_) | SprintEvent::Unknown, acc) => acc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reduce::test_support::event;
    use crate::timestamp::parse_rfc3339_us;
    use serde_json::{Value, json};

    fn sprint_event(seq: i64, kind: &str, payload: Value) -> Event {
        event(AggregateType::Sprint, "s1", seq, kind, payload)
    }

    fn created() -> Event {
        sprint_event(
            1,
            "SprintCreated",
            json!({"projectId": "p1", "name": "S1", "startDate": "2026-03-01", "endDate": "2026-03-14"}),
        )
    }

    #[test]
    fn lifecycle_sets_status_and_velocity() {
        let events = [
            created(),
            sprint_event(2, "SprintStarted", json!({"startedAt": "2026-03-01T09:00:00Z"})),
            sprint_event(3, "SprintCompleted", json!({"totalPoints": 13, "completedPoints": 8})),
        ];
        let state = SprintReducer::reduce(&events).expect("state");
        assert_eq!(state.status, "completed");
        assert_eq!(state.started_at_us, parse_rfc3339_us("2026-03-01T09:00:00Z"));
        assert_eq!(state.completed_at_us, Some(3_000_000));
        assert_eq!((state.velocity_committed, state.velocity_completed), (13, 8));
    }

    #[test]
    fn update_keeps_unmentioned_dates() {
        let events = [created(), sprint_event(2, "SprintUpdated", json!({"endDate": "2026-03-21"}))];
        let state = SprintReducer::reduce(&events).expect("state");
        assert_eq!(state.start_date, "2026-03-01");
        assert_eq!(state.end_date, "2026-03-21");
        assert_eq!(state.status, "planning");
    }

    #[test]
    fn malformed_payload_is_a_noop() {
        let events = [
            created(),
            sprint_event(2, "SprintCompleted", json!({"totalPoints": "lots"})),
        ];
        let state = SprintReducer::reduce(&events).expect("state");
        assert_eq!(state.status, "planning");
    }
}
