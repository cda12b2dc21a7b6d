//! Project aggregate fold.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Folded, Reducer, decode_payload};
use crate::event::{AggregateType, Event, EventKind};

/// Current state of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectState {
    pub project_id: String,
    pub name: String,
    pub description: Option<String>,
    pub status: String,
    pub settings: Option<Value>,
    pub created_at_us: i64,
    pub updated_at_us: i64,
}

/// `ProjectCreated` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectCreated {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
}

/// `ProjectUpdated` payload. Absent fields leave state untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectUpdated {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
}

/// Decoded project event.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectEvent {
    Created(ProjectCreated),
    Updated(ProjectUpdated),
    Archived,
    Unknown,
}

impl ProjectEvent {
    #[must_use]
    pub fn decode(event: &Event) -> Self {
        if event.aggregate_type != AggregateType::Project {
            return Self::Unknown;
        }
        let decoded = match event.kind() {
            Some(EventKind::ProjectCreated) => decode_payload(event).map(Self::Created),
            Some(EventKind::ProjectUpdated) => decode_payload(event).map(Self::Updated),
            Some(EventKind::ProjectArchived) => Some(Self::Archived),
            _ => None,
        };
        decoded.unwrap_or(Self::Unknown)
    }
}

/// Fold for project histories.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectReducer;

impl Reducer for ProjectReducer {
    type State = ProjectState;

    fn apply(acc: Folded<ProjectState>, event: &Event) -> Folded<ProjectState> {
        let at = event.recorded_at_us;
        match (ProjectEvent::decode(event), acc) {
            (ProjectEvent::Created(created), Folded::Absent) => Folded::Live(ProjectState {
                project_id: event.aggregate_id.clone(),
                name: created.name,
                description: created.description,
                status: "active".to_string(),
                settings: created.settings,
                created_at_us: at,
                updated_at_us: at,
            }),
            (ProjectEvent::Updated(patch), acc) => acc.map_live(|mut state| {
                if let Some(name) = patch.name {
                    state.name = name;
                }
                if let Some(description) = patch.description {
                    state.description = Some(description);
                }
                if let Some(settings) = patch.settings {
                    state.settings = Some(settings);
                }
                state.updated_at_us = at;
                state
            }),
            (ProjectEvent::Archived, acc) => acc.map_live(|mut state| {
                state.status = "archived".to_string();
                state.updated_at_us = at;
                state
            }),
            (ProjectEvent::Created(_) | ProjectEvent::Unknown, acc) => acc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reduce::test_support::event;
    use serde_json::json;

    fn project_event(seq: i64, kind: &str, payload: Value) -> Event {
        event(AggregateType::Project, "p1", seq, kind, payload)
    }

    #[test]
    fn update_overlays_only_provided_fields() {
        let events = [
            project_event(1, "ProjectCreated", json!({"name": "Alpha", "description": "first"})),
            project_event(2, "ProjectUpdated", json!({"name": "Beta"})),
        ];
        let state = ProjectReducer::reduce(&events).expect("state");
        assert_eq!(state.name, "Beta");
        assert_eq!(state.description.as_deref(), Some("first"));
        assert_eq!(state.updated_at_us, 2_000_000);
        assert_eq!(state.created_at_us, 1_000_000);
    }

    #[test]
    fn archive_flips_status() {
        let events = [
            project_event(1, "ProjectCreated", json!({"name": "Alpha"})),
            project_event(2, "ProjectArchived", json!({})),
        ];
        let state = ProjectReducer::reduce(&events).expect("state");
        assert_eq!(state.status, "archived");
    }

    #[test]
    fn duplicate_create_does_not_reseed() {
        let events = [
            project_event(1, "ProjectCreated", json!({"name": "Alpha"})),
            project_event(2, "ProjectCreated", json!({"name": "Other"})),
        ];
        assert_eq!(ProjectReducer::reduce(&events).expect("state").name, "Alpha");
    }

    #[test]
    fn empty_history_has_no_state() {
        let history: [Event; 0] = [];
        assert_eq!(ProjectReducer::reduce(&history), None);
    }
}
