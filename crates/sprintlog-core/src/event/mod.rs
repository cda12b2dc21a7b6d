//! Event data model for the sprintlog event log.
//!
//! An [`Event`] is one immutable row of the append-only log. The payload is
//! an opaque JSON object; typed interpretation happens in the reducers so the
//! log can carry fields (and event types) this binary does not know about.

pub mod store;
pub mod types;

pub use store::EventStore;
pub use types::{AggregateType, EventKind, UnknownAggregateType, UnknownEventType};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Opaque key-value payload stored with each event.
pub type Payload = Map<String, Value>;

/// A single stored event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Store-assigned row id, global across aggregates.
    pub event_id: i64,

    /// Event type name as written to the log (e.g. `TaskCreated`).
    pub event_type: String,

    /// Aggregate root this event belongs to.
    pub aggregate_type: AggregateType,

    /// Durable id of the aggregate.
    pub aggregate_id: String,

    /// Type-specific payload.
    pub payload: Payload,

    /// Optional provenance metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EventMetadata>,

    /// 1-based, gap-free position within the aggregate's history.
    pub sequence_number: i64,

    /// Time the event was appended, in microseconds since the Unix epoch.
    pub recorded_at_us: i64,
}

impl Event {
    /// The known event kind, or `None` for types written by a newer binary.
    #[must_use]
    pub fn kind(&self) -> Option<EventKind> {
        self.event_type.parse().ok()
    }
}

/// Provenance attached to an event. Unknown keys are preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Who or what issued the command (user name, agent id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,

    /// Originating surface, e.g. `cli`, `github-sync`, `commit`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Groups events appended by one command.
    #[serde(
        default,
        rename = "correlationId",
        skip_serializing_if = "Option::is_none"
    )]
    pub correlation_id: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl EventMetadata {
    /// Metadata naming only the originating surface.
    #[must_use]
    pub fn from_source(source: &str) -> Self {
        Self {
            source: Some(source.to_string()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_preserves_unknown_keys() {
        let raw = json!({"actor": "ana", "correlationId": "c-1", "hostname": "box"});
        let meta: EventMetadata = serde_json::from_value(raw.clone()).expect("decode");
        assert_eq!(meta.actor.as_deref(), Some("ana"));
        assert_eq!(meta.correlation_id.as_deref(), Some("c-1"));
        assert_eq!(meta.extra.get("hostname"), Some(&json!("box")));
        assert_eq!(serde_json::to_value(&meta).expect("encode"), raw);
    }

    #[test]
    fn unknown_event_type_has_no_kind() {
        let event = Event {
            event_id: 1,
            event_type: "TaskTeleported".into(),
            aggregate_type: AggregateType::Task,
            aggregate_id: "t".into(),
            payload: Payload::new(),
            metadata: None,
            sequence_number: 1,
            recorded_at_us: 0,
        };
        assert_eq!(event.kind(), None);
    }
}
