//! Pure folds from an aggregate's event history to its current state.
//!
//! Each aggregate has a closed event enum ([`ProjectEvent`], [`SprintEvent`],
//! [`TaskEvent`]) decoded from the stored [`Event`]. Anything the binary does
//! not understand (new event types, payloads that fail to decode) becomes the
//! `Unknown` arm and folds as a no-op, so old binaries can replay new logs.
//!
//! Reducers never read the wall clock: every timestamp comes from the event
//! itself (`recorded_at_us`, or an explicit instant in the payload).

pub mod project;
pub mod sprint;
pub mod task;

pub use project::{ProjectEvent, ProjectReducer, ProjectState};
pub use sprint::{SprintEvent, SprintReducer, SprintState};
pub use task::{TaskEvent, TaskReducer, TaskState};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::event::Event;
use crate::timestamp::parse_rfc3339_us;

/// Fold accumulator.
///
/// `Deleted` is terminal: once an aggregate has been deleted, later events in
/// its history are ignored instead of resurrecting it.
#[derive(Debug, Clone, PartialEq)]
pub enum Folded<S> {
    Absent,
    Live(S),
    Deleted,
}

impl<S> Folded<S> {
    /// Current state, or `None` when the aggregate never existed or was
    /// deleted.
    #[must_use]
    pub fn into_state(self) -> Option<S> {
        match self {
            Self::Live(state) => Some(state),
            Self::Absent | Self::Deleted => None,
        }
    }

    /// Apply `f` to live state; absent and deleted accumulators pass through.
    #[must_use]
    pub fn map_live(self, f: impl FnOnce(S) -> S) -> Self {
        match self {
            Self::Live(state) => Self::Live(f(state)),
            other => other,
        }
    }
}

/// Deterministic fold over one aggregate's ordered events.
pub trait Reducer {
    /// Materialized state produced by the fold.
    type State;

    /// Fold a single event into the accumulator.
    fn apply(acc: Folded<Self::State>, event: &Event) -> Folded<Self::State>;

    /// Fold a whole history. Empty input yields `None`.
    fn reduce<'a, I>(events: I) -> Option<Self::State>
    where
        I: IntoIterator<Item = &'a Event>,
    {
        events
            .into_iter()
            .fold(Folded::Absent, Self::apply)
            .into_state()
    }
}

/// Decode an event payload into a typed struct.
///
/// A payload that does not fit is logged and reported as `None`; the caller
/// folds the event as a no-op.
pub(crate) fn decode_payload<T: DeserializeOwned>(event: &Event) -> Option<T> {
    match serde_json::from_value(Value::Object(event.payload.clone())) {
        Ok(payload) => Some(payload),
        Err(err) => {
            tracing::warn!(
                event_id = event.event_id,
                event_type = %event.event_type,
                aggregate_id = %event.aggregate_id,
                error = %err,
                "skipping event with undecodable payload"
            );
            None
        }
    }
}

/// Instant named in a payload (RFC 3339), falling back to the record time.
pub(crate) fn instant_or_recorded(raw: Option<&str>, event: &Event) -> i64 {
    raw.and_then(parse_rfc3339_us)
        .unwrap_or(event.recorded_at_us)
}
