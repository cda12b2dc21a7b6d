//! Known event types and the aggregates they belong to.
//!
//! The log stores the type as text. [`EventKind`] covers every type this
//! binary writes; anything else read back from the log stays a raw string and
//! folds as a no-op.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The three aggregate roots whose histories live in the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateType {
    Project,
    Sprint,
    Task,
}

impl AggregateType {
    /// All aggregate types in dependency order.
    pub const ALL: [Self; 3] = [Self::Project, Self::Sprint, Self::Task];

    /// Canonical lowercase name stored in the `aggregate_type` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Sprint => "sprint",
            Self::Task => "task",
        }
    }
}

impl fmt::Display for AggregateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown aggregate type string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown aggregate type '{raw}': expected one of project, sprint, task")]
pub struct UnknownAggregateType {
    /// The unrecognised input string.
    pub raw: String,
}

impl FromStr for AggregateType {
    type Err = UnknownAggregateType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "project" => Ok(Self::Project),
            "sprint" => Ok(Self::Sprint),
            "task" => Ok(Self::Task),
            _ => Err(UnknownAggregateType { raw: s.to_string() }),
        }
    }
}

/// Every event type written by sprintlog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ProjectCreated,
    ProjectUpdated,
    ProjectArchived,
    SprintCreated,
    SprintUpdated,
    SprintStarted,
    SprintCompleted,
    TaskCreated,
    TaskUpdated,
    TaskEstimated,
    TaskStatusChanged,
    TaskAddedToSprint,
    TaskRemovedFromSprint,
    TaskLinkedToCommit,
    TaskLinkedToIssue,
    TaskDeleted,
}

/// Error returned when parsing an unknown event type string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event type '{raw}'")]
pub struct UnknownEventType {
    /// The unrecognised input string.
    pub raw: String,
}

impl EventKind {
    /// All known event types in catalog order.
    pub const ALL: [Self; 16] = [
        Self::ProjectCreated,
        Self::ProjectUpdated,
        Self::ProjectArchived,
        Self::SprintCreated,
        Self::SprintUpdated,
        Self::SprintStarted,
        Self::SprintCompleted,
        Self::TaskCreated,
        Self::TaskUpdated,
        Self::TaskEstimated,
        Self::TaskStatusChanged,
        Self::TaskAddedToSprint,
        Self::TaskRemovedFromSprint,
        Self::TaskLinkedToCommit,
        Self::TaskLinkedToIssue,
        Self::TaskDeleted,
    ];

    /// Name stored in the `event_type` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ProjectCreated => "ProjectCreated",
            Self::ProjectUpdated => "ProjectUpdated",
            Self::ProjectArchived => "ProjectArchived",
            Self::SprintCreated => "SprintCreated",
            Self::SprintUpdated => "SprintUpdated",
            Self::SprintStarted => "SprintStarted",
            Self::SprintCompleted => "SprintCompleted",
            Self::TaskCreated => "TaskCreated",
            Self::TaskUpdated => "TaskUpdated",
            Self::TaskEstimated => "TaskEstimated",
            Self::TaskStatusChanged => "TaskStatusChanged",
            Self::TaskAddedToSprint => "TaskAddedToSprint",
            Self::TaskRemovedFromSprint => "TaskRemovedFromSprint",
            Self::TaskLinkedToCommit => "TaskLinkedToCommit",
            Self::TaskLinkedToIssue => "TaskLinkedToIssue",
            Self::TaskDeleted => "TaskDeleted",
        }
    }

    /// The aggregate this event type mutates.
    #[must_use]
    pub const fn aggregate_type(self) -> AggregateType {
        match self {
            Self::ProjectCreated | Self::ProjectUpdated | Self::ProjectArchived => {
                AggregateType::Project
            }
            Self::SprintCreated
            | Self::SprintUpdated
            | Self::SprintStarted
            | Self::SprintCompleted => AggregateType::Sprint,
            Self::TaskCreated
            | Self::TaskUpdated
            | Self::TaskEstimated
            | Self::TaskStatusChanged
            | Self::TaskAddedToSprint
            | Self::TaskRemovedFromSprint
            | Self::TaskLinkedToCommit
            | Self::TaskLinkedToIssue
            | Self::TaskDeleted => AggregateType::Task,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownEventType { raw: s.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fromstr_all_kinds() {
        for kind in EventKind::ALL {
            let parsed: EventKind = kind.as_str().parse().expect("should parse");
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn fromstr_rejects_unknown() {
        let err = "TaskTeleported".parse::<EventKind>().expect_err("unknown");
        assert_eq!(err.raw, "TaskTeleported");
        assert!(err.to_string().contains("TaskTeleported"));
    }

    #[test]
    fn aggregate_prefix_matches_kind_name() {
        for kind in EventKind::ALL {
            let aggregate = kind.aggregate_type().as_str();
            let prefix = kind.as_str().to_ascii_lowercase();
            assert!(prefix.starts_with(aggregate), "{kind} vs {aggregate}");
        }
    }

    #[test]
    fn aggregate_type_roundtrip() {
        for agg in AggregateType::ALL {
            assert_eq!(agg.as_str().parse::<AggregateType>(), Ok(agg));
        }
        assert!("epic".parse::<AggregateType>().is_err());
    }
}
