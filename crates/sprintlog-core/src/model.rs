//! Closed vocabularies used by commands and projections.
//!
//! Projections store these as text and reducers accept any string, so a log
//! written by a newer binary still replays. Validation against these enums
//! happens in the command service before events are appended.

use serde::{Deserialize, Serialize};

/// Task workflow status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    InReview,
    Done,
    Blocked,
}

impl TaskStatus {
    /// Board column order.
    pub const ALL: [Self; 5] = [
        Self::Todo,
        Self::InProgress,
        Self::InReview,
        Self::Done,
        Self::Blocked,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::InReview => "in_review",
            Self::Done => "done",
            Self::Blocked => "blocked",
        }
    }
}

/// Task priority, ranked critical (1) to low (4).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Sort rank used by list ordering (1 = most urgent).
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Critical => 1,
            Self::High => 2,
            Self::Medium => 3,
            Self::Low => 4,
        }
    }
}

/// Kind of work a task represents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Epic,
    Story,
    #[default]
    Task,
    Bug,
    Subtask,
}

impl TaskType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Epic => "epic",
            Self::Story => "story",
            Self::Task => "task",
            Self::Bug => "bug",
            Self::Subtask => "subtask",
        }
    }
}

/// Sprint lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SprintStatus {
    Planning,
    Active,
    Completed,
}

impl SprintStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }
}

/// How a project exchanges state with its GitHub repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    #[default]
    ReadOnly,
    Bidirectional,
    PushOnly,
}

impl SyncMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReadOnly => "read_only",
            Self::Bidirectional => "bidirectional",
            Self::PushOnly => "push_only",
        }
    }

    /// Whether remote changes may be applied locally.
    #[must_use]
    pub const fn pulls(self) -> bool {
        matches!(self, Self::ReadOnly | Self::Bidirectional)
    }

    /// Whether local changes may be written to the tracker.
    #[must_use]
    pub const fn pushes(self) -> bool {
        matches!(self, Self::PushOnly | Self::Bidirectional)
    }
}

/// Error returned when parsing an enum value from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {expected}: '{got}'")]
pub struct ParseEnumError {
    pub expected: &'static str,
    pub got: String,
}

pub(crate) fn normalize(input: &str) -> String {
    input.trim().to_ascii_lowercase().replace('-', "_")
}

macro_rules! text_enum {
    ($ty:ident, $expected:literal, [$($variant:ident),+ $(,)?]) => {
        impl ::std::fmt::Display for $ty {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::std::str::FromStr for $ty {
            type Err = $crate::model::ParseEnumError;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                let normalized = $crate::model::normalize(s);
                [$(Self::$variant),+]
                    .into_iter()
                    .find(|v| v.as_str() == normalized)
                    .ok_or_else(|| $crate::model::ParseEnumError {
                        expected: $expected,
                        got: s.to_string(),
                    })
            }
        }
    };
}

pub(crate) use text_enum;

text_enum!(TaskStatus, "status", [Todo, InProgress, InReview, Done, Blocked]);
text_enum!(Priority, "priority", [Critical, High, Medium, Low]);
text_enum!(TaskType, "task type", [Epic, Story, Task, Bug, Subtask]);
text_enum!(SprintStatus, "sprint status", [Planning, Active, Completed]);
text_enum!(SyncMode, "sync mode", [ReadOnly, Bidirectional, PushOnly]);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parsing_accepts_dashes_and_case() {
        assert_eq!("In-Progress".parse::<TaskStatus>(), Ok(TaskStatus::InProgress));
        assert_eq!(" done ".parse::<TaskStatus>(), Ok(TaskStatus::Done));
        let err = "shipped".parse::<TaskStatus>().expect_err("unknown status");
        assert_eq!(err.to_string(), "invalid status: 'shipped'");
    }

    #[test]
    fn priority_rank_orders_critical_first() {
        let mut all = vec![Priority::Low, Priority::Critical, Priority::Medium, Priority::High];
        all.sort_by_key(|p| p.rank());
        assert_eq!(
            all,
            vec![Priority::Critical, Priority::High, Priority::Medium, Priority::Low]
        );
    }

    #[test]
    fn display_matches_serde() {
        for status in TaskStatus::ALL {
            let json = serde_json::to_string(&status).expect("serialize");
            assert_eq!(json, format!("\"{status}\""));
        }
        assert_eq!(SyncMode::PushOnly.to_string(), "push_only");
    }

    #[test]
    fn sync_mode_directions() {
        assert!(SyncMode::ReadOnly.pulls() && !SyncMode::ReadOnly.pushes());
        assert!(SyncMode::PushOnly.pushes() && !SyncMode::PushOnly.pulls());
        assert!(SyncMode::Bidirectional.pulls() && SyncMode::Bidirectional.pushes());
    }
}
