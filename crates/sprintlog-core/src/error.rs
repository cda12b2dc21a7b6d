//! Error taxonomy for the sprintlog engine.
//!
//! [`ErrorCode`] gives every failure a stable machine-readable identifier so
//! agents driving the CLI can branch on it; [`Error`] is the typed error
//! returned by store, repository and service calls.
//!
//! Sync conflicts are deliberately absent here: the sync engine reports them
//! as data (`SyncConflict`) so batch runs can carry on.

use std::fmt;
use std::path::PathBuf;

use crate::lock::LockError;
use crate::model::ParseEnumError;
use crate::sync::TrackerError;

/// Machine-readable error codes for agent-friendly decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotInitialized,
    ConfigParseError,
    AggregateNotFound,
    InvalidInput,
    InvalidStatus,
    ParentNotFound,
    SeqCollision,
    StorageFailure,
    CorruptPayload,
    LockContention,
    TrackerUnavailable,
    TrackerUnauthenticated,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotInitialized => "E1001",
            Self::ConfigParseError => "E1002",
            Self::AggregateNotFound => "E2001",
            Self::InvalidInput => "E2002",
            Self::InvalidStatus => "E2003",
            Self::ParentNotFound => "E2004",
            Self::SeqCollision => "E3001",
            Self::StorageFailure => "E3002",
            Self::CorruptPayload => "E3003",
            Self::LockContention => "E5001",
            Self::TrackerUnavailable => "E6001",
            Self::TrackerUnauthenticated => "E6002",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotInitialized => "Store not initialized",
            Self::ConfigParseError => "Config file parse error",
            Self::AggregateNotFound => "Project, sprint or task not found",
            Self::InvalidInput => "Invalid command input",
            Self::InvalidStatus => "Invalid task status",
            Self::ParentNotFound => "Parent task not found",
            Self::SeqCollision => "Task sequence number collision",
            Self::StorageFailure => "Durable storage write failed",
            Self::CorruptPayload => "Event payload could not be encoded or decoded",
            Self::LockContention => "Lock contention",
            Self::TrackerUnavailable => "Issue tracker unavailable",
            Self::TrackerUnauthenticated => "Issue tracker not authenticated",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators and agents.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run `sprintlog project create` to initialize the store."),
            Self::ConfigParseError => Some("Fix syntax in .sprintlog/config.toml and retry."),
            Self::AggregateNotFound | Self::InvalidInput => None,
            Self::InvalidStatus => {
                Some("Use one of: todo, in_progress, in_review, done, blocked.")
            }
            Self::ParentNotFound => Some("Create the parent task in the same project first."),
            Self::SeqCollision => Some("Retry the command; sequence allocation is serialized."),
            Self::StorageFailure => Some("Check disk space and write permissions."),
            Self::CorruptPayload => Some("Inspect the event log; projections can be rebuilt."),
            Self::LockContention => Some("Retry after the other `sprintlog` process exits."),
            Self::TrackerUnavailable => {
                Some("The action was queued; run `sprintlog sync queue` later.")
            }
            Self::TrackerUnauthenticated => Some("Set GITHUB_TOKEN or `github.token` in config."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Kind of entity a lookup failed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Project,
    Sprint,
    Task,
    QueueItem,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Project => "project",
            Self::Sprint => "sprint",
            Self::Task => "task",
            Self::QueueItem => "sync queue item",
        })
    }
}

/// Errors raised by the event store, repositories and command service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No store exists at the configured path.
    #[error("store not initialized at {}", .0.display())]
    NotInitialized(PathBuf),

    /// A write path required an aggregate that does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    /// Command input was rejected before any event was appended.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A status, priority, type or mode string outside its vocabulary.
    #[error("validation failed: {0}")]
    InvalidValue(#[from] ParseEnumError),

    /// A sync queue item was asked to move from a status it is not in.
    #[error("sync queue item {id} is {status}, expected {expected}")]
    QueueState {
        id: i64,
        status: String,
        expected: &'static str,
    },

    /// A parent reference that does not resolve inside the task's project.
    #[error("parent task not found: {0}")]
    ParentNotFound(String),

    /// The durable medium rejected a read or write.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A payload or projection column could not be (de)serialized.
    #[error("payload encoding error: {0}")]
    Payload(#[from] serde_json::Error),

    /// The external issue tracker could not be reached or refused the call.
    #[error("issue tracker error: {0}")]
    Tracker(#[from] TrackerError),

    /// The store lock could not be acquired.
    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    /// Configuration could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Machine-readable code associated with this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotInitialized(_) => ErrorCode::NotInitialized,
            Self::NotFound { .. } => ErrorCode::AggregateNotFound,
            Self::Validation(_) => ErrorCode::InvalidInput,
            Self::InvalidValue(err) if err.expected == "status" => ErrorCode::InvalidStatus,
            Self::InvalidValue(_) | Self::QueueState { .. } => ErrorCode::InvalidInput,
            Self::ParentNotFound(_) => ErrorCode::ParentNotFound,
            Self::Storage(err) if is_unique_violation(err) => ErrorCode::SeqCollision,
            Self::Storage(_) => ErrorCode::StorageFailure,
            Self::Payload(_) => ErrorCode::CorruptPayload,
            Self::Tracker(TrackerError::Unauthenticated) => ErrorCode::TrackerUnauthenticated,
            Self::Tracker(_) => ErrorCode::TrackerUnavailable,
            Self::Lock(err) => err.code(),
            Self::Config(_) => ErrorCode::ConfigParseError,
        }
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Result alias used across the core crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::{EntityKind, Error, ErrorCode};
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let all = [
            ErrorCode::NotInitialized,
            ErrorCode::ConfigParseError,
            ErrorCode::AggregateNotFound,
            ErrorCode::InvalidInput,
            ErrorCode::InvalidStatus,
            ErrorCode::ParentNotFound,
            ErrorCode::SeqCollision,
            ErrorCode::StorageFailure,
            ErrorCode::CorruptPayload,
            ErrorCode::LockContention,
            ErrorCode::TrackerUnavailable,
            ErrorCode::TrackerUnauthenticated,
            ErrorCode::InternalUnexpected,
        ];

        let mut seen = HashSet::new();
        for code in all {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        let code = ErrorCode::InvalidStatus.code();
        assert_eq!(code.len(), 5);
        assert!(code.starts_with('E'));
        assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn not_found_message_names_entity() {
        let err = Error::not_found(EntityKind::Task, "abc");
        assert_eq!(err.to_string(), "task not found: abc");
        assert_eq!(err.code(), ErrorCode::AggregateNotFound);
    }

    #[test]
    fn bad_status_gets_its_own_code() {
        let err: Error = "shipped"
            .parse::<crate::model::TaskStatus>()
            .expect_err("unknown status")
            .into();
        assert_eq!(err.code(), ErrorCode::InvalidStatus);

        let err: Error = "urgent"
            .parse::<crate::model::Priority>()
            .expect_err("unknown priority")
            .into();
        assert_eq!(err.code(), ErrorCode::InvalidInput);
    }

    #[test]
    fn unauthenticated_tracker_is_distinguished() {
        let err = Error::from(crate::sync::TrackerError::Unauthenticated);
        assert_eq!(err.code(), ErrorCode::TrackerUnauthenticated);
        let err = Error::from(crate::sync::TrackerError::Transport("refused".into()));
        assert_eq!(err.code(), ErrorCode::TrackerUnavailable);
    }
}
