//! Contract for the external issue tracker.
//!
//! The core never talks HTTP itself; the CLI supplies a GitHub client and the
//! tests supply an in-memory fake.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Open/closed state of a remote issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

impl IssueState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }

    /// Remote state a local status maps to: `done` closes, anything else is
    /// open.
    #[must_use]
    pub fn for_status(status: &str) -> Self {
        if status == "done" {
            Self::Closed
        } else {
            Self::Open
        }
    }
}

impl fmt::Display for IssueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One issue as reported by the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteIssue {
    pub number: i64,
    pub title: String,
    pub body: Option<String>,
    pub state: IssueState,
    pub url: String,
    #[serde(default)]
    pub labels: Vec<String>,
    /// Last modification time on the tracker, microseconds since the epoch.
    pub updated_at_us: i64,
}

/// Repository the tracker is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoInfo {
    pub owner: String,
    pub name: String,
    pub url: String,
}

impl RepoInfo {
    /// `owner/name`.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Fields for a new issue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NewIssue {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

/// Partial issue edit; `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IssueUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<IssueState>,
}

/// Failure talking to the tracker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    #[error("issue tracker is not authenticated")]
    Unauthenticated,

    #[error("issue #{0} not found")]
    NotFound(i64),

    #[error("issue tracker unreachable: {0}")]
    Transport(String),

    #[error("issue tracker returned {status}: {message}")]
    Api { status: u16, message: String },
}

/// Issue tracker operations the sync engine relies on.
///
/// Calls may block for as long as the transport allows; callers impose any
/// timeout.
pub trait IssueTracker {
    /// Whether credentials are configured and accepted.
    fn is_authenticated(&self) -> bool;

    /// The repository this tracker is bound to.
    ///
    /// # Errors
    ///
    /// Returns a [`TrackerError`] if the repository cannot be resolved.
    fn repo_info(&self) -> Result<RepoInfo, TrackerError>;

    /// Every issue in the repository, open and closed. Pull requests are not
    /// issues and must be excluded.
    ///
    /// # Errors
    ///
    /// Returns a [`TrackerError`] on transport or API failure.
    fn list_issues(&self) -> Result<Vec<RemoteIssue>, TrackerError>;

    /// # Errors
    ///
    /// [`TrackerError::NotFound`] for an unknown number.
    fn get_issue(&self, number: i64) -> Result<RemoteIssue, TrackerError>;

    /// # Errors
    ///
    /// Returns a [`TrackerError`] on transport or API failure.
    fn create_issue(&self, issue: &NewIssue) -> Result<RemoteIssue, TrackerError>;

    /// # Errors
    ///
    /// [`TrackerError::NotFound`] for an unknown number.
    fn update_issue(&self, number: i64, update: &IssueUpdate) -> Result<RemoteIssue, TrackerError>;
}
