//! Reconciliation between local tasks and remote issues.
//!
//! The engine only reads from the tracker on pull and only writes on push.
//! It never touches storage; the command service turns a [`PullResult`] into
//! events and markers.

use std::collections::HashMap;

use serde::Serialize;

use super::state::SyncMarker;
use super::tracker::{IssueState, IssueTracker, IssueUpdate, NewIssue, RemoteIssue};
use crate::projection::Task;

/// The local half of a task/issue pair, as the engine sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalTask {
    pub task_id: String,
    pub seq: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub issue_number: Option<i64>,
    /// Every issue the task references, `issue_number` included.
    pub linked_issues: Vec<i64>,
    pub updated_at_us: i64,
    /// Marker from the last successful sync of this pair, if any.
    pub marker: Option<SyncMarker>,
}

impl LocalTask {
    /// Pair a projected task with its marker. The marker's issue wins over
    /// the task's linked issues; otherwise the first linked issue is used.
    #[must_use]
    pub fn from_task(task: &Task, marker: Option<SyncMarker>) -> Self {
        let issue_number = marker
            .map(|m| m.issue_number)
            .or_else(|| task.state.linked_issues.first().copied());
        let mut linked_issues = task.state.linked_issues.clone();
        if let Some(number) = issue_number.filter(|n| !linked_issues.contains(n)) {
            linked_issues.insert(0, number);
        }
        Self {
            task_id: task.state.task_id.clone(),
            seq: task.seq,
            title: task.state.title.clone(),
            description: task.state.description.clone(),
            status: task.state.status.clone(),
            issue_number,
            linked_issues,
            updated_at_us: task.state.updated_at_us,
            marker,
        }
    }

    fn differs_from(&self, issue: &RemoteIssue) -> bool {
        self.title != issue.title
            || non_empty(self.description.as_deref()) != non_empty(issue.body.as_deref())
            || IssueState::for_status(&self.status) != issue.state
    }

    fn changed_since_sync(&self) -> Option<bool> {
        self.marker.map(|m| self.updated_at_us > m.last_synced_at_us)
    }
}

fn non_empty(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|t| !t.is_empty())
}

/// Which side's version should be copied to the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    RemoteToLocal,
    LocalToRemote,
}

/// A pair whose two sides already agree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncedPair {
    pub task_id: String,
    pub issue_number: i64,
    pub remote_updated_at_us: i64,
}

/// A pair where exactly one side changed since the last sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncUpdate {
    pub task_id: String,
    pub issue_number: i64,
    pub direction: SyncDirection,
    pub remote: RemoteIssue,
}

/// Why a pair could not be reconciled automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    /// Both sides changed since the last sync.
    BothChanged,
    /// The pair differs and there is no marker to say which side moved.
    NoSyncMarker,
    /// The pair differs although neither side reports a change.
    Diverged,
}

/// A pair left for manual resolution, carrying both versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncConflict {
    pub task_id: String,
    pub issue_number: i64,
    pub reason: ConflictReason,
    pub local: LocalTask,
    pub remote: RemoteIssue,
}

/// Outcome of [`SyncEngine::pull_from_github`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PullResult {
    pub success: bool,
    /// Pairs already in agreement.
    pub synced: Vec<SyncedPair>,
    /// Remote issues with no local task.
    pub created: Vec<RemoteIssue>,
    /// Issues linked to a task that syncs against a different issue. They
    /// are neither imported nor compared.
    pub linked: Vec<SyncedPair>,
    pub updated: Vec<SyncUpdate>,
    pub conflicts: Vec<SyncConflict>,
    pub errors: Vec<String>,
}

impl PullResult {
    fn failed(error: String) -> Self {
        Self {
            success: false,
            errors: vec![error],
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PushAction {
    Create,
    Update,
}

impl PushAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
        }
    }
}

/// Outcome of [`SyncEngine::push_to_github`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushResult {
    pub success: bool,
    pub issue_number: Option<i64>,
    pub url: Option<String>,
    /// Tracker's `updated_at` after the write, for the sync marker.
    pub remote_updated_at_us: Option<i64>,
    pub error: Option<String>,
}

impl PushResult {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    fn written(issue: &RemoteIssue) -> Self {
        Self {
            success: true,
            issue_number: Some(issue.number),
            url: Some(issue.url.clone()),
            remote_updated_at_us: Some(issue.updated_at_us),
            error: None,
        }
    }
}

/// Pull/push over one tracker.
pub struct SyncEngine<'a> {
    tracker: &'a dyn IssueTracker,
}

impl<'a> SyncEngine<'a> {
    #[must_use]
    pub const fn new(tracker: &'a dyn IssueTracker) -> Self {
        Self { tracker }
    }

    /// Classify every remote issue against the local tasks.
    ///
    /// Never fails: tracker errors come back as `success: false` with the
    /// error recorded and nothing classified.
    #[must_use]
    pub fn pull_from_github(&self, local_tasks: &[LocalTask]) -> PullResult {
        if !self.tracker.is_authenticated() {
            return PullResult::failed("issue tracker is not authenticated".into());
        }
        let issues = match self.tracker.list_issues() {
            Ok(issues) => issues,
            Err(err) => {
                tracing::warn!(error = %err, "pull: listing issues failed");
                return PullResult::failed(err.to_string());
            }
        };

        let mut result = PullResult {
            success: true,
            ..PullResult::default()
        };
        let owners = issue_owners(local_tasks);
        for issue in issues {
            match owners.get(&issue.number) {
                None => result.created.push(issue),
                Some(local) if local.issue_number == Some(issue.number) => {
                    classify(local, issue, &mut result);
                }
                Some(local) => result.linked.push(synced(local, &issue)),
            }
        }

        tracing::info!(
            synced = result.synced.len(),
            created = result.created.len(),
            linked = result.linked.len(),
            updated = result.updated.len(),
            conflicts = result.conflicts.len(),
            "pull classified remote issues"
        );
        result
    }

    /// Create or update the issue for one task.
    ///
    /// Never fails: any tracker error is returned as `success: false` so the
    /// caller can queue a retry.
    #[must_use]
    pub fn push_to_github(&self, task: &LocalTask, action: PushAction) -> PushResult {
        if !self.tracker.is_authenticated() {
            return PushResult::failed("issue tracker is not authenticated");
        }
        let outcome = match action {
            PushAction::Create => self.tracker.create_issue(&NewIssue {
                title: task.title.clone(),
                body: task.description.clone(),
                labels: Vec::new(),
            }),
            PushAction::Update => {
                let Some(number) = task.issue_number else {
                    return PushResult::failed(format!(
                        "task #{} has no linked issue to update",
                        task.seq
                    ));
                };
                self.tracker.update_issue(
                    number,
                    &IssueUpdate {
                        title: Some(task.title.clone()),
                        body: Some(task.description.clone().unwrap_or_default()),
                        state: Some(IssueState::for_status(&task.status)),
                    },
                )
            }
        };

        match outcome {
            Ok(issue) => {
                tracing::debug!(task_id = %task.task_id, issue = issue.number, action = action.as_str(), "pushed task");
                PushResult::written(&issue)
            }
            Err(err) => {
                tracing::warn!(task_id = %task.task_id, action = action.as_str(), error = %err, "push failed");
                PushResult::failed(err.to_string())
            }
        }
    }
}

/// Map each referenced issue to the task that owns it. A task whose primary
/// issue it is takes precedence over tasks that only list it as linked.
fn issue_owners(local_tasks: &[LocalTask]) -> HashMap<i64, &LocalTask> {
    let mut owners = HashMap::new();
    for task in local_tasks {
        if let Some(number) = task.issue_number {
            owners.entry(number).or_insert(task);
        }
    }
    for task in local_tasks {
        for &number in &task.linked_issues {
            owners.entry(number).or_insert(task);
        }
    }
    owners
}

fn classify(local: &LocalTask, remote: RemoteIssue, result: &mut PullResult) {
    let differs = local.differs_from(&remote);
    let Some(marker) = local.marker else {
        if differs {
            result.conflicts.push(conflict(local, remote, ConflictReason::NoSyncMarker));
        } else {
            result.synced.push(synced(local, &remote));
        }
        return;
    };

    let local_changed = local.changed_since_sync().unwrap_or(false);
    let remote_changed =
        remote.updated_at_us > marker.remote_updated_at_us.unwrap_or(marker.last_synced_at_us);

    match (differs, local_changed, remote_changed) {
        (false, _, _) => result.synced.push(synced(local, &remote)),
        (true, true, true) => {
            result.conflicts.push(conflict(local, remote, ConflictReason::BothChanged));
        }
        (true, false, true) => result.updated.push(SyncUpdate {
            task_id: local.task_id.clone(),
            issue_number: remote.number,
            direction: SyncDirection::RemoteToLocal,
            remote,
        }),
        (true, true, false) => result.updated.push(SyncUpdate {
            task_id: local.task_id.clone(),
            issue_number: remote.number,
            direction: SyncDirection::LocalToRemote,
            remote,
        }),
        (true, false, false) => {
            result.conflicts.push(conflict(local, remote, ConflictReason::Diverged));
        }
    }
}

fn synced(local: &LocalTask, remote: &RemoteIssue) -> SyncedPair {
    SyncedPair {
        task_id: local.task_id.clone(),
        issue_number: remote.number,
        remote_updated_at_us: remote.updated_at_us,
    }
}

fn conflict(local: &LocalTask, remote: RemoteIssue, reason: ConflictReason) -> SyncConflict {
    SyncConflict {
        task_id: local.task_id.clone(),
        issue_number: remote.number,
        reason,
        local: local.clone(),
        remote,
    }
}
