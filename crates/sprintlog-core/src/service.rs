//! Validated business operations over the store.
//!
//! Every public method checks its input first, then appends events and
//! resyncs the affected projections inside one immediate transaction. A
//! rejected command leaves neither events nor rows behind.
//!
//! Tracker calls never run inside a transaction: pulls classify first and
//! write afterwards, pushes write locally only once the tracker answered.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;

use crate::commit::{CommitInfo, generate_branch_name, parse_commit_message};
use crate::db::with_transaction;
use crate::error::{EntityKind, Error, Result};
use crate::event::{AggregateType, Event, EventKind, EventMetadata, EventStore};
use crate::model::{ParseEnumError, Priority, SprintStatus, SyncMode, TaskStatus, TaskType};
use crate::projection::{
    ProjectConfig, ProjectConfigRepository, ProjectConfigUpdate, ProjectRepository,
    SprintRepository, SprintStatusReport, Task, TaskRepository,
};
use crate::reduce::project::{ProjectCreated, ProjectUpdated};
use crate::reduce::sprint::SprintCreated;
use crate::reduce::task::{
    TaskAddedToSprint, TaskCreated, TaskEstimated, TaskLinkedToCommit, TaskLinkedToIssue,
    TaskStatusChanged, TaskUpdated,
};
use crate::reduce::{ProjectState, SprintState};
use crate::sync::{
    IssueState, IssueTracker, LocalTask, PullResult, PushAction, PushResult, RemoteIssue,
    SyncAction, SyncDirection, SyncEngine, SyncMarker, SyncQueueItem, SyncQueueRepository,
    SyncStateRepository, SyncUpdate,
};
use crate::timestamp::{now_us, parse_date};

/// Metadata source stamped on events written by a tracker pull.
pub const SOURCE_GITHUB_SYNC: &str = "github-sync";

/// Metadata source stamped on events written by commit processing.
pub const SOURCE_COMMIT: &str = "commit";

/// A commit to link against the project's tasks.
#[derive(Debug, Clone, Copy)]
pub struct CommitInput<'a> {
    pub project_id: &'a str,
    pub sha: &'a str,
    pub message: &'a str,
    pub branch: Option<&'a str>,
    /// Report what would happen without appending anything.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitActionKind {
    LinkCommit,
    StatusChange,
}

/// One effect of a processed commit on a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitAction {
    pub kind: CommitActionKind,
    pub task_id: String,
    pub seq: i64,
    pub title: String,
    pub from_status: Option<String>,
    pub to_status: Option<String>,
    /// False on a dry run.
    pub applied: bool,
}

/// Outcome of [`PmService::process_commit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    pub sha: String,
    pub commit: CommitInfo,
    pub actions: Vec<CommitAction>,
    /// Referenced numbers with no task in the project.
    pub unmatched: Vec<i64>,
    pub dry_run: bool,
}

/// Outcome of [`PmService::sync_pull`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncPullReport {
    pub project_id: String,
    pub dry_run: bool,
    pub result: PullResult,
    /// Seq numbers of tasks imported from new issues.
    pub tasks_created: Vec<i64>,
    /// Seq numbers of tasks overwritten from their issue.
    pub tasks_updated: Vec<i64>,
    /// Issues updated from local changes.
    pub issues_pushed: Vec<i64>,
    /// Queue ids for pushes that failed and were queued.
    pub queued: Vec<i64>,
}

/// Outcome of [`PmService::sync_push`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncPushReport {
    pub task_id: String,
    pub seq: i64,
    pub action: PushAction,
    pub result: PushResult,
    pub queued_item: Option<SyncQueueItem>,
}

/// Outcome of [`PmService::process_queue`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueRunReport {
    pub processed: usize,
    pub completed: usize,
    pub failed: usize,
    pub items: Vec<SyncQueueItem>,
}

/// Rows materialized by [`PmService::rebuild_projections`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    pub projects: usize,
    pub sprints: usize,
    pub tasks: usize,
}

/// Command layer over one store connection.
#[derive(Debug, Clone)]
pub struct PmService<'conn> {
    conn: &'conn Connection,
    metadata: Option<EventMetadata>,
}

impl<'conn> PmService<'conn> {
    #[must_use]
    pub const fn new(conn: &'conn Connection) -> Self {
        Self {
            conn,
            metadata: None,
        }
    }

    /// Stamp every event this service appends with `metadata`.
    #[must_use]
    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    #[must_use]
    pub const fn connection(&self) -> &'conn Connection {
        self.conn
    }

    #[must_use]
    pub const fn tasks(&self) -> TaskRepository<'conn> {
        TaskRepository::new(self.conn)
    }

    #[must_use]
    pub const fn sprints(&self) -> SprintRepository<'conn> {
        SprintRepository::new(self.conn)
    }

    #[must_use]
    pub const fn projects(&self) -> ProjectRepository<'conn> {
        ProjectRepository::new(self.conn)
    }

    #[must_use]
    pub const fn configs(&self) -> ProjectConfigRepository<'conn> {
        ProjectConfigRepository::new(self.conn)
    }

    #[must_use]
    pub const fn queue(&self) -> SyncQueueRepository<'conn> {
        SyncQueueRepository::new(self.conn)
    }

    const fn markers(&self) -> SyncStateRepository<'conn> {
        SyncStateRepository::new(self.conn)
    }

    // Projects

    /// # Errors
    ///
    /// [`Error::Validation`] for a blank name.
    pub fn create_project(&self, name: &str, description: Option<&str>) -> Result<ProjectState> {
        let created = ProjectCreated {
            name: required_text("project name", name)?,
            description: optional_text(description),
            settings: None,
        };
        let project = self.projects().create(&created, self.metadata.as_ref())?;
        tracing::info!(project_id = %project.project_id, name = %project.name, "project created");
        Ok(project)
    }

    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown project; [`Error::Validation`] for
    /// an empty patch or a blank name.
    pub fn update_project(&self, project_id: &str, patch: &ProjectUpdated) -> Result<ProjectState> {
        self.require_project(project_id)?;
        if *patch == ProjectUpdated::default() {
            return Err(Error::validation("project update changes nothing"));
        }
        let patch = ProjectUpdated {
            name: patch
                .name
                .as_deref()
                .map(|name| required_text("project name", name))
                .transpose()?,
            ..patch.clone()
        };
        self.projects()
            .update(project_id, &patch, self.metadata.as_ref())
    }

    /// Link a GitHub repository and enable sync for a project.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown project; [`Error::Validation`] if
    /// `repo` is not `owner/name`.
    pub fn enable_github(&self, project_id: &str, repo: &str) -> Result<ProjectConfig> {
        self.require_project(project_id)?;
        let config = self.configs().enable_github(project_id, repo.trim())?;
        tracing::info!(project_id, repo = repo.trim(), "github sync enabled");
        Ok(config)
    }

    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown project.
    pub fn disable_github(&self, project_id: &str) -> Result<Option<ProjectConfig>> {
        self.require_project(project_id)?;
        self.configs().disable_github(project_id)
    }

    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown project.
    pub fn set_sync_mode(&self, project_id: &str, mode: SyncMode) -> Result<ProjectConfig> {
        self.require_project(project_id)?;
        let configs = self.configs();
        let updated = configs.update(
            project_id,
            &ProjectConfigUpdate {
                sync_mode: Some(mode),
                ..ProjectConfigUpdate::default()
            },
        )?;
        match updated {
            Some(config) => Ok(config),
            None => configs.upsert(project_id, false, mode),
        }
    }

    // Sprints

    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown project; [`Error::Validation`] for
    /// a blank name, an unparseable date or an end before the start.
    pub fn create_sprint(&self, created: &SprintCreated) -> Result<SprintState> {
        self.require_project(&created.project_id)?;
        let start = required_date("start date", &created.start_date)?;
        let end = required_date("end date", &created.end_date)?;
        if end < start {
            return Err(Error::validation(format!(
                "sprint ends ({end}) before it starts ({start})"
            )));
        }
        let created = SprintCreated {
            project_id: created.project_id.clone(),
            name: required_text("sprint name", &created.name)?,
            start_date: start.format("%Y-%m-%d").to_string(),
            end_date: end.format("%Y-%m-%d").to_string(),
            goal: optional_text(created.goal.as_deref()),
        };
        self.sprints().create(&created, self.metadata.as_ref())
    }

    /// Move a planning sprint to active. A project has at most one active
    /// sprint.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown sprint; [`Error::Validation`] if the
    /// sprint is not in planning or another sprint is active.
    pub fn start_sprint(&self, sprint_id: &str) -> Result<SprintState> {
        self.in_transaction(|| {
            let sprint = self.require_sprint(sprint_id)?;
            if sprint.status != SprintStatus::Planning.as_str() {
                return Err(Error::validation(format!(
                    "sprint '{}' is {}; only planning sprints can start",
                    sprint.name, sprint.status
                )));
            }
            if let Some(active) = self.sprints().get_active(&sprint.project_id)? {
                return Err(Error::validation(format!(
                    "sprint '{}' is already active in this project",
                    active.name
                )));
            }
            let started = self.sprints().start(sprint_id, self.metadata.as_ref())?;
            tracing::info!(sprint_id, name = %started.name, "sprint started");
            Ok(started)
        })
    }

    /// Complete a sprint and record its velocity.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown sprint; [`Error::Validation`] if it
    /// is already completed.
    pub fn complete_sprint(&self, sprint_id: &str) -> Result<SprintStatusReport> {
        self.in_transaction(|| {
            let sprint = self.require_sprint(sprint_id)?;
            if sprint.status == SprintStatus::Completed.as_str() {
                return Err(Error::validation(format!(
                    "sprint '{}' is already completed",
                    sprint.name
                )));
            }
            self.sprints().complete(sprint_id, self.metadata.as_ref())
        })
    }

    /// Add tasks to a sprint. Tasks already in it are returned unchanged.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown sprint or task;
    /// [`Error::Validation`] for a completed sprint or a task from another
    /// project. Nothing is added when any task is rejected.
    pub fn add_tasks_to_sprint(&self, sprint_id: &str, task_ids: &[&str]) -> Result<Vec<Task>> {
        self.in_transaction(|| {
            let sprint = self.require_sprint(sprint_id)?;
            if sprint.status == SprintStatus::Completed.as_str() {
                return Err(Error::validation(format!(
                    "sprint '{}' is completed",
                    sprint.name
                )));
            }
            let mut added = Vec::with_capacity(task_ids.len());
            for &task_id in task_ids {
                let task = self.require_task(task_id)?;
                if task.state.project_id != sprint.project_id {
                    return Err(Error::validation(format!(
                        "task {} belongs to another project",
                        task.display_ref()
                    )));
                }
                if task.state.sprint_id.as_deref() == Some(sprint_id) {
                    added.push(task);
                    continue;
                }
                self.append(
                    EventKind::TaskAddedToSprint,
                    task.id(),
                    &TaskAddedToSprint {
                        sprint_id: sprint_id.to_string(),
                    },
                )?;
                added.push(self.resync_task(task.id())?);
            }
            Ok(added)
        })
    }

    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown task; [`Error::Validation`] if it is
    /// in no sprint.
    pub fn remove_task_from_sprint(&self, task_id: &str) -> Result<Task> {
        self.in_transaction(|| {
            let task = self.require_task(task_id)?;
            if task.state.sprint_id.is_none() {
                return Err(Error::validation(format!(
                    "task {} is not in a sprint",
                    task.display_ref()
                )));
            }
            self.append(EventKind::TaskRemovedFromSprint, task.id(), &json!({}))?;
            self.resync_task(task.id())
        })
    }

    // Tasks

    /// Create a task and allocate its `seq`.
    ///
    /// Enum fields are stored in canonical form (`In-Progress` becomes
    /// `in_progress`).
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown project; [`Error::InvalidValue`],
    /// [`Error::ParentNotFound`] or [`Error::Validation`] for bad fields.
    pub fn create_task(&self, created: &TaskCreated) -> Result<Task> {
        let project_id = created.project_id.as_str();
        self.in_transaction(|| {
            self.require_project(project_id)?;
            if let Some(parent_id) = created.parent_id.as_deref() {
                self.check_parent(None, project_id, parent_id)?;
            }
            if let Some(sprint_id) = created.sprint_id.as_deref() {
                self.check_sprint(project_id, sprint_id)?;
            }
            if let Some(points) = created.estimate_points {
                non_negative("estimate points", points)?;
            }
            let payload = TaskCreated {
                project_id: project_id.to_string(),
                title: required_text("task title", &created.title)?,
                description: optional_text(created.description.as_deref()),
                task_type: canonical::<TaskType>(created.task_type.as_deref())?,
                priority: canonical::<Priority>(created.priority.as_deref())?,
                status: canonical::<TaskStatus>(created.status.as_deref())?,
                parent_id: created.parent_id.clone(),
                sprint_id: created.sprint_id.clone(),
                assignee: optional_text(created.assignee.as_deref()),
                labels: created.labels.as_deref().map(clean_labels),
                due_date: optional_date("due date", created.due_date.as_deref())?,
                estimate_points: created.estimate_points,
                branch_name: optional_text(created.branch_name.as_deref()),
            };

            let task_id = uuid::Uuid::new_v4().to_string();
            self.append(EventKind::TaskCreated, &task_id, &payload)?;
            let task = self.resync_task(&task_id)?;
            tracing::info!(task_id = %task_id, seq = task.seq, "task created");
            Ok(task)
        })
    }

    /// Apply field edits and/or a new estimate.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown task; [`Error::Validation`] when
    /// both inputs are empty or a field is invalid.
    pub fn update_task(
        &self,
        task_id: &str,
        update: &TaskUpdated,
        estimate: Option<&TaskEstimated>,
    ) -> Result<Task> {
        let estimate = estimate.filter(|e| e.points.is_some() || e.hours.is_some());
        if update.is_empty() && estimate.is_none() {
            return Err(Error::validation("task update changes nothing"));
        }
        self.in_transaction(|| {
            let task = self.require_task(task_id)?;
            if let Some(parent_id) = update.parent_id.as_deref() {
                self.check_parent(Some(task.id()), &task.state.project_id, parent_id)?;
            }
            if let Some(hours) = update.actual_hours {
                non_negative("actual hours", hours)?;
            }

            if !update.is_empty() {
                let payload = TaskUpdated {
                    title: update
                        .title
                        .as_deref()
                        .map(|title| required_text("task title", title))
                        .transpose()?,
                    priority: canonical::<Priority>(update.priority.as_deref())?,
                    task_type: canonical::<TaskType>(update.task_type.as_deref())?,
                    labels: update.labels.as_deref().map(clean_labels),
                    due_date: optional_date("due date", update.due_date.as_deref())?,
                    ..update.clone()
                };
                self.append(EventKind::TaskUpdated, task.id(), &payload)?;
            }
            if let Some(estimate) = estimate {
                if let Some(points) = estimate.points {
                    non_negative("estimate points", points)?;
                }
                if let Some(hours) = estimate.hours {
                    non_negative("estimate hours", hours)?;
                }
                self.append(EventKind::TaskEstimated, task.id(), estimate)?;
            }
            self.resync_task(task.id())
        })
    }

    /// Record a status transition.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown or deleted task;
    /// [`Error::InvalidValue`] for an unknown status.
    pub fn change_status(&self, task_id: &str, status: &str, reason: Option<&str>) -> Result<Task> {
        let target: TaskStatus = status.parse()?;
        self.in_transaction(|| {
            let task = self.require_task(task_id)?;
            self.append_status(&task, target, optional_text(reason), self.metadata.as_ref())?;
            let task = self.resync_task(task.id())?;
            tracing::info!(task_id = task.id(), seq = task.seq, status = %target, "task status changed");
            Ok(task)
        })
    }

    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown task; [`Error::Validation`] for a
    /// blank sha.
    pub fn link_commit(
        &self,
        task_id: &str,
        sha: &str,
        message: Option<&str>,
        branch: Option<&str>,
    ) -> Result<Task> {
        let link = TaskLinkedToCommit {
            commit_sha: required_text("commit sha", sha)?,
            message: optional_text(message),
            branch: optional_text(branch),
        };
        self.in_transaction(|| {
            let task = self.require_task(task_id)?;
            self.append(EventKind::TaskLinkedToCommit, task.id(), &link)?;
            self.resync_task(task.id())
        })
    }

    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown task; [`Error::Validation`] for a
    /// non-positive issue number.
    pub fn link_issue(&self, task_id: &str, issue_number: i64, url: Option<&str>) -> Result<Task> {
        if issue_number <= 0 {
            return Err(Error::validation(format!(
                "issue number must be positive, got {issue_number}"
            )));
        }
        self.in_transaction(|| {
            let task = self.require_task(task_id)?;
            self.append(
                EventKind::TaskLinkedToIssue,
                task.id(),
                &TaskLinkedToIssue {
                    issue_number,
                    url: optional_text(url),
                },
            )?;
            self.resync_task(task.id())
        })
    }

    /// Delete a task. The row and its sync marker go away; its events and
    /// its `seq` stay reserved.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown task.
    pub fn delete_task(&self, task_id: &str) -> Result<Task> {
        self.in_transaction(|| {
            let task = self.require_task(task_id)?;
            self.append(EventKind::TaskDeleted, task.id(), &json!({}))?;
            self.tasks().sync_from_events(task.id())?;
            self.markers().delete(task.id())?;
            tracing::info!(task_id = task.id(), seq = task.seq, "task deleted");
            Ok(task)
        })
    }

    /// Branch name for a task: `{seq}-{type}-{slug}`.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown task.
    pub fn branch_name_for(&self, task_id: &str, branch_type: &str) -> Result<String> {
        let task = self.require_task(task_id)?;
        let branch_type = branch_type.trim();
        if branch_type.is_empty() {
            return Err(Error::validation("branch type must not be empty"));
        }
        Ok(generate_branch_name(task.seq, branch_type, &task.state.title))
    }

    /// Resolve a task by id, or by `42`/`#42` within `project_id`.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when nothing matches; a seq reference without a
    /// project never matches.
    pub fn resolve_task(&self, project_id: Option<&str>, id_or_seq: &str) -> Result<Task> {
        let found = match project_id {
            Some(project_id) => self.tasks().find_task(project_id, id_or_seq)?,
            None => self.tasks().get_by_id(id_or_seq)?,
        };
        found.ok_or_else(|| Error::not_found(EntityKind::Task, id_or_seq))
    }

    // Commits

    /// Link a commit to the tasks its magic words name and apply the status
    /// changes they imply. Numbers are task `seq`s in the project.
    ///
    /// A task is linked once per commit; a status change is only recorded
    /// when the task is not already in the target status.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown project; [`Error::Validation`] for a
    /// blank sha.
    pub fn process_commit(&self, input: &CommitInput<'_>) -> Result<CommitReport> {
        let sha = required_text("commit sha", input.sha)?;
        let commit = parse_commit_message(input.message);
        let changes = commit.status_changes();
        let referenced: BTreeSet<i64> = commit
            .magic_words
            .iter()
            .flat_map(|word| word.issue_ids.iter().copied())
            .collect();
        let metadata = self.sourced(SOURCE_COMMIT);
        let applied = !input.dry_run;

        self.in_transaction(|| {
            self.require_project(input.project_id)?;
            let mut actions = Vec::new();
            let mut unmatched = Vec::new();
            for seq in referenced {
                let Some(task) = self.tasks().get_by_seq(input.project_id, seq)? else {
                    unmatched.push(seq);
                    continue;
                };
                let mut touched = false;

                if !task.state.linked_commits.contains(&sha) {
                    if applied {
                        self.append_as(
                            EventKind::TaskLinkedToCommit,
                            task.id(),
                            &TaskLinkedToCommit {
                                commit_sha: sha.clone(),
                                message: Some(commit.description.clone()),
                                branch: optional_text(input.branch),
                            },
                            Some(&metadata),
                        )?;
                        touched = true;
                    }
                    actions.push(commit_action(&task, CommitActionKind::LinkCommit, None, applied));
                }

                if let Some(&target) = changes.get(&seq) {
                    if task.state.status != target.as_str() {
                        if applied {
                            let reason = format!("commit {}", short_sha(&sha));
                            self.append_status(&task, target, Some(reason), Some(&metadata))?;
                            touched = true;
                        }
                        actions.push(commit_action(
                            &task,
                            CommitActionKind::StatusChange,
                            Some(target),
                            applied,
                        ));
                    }
                }

                if touched {
                    self.resync_task(task.id())?;
                }
            }

            tracing::info!(
                sha = short_sha(&sha),
                actions = actions.len(),
                unmatched = unmatched.len(),
                dry_run = input.dry_run,
                "processed commit"
            );
            Ok(CommitReport {
                sha: sha.clone(),
                commit: commit.clone(),
                actions,
                unmatched,
                dry_run: input.dry_run,
            })
        })
    }

    // Sync

    /// Pull issues from the tracker and reconcile them with linked tasks.
    ///
    /// New issues become tasks, remote-only changes overwrite the task, and
    /// local-only changes are pushed when the sync mode allows pushing (a
    /// failed push is queued). Conflicts are reported, never resolved.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown project; [`Error::Validation`] when
    /// GitHub sync is disabled or the sync mode does not pull. Tracker
    /// failures are reported in the result, not raised.
    pub fn sync_pull(
        &self,
        project_id: &str,
        tracker: &dyn IssueTracker,
        dry_run: bool,
    ) -> Result<SyncPullReport> {
        let config = self.require_github(project_id)?;
        if !config.sync_mode.pulls() {
            return Err(Error::validation(format!(
                "sync mode {} does not pull from GitHub",
                config.sync_mode
            )));
        }

        let local = self.local_tasks(project_id)?;
        let result = SyncEngine::new(tracker).pull_from_github(&local);
        let mut report = SyncPullReport {
            project_id: project_id.to_string(),
            dry_run,
            result,
            tasks_created: Vec::new(),
            tasks_updated: Vec::new(),
            issues_pushed: Vec::new(),
            queued: Vec::new(),
        };
        if dry_run || !report.result.success {
            return Ok(report);
        }

        let metadata = self.sourced(SOURCE_GITHUB_SYNC);
        let result = &report.result;
        let (created, updated, outbound) = self.in_transaction(|| {
            let mut created = Vec::with_capacity(result.created.len());
            for issue in &result.created {
                created.push(self.import_issue(project_id, issue, &metadata)?.seq);
            }

            let mut updated = Vec::new();
            let mut outbound = Vec::new();
            for update in &result.updated {
                match update.direction {
                    SyncDirection::RemoteToLocal => {
                        updated.push(self.apply_remote(update, &metadata)?.seq);
                    }
                    SyncDirection::LocalToRemote => outbound.push(update.task_id.clone()),
                }
            }

            let now = now_us();
            for pair in &result.synced {
                self.markers().record(
                    &pair.task_id,
                    &SyncMarker {
                        issue_number: pair.issue_number,
                        last_synced_at_us: now,
                        remote_updated_at_us: Some(pair.remote_updated_at_us),
                    },
                )?;
            }
            Ok((created, updated, outbound))
        })?;
        report.tasks_created = created;
        report.tasks_updated = updated;

        if config.sync_mode.pushes() {
            let engine = SyncEngine::new(tracker);
            for task_id in outbound {
                let Some(task) = self.tasks().get_by_id(&task_id)? else {
                    continue;
                };
                let local = LocalTask::from_task(&task, self.markers().get(task.id())?);
                let pushed = engine.push_to_github(&local, PushAction::Update);
                if pushed.success {
                    self.record_push(&task, &pushed)?;
                    report.issues_pushed.extend(pushed.issue_number);
                } else {
                    report.queued.push(self.enqueue_push(&task, PushAction::Update)?.id);
                }
            }
        }

        self.configs().mark_synced(project_id, now_us())?;
        tracing::info!(
            project_id,
            created = report.tasks_created.len(),
            updated = report.tasks_updated.len(),
            pushed = report.issues_pushed.len(),
            queued = report.queued.len(),
            conflicts = report.result.conflicts.len(),
            "sync pull finished"
        );
        Ok(report)
    }

    /// Create or update the issue for one task. A tracker failure queues the
    /// push for retry instead of raising.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown task; [`Error::Validation`] when
    /// GitHub sync is disabled, when updating a task with no issue, or when
    /// creating an issue for a task that already has one.
    pub fn sync_push(
        &self,
        task_id: &str,
        action: PushAction,
        tracker: &dyn IssueTracker,
    ) -> Result<SyncPushReport> {
        let task = self.require_task(task_id)?;
        self.require_github(&task.state.project_id)?;
        let local = LocalTask::from_task(&task, self.markers().get(task.id())?);
        match (action, local.issue_number) {
            (PushAction::Update, None) => {
                return Err(Error::validation(format!(
                    "task {} has no linked issue to update",
                    task.display_ref()
                )));
            }
            (PushAction::Create, Some(number)) => {
                return Err(Error::validation(format!(
                    "task {} is already linked to issue #{number}",
                    task.display_ref()
                )));
            }
            _ => {}
        }

        let result = SyncEngine::new(tracker).push_to_github(&local, action);
        let queued_item = if result.success {
            self.record_push(&task, &result)?;
            None
        } else {
            Some(self.enqueue_push(&task, action)?)
        };
        Ok(SyncPushReport {
            task_id: task.state.task_id.clone(),
            seq: task.seq,
            action,
            result,
            queued_item,
        })
    }

    /// Retry up to `limit` pending queue items against the tracker.
    ///
    /// # Errors
    ///
    /// Storage errors only; a failed push marks its item failed. A storage
    /// error while handling an item also marks it failed before returning.
    pub fn process_queue(&self, tracker: &dyn IssueTracker, limit: u32) -> Result<QueueRunReport> {
        let queue = self.queue();
        let mut report = QueueRunReport::default();
        for item in queue.get_pending(limit)? {
            let item = queue.mark_processing(item.id)?;
            report.processed += 1;
            let outcome = match self.run_queue_item(&item, tracker) {
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::error!(id = item.id, error = %err, "queued push could not be recorded");
                    queue.mark_failed(item.id, &err.to_string())?;
                    return Err(err);
                }
            };
            let item = match outcome {
                Ok(()) => {
                    report.completed += 1;
                    queue.mark_completed(item.id)?
                }
                Err(message) => {
                    report.failed += 1;
                    tracing::warn!(id = item.id, error = %message, "queued push failed");
                    queue.mark_failed(item.id, &message)?
                }
            };
            report.items.push(item);
        }
        Ok(report)
    }

    // Rebuild

    /// Replay one task's events into its row.
    ///
    /// # Errors
    ///
    /// Returns an error if reading events or writing the row fails.
    pub fn rebuild_task(&self, task_id: &str) -> Result<Option<Task>> {
        self.tasks().sync_from_events(task_id)
    }

    /// Replay every aggregate in the log, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if reading events or writing a row fails; nothing is
    /// committed in that case.
    pub fn rebuild_projections(&self) -> Result<RebuildReport> {
        self.in_transaction(|| {
            let events = EventStore::new(self.conn);
            let mut report = RebuildReport::default();
            for id in events.aggregate_ids(AggregateType::Project)? {
                if self.projects().sync_from_events(&id)?.is_some() {
                    report.projects += 1;
                }
            }
            for id in events.aggregate_ids(AggregateType::Sprint)? {
                if self.sprints().sync_from_events(&id)?.is_some() {
                    report.sprints += 1;
                }
            }
            for id in events.aggregate_ids(AggregateType::Task)? {
                if self.tasks().sync_from_events(&id)?.is_some() {
                    report.tasks += 1;
                }
            }
            tracing::info!(
                projects = report.projects,
                sprints = report.sprints,
                tasks = report.tasks,
                "rebuilt projections"
            );
            Ok(report)
        })
    }

    // Internals

    fn in_transaction<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        with_transaction(self.conn, |_| f())
    }

    fn sourced(&self, source: &str) -> EventMetadata {
        let mut metadata = self.metadata.clone().unwrap_or_default();
        metadata.source = Some(source.to_string());
        metadata
    }

    fn append(&self, kind: EventKind, aggregate_id: &str, payload: &impl Serialize) -> Result<Event> {
        self.append_as(kind, aggregate_id, payload, self.metadata.as_ref())
    }

    fn append_as(
        &self,
        kind: EventKind,
        aggregate_id: &str,
        payload: &impl Serialize,
        metadata: Option<&EventMetadata>,
    ) -> Result<Event> {
        EventStore::new(self.conn).append(
            kind,
            aggregate_id,
            serde_json::to_value(payload)?,
            metadata,
        )
    }

    fn append_status(
        &self,
        task: &Task,
        target: TaskStatus,
        reason: Option<String>,
        metadata: Option<&EventMetadata>,
    ) -> Result<Event> {
        self.append_as(
            EventKind::TaskStatusChanged,
            task.id(),
            &TaskStatusChanged {
                from: Some(task.state.status.clone()),
                to: Some(target.as_str().to_string()),
                reason,
                ..TaskStatusChanged::default()
            },
            metadata,
        )
    }

    fn resync_task(&self, task_id: &str) -> Result<Task> {
        self.tasks()
            .sync_from_events(task_id)?
            .ok_or_else(|| Error::not_found(EntityKind::Task, task_id))
    }

    fn require_project(&self, project_id: &str) -> Result<ProjectState> {
        self.projects()
            .get_by_id(project_id)?
            .ok_or_else(|| Error::not_found(EntityKind::Project, project_id))
    }

    fn require_sprint(&self, sprint_id: &str) -> Result<SprintState> {
        self.sprints()
            .get_by_id(sprint_id)?
            .ok_or_else(|| Error::not_found(EntityKind::Sprint, sprint_id))
    }

    fn require_task(&self, task_id: &str) -> Result<Task> {
        self.tasks()
            .get_by_id(task_id)?
            .ok_or_else(|| Error::not_found(EntityKind::Task, task_id))
    }

    fn require_github(&self, project_id: &str) -> Result<ProjectConfig> {
        self.require_project(project_id)?;
        match self.configs().get(project_id)? {
            Some(config) if config.github_enabled => Ok(config),
            _ => Err(Error::validation(format!(
                "GitHub sync is not enabled for project {project_id}"
            ))),
        }
    }

    fn check_parent(&self, task_id: Option<&str>, project_id: &str, parent_id: &str) -> Result<()> {
        if task_id == Some(parent_id) {
            return Err(Error::validation("a task cannot be its own parent"));
        }
        match self.tasks().get_by_id(parent_id)? {
            Some(parent) if parent.state.project_id == project_id => Ok(()),
            _ => Err(Error::ParentNotFound(parent_id.to_string())),
        }
    }

    fn check_sprint(&self, project_id: &str, sprint_id: &str) -> Result<()> {
        let sprint = self.require_sprint(sprint_id)?;
        if sprint.project_id != project_id {
            return Err(Error::validation(format!(
                "sprint '{}' belongs to another project",
                sprint.name
            )));
        }
        Ok(())
    }

    fn local_tasks(&self, project_id: &str) -> Result<Vec<LocalTask>> {
        self.tasks()
            .list_with_issue_links(project_id)?
            .iter()
            .map(|task| -> Result<LocalTask> {
                Ok(LocalTask::from_task(task, self.markers().get(task.id())?))
            })
            .collect()
    }

    fn import_issue(
        &self,
        project_id: &str,
        issue: &RemoteIssue,
        metadata: &EventMetadata,
    ) -> Result<Task> {
        let status = match issue.state {
            IssueState::Closed => TaskStatus::Done,
            IssueState::Open => TaskStatus::Todo,
        };
        let task_id = uuid::Uuid::new_v4().to_string();
        self.append_as(
            EventKind::TaskCreated,
            &task_id,
            &TaskCreated {
                project_id: project_id.to_string(),
                title: issue.title.clone(),
                description: optional_text(issue.body.as_deref()),
                status: Some(status.as_str().to_string()),
                labels: (!issue.labels.is_empty()).then(|| issue.labels.clone()),
                ..TaskCreated::default()
            },
            Some(metadata),
        )?;
        self.append_as(
            EventKind::TaskLinkedToIssue,
            &task_id,
            &TaskLinkedToIssue {
                issue_number: issue.number,
                url: Some(issue.url.clone()),
            },
            Some(metadata),
        )?;
        let task = self.resync_task(&task_id)?;
        self.markers().record(
            &task_id,
            &SyncMarker {
                issue_number: issue.number,
                last_synced_at_us: task.state.updated_at_us,
                remote_updated_at_us: Some(issue.updated_at_us),
            },
        )?;
        tracing::debug!(task_id = %task_id, seq = task.seq, issue = issue.number, "imported issue");
        Ok(task)
    }

    fn apply_remote(&self, update: &SyncUpdate, metadata: &EventMetadata) -> Result<Task> {
        let task = self.require_task(&update.task_id)?;
        let remote = &update.remote;

        let body = remote.body.as_deref().map(str::trim).unwrap_or_default();
        let local_body = task.state.description.as_deref().map(str::trim).unwrap_or_default();
        let edit = TaskUpdated {
            title: (task.state.title != remote.title).then(|| remote.title.clone()),
            description: (body != local_body).then(|| body.to_string()),
            ..TaskUpdated::default()
        };
        if !edit.is_empty() {
            self.append_as(EventKind::TaskUpdated, task.id(), &edit, Some(metadata))?;
        }

        let target = match (remote.state, task.state.status.as_str()) {
            (IssueState::Closed, status) if status != TaskStatus::Done.as_str() => {
                Some(TaskStatus::Done)
            }
            (IssueState::Open, status) if status == TaskStatus::Done.as_str() => {
                Some(TaskStatus::Todo)
            }
            _ => None,
        };
        if let Some(target) = target {
            let reason = Some(format!("issue #{} {}", remote.number, remote.state));
            self.append_status(&task, target, reason, Some(metadata))?;
        }

        let task = self.resync_task(task.id())?;
        self.markers().record(
            task.id(),
            &SyncMarker {
                issue_number: remote.number,
                last_synced_at_us: task.state.updated_at_us,
                remote_updated_at_us: Some(remote.updated_at_us),
            },
        )?;
        Ok(task)
    }

    /// Link the pushed issue (when new) and move the marker forward.
    fn record_push(&self, task: &Task, pushed: &PushResult) -> Result<Task> {
        let Some(issue_number) = pushed.issue_number else {
            return Ok(task.clone());
        };
        self.in_transaction(|| {
            let mut current = task.clone();
            if !task.state.linked_issues.contains(&issue_number) {
                self.append_as(
                    EventKind::TaskLinkedToIssue,
                    task.id(),
                    &TaskLinkedToIssue {
                        issue_number,
                        url: pushed.url.clone(),
                    },
                    Some(&self.sourced(SOURCE_GITHUB_SYNC)),
                )?;
                current = self.resync_task(task.id())?;
            }
            self.markers().record(
                task.id(),
                &SyncMarker {
                    issue_number,
                    last_synced_at_us: now_us().max(current.state.updated_at_us),
                    remote_updated_at_us: pushed.remote_updated_at_us,
                },
            )?;
            Ok(current)
        })
    }

    fn enqueue_push(&self, task: &Task, action: PushAction) -> Result<SyncQueueItem> {
        let sync_action = match action {
            PushAction::Create => SyncAction::CreateIssue,
            PushAction::Update => SyncAction::UpdateIssue,
        };
        let item = self.queue().enqueue(
            sync_action,
            "task",
            task.id(),
            &json!({
                "projectId": task.state.project_id,
                "taskSeq": task.seq,
            }),
        )?;
        tracing::info!(id = item.id, task_id = task.id(), action = sync_action.as_str(), "push queued for retry");
        Ok(item)
    }

    /// Outer error: storage. Inner error: why the tracker write failed.
    fn run_queue_item(
        &self,
        item: &SyncQueueItem,
        tracker: &dyn IssueTracker,
    ) -> Result<Result<(), String>> {
        let Some(task) = self.tasks().get_by_id(&item.entity_id)? else {
            return Ok(Err(format!("task {} no longer exists", item.entity_id)));
        };
        let local = LocalTask::from_task(&task, self.markers().get(task.id())?);
        let action = match (item.action, local.issue_number) {
            (SyncAction::CreateIssue, None) => PushAction::Create,
            (_, Some(_)) => PushAction::Update,
            (SyncAction::UpdateIssue, None) => {
                return Ok(Err(format!("task {} has no linked issue", task.display_ref())));
            }
        };
        let pushed = SyncEngine::new(tracker).push_to_github(&local, action);
        if !pushed.success {
            return Ok(Err(pushed
                .error
                .unwrap_or_else(|| "push failed".to_string())));
        }
        self.record_push(&task, &pushed)?;
        Ok(Ok(()))
    }
}

fn commit_action(
    task: &Task,
    kind: CommitActionKind,
    target: Option<TaskStatus>,
    applied: bool,
) -> CommitAction {
    CommitAction {
        kind,
        task_id: task.state.task_id.clone(),
        seq: task.seq,
        title: task.state.title.clone(),
        from_status: target.map(|_| task.state.status.clone()),
        to_status: target.map(|t| t.as_str().to_string()),
        applied,
    }
}

fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}

fn required_text(field: &str, raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::validation(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

fn optional_text(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn required_date(field: &str, raw: &str) -> Result<chrono::NaiveDate> {
    parse_date(raw).ok_or_else(|| Error::validation(format!("{field} '{raw}' is not a date")))
}

fn optional_date(field: &str, raw: Option<&str>) -> Result<Option<String>> {
    raw.map(|raw| required_date(field, raw).map(|d| d.format("%Y-%m-%d").to_string()))
        .transpose()
}

fn canonical<E>(raw: Option<&str>) -> Result<Option<String>>
where
    E: FromStr<Err = ParseEnumError> + fmt::Display,
{
    Ok(raw.map(str::parse::<E>).transpose()?.map(|v| v.to_string()))
}

fn non_negative<T: PartialOrd + Default>(field: &str, value: T) -> Result<()> {
    if value < T::default() {
        return Err(Error::validation(format!("{field} must not be negative")));
    }
    Ok(())
}

fn clean_labels(labels: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    labels
        .iter()
        .map(String::as_str)
        .map(str::trim)
        .filter(|label| !label.is_empty() && seen.insert(label.to_string()))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::projection::AnalyticsRepository;
    use crate::sync::tracker::fake::FakeTracker;
    use crate::sync::{ConflictReason, QueueStatus};

    fn project(service: &PmService<'_>) -> String {
        service
            .create_project("Widgets", Some("demo"))
            .expect("project")
            .project_id
    }

    fn task(service: &PmService<'_>, project_id: &str, title: &str) -> Task {
        service
            .create_task(&TaskCreated {
                project_id: project_id.to_string(),
                title: title.to_string(),
                ..TaskCreated::default()
            })
            .expect("task")
    }

    fn event_count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
            .expect("count")
    }

    #[test]
    fn create_task_canonicalizes_and_allocates_seq() {
        let conn = open_in_memory().expect("store");
        let service = PmService::new(&conn);
        let project_id = project(&service);

        let first = service
            .create_task(&TaskCreated {
                project_id: project_id.clone(),
                title: "  Ship it  ".into(),
                status: Some("In-Progress".into()),
                priority: Some("HIGH".into()),
                task_type: Some("bug".into()),
                labels: Some(vec!["api".into(), " api ".into(), String::new()]),
                due_date: Some("2026-03-01T10:00:00Z".into()),
                ..TaskCreated::default()
            })
            .expect("task");
        let second = task(&service, &project_id, "Second");

        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);
        assert_eq!(first.state.title, "Ship it");
        assert_eq!(first.state.status, "in_progress");
        assert_eq!(first.state.priority, "high");
        assert_eq!(first.state.task_type, "bug");
        assert_eq!(first.state.labels, vec!["api"]);
        assert_eq!(first.state.due_date.as_deref(), Some("2026-03-01"));
        assert!(first.state.started_at_us.is_some());
    }

    #[test]
    fn invalid_input_appends_nothing() {
        let conn = open_in_memory().expect("store");
        let service = PmService::new(&conn);
        let project_id = project(&service);
        let before = event_count(&conn);

        let blank = TaskCreated {
            project_id: project_id.clone(),
            title: "   ".into(),
            ..TaskCreated::default()
        };
        assert!(matches!(service.create_task(&blank), Err(Error::Validation(_))));

        let bad_status = TaskCreated {
            project_id: project_id.clone(),
            title: "ok".into(),
            status: Some("shipped".into()),
            ..TaskCreated::default()
        };
        let err = service.create_task(&bad_status).expect_err("bad status");
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidStatus);

        let orphan = TaskCreated {
            project_id: project_id.clone(),
            title: "ok".into(),
            parent_id: Some("missing".into()),
            ..TaskCreated::default()
        };
        assert!(matches!(service.create_task(&orphan), Err(Error::ParentNotFound(_))));

        let unknown_project = TaskCreated {
            project_id: "nope".into(),
            title: "ok".into(),
            ..TaskCreated::default()
        };
        assert!(matches!(
            service.create_task(&unknown_project),
            Err(Error::NotFound { kind: EntityKind::Project, .. })
        ));

        assert_eq!(event_count(&conn), before);
    }

    #[test]
    fn parent_must_be_another_task_in_the_same_project() {
        let conn = open_in_memory().expect("store");
        let service = PmService::new(&conn);
        let ours = project(&service);
        let theirs = service.create_project("Other", None).expect("project").project_id;
        let child = task(&service, &ours, "Child");
        let parent = task(&service, &ours, "Parent");
        let foreign = task(&service, &theirs, "Foreign");

        let own = TaskUpdated {
            parent_id: Some(child.id().to_string()),
            ..TaskUpdated::default()
        };
        assert!(matches!(service.update_task(child.id(), &own, None), Err(Error::Validation(_))));

        let cross = TaskUpdated {
            parent_id: Some(foreign.id().to_string()),
            ..TaskUpdated::default()
        };
        assert!(matches!(
            service.update_task(child.id(), &cross, None),
            Err(Error::ParentNotFound(_))
        ));

        let ok = TaskUpdated {
            parent_id: Some(parent.id().to_string()),
            ..TaskUpdated::default()
        };
        let updated = service.update_task(child.id(), &ok, None).expect("update");
        assert_eq!(updated.state.parent_id.as_deref(), Some(parent.id()));
    }

    #[test]
    fn update_and_estimate_land_together() {
        let conn = open_in_memory().expect("store");
        let service = PmService::new(&conn);
        let project_id = project(&service);
        let created = task(&service, &project_id, "Estimate me");

        assert!(matches!(
            service.update_task(created.id(), &TaskUpdated::default(), None),
            Err(Error::Validation(_))
        ));

        let updated = service
            .update_task(
                created.id(),
                &TaskUpdated {
                    assignee: Some("ana".into()),
                    ..TaskUpdated::default()
                },
                Some(&TaskEstimated {
                    points: Some(5),
                    hours: Some(6.5),
                }),
            )
            .expect("update");
        assert_eq!(updated.state.assignee.as_deref(), Some("ana"));
        assert_eq!(updated.state.estimate_points, Some(5));
        assert!(updated
            .state
            .estimate_hours
            .is_some_and(|hours| (hours - 6.5).abs() < f64::EPSILON));

        let negative = TaskEstimated {
            points: Some(-1),
            hours: None,
        };
        assert!(service
            .update_task(created.id(), &TaskUpdated::default(), Some(&negative))
            .is_err());
    }

    #[test]
    fn status_changes_and_deletion() {
        let conn = open_in_memory().expect("store");
        let service = PmService::new(&conn);
        let project_id = project(&service);
        let created = task(&service, &project_id, "Lifecycle");

        let started = service
            .change_status(created.id(), "in-progress", Some("picked up"))
            .expect("start");
        assert_eq!(started.state.status, "in_progress");
        let done = service.change_status(created.id(), "done", None).expect("done");
        assert!(done.state.completed_at_us.is_some());

        service.delete_task(created.id()).expect("delete");
        assert!(service.tasks().get_by_id(created.id()).expect("get").is_none());
        assert!(matches!(
            service.change_status(created.id(), "todo", None),
            Err(Error::NotFound { kind: EntityKind::Task, .. })
        ));

        let next = task(&service, &project_id, "After delete");
        assert_eq!(next.seq, 2, "deleted seq is not reissued");
    }

    #[test]
    fn resolve_task_accepts_seq_references() {
        let conn = open_in_memory().expect("store");
        let service = PmService::new(&conn);
        let project_id = project(&service);
        let created = task(&service, &project_id, "Find me");

        assert_eq!(service.resolve_task(Some(&project_id), "#1").expect("seq").id(), created.id());
        assert_eq!(service.resolve_task(None, created.id()).expect("id").seq, 1);
        assert!(service.resolve_task(None, "#1").is_err());
        assert_eq!(
            service.branch_name_for(created.id(), "feature").expect("branch"),
            "1-feature-find-me"
        );
    }

    #[test]
    fn sprint_lifecycle_records_velocity() {
        let conn = open_in_memory().expect("store");
        let service = PmService::new(&conn);
        let project_id = project(&service);

        let bad_dates = SprintCreated {
            project_id: project_id.clone(),
            name: "Backwards".into(),
            start_date: "2026-02-10".into(),
            end_date: "2026-02-01".into(),
            goal: None,
        };
        assert!(matches!(service.create_sprint(&bad_dates), Err(Error::Validation(_))));

        let sprint = service
            .create_sprint(&SprintCreated {
                project_id: project_id.clone(),
                name: "Sprint 1".into(),
                start_date: "2026-02-01".into(),
                end_date: "2026-02-14".into(),
                goal: Some("ship".into()),
            })
            .expect("sprint");
        let other = service
            .create_sprint(&SprintCreated {
                project_id: project_id.clone(),
                name: "Sprint 2".into(),
                start_date: "2026-02-15".into(),
                end_date: "2026-02-28".into(),
                goal: None,
            })
            .expect("sprint");

        let a = task(&service, &project_id, "A");
        let b = task(&service, &project_id, "B");
        for (t, points) in [(&a, 3), (&b, 5)] {
            service
                .update_task(
                    t.id(),
                    &TaskUpdated::default(),
                    Some(&TaskEstimated {
                        points: Some(points),
                        hours: None,
                    }),
                )
                .expect("estimate");
        }
        let added = service
            .add_tasks_to_sprint(&sprint.sprint_id, &[a.id(), b.id(), a.id()])
            .expect("add");
        assert_eq!(added.len(), 3);
        assert!(added.iter().all(|t| t.state.sprint_id.as_deref() == Some(sprint.sprint_id.as_str())));

        service.start_sprint(&sprint.sprint_id).expect("start");
        assert!(matches!(service.start_sprint(&sprint.sprint_id), Err(Error::Validation(_))));
        assert!(matches!(service.start_sprint(&other.sprint_id), Err(Error::Validation(_))));

        service.change_status(a.id(), "done", None).expect("done");
        let report = service.complete_sprint(&sprint.sprint_id).expect("complete");
        assert_eq!(report.total_points, 8);
        assert_eq!(report.completed_points, 3);
        assert!(matches!(service.complete_sprint(&sprint.sprint_id), Err(Error::Validation(_))));

        let velocity = AnalyticsRepository::new(&conn)
            .velocity(&project_id, 3)
            .expect("velocity");
        assert_eq!(velocity.trend.len(), 1);
        assert_eq!(velocity.trend[0].completed_points, 3);

        let removed = service.remove_task_from_sprint(b.id()).expect("remove");
        assert!(removed.state.sprint_id.is_none());
        assert!(service.remove_task_from_sprint(b.id()).is_err());
    }

    #[test]
    fn commit_links_tasks_and_moves_status() {
        let conn = open_in_memory().expect("store");
        let service = PmService::new(&conn);
        let project_id = project(&service);
        let fixed = task(&service, &project_id, "Fix login");
        let related = task(&service, &project_id, "Docs");

        let message = "fix(auth): handle expired tokens\n\nfixes #1, refs #2, closes #99";
        let dry = service
            .process_commit(&CommitInput {
                project_id: &project_id,
                sha: "abcdef1234567",
                message,
                branch: Some("1-fix-login"),
                dry_run: true,
            })
            .expect("dry run");
        assert!(dry.actions.iter().all(|a| !a.applied));
        assert_eq!(dry.unmatched, vec![99]);
        assert_eq!(
            service.tasks().get_by_id(fixed.id()).expect("get").expect("task").state.status,
            "todo"
        );

        let input = CommitInput {
            project_id: &project_id,
            sha: "abcdef1234567",
            message,
            branch: Some("1-fix-login"),
            dry_run: false,
        };
        let report = service.process_commit(&input).expect("process");
        assert_eq!(report.commit.commit_type.as_deref(), Some("fix"));
        assert_eq!(report.actions.len(), 3);

        let fixed = service.tasks().get_by_id(fixed.id()).expect("get").expect("task");
        assert_eq!(fixed.state.status, "done");
        assert_eq!(fixed.state.linked_commits, vec!["abcdef1234567"]);
        let related = service.tasks().get_by_id(related.id()).expect("get").expect("task");
        assert_eq!(related.state.status, "todo");
        assert_eq!(related.state.linked_commits.len(), 1);

        let again = service.process_commit(&input).expect("reprocess");
        assert!(again.actions.is_empty(), "{:?}", again.actions);
    }

    #[test]
    fn pull_requires_enabled_github_and_pulling_mode() {
        let conn = open_in_memory().expect("store");
        let service = PmService::new(&conn);
        let project_id = project(&service);
        let tracker = FakeTracker::default();

        assert!(matches!(
            service.sync_pull(&project_id, &tracker, false),
            Err(Error::Validation(_))
        ));
        service.enable_github(&project_id, "acme/widgets").expect("enable");
        service.set_sync_mode(&project_id, SyncMode::PushOnly).expect("mode");
        assert!(matches!(
            service.sync_pull(&project_id, &tracker, false),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn pull_imports_new_issues_then_settles() {
        let conn = open_in_memory().expect("store");
        let service = PmService::new(&conn);
        let project_id = project(&service);
        service.enable_github(&project_id, "acme/widgets").expect("enable");
        let tracker = FakeTracker::default()
            .with_issue(7, "Crash on save", IssueState::Open, 5)
            .with_issue(8, "Old bug", IssueState::Closed, 6);

        let dry = service.sync_pull(&project_id, &tracker, true).expect("dry run");
        assert_eq!(dry.result.created.len(), 2);
        assert!(dry.tasks_created.is_empty());

        let first = service.sync_pull(&project_id, &tracker, false).expect("pull");
        assert_eq!(first.tasks_created, vec![1, 2]);
        let imported = service.tasks().get_by_seq(&project_id, 2).expect("get").expect("task");
        assert_eq!(imported.state.status, "done");
        assert_eq!(imported.state.linked_issues, vec![8]);
        let marker = service.markers().get(imported.id()).expect("marker").expect("some");
        assert_eq!(marker.issue_number, 8);

        let second = service.sync_pull(&project_id, &tracker, false).expect("pull");
        assert!(second.result.created.is_empty());
        assert_eq!(second.result.synced.len(), 2);
        assert!(second.result.conflicts.is_empty());
        assert!(service.configs().get(&project_id).expect("config").expect("some").last_sync_at_us.is_some());
    }

    #[test]
    fn remote_edit_overwrites_task() {
        let conn = open_in_memory().expect("store");
        let service = PmService::new(&conn);
        let project_id = project(&service);
        service.enable_github(&project_id, "acme/widgets").expect("enable");
        let tracker = FakeTracker::default().with_issue(3, "Draft title", IssueState::Open, 5);
        service.sync_pull(&project_id, &tracker, false).expect("import");

        {
            let mut issues = tracker.issues.borrow_mut();
            issues[0].title = "Final title".into();
            issues[0].state = IssueState::Closed;
            issues[0].updated_at_us = now_us() + 60_000_000;
        }
        let report = service.sync_pull(&project_id, &tracker, false).expect("pull");
        assert_eq!(report.tasks_updated, vec![1]);
        let task = service.tasks().get_by_seq(&project_id, 1).expect("get").expect("task");
        assert_eq!(task.state.title, "Final title");
        assert_eq!(task.state.status, "done");
    }

    #[test]
    fn local_edit_is_pushed_in_bidirectional_mode() {
        let conn = open_in_memory().expect("store");
        let service = PmService::new(&conn);
        let project_id = project(&service);
        service.enable_github(&project_id, "acme/widgets").expect("enable");
        service.set_sync_mode(&project_id, SyncMode::Bidirectional).expect("mode");
        let tracker = FakeTracker::default().with_issue(4, "Ship docs", IssueState::Open, 5);
        service.sync_pull(&project_id, &tracker, false).expect("import");
        let task = service.tasks().get_by_seq(&project_id, 1).expect("get").expect("task");

        service.change_status(task.id(), "done", None).expect("done");
        let report = service.sync_pull(&project_id, &tracker, false).expect("pull");
        assert_eq!(report.issues_pushed, vec![4]);
        assert_eq!(tracker.issue(4).expect("issue").state, IssueState::Closed);
    }

    #[test]
    fn unmarked_divergence_is_a_conflict() {
        let conn = open_in_memory().expect("store");
        let service = PmService::new(&conn);
        let project_id = project(&service);
        service.enable_github(&project_id, "acme/widgets").expect("enable");
        let created = task(&service, &project_id, "Local name");
        service.link_issue(created.id(), 9, None).expect("link");
        let tracker = FakeTracker::default().with_issue(9, "Remote name", IssueState::Open, 5);

        let report = service.sync_pull(&project_id, &tracker, false).expect("pull");
        assert_eq!(report.result.conflicts.len(), 1);
        assert_eq!(report.result.conflicts[0].reason, ConflictReason::NoSyncMarker);
        let unchanged = service.tasks().get_by_id(created.id()).expect("get").expect("task");
        assert_eq!(unchanged.state.title, "Local name");
    }

    #[test]
    fn failed_push_is_queued_and_retried() {
        let conn = open_in_memory().expect("store");
        let service = PmService::new(&conn);
        let project_id = project(&service);
        let created = task(&service, &project_id, "Needs an issue");
        let tracker = FakeTracker::default();

        assert!(matches!(
            service.sync_push(created.id(), PushAction::Create, &tracker),
            Err(Error::Validation(_))
        ));
        service.enable_github(&project_id, "acme/widgets").expect("enable");
        assert!(matches!(
            service.sync_push(created.id(), PushAction::Update, &tracker),
            Err(Error::Validation(_))
        ));

        tracker.offline.set(true);
        let report = service
            .sync_push(created.id(), PushAction::Create, &tracker)
            .expect("push");
        assert!(!report.result.success);
        let queued = report.queued_item.expect("queued");
        assert_eq!(queued.action, SyncAction::CreateIssue);
        assert_eq!(queued.payload["taskSeq"], 1);

        let still_down = service.process_queue(&tracker, 10).expect("run");
        assert_eq!(still_down.failed, 1);
        assert!(service.queue().retry(queued.id).expect("retry"));

        tracker.offline.set(false);
        let run = service.process_queue(&tracker, 10).expect("run");
        assert_eq!((run.processed, run.completed, run.failed), (1, 1, 0));
        assert_eq!(run.items[0].status, QueueStatus::Completed);

        let linked = service.tasks().get_by_id(created.id()).expect("get").expect("task");
        assert_eq!(linked.state.linked_issues, vec![1]);
        assert_eq!(tracker.issue(1).expect("issue").title, "Needs an issue");
        assert!(service.markers().get(created.id()).expect("marker").is_some());
        assert!(matches!(
            service.sync_push(created.id(), PushAction::Create, &tracker),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn metadata_is_stamped_on_events() {
        let conn = open_in_memory().expect("store");
        let service = PmService::new(&conn).with_metadata(EventMetadata {
            actor: Some("ana".into()),
            ..EventMetadata::from_source("cli")
        });
        let project_id = project(&service);
        let created = task(&service, &project_id, "Traced");

        let events = EventStore::new(&conn)
            .get_events(AggregateType::Task, created.id(), None)
            .expect("events");
        let metadata = events[0].metadata.as_ref().expect("metadata");
        assert_eq!(metadata.actor.as_deref(), Some("ana"));
        assert_eq!(metadata.source.as_deref(), Some("cli"));
    }

    #[test]
    fn rebuild_restores_dropped_rows() {
        let conn = open_in_memory().expect("store");
        let service = PmService::new(&conn);
        let project_id = project(&service);
        let kept = task(&service, &project_id, "Kept");
        let gone = task(&service, &project_id, "Gone");
        service.delete_task(gone.id()).expect("delete");

        conn.execute_batch("DELETE FROM tasks; DELETE FROM projects;")
            .expect("drop rows");
        let report = service.rebuild_projections().expect("rebuild");
        assert_eq!(report, RebuildReport { projects: 1, sprints: 0, tasks: 1 });

        let restored = service.rebuild_task(kept.id()).expect("rebuild").expect("task");
        assert_eq!(restored.state.title, "Kept");
        assert!(service.rebuild_task(gone.id()).expect("rebuild").is_none());
    }
}
