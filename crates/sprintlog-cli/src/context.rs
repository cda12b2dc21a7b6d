//! Per-invocation state shared by command handlers: resolved config, the
//! store connection, the writer lock and project selection.

use anyhow::{Context as _, Result};
use rusqlite::Connection;
use sprintlog_core::config::{EffectiveConfig, OutputMode, resolve_config};
use sprintlog_core::event::EventMetadata;
use sprintlog_core::lock::{DEFAULT_LOCK_TIMEOUT, StoreLock};
use sprintlog_core::projection::Task;
use sprintlog_core::reduce::SprintState;
use sprintlog_core::{PmService, db};
use std::env;
use std::path::Path;

use crate::github::{GithubClient, RepoSlug};

/// Selects the project when `--project` is absent.
pub const PROJECT_ENV: &str = "SPRINTLOG_PROJECT";

/// Overrides the actor recorded in event metadata.
pub const ACTOR_ENV: &str = "SPRINTLOG_ACTOR";

pub struct Context {
    pub config: EffectiveConfig,
    project_flag: Option<String>,
}

impl Context {
    pub fn new(root: &Path, cli_json: bool, project_flag: Option<String>) -> Result<Self> {
        let config = resolve_config(root, cli_json)?;
        tracing::debug!(db = %config.db_path.display(), output = ?config.output, "resolved config");
        Ok(Self {
            config,
            project_flag,
        })
    }

    pub const fn output(&self) -> OutputMode {
        self.config.output
    }

    /// Open the store, creating it when missing.
    pub fn create_store(&self) -> Result<Connection> {
        Ok(db::open_store(&self.config.db_path)?)
    }

    /// Open an existing store.
    pub fn open_store(&self) -> Result<Connection> {
        Ok(db::open_existing(&self.config.db_path)?)
    }

    /// Single-writer lock held for the duration of a mutating command.
    pub fn lock(&self) -> Result<StoreLock> {
        let path = StoreLock::path_for_db(&self.config.db_path);
        StoreLock::acquire(&path, DEFAULT_LOCK_TIMEOUT)
            .map_err(sprintlog_core::Error::from)
            .context("failed to lock the store")
    }

    /// Command service stamped with the CLI actor.
    pub fn service<'conn>(&self, conn: &'conn Connection) -> PmService<'conn> {
        let actor = env::var(ACTOR_ENV)
            .or_else(|_| env::var("USER"))
            .ok()
            .filter(|actor| !actor.trim().is_empty());
        PmService::new(conn).with_metadata(EventMetadata {
            actor,
            ..EventMetadata::from_source("cli")
        })
    }

    /// Project id from `--project`, then `SPRINTLOG_PROJECT`, then the only
    /// active project in the store.
    pub fn project_id(&self, service: &PmService<'_>) -> Result<String> {
        let explicit = self
            .project_flag
            .clone()
            .or_else(|| env::var(PROJECT_ENV).ok())
            .filter(|id| !id.trim().is_empty());
        if let Some(reference) = explicit {
            return resolve_project(service, reference.trim());
        }
        let mut projects = service.projects().list()?;
        match projects.len() {
            1 => Ok(projects.remove(0).project_id),
            0 => anyhow::bail!("no projects yet; run `sprintlog project create <name>`"),
            n => anyhow::bail!("{n} projects exist; pass --project <id|name> or set {PROJECT_ENV}"),
        }
    }

    /// Sprint by id or by name within the selected project; `None` picks the
    /// active sprint.
    pub fn sprint(&self, service: &PmService<'_>, reference: Option<&str>) -> Result<SprintState> {
        let by_id = reference
            .map(|id| service.sprints().get_by_id(id))
            .transpose()?
            .flatten();
        if let Some(sprint) = by_id {
            return Ok(sprint);
        }
        let project_id = self.project_id(service)?;
        match reference {
            Some(reference) => service
                .sprints()
                .list(&project_id)?
                .into_iter()
                .find(|sprint| sprint.name.eq_ignore_ascii_case(reference))
                .with_context(|| format!("no sprint '{reference}' in project {project_id}")),
            None => service
                .sprints()
                .get_active(&project_id)?
                .context("no active sprint; pass a sprint id or name"),
        }
    }

    /// Task by id, or by `42`/`#42` within the selected project.
    pub fn task(&self, service: &PmService<'_>, reference: &str) -> Result<Task> {
        if let Some(task) = service.tasks().get_by_id(reference)? {
            return Ok(task);
        }
        let project_id = self.project_id(service)?;
        Ok(service.resolve_task(Some(&project_id), reference)?)
    }

    /// GitHub client for a project: repo from the project's sync config,
    /// else `[github] repo`; token from the environment or user config.
    pub fn github(&self, service: &PmService<'_>, project_id: &str) -> Result<GithubClient> {
        let repo = service
            .configs()
            .get(project_id)?
            .and_then(|config| config.github_repo)
            .or_else(|| self.config.project.github.repo.clone())
            .context("no GitHub repository configured; run `sprintlog project github <owner/repo>`")?;
        Ok(GithubClient::new(
            &self.config.project.github.api_url,
            RepoSlug::parse(&repo)?,
            self.config.github_token(),
        ))
    }
}

fn resolve_project(service: &PmService<'_>, reference: &str) -> Result<String> {
    if let Some(project) = service.projects().get_by_id(reference)? {
        return Ok(project.project_id);
    }
    service
        .projects()
        .list()?
        .into_iter()
        .find(|project| project.name.eq_ignore_ascii_case(reference))
        .map(|project| project.project_id)
        .with_context(|| format!("no project '{reference}'"))
}
