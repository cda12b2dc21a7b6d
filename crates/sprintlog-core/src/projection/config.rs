//! Per-project GitHub integration settings (`project_config`).
//!
//! This side table is not event-sourced: it holds operator configuration and
//! sync bookkeeping, not domain history.

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::SyncMode;
use crate::timestamp::now_us;

const CONFIG_COLUMNS: &str = "id, project_id, github_enabled, github_repo, github_project_id, \
     github_project_number, field_mappings, status_options, sync_mode, last_sync_at_us, \
     last_sync_cursor, created_at_us, updated_at_us";

/// Integration settings for one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectConfig {
    pub id: i64,
    pub project_id: String,
    pub github_enabled: bool,
    /// `owner/repo` of the linked GitHub repository.
    pub github_repo: Option<String>,
    pub github_project_id: Option<String>,
    pub github_project_number: Option<i64>,
    pub field_mappings: Option<String>,
    pub status_options: Option<String>,
    pub sync_mode: SyncMode,
    pub last_sync_at_us: Option<i64>,
    pub last_sync_cursor: Option<String>,
    pub created_at_us: i64,
    pub updated_at_us: i64,
}

/// Partial update; `None` leaves a column unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectConfigUpdate {
    pub github_enabled: Option<bool>,
    pub github_repo: Option<String>,
    pub github_project_id: Option<String>,
    pub github_project_number: Option<i64>,
    pub sync_mode: Option<SyncMode>,
    pub last_sync_at_us: Option<i64>,
    pub last_sync_cursor: Option<String>,
}

/// Repository over `project_config`.
#[derive(Debug, Clone, Copy)]
pub struct ProjectConfigRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> ProjectConfigRepository<'conn> {
    #[must_use]
    pub const fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// # Errors
    ///
    /// Returns an error if the query fails or `sync_mode` is unrecognized.
    pub fn get(&self, project_id: &str) -> Result<Option<ProjectConfig>> {
        let sql = format!("SELECT {CONFIG_COLUMNS} FROM project_config WHERE project_id = ?1");
        let raw = self
            .conn
            .query_row(&sql, params![project_id], ConfigRow::from_row)
            .optional()?;
        raw.map(ConfigRow::decode).transpose()
    }

    /// Create the row if missing, otherwise overwrite the enabled flag and
    /// sync mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn upsert(
        &self,
        project_id: &str,
        github_enabled: bool,
        sync_mode: SyncMode,
    ) -> Result<ProjectConfig> {
        let now = now_us();
        self.conn.execute(
            "INSERT INTO project_config (project_id, github_enabled, sync_mode,
                                         created_at_us, updated_at_us)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(project_id) DO UPDATE SET
                 github_enabled = excluded.github_enabled,
                 sync_mode = excluded.sync_mode,
                 updated_at_us = excluded.updated_at_us",
            params![project_id, github_enabled, sync_mode.as_str(), now],
        )?;
        self.require(project_id)
    }

    /// Patch selected columns. Returns `None` if the project has no config.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn update(
        &self,
        project_id: &str,
        update: &ProjectConfigUpdate,
    ) -> Result<Option<ProjectConfig>> {
        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<rusqlite::types::Value> = Vec::new();
        let mut push = |clause: &'static str, value: rusqlite::types::Value| {
            sets.push(clause);
            values.push(value);
        };

        if let Some(enabled) = update.github_enabled {
            push("github_enabled", i64::from(enabled).into());
        }
        if let Some(repo) = &update.github_repo {
            push("github_repo", repo.clone().into());
        }
        if let Some(id) = &update.github_project_id {
            push("github_project_id", id.clone().into());
        }
        if let Some(number) = update.github_project_number {
            push("github_project_number", number.into());
        }
        if let Some(mode) = update.sync_mode {
            push("sync_mode", mode.as_str().to_string().into());
        }
        if let Some(at) = update.last_sync_at_us {
            push("last_sync_at_us", at.into());
        }
        if let Some(cursor) = &update.last_sync_cursor {
            push("last_sync_cursor", cursor.clone().into());
        }

        if !sets.is_empty() {
            let assignments: Vec<String> = sets
                .iter()
                .enumerate()
                .map(|(i, column)| format!("{column} = ?{}", i + 1))
                .collect();
            values.push(now_us().into());
            values.push(project_id.to_string().into());
            let sql = format!(
                "UPDATE project_config SET {}, updated_at_us = ?{} WHERE project_id = ?{}",
                assignments.join(", "),
                values.len() - 1,
                values.len()
            );
            self.conn
                .execute(&sql, rusqlite::params_from_iter(values.iter()))?;
        }

        self.get(project_id)
    }

    /// Link a repository and turn sync on, creating the row when needed.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] if `repo` is not `owner/name`.
    pub fn enable_github(&self, project_id: &str, repo: &str) -> Result<ProjectConfig> {
        validate_repo(repo)?;
        if self.get(project_id)?.is_none() {
            self.upsert(project_id, true, SyncMode::default())?;
        }
        let update = ProjectConfigUpdate {
            github_enabled: Some(true),
            github_repo: Some(repo.to_string()),
            ..ProjectConfigUpdate::default()
        };
        self.update(project_id, &update)?;
        self.require(project_id)
    }

    /// Turn sync off. Returns `None` if the project has no config.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn disable_github(&self, project_id: &str) -> Result<Option<ProjectConfig>> {
        self.update(
            project_id,
            &ProjectConfigUpdate {
                github_enabled: Some(false),
                ..ProjectConfigUpdate::default()
            },
        )
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn is_github_enabled(&self, project_id: &str) -> Result<bool> {
        Ok(self.get(project_id)?.is_some_and(|c| c.github_enabled))
    }

    /// Record a completed sync run.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn mark_synced(&self, project_id: &str, at_us: i64) -> Result<Option<ProjectConfig>> {
        self.update(
            project_id,
            &ProjectConfigUpdate {
                last_sync_at_us: Some(at_us),
                ..ProjectConfigUpdate::default()
            },
        )
    }

    fn require(&self, project_id: &str) -> Result<ProjectConfig> {
        self.get(project_id)?.ok_or_else(|| {
            Error::Validation(format!("project {project_id} has no integration config"))
        })
    }
}

fn validate_repo(repo: &str) -> Result<()> {
    let mut parts = repo.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(name), None) if !owner.trim().is_empty() && !name.trim().is_empty() => {
            Ok(())
        }
        _ => Err(Error::Validation(format!(
            "github repo must look like owner/name, got '{repo}'"
        ))),
    }
}

struct ConfigRow {
    id: i64,
    project_id: String,
    github_enabled: bool,
    github_repo: Option<String>,
    github_project_id: Option<String>,
    github_project_number: Option<i64>,
    field_mappings: Option<String>,
    status_options: Option<String>,
    sync_mode: String,
    last_sync_at_us: Option<i64>,
    last_sync_cursor: Option<String>,
    created_at_us: i64,
    updated_at_us: i64,
}

impl ConfigRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            github_enabled: row.get::<_, i64>(2)? != 0,
            github_repo: row.get(3)?,
            github_project_id: row.get(4)?,
            github_project_number: row.get(5)?,
            field_mappings: row.get(6)?,
            status_options: row.get(7)?,
            sync_mode: row.get(8)?,
            last_sync_at_us: row.get(9)?,
            last_sync_cursor: row.get(10)?,
            created_at_us: row.get(11)?,
            updated_at_us: row.get(12)?,
        })
    }

    fn decode(self) -> Result<ProjectConfig> {
        let sync_mode: SyncMode = self.sync_mode.parse()?;
        Ok(ProjectConfig {
            id: self.id,
            project_id: self.project_id,
            github_enabled: self.github_enabled,
            github_repo: self.github_repo,
            github_project_id: self.github_project_id,
            github_project_number: self.github_project_number,
            field_mappings: self.field_mappings,
            status_options: self.status_options,
            sync_mode,
            last_sync_at_us: self.last_sync_at_us,
            last_sync_cursor: self.last_sync_cursor,
            created_at_us: self.created_at_us,
            updated_at_us: self.updated_at_us,
        })
    }
}
