//! Project read model.

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::Value;

use crate::db::with_transaction;
use crate::error::{EntityKind, Error, Result};
use crate::event::{AggregateType, EventKind, EventMetadata, EventStore};
use crate::reduce::project::{ProjectCreated, ProjectUpdated};
use crate::reduce::{ProjectReducer, ProjectState, Reducer};

const PROJECT_COLUMNS: &str =
    "project_id, name, description, status, settings_json, created_at_us, updated_at_us";

/// Projects projection (`projects` table).
#[derive(Debug, Clone, Copy)]
pub struct ProjectRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> ProjectRepository<'conn> {
    #[must_use]
    pub const fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Append `ProjectCreated` for a fresh id and materialize it.
    ///
    /// # Errors
    ///
    /// Returns an error if the append or upsert fails; neither lands alone.
    pub fn create(
        &self,
        created: &ProjectCreated,
        metadata: Option<&EventMetadata>,
    ) -> Result<ProjectState> {
        let project_id = uuid::Uuid::new_v4().to_string();
        with_transaction(self.conn, |conn| {
            EventStore::new(conn).append(
                EventKind::ProjectCreated,
                &project_id,
                serde_json::to_value(created)?,
                metadata,
            )?;
            ProjectRepository::new(conn).sync_required(&project_id)
        })
    }

    /// Append `ProjectUpdated` and resync.
    ///
    /// # Errors
    ///
    /// Returns an error if the append or upsert fails.
    pub fn update(
        &self,
        project_id: &str,
        patch: &ProjectUpdated,
        metadata: Option<&EventMetadata>,
    ) -> Result<ProjectState> {
        with_transaction(self.conn, |conn| {
            EventStore::new(conn).append(
                EventKind::ProjectUpdated,
                project_id,
                serde_json::to_value(patch)?,
                metadata,
            )?;
            ProjectRepository::new(conn).sync_required(project_id)
        })
    }

    /// Replay one project's events and upsert its row.
    ///
    /// Returns `None` when the project has no events.
    ///
    /// # Errors
    ///
    /// Returns an error if reading events or writing the row fails.
    pub fn sync_from_events(&self, project_id: &str) -> Result<Option<ProjectState>> {
        with_transaction(self.conn, |conn| {
            let events = EventStore::new(conn).get_events(AggregateType::Project, project_id, None)?;
            let Some(state) = ProjectReducer::reduce(&events) else {
                conn.execute("DELETE FROM projects WHERE project_id = ?1", params![project_id])?;
                return Ok(None);
            };

            let settings = state.settings.as_ref().map(Value::to_string);
            conn.execute(
                "INSERT INTO projects (project_id, name, description, status, settings_json,
                                       created_at_us, updated_at_us)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(project_id) DO UPDATE SET
                     name = excluded.name,
                     description = excluded.description,
                     status = excluded.status,
                     settings_json = excluded.settings_json,
                     created_at_us = excluded.created_at_us,
                     updated_at_us = excluded.updated_at_us",
                params![
                    state.project_id,
                    state.name,
                    state.description,
                    state.status,
                    settings,
                    state.created_at_us,
                    state.updated_at_us,
                ],
            )?;
            tracing::debug!(project_id, "resynced project projection");
            Ok(Some(state))
        })
    }

    fn sync_required(&self, project_id: &str) -> Result<ProjectState> {
        self.sync_from_events(project_id)?
            .ok_or_else(|| Error::not_found(EntityKind::Project, project_id))
    }

    /// # Errors
    ///
    /// Returns an error if the query fails or `settings_json` is corrupt.
    pub fn get_by_id(&self, project_id: &str) -> Result<Option<ProjectState>> {
        let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE project_id = ?1");
        let raw = self
            .conn
            .query_row(&sql, params![project_id], ProjectRow::from_row)
            .optional()?;
        raw.map(ProjectRow::decode).transpose()
    }

    /// Active projects, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list(&self) -> Result<Vec<ProjectState>> {
        let sql = format!(
            "SELECT {PROJECT_COLUMNS} FROM projects
             WHERE status = 'active'
             ORDER BY created_at_us DESC, project_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], ProjectRow::from_row)?;
        rows.map(|row| row?.decode()).collect()
    }
}

struct ProjectRow {
    project_id: String,
    name: String,
    description: Option<String>,
    status: String,
    settings_json: Option<String>,
    created_at_us: i64,
    updated_at_us: i64,
}

impl ProjectRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            project_id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            status: row.get(3)?,
            settings_json: row.get(4)?,
            created_at_us: row.get(5)?,
            updated_at_us: row.get(6)?,
        })
    }

    fn decode(self) -> Result<ProjectState> {
        let settings = self
            .settings_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        Ok(ProjectState {
            project_id: self.project_id,
            name: self.name,
            description: self.description,
            status: self.status,
            settings,
            created_at_us: self.created_at_us,
            updated_at_us: self.updated_at_us,
        })
    }
}
