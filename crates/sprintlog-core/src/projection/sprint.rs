//! Sprint read model and sprint lifecycle.

use std::collections::BTreeMap;

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use serde_json::json;

use super::task::{Task, TaskRepository};
use crate::db::with_transaction;
use crate::error::{EntityKind, Error, Result};
use crate::event::{AggregateType, EventKind, EventMetadata, EventStore};
use crate::reduce::sprint::SprintCreated;
use crate::reduce::{Reducer, SprintReducer, SprintState};

const SPRINT_COLUMNS: &str = "sprint_id, project_id, name, goal, start_date, end_date, status, \
     velocity_committed, velocity_completed, created_at_us, updated_at_us, started_at_us, \
     completed_at_us";

/// Progress snapshot for one sprint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SprintStatusReport {
    pub sprint: SprintState,
    pub tasks: Vec<Task>,
    pub total_points: i64,
    pub completed_points: i64,
    /// Rounded completion percentage (0 when the sprint has no points).
    pub progress_pct: i64,
    /// Task count per status string.
    pub status_counts: BTreeMap<String, usize>,
}

impl SprintStatusReport {
    fn build(sprint: SprintState, tasks: Vec<Task>) -> Self {
        let total_points: i64 = tasks.iter().filter_map(|t| t.state.estimate_points).sum();
        let completed_points: i64 = tasks
            .iter()
            .filter(|t| t.state.status == "done")
            .filter_map(|t| t.state.estimate_points)
            .sum();
        let progress_pct = if total_points > 0 {
            (completed_points * 100 + total_points / 2) / total_points
        } else {
            0
        };
        let mut status_counts = BTreeMap::new();
        for task in &tasks {
            *status_counts.entry(task.state.status.clone()).or_insert(0) += 1;
        }
        Self {
            sprint,
            tasks,
            total_points,
            completed_points,
            progress_pct,
            status_counts,
        }
    }
}

/// Sprints projection (`sprints` table) plus velocity recording.
#[derive(Debug, Clone, Copy)]
pub struct SprintRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SprintRepository<'conn> {
    #[must_use]
    pub const fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Append `SprintCreated` for a fresh id and materialize it.
    ///
    /// # Errors
    ///
    /// Returns an error if the append or upsert fails.
    pub fn create(
        &self,
        created: &SprintCreated,
        metadata: Option<&EventMetadata>,
    ) -> Result<SprintState> {
        let sprint_id = uuid::Uuid::new_v4().to_string();
        with_transaction(self.conn, |conn| {
            EventStore::new(conn).append(
                EventKind::SprintCreated,
                &sprint_id,
                serde_json::to_value(created)?,
                metadata,
            )?;
            SprintRepository::new(conn).sync_required(&sprint_id)
        })
    }

    /// Append `SprintStarted` and resync.
    ///
    /// # Errors
    ///
    /// Returns an error if the append or upsert fails.
    pub fn start(&self, sprint_id: &str, metadata: Option<&EventMetadata>) -> Result<SprintState> {
        with_transaction(self.conn, |conn| {
            EventStore::new(conn).append(EventKind::SprintStarted, sprint_id, json!({}), metadata)?;
            SprintRepository::new(conn).sync_required(sprint_id)
        })
    }

    /// Append `SprintCompleted` with the committed/completed point totals,
    /// resync, and record the sprint's velocity fact.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown sprint; storage errors otherwise.
    pub fn complete(
        &self,
        sprint_id: &str,
        metadata: Option<&EventMetadata>,
    ) -> Result<SprintStatusReport> {
        with_transaction(self.conn, |conn| {
            let repo = SprintRepository::new(conn);
            let report = repo
                .status(sprint_id)?
                .ok_or_else(|| Error::not_found(EntityKind::Sprint, sprint_id))?;

            let event = EventStore::new(conn).append(
                EventKind::SprintCompleted,
                sprint_id,
                json!({
                    "totalPoints": report.total_points,
                    "completedPoints": report.completed_points,
                }),
                metadata,
            )?;
            let sprint = repo.sync_required(sprint_id)?;

            #[allow(clippy::cast_precision_loss)]
            let completion_rate = if report.total_points > 0 {
                report.completed_points as f64 / report.total_points as f64
            } else {
                0.0
            };
            conn.execute(
                "INSERT INTO velocity_history (project_id, sprint_id, committed_points,
                                               completed_points, completion_rate, recorded_at_us)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    sprint.project_id,
                    sprint_id,
                    report.total_points,
                    report.completed_points,
                    completion_rate,
                    event.recorded_at_us,
                ],
            )?;
            tracing::info!(
                sprint_id,
                committed = report.total_points,
                completed = report.completed_points,
                "sprint completed"
            );

            Ok(SprintStatusReport { sprint, ..report })
        })
    }

    /// Replay one sprint's events and upsert its row.
    ///
    /// # Errors
    ///
    /// Returns an error if reading events or writing the row fails.
    pub fn sync_from_events(&self, sprint_id: &str) -> Result<Option<SprintState>> {
        with_transaction(self.conn, |conn| {
            let events = EventStore::new(conn).get_events(AggregateType::Sprint, sprint_id, None)?;
            let Some(state) = SprintReducer::reduce(&events) else {
                conn.execute("DELETE FROM sprints WHERE sprint_id = ?1", params![sprint_id])?;
                return Ok(None);
            };

            conn.execute(
                "INSERT INTO sprints (sprint_id, project_id, name, goal, start_date, end_date,
                                      status, velocity_committed, velocity_completed,
                                      created_at_us, updated_at_us, started_at_us,
                                      completed_at_us)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(sprint_id) DO UPDATE SET
                     project_id = excluded.project_id,
                     name = excluded.name,
                     goal = excluded.goal,
                     start_date = excluded.start_date,
                     end_date = excluded.end_date,
                     status = excluded.status,
                     velocity_committed = excluded.velocity_committed,
                     velocity_completed = excluded.velocity_completed,
                     created_at_us = excluded.created_at_us,
                     updated_at_us = excluded.updated_at_us,
                     started_at_us = excluded.started_at_us,
                     completed_at_us = excluded.completed_at_us",
                params![
                    state.sprint_id,
                    state.project_id,
                    state.name,
                    state.goal,
                    state.start_date,
                    state.end_date,
                    state.status,
                    state.velocity_committed,
                    state.velocity_completed,
                    state.created_at_us,
                    state.updated_at_us,
                    state.started_at_us,
                    state.completed_at_us,
                ],
            )?;
            tracing::debug!(sprint_id, status = %state.status, "resynced sprint projection");
            Ok(Some(state))
        })
    }

    fn sync_required(&self, sprint_id: &str) -> Result<SprintState> {
        self.sync_from_events(sprint_id)?
            .ok_or_else(|| Error::not_found(EntityKind::Sprint, sprint_id))
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_by_id(&self, sprint_id: &str) -> Result<Option<SprintState>> {
        let sql = format!("SELECT {SPRINT_COLUMNS} FROM sprints WHERE sprint_id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![sprint_id], sprint_from_row)
            .optional()?)
    }

    /// The project's active sprint, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_active(&self, project_id: &str) -> Result<Option<SprintState>> {
        let sql = format!(
            "SELECT {SPRINT_COLUMNS} FROM sprints
             WHERE project_id = ?1 AND status = 'active'
             ORDER BY started_at_us DESC
             LIMIT 1"
        );
        Ok(self
            .conn
            .query_row(&sql, params![project_id], sprint_from_row)
            .optional()?)
    }

    /// Sprints for a project, latest start date first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list(&self, project_id: &str) -> Result<Vec<SprintState>> {
        let sql = format!(
            "SELECT {SPRINT_COLUMNS} FROM sprints
             WHERE project_id = ?1
             ORDER BY start_date DESC, created_at_us DESC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let sprints = stmt
            .query_map(params![project_id], sprint_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sprints)
    }

    /// Sprint with its tasks and point totals, or `None` for an unknown id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn status(&self, sprint_id: &str) -> Result<Option<SprintStatusReport>> {
        let Some(sprint) = self.get_by_id(sprint_id)? else {
            return Ok(None);
        };
        let tasks = TaskRepository::new(self.conn).list_for_sprint(sprint_id)?;
        Ok(Some(SprintStatusReport::build(sprint, tasks)))
    }
}

fn sprint_from_row(row: &Row<'_>) -> rusqlite::Result<SprintState> {
    Ok(SprintState {
        sprint_id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        goal: row.get(3)?,
        start_date: row.get(4)?,
        end_date: row.get(5)?,
        status: row.get(6)?,
        velocity_committed: row.get(7)?,
        velocity_completed: row.get(8)?,
        created_at_us: row.get(9)?,
        updated_at_us: row.get(10)?,
        started_at_us: row.get(11)?,
        completed_at_us: row.get(12)?,
    })
}
