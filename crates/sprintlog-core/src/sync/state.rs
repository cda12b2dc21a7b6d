//! Per-task "last synced" markers (`task_sync_state`).
//!
//! A marker records which issue a task is paired with, when the pair was last
//! known to agree, and the tracker's own `updated_at` at that moment. The
//! engine needs both clocks: local edits are compared against
//! `last_synced_at_us`, remote edits against `remote_updated_at_us`.

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncMarker {
    pub issue_number: i64,
    pub last_synced_at_us: i64,
    pub remote_updated_at_us: Option<i64>,
}

#[derive(Debug, Clone, Copy)]
pub struct SyncStateRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SyncStateRepository<'conn> {
    #[must_use]
    pub const fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get(&self, task_id: &str) -> Result<Option<SyncMarker>> {
        let marker = self
            .conn
            .query_row(
                "SELECT issue_number, last_synced_at_us, remote_updated_at_us
                 FROM task_sync_state WHERE task_id = ?1",
                params![task_id],
                marker_from_row,
            )
            .optional()?;
        Ok(marker)
    }

    /// Task paired with an issue, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn task_for_issue(&self, issue_number: i64) -> Result<Option<String>> {
        let task_id = self
            .conn
            .query_row(
                "SELECT task_id FROM task_sync_state WHERE issue_number = ?1
                 ORDER BY last_synced_at_us DESC LIMIT 1",
                params![issue_number],
                |row| row.get(0),
            )
            .optional()?;
        Ok(task_id)
    }

    /// Insert or replace the marker for a task.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn record(&self, task_id: &str, marker: &SyncMarker) -> Result<()> {
        self.conn.execute(
            "INSERT INTO task_sync_state (task_id, issue_number, last_synced_at_us,
                                          remote_updated_at_us)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(task_id) DO UPDATE SET
                 issue_number = excluded.issue_number,
                 last_synced_at_us = excluded.last_synced_at_us,
                 remote_updated_at_us = excluded.remote_updated_at_us",
            params![
                task_id,
                marker.issue_number,
                marker.last_synced_at_us,
                marker.remote_updated_at_us
            ],
        )?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn delete(&self, task_id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM task_sync_state WHERE task_id = ?1", params![task_id])?;
        Ok(())
    }
}

fn marker_from_row(row: &Row<'_>) -> rusqlite::Result<SyncMarker> {
    Ok(SyncMarker {
        issue_number: row.get(0)?,
        last_synced_at_us: row.get(1)?,
        remote_updated_at_us: row.get(2)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;

    #[test]
    fn record_replaces_previous_marker() {
        let conn = open_in_memory().expect("store");
        let repo = SyncStateRepository::new(&conn);
        assert_eq!(repo.get("t1").expect("get"), None);

        let first = SyncMarker {
            issue_number: 4,
            last_synced_at_us: 10,
            remote_updated_at_us: None,
        };
        repo.record("t1", &first).expect("record");
        let second = SyncMarker {
            last_synced_at_us: 20,
            remote_updated_at_us: Some(19),
            ..first
        };
        repo.record("t1", &second).expect("record");

        assert_eq!(repo.get("t1").expect("get"), Some(second));
        assert_eq!(repo.task_for_issue(4).expect("lookup").as_deref(), Some("t1"));

        repo.delete("t1").expect("delete");
        assert_eq!(repo.get("t1").expect("get"), None);
        assert_eq!(repo.task_for_issue(4).expect("lookup"), None);
    }
}
