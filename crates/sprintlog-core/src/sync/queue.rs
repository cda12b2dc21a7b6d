//! Durable retry queue for tracker writes (`sync_queue`).
//!
//! ```text
//! pending --mark_processing--> processing --mark_completed--> completed
//!                              processing --mark_failed-----> failed
//! failed --retry--> pending
//! ```
//!
//! `enqueue` never merges with earlier items for the same entity; callers own
//! de-duplication.

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use serde_json::Value;

use crate::error::{EntityKind, Error, Result};
use crate::model::text_enum;
use crate::timestamp::now_us;

/// Items fetched per [`SyncQueueRepository::get_pending`] call by default.
pub const DEFAULT_BATCH_SIZE: u32 = 10;

/// Completed items older than this many days are cleared by default.
pub const DEFAULT_RETENTION_DAYS: u32 = 7;

const MICROS_PER_DAY: i64 = 86_400 * 1_000_000;

const QUEUE_COLUMNS: &str = "id, action, entity_type, entity_id, payload, status, retry_count, \
     error_message, created_at_us, processed_at_us";

/// Tracker write a queue item stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    CreateIssue,
    UpdateIssue,
}

impl SyncAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateIssue => "create_issue",
            Self::UpdateIssue => "update_issue",
        }
    }
}

/// Queue item lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    pub const ALL: [Self; 4] = [Self::Pending, Self::Processing, Self::Completed, Self::Failed];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

text_enum!(SyncAction, "sync action", [CreateIssue, UpdateIssue]);
text_enum!(QueueStatus, "queue status", [Pending, Processing, Completed, Failed]);

/// One queued tracker write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncQueueItem {
    pub id: i64,
    pub action: SyncAction,
    pub entity_type: String,
    pub entity_id: String,
    pub payload: Value,
    pub status: QueueStatus,
    pub retry_count: i64,
    pub error_message: Option<String>,
    pub created_at_us: i64,
    pub processed_at_us: Option<i64>,
}

/// Item counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
}

impl QueueStats {
    #[must_use]
    pub const fn total(&self) -> i64 {
        self.pending + self.processing + self.completed + self.failed
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SyncQueueRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SyncQueueRepository<'conn> {
    #[must_use]
    pub const fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Add a new `pending` item.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] if `payload` is not a JSON object; storage
    /// errors otherwise.
    pub fn enqueue(
        &self,
        action: SyncAction,
        entity_type: &str,
        entity_id: &str,
        payload: &Value,
    ) -> Result<SyncQueueItem> {
        if !payload.is_object() {
            return Err(Error::validation("sync queue payload must be a JSON object"));
        }
        self.conn.execute(
            "INSERT INTO sync_queue (action, entity_type, entity_id, payload, status,
                                     retry_count, created_at_us)
             VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5)",
            params![
                action.as_str(),
                entity_type,
                entity_id,
                payload.to_string(),
                now_us()
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        tracing::debug!(id, action = action.as_str(), entity_id, "enqueued sync item");
        self.require(id)
    }

    /// # Errors
    ///
    /// Returns an error if the query fails or the row is corrupt.
    pub fn get(&self, id: i64) -> Result<Option<SyncQueueItem>> {
        let sql = format!("SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE id = ?1");
        let raw = self
            .conn
            .query_row(&sql, params![id], QueueRow::from_row)
            .optional()?;
        raw.map(QueueRow::decode).transpose()
    }

    /// Oldest `pending` items first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_pending(&self, limit: u32) -> Result<Vec<SyncQueueItem>> {
        let sql = format!(
            "SELECT {QUEUE_COLUMNS} FROM sync_queue
             WHERE status = 'pending'
             ORDER BY created_at_us ASC, id ASC
             LIMIT ?1"
        );
        self.query(&sql, params![limit])
    }

    /// Every item for one entity, oldest first, any status.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_by_entity(&self, entity_type: &str, entity_id: &str) -> Result<Vec<SyncQueueItem>> {
        let sql = format!(
            "SELECT {QUEUE_COLUMNS} FROM sync_queue
             WHERE entity_type = ?1 AND entity_id = ?2
             ORDER BY created_at_us ASC, id ASC"
        );
        self.query(&sql, params![entity_type, entity_id])
    }

    /// Claim a `pending` item.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown id, [`Error::QueueState`] if the
    /// item is not `pending`.
    pub fn mark_processing(&self, id: i64) -> Result<SyncQueueItem> {
        self.transition(
            id,
            QueueStatus::Pending,
            "status = 'processing'",
            params![id, QueueStatus::Pending.as_str()],
        )
    }

    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown id, [`Error::QueueState`] if the
    /// item is not `processing`.
    pub fn mark_completed(&self, id: i64) -> Result<SyncQueueItem> {
        self.transition(
            id,
            QueueStatus::Processing,
            "status = 'completed', processed_at_us = ?3, error_message = NULL",
            params![id, QueueStatus::Processing.as_str(), now_us()],
        )
    }

    /// Record a failed attempt: bumps `retry_count` and stores the error.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown id, [`Error::QueueState`] if the
    /// item is not `processing`.
    pub fn mark_failed(&self, id: i64, error: &str) -> Result<SyncQueueItem> {
        self.transition(
            id,
            QueueStatus::Processing,
            "status = 'failed', retry_count = retry_count + 1, error_message = ?3,
             processed_at_us = ?4",
            params![id, QueueStatus::Processing.as_str(), error, now_us()],
        )
    }

    /// Move a `failed` item back to `pending`, clearing its error but keeping
    /// `retry_count`. Items in any other status are left untouched.
    ///
    /// Returns whether the item was requeued.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn retry(&self, id: i64) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE sync_queue SET status = 'pending', error_message = NULL
             WHERE id = ?1 AND status = 'failed'",
            params![id],
        )?;
        Ok(changed > 0)
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn stats(&self) -> Result<QueueStats> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM sync_queue GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut stats = QueueStats::default();
        for row in rows {
            let (status, count) = row?;
            match status.parse::<QueueStatus>() {
                Ok(QueueStatus::Pending) => stats.pending = count,
                Ok(QueueStatus::Processing) => stats.processing = count,
                Ok(QueueStatus::Completed) => stats.completed = count,
                Ok(QueueStatus::Failed) => stats.failed = count,
                Err(err) => tracing::warn!(error = %err, "skipping unknown queue status"),
            }
        }
        Ok(stats)
    }

    /// Delete `completed` items processed more than `days_old` days ago.
    /// `failed` items are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn clear_old(&self, days_old: u32) -> Result<usize> {
        let window = i64::from(days_old).saturating_mul(MICROS_PER_DAY);
        self.clear_completed_before(now_us().saturating_sub(window))
    }

    fn clear_completed_before(&self, cutoff_us: i64) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM sync_queue
             WHERE status = 'completed' AND processed_at_us < ?1",
            params![cutoff_us],
        )?;
        if removed > 0 {
            tracing::info!(removed, "cleared completed sync items");
        }
        Ok(removed)
    }

    /// Apply `assignments` to item `?1` only while it is in status `?2`.
    fn transition(
        &self,
        id: i64,
        from: QueueStatus,
        assignments: &str,
        values: &[&dyn rusqlite::ToSql],
    ) -> Result<SyncQueueItem> {
        let sql = format!("UPDATE sync_queue SET {assignments} WHERE id = ?1 AND status = ?2");
        let changed = self.conn.execute(&sql, values)?;
        if changed == 0 {
            let current = self.require(id)?;
            return Err(Error::QueueState {
                id,
                status: current.status.as_str().to_string(),
                expected: from.as_str(),
            });
        }
        self.require(id)
    }

    fn require(&self, id: i64) -> Result<SyncQueueItem> {
        self.get(id)?
            .ok_or_else(|| Error::not_found(EntityKind::QueueItem, id.to_string()))
    }

    fn query(&self, sql: &str, values: &[&dyn rusqlite::ToSql]) -> Result<Vec<SyncQueueItem>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(values, QueueRow::from_row)?;
        rows.map(|row| row?.decode()).collect()
    }
}

struct QueueRow {
    id: i64,
    action: String,
    entity_type: String,
    entity_id: String,
    payload: String,
    status: String,
    retry_count: i64,
    error_message: Option<String>,
    created_at_us: i64,
    processed_at_us: Option<i64>,
}

impl QueueRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            action: row.get(1)?,
            entity_type: row.get(2)?,
            entity_id: row.get(3)?,
            payload: row.get(4)?,
            status: row.get(5)?,
            retry_count: row.get(6)?,
            error_message: row.get(7)?,
            created_at_us: row.get(8)?,
            processed_at_us: row.get(9)?,
        })
    }

    fn decode(self) -> Result<SyncQueueItem> {
        let action: SyncAction = self.action.parse()?;
        let status: QueueStatus = self.status.parse()?;
        Ok(SyncQueueItem {
            id: self.id,
            action,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            payload: serde_json::from_str(&self.payload)?,
            status,
            retry_count: self.retry_count,
            error_message: self.error_message,
            created_at_us: self.created_at_us,
            processed_at_us: self.processed_at_us,
        })
    }
}
