//! Append-only event log backed by the `events` table.
//!
//! Sequence numbers are assigned inside the same `BEGIN IMMEDIATE`
//! transaction as the insert, and `UNIQUE(aggregate_type, aggregate_id,
//! sequence_number)` backs that up at the schema level, so two appends to one
//! aggregate can never observe the same number.

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::Value;

use super::{AggregateType, Event, EventKind, EventMetadata, Payload};
use crate::db::with_transaction;
use crate::error::{Error, Result};
use crate::timestamp::now_us;

const EVENT_COLUMNS: &str = "event_id, event_type, aggregate_type, aggregate_id, \
                             payload, metadata, sequence_number, recorded_at_us";

/// Durable, ordered, replayable log of domain events.
#[derive(Debug, Clone, Copy)]
pub struct EventStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> EventStore<'conn> {
    /// Create an event store backed by the given connection.
    #[must_use]
    pub const fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Append an event of a known kind, stamped with the current time.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] if `payload` is not a JSON object or the id is
    /// blank; [`Error::Storage`] if the write is rejected. On error nothing
    /// was written.
    pub fn append(
        &self,
        kind: EventKind,
        aggregate_id: &str,
        payload: Value,
        metadata: Option<&EventMetadata>,
    ) -> Result<Event> {
        self.append_at(kind, aggregate_id, payload, metadata, now_us())
    }

    /// Append an event with an explicit `recorded_at` (imports, backfills).
    ///
    /// # Errors
    ///
    /// Same as [`EventStore::append`].
    pub fn append_at(
        &self,
        kind: EventKind,
        aggregate_id: &str,
        payload: Value,
        metadata: Option<&EventMetadata>,
        recorded_at_us: i64,
    ) -> Result<Event> {
        self.append_raw(
            kind.as_str(),
            kind.aggregate_type(),
            aggregate_id,
            payload,
            metadata,
            recorded_at_us,
        )
    }

    /// Append an event by type name. Used for event types this binary does
    /// not model (forward-compatible writers, replication tooling).
    ///
    /// # Errors
    ///
    /// Same as [`EventStore::append`].
    pub fn append_raw(
        &self,
        event_type: &str,
        aggregate_type: AggregateType,
        aggregate_id: &str,
        payload: Value,
        metadata: Option<&EventMetadata>,
        recorded_at_us: i64,
    ) -> Result<Event> {
        if event_type.trim().is_empty() {
            return Err(Error::validation("event type must not be empty"));
        }
        if aggregate_id.trim().is_empty() {
            return Err(Error::validation("aggregate id must not be empty"));
        }
        let Value::Object(payload) = payload else {
            return Err(Error::validation(format!(
                "{event_type} payload must be a JSON object"
            )));
        };

        let payload_json = serde_json::to_string(&payload)?;
        let metadata_json = metadata.map(serde_json::to_string).transpose()?;

        let (event_id, sequence_number) = with_transaction(self.conn, |conn| {
            let sequence_number: i64 = conn.query_row(
                "SELECT COALESCE(MAX(sequence_number), 0) + 1
                 FROM events
                 WHERE aggregate_type = ?1 AND aggregate_id = ?2",
                params![aggregate_type.as_str(), aggregate_id],
                |row| row.get(0),
            )?;

            conn.execute(
                "INSERT INTO events (event_type, aggregate_type, aggregate_id, sequence_number,
                                     payload, metadata, recorded_at_us)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    event_type,
                    aggregate_type.as_str(),
                    aggregate_id,
                    sequence_number,
                    payload_json,
                    metadata_json,
                    recorded_at_us,
                ],
            )?;

            Ok((conn.last_insert_rowid(), sequence_number))
        })?;

        tracing::debug!(
            event_type,
            aggregate_type = %aggregate_type,
            aggregate_id,
            sequence_number,
            "appended event"
        );

        Ok(Event {
            event_id,
            event_type: event_type.to_string(),
            aggregate_type,
            aggregate_id: aggregate_id.to_string(),
            payload,
            metadata: metadata.cloned(),
            sequence_number,
            recorded_at_us,
        })
    }

    /// Events for one aggregate in ascending sequence order.
    ///
    /// With `from_version`, only events with a sequence number strictly
    /// greater than it are returned (incremental replay). An aggregate with no
    /// events yields an empty vector.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored payload is not valid
    /// JSON.
    pub fn get_events(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: &str,
        from_version: Option<i64>,
    ) -> Result<Vec<Event>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE aggregate_type = ?1 AND aggregate_id = ?2 AND sequence_number > ?3
             ORDER BY sequence_number ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                aggregate_type.as_str(),
                aggregate_id,
                from_version.unwrap_or(0)
            ],
            RawEvent::from_row,
        )?;

        collect_events(rows)
    }

    /// Every event of one type across all aggregates, ordered by record time.
    ///
    /// Meant for audit and analytics, not for state reconstruction.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored payload is not valid
    /// JSON.
    pub fn get_events_by_type(&self, event_type: &str) -> Result<Vec<Event>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE event_type = ?1
             ORDER BY recorded_at_us ASC, event_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![event_type], RawEvent::from_row)?;
        collect_events(rows)
    }

    /// Highest sequence number recorded for an aggregate (0 when none).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn latest_version(&self, aggregate_type: AggregateType, aggregate_id: &str) -> Result<i64> {
        let version: Option<i64> = self
            .conn
            .query_row(
                "SELECT MAX(sequence_number) FROM events
                 WHERE aggregate_type = ?1 AND aggregate_id = ?2",
                params![aggregate_type.as_str(), aggregate_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(version.unwrap_or(0))
    }

    /// Number of events recorded for one aggregate.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count_events(&self, aggregate_type: AggregateType, aggregate_id: &str) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM events WHERE aggregate_type = ?1 AND aggregate_id = ?2",
            params![aggregate_type.as_str(), aggregate_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Distinct ids of every aggregate of one type, in first-appended order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn aggregate_ids(&self, aggregate_type: AggregateType) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT aggregate_id FROM events
             WHERE aggregate_type = ?1
             GROUP BY aggregate_id
             ORDER BY MIN(event_id) ASC",
        )?;
        let ids = stmt
            .query_map(params![aggregate_type.as_str()], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }
}

/// Row shape before JSON columns are decoded.
struct RawEvent {
    event_id: i64,
    event_type: String,
    aggregate_type: String,
    aggregate_id: String,
    payload: String,
    metadata: Option<String>,
    sequence_number: i64,
    recorded_at_us: i64,
}

impl RawEvent {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            event_id: row.get(0)?,
            event_type: row.get(1)?,
            aggregate_type: row.get(2)?,
            aggregate_id: row.get(3)?,
            payload: row.get(4)?,
            metadata: row.get(5)?,
            sequence_number: row.get(6)?,
            recorded_at_us: row.get(7)?,
        })
    }

    fn decode(self) -> Result<Event> {
        let aggregate_type = self
            .aggregate_type
            .parse::<AggregateType>()
            .map_err(|err| Error::validation(err.to_string()))?;
        let payload: Payload = serde_json::from_str(&self.payload)?;
        let metadata = self
            .metadata
            .as_deref()
            .map(serde_json::from_str::<EventMetadata>)
            .transpose()?;

        Ok(Event {
            event_id: self.event_id,
            event_type: self.event_type,
            aggregate_type,
            aggregate_id: self.aggregate_id,
            payload,
            metadata,
            sequence_number: self.sequence_number,
            recorded_at_us: self.recorded_at_us,
        })
    }
}

fn collect_events(
    rows: impl Iterator<Item = rusqlite::Result<RawEvent>>,
) -> Result<Vec<Event>> {
    rows.map(|row| row.map_err(Error::from).and_then(RawEvent::decode))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use serde_json::json;

    #[test]
    fn sequence_numbers_are_gap_free_per_aggregate() {
        let conn = open_in_memory().expect("open store");
        let store = EventStore::new(&conn);

        for i in 0..3 {
            store
                .append(EventKind::TaskUpdated, "task-a", json!({"title": format!("a{i}")}), None)
                .expect("append a");
            store
                .append(EventKind::TaskUpdated, "task-b", json!({"title": format!("b{i}")}), None)
                .expect("append b");
        }

        let a: Vec<i64> = store
            .get_events(AggregateType::Task, "task-a", None)
            .expect("events a")
            .iter()
            .map(|e| e.sequence_number)
            .collect();
        let b: Vec<i64> = store
            .get_events(AggregateType::Task, "task-b", None)
            .expect("events b")
            .iter()
            .map(|e| e.sequence_number)
            .collect();

        assert_eq!(a, vec![1, 2, 3]);
        assert_eq!(b, vec![1, 2, 3]);
        assert_eq!(store.latest_version(AggregateType::Task, "task-a").expect("version"), 3);
        assert_eq!(store.count_events(AggregateType::Task, "task-b").expect("count"), 3);
    }

    #[test]
    fn same_id_under_different_aggregate_types_is_independent() {
        let conn = open_in_memory().expect("open store");
        let store = EventStore::new(&conn);

        store
            .append(EventKind::ProjectCreated, "shared", json!({"name": "p"}), None)
            .expect("project");
        let task = store
            .append(EventKind::TaskCreated, "shared", json!({"title": "t"}), None)
            .expect("task");
        assert_eq!(task.sequence_number, 1);
    }

    #[test]
    fn from_version_skips_already_replayed_events() {
        let conn = open_in_memory().expect("open store");
        let store = EventStore::new(&conn);
        for n in 1..=4 {
            store
                .append(EventKind::TaskEstimated, "t", json!({"points": n}), None)
                .expect("append");
        }

        let tail = store
            .get_events(AggregateType::Task, "t", Some(2))
            .expect("tail");
        let seqs: Vec<i64> = tail.iter().map(|e| e.sequence_number).collect();
        assert_eq!(seqs, vec![3, 4]);
    }

    #[test]
    fn missing_aggregate_yields_empty_history() {
        let conn = open_in_memory().expect("open store");
        let store = EventStore::new(&conn);
        assert!(
            store
                .get_events(AggregateType::Sprint, "nope", None)
                .expect("query")
                .is_empty()
        );
        assert_eq!(store.latest_version(AggregateType::Sprint, "nope").expect("v"), 0);
        assert_eq!(store.count_events(AggregateType::Sprint, "nope").expect("count"), 0);
    }

    #[test]
    fn non_object_payload_is_rejected_without_writing() {
        let conn = open_in_memory().expect("open store");
        let store = EventStore::new(&conn);

        let err = store
            .append(EventKind::TaskCreated, "t", json!(["not", "an", "object"]), None)
            .expect_err("array payload");
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(store.latest_version(AggregateType::Task, "t").expect("v"), 0);
    }

    #[test]
    fn payload_and_metadata_roundtrip() {
        let conn = open_in_memory().expect("open store");
        let store = EventStore::new(&conn);
        let meta = EventMetadata {
            actor: Some("ana".into()),
            ..EventMetadata::from_source("cli")
        };

        let appended = store
            .append_at(
                EventKind::TaskCreated,
                "t",
                json!({"title": "Ship it", "custom": {"nested": true}}),
                Some(&meta),
                42,
            )
            .expect("append");
        let loaded = store
            .get_events(AggregateType::Task, "t", None)
            .expect("load");

        assert_eq!(loaded, vec![appended]);
        assert_eq!(loaded[0].recorded_at_us, 42);
        assert_eq!(loaded[0].payload.get("custom"), Some(&json!({"nested": true})));
        assert_eq!(loaded[0].metadata.as_ref(), Some(&meta));
    }

    #[test]
    fn events_by_type_are_ordered_by_record_time() {
        let conn = open_in_memory().expect("open store");
        let store = EventStore::new(&conn);
        store
            .append_at(EventKind::TaskCreated, "late", json!({}), None, 200)
            .expect("late");
        store
            .append_at(EventKind::TaskCreated, "early", json!({}), None, 100)
            .expect("early");
        store
            .append_at(EventKind::TaskUpdated, "early", json!({}), None, 150)
            .expect("other type");

        let created = store.get_events_by_type("TaskCreated").expect("by type");
        let ids: Vec<&str> = created.iter().map(|e| e.aggregate_id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
    }

    #[test]
    fn unknown_event_types_are_stored_and_read_back() {
        let conn = open_in_memory().expect("open store");
        let store = EventStore::new(&conn);
        store
            .append_raw("TaskTeleported", AggregateType::Task, "t", json!({"to": "mars"}), None, 1)
            .expect("append raw");

        let events = store.get_events(AggregateType::Task, "t", None).expect("load");
        assert_eq!(events[0].event_type, "TaskTeleported");
        assert_eq!(events[0].kind(), None);
        assert_eq!(store.aggregate_ids(AggregateType::Task).expect("ids"), vec!["t"]);
    }
}
