//! Read models materialized from the event log.
//!
//! Each repository borrows the store connection and exposes a
//! `sync_from_events` that replays one aggregate and upserts its row. All
//! read queries go through these tables; nothing here reads events except the
//! resync path.

pub mod analytics;
pub mod config;
pub mod project;
pub mod sprint;
pub mod task;

pub use analytics::{AnalyticsRepository, BurndownPoint, Velocity, VelocityRecord};
pub use config::{ProjectConfig, ProjectConfigRepository, ProjectConfigUpdate};
pub use project::ProjectRepository;
pub use sprint::{SprintRepository, SprintStatusReport};
pub use task::{Board, Task, TaskFilter, TaskPatch, TaskRepository};

use serde::de::DeserializeOwned;

use crate::error::Result;

/// Decode a JSON text column, treating `NULL`/empty as the default value.
pub(crate) fn decode_json_column<T: DeserializeOwned + Default>(raw: Option<&str>) -> Result<T> {
    match raw.map(str::trim) {
        None | Some("") => Ok(T::default()),
        Some(text) => Ok(serde_json::from_str(text)?),
    }
}

#[cfg(test)]
mod tests {
    use super::decode_json_column;

    #[test]
    fn json_columns_default_when_empty() {
        let empty: Vec<String> = decode_json_column(None).expect("null");
        assert!(empty.is_empty());
        let blank: Vec<String> = decode_json_column(Some("  ")).expect("blank");
        assert!(blank.is_empty());
        let labels: Vec<String> = decode_json_column(Some(r#"["a","b"]"#)).expect("labels");
        assert_eq!(labels, vec!["a", "b"]);
        assert!(decode_json_column::<Vec<String>>(Some("{oops")).is_err());
    }
}
