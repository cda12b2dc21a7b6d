//! sprintlog-core library.
//!
//! An event-sourced project tracker: every change to a project, sprint or
//! task is an immutable event in SQLite, and the queryable tables are
//! projections rebuilt by replaying those events.
//!
//! # Conventions
//!
//! - **Errors**: library calls return [`error::Result`]; the CLI wraps them in
//!   `anyhow`.
//! - **Logging**: use `tracing` macros (`info!`, `warn!`, `debug!`).
//! - **Time**: instants are `i64` microseconds since the Unix epoch.

pub mod commit;
pub mod config;
pub mod db;
pub mod error;
pub mod event;
pub mod lock;
pub mod model;
pub mod projection;
pub mod reduce;
pub mod service;
pub mod sync;
pub mod timestamp;

pub use error::{Error, ErrorCode, Result};
pub use service::PmService;
