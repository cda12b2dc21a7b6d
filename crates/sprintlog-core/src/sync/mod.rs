//! GitHub issue synchronization.
//!
//! - [`tracker`]: the [`IssueTracker`] contract the CLI implements over HTTP
//! - [`engine`]: pull classification and push, with conflicts reported as data
//! - [`state`]: per-task markers recording the last agreed sync point
//! - [`queue`]: durable retry queue for tracker writes that failed inline

pub mod engine;
pub mod queue;
pub mod state;
pub mod tracker;

pub use engine::{
    ConflictReason, LocalTask, PullResult, PushAction, PushResult, SyncConflict, SyncDirection,
    SyncEngine, SyncUpdate, SyncedPair,
};
pub use queue::{QueueStats, QueueStatus, SyncAction, SyncQueueItem, SyncQueueRepository};
pub use state::{SyncMarker, SyncStateRepository};
pub use tracker::{
    IssueState, IssueTracker, IssueUpdate, NewIssue, RemoteIssue, RepoInfo, TrackerError,
};
