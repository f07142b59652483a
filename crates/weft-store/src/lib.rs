//! Weft Store
//!
//! This crate provides the run data model and the storage trait the engine
//! persists runs through.
//!
//! The [`Store`] trait defines operations for:
//! - Saving run snapshots (last write wins)
//! - Appending run log entries (at-least-once, idempotent per sequence number)
//! - Loading a run with its full log
//! - Listing run summaries for a workflow
//!
//! Two implementations ship with the crate: [`MemoryStore`] and [`SqliteStore`].

mod memory;
mod sqlite;
mod types;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use types::{
  Annotation, ErrorKind, LogEntry, LogEvent, NodeError, NodeState, NodeStatus, Run, RunFilter,
  RunStatus, RunSummary, Variables,
};

use async_trait::async_trait;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  /// The requested run was not found.
  #[error("run not found: {0}")]
  NotFound(String),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("migration failed: {0}")]
  Migration(#[from] sqlx::migrate::MigrateError),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

/// Storage trait for runs and their logs.
#[async_trait]
pub trait Store: Send + Sync {
  /// Save a run snapshot, replacing any earlier snapshot of the same run.
  /// The snapshot's log is ignored; log entries go through [`Store::append_log`].
  async fn save_run(&self, run: &Run) -> Result<(), StoreError>;

  /// Load a run with its log, ordered by sequence number.
  async fn load_run(&self, run_id: &str) -> Result<Run, StoreError>;

  /// Append a log entry. Re-delivering an entry with a known `seq` is a no-op.
  async fn append_log(&self, run_id: &str, entry: &LogEntry) -> Result<(), StoreError>;

  /// Summaries of a workflow's runs, newest first.
  async fn list_runs(
    &self,
    workflow_id: &str,
    filter: &RunFilter,
  ) -> Result<Vec<RunSummary>, StoreError>;
}
