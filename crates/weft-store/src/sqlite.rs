use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, SqlitePool};

use crate::{LogEntry, LogEvent, Run, RunFilter, RunSummary, Store, StoreError};

/// SQLite-based store implementation.
pub struct SqliteStore {
  pool: SqlitePool,
}

#[derive(FromRow)]
struct SnapshotRow {
  snapshot: Json<Run>,
}

#[derive(FromRow)]
struct LogRow {
  seq: i64,
  timestamp: DateTime<Utc>,
  node_id: Option<String>,
  event: LogEvent,
  detail: Json<serde_json::Value>,
}

impl From<LogRow> for LogEntry {
  fn from(row: LogRow) -> Self {
    LogEntry {
      seq: row.seq.max(0) as u64,
      timestamp: row.timestamp,
      node_id: row.node_id,
      event: row.event,
      detail: row.detail.0,
    }
  }
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (or create) a database file and run migrations.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
    let options = SqliteConnectOptions::new()
      .filename(path)
      .create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), StoreError> {
    sqlx::migrate!("../../migrations").run(&self.pool).await?;
    Ok(())
  }
}

#[async_trait]
impl Store for SqliteStore {
  async fn save_run(&self, run: &Run) -> Result<(), StoreError> {
    let mut snapshot = run.clone();
    snapshot.log.clear();

    sqlx::query(
      r#"
      INSERT INTO runs (run_id, workflow_id, status, triggered_by, created_at, finished_at, snapshot)
      VALUES (?, ?, ?, ?, ?, ?, ?)
      ON CONFLICT (run_id) DO UPDATE SET
        status = excluded.status,
        finished_at = excluded.finished_at,
        snapshot = excluded.snapshot
      "#,
    )
    .bind(&run.run_id)
    .bind(&run.workflow_id)
    .bind(run.status)
    .bind(&run.triggered_by)
    .bind(run.created_at)
    .bind(run.finished_at)
    .bind(Json(&snapshot))
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn load_run(&self, run_id: &str) -> Result<Run, StoreError> {
    let row: Option<SnapshotRow> = sqlx::query_as(
      r#"
      SELECT snapshot
      FROM runs
      WHERE run_id = ?
      "#,
    )
    .bind(run_id)
    .fetch_optional(&self.pool)
    .await?;
    let mut run = row
      .ok_or_else(|| StoreError::NotFound(run_id.to_string()))?
      .snapshot
      .0;

    let entries: Vec<LogRow> = sqlx::query_as(
      r#"
      SELECT seq, timestamp, node_id, event, detail
      FROM run_log
      WHERE run_id = ?
      ORDER BY seq ASC
      "#,
    )
    .bind(run_id)
    .fetch_all(&self.pool)
    .await?;
    run.log = entries.into_iter().map(LogEntry::from).collect();

    Ok(run)
  }

  async fn append_log(&self, run_id: &str, entry: &LogEntry) -> Result<(), StoreError> {
    sqlx::query(
      r#"
      INSERT OR IGNORE INTO run_log (run_id, seq, timestamp, node_id, event, detail)
      VALUES (?, ?, ?, ?, ?, ?)
      "#,
    )
    .bind(run_id)
    .bind(entry.seq as i64)
    .bind(entry.timestamp)
    .bind(&entry.node_id)
    .bind(entry.event)
    .bind(Json(&entry.detail))
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn list_runs(
    &self,
    workflow_id: &str,
    filter: &RunFilter,
  ) -> Result<Vec<RunSummary>, StoreError> {
    // SQLite treats a negative LIMIT as unbounded
    let limit = filter
      .limit
      .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
      .unwrap_or(-1);

    let runs = sqlx::query_as(
      r#"
      SELECT run_id, workflow_id, status, triggered_by, created_at, finished_at
      FROM runs
      WHERE workflow_id = ?1
        AND (?2 IS NULL OR status = ?2)
        AND (?3 IS NULL OR triggered_by = ?3)
      ORDER BY created_at DESC, rowid DESC
      LIMIT ?4
      "#,
    )
    .bind(workflow_id)
    .bind(filter.status)
    .bind(filter.triggered_by.as_deref())
    .bind(limit)
    .fetch_all(&self.pool)
    .await?;

    Ok(runs)
  }
}
