//! Behaviour shared by every store implementation.

use chrono::{Duration, Utc};
use serde_json::json;
use weft_store::{
  Annotation, LogEntry, LogEvent, MemoryStore, NodeStatus, Run, RunFilter, RunStatus,
  SqliteStore, Store, StoreError,
};

fn entry(seq: u64, event: LogEvent, node_id: Option<&str>) -> LogEntry {
  LogEntry {
    seq,
    timestamp: Utc::now(),
    node_id: node_id.map(str::to_string),
    event,
    detail: json!({"seq": seq}),
  }
}

fn run(run_id: &str, workflow_id: &str, principal: &str, minutes_ago: i64) -> Run {
  let mut run = Run::new(run_id, workflow_id, principal, ["start", "a"]);
  run.created_at = Utc::now() - Duration::minutes(minutes_ago);
  run
}

async fn sqlite() -> (tempfile::TempDir, SqliteStore) {
  let dir = tempfile::tempdir().unwrap();
  let store = SqliteStore::open(dir.path().join("weft.db")).await.unwrap();
  (dir, store)
}

async fn check_roundtrip(store: &dyn Store) {
  let mut original = run("r1", "wf", "alice", 0);
  original.status = RunStatus::Success;
  original.finished_at = Some(Utc::now());
  original.variables.insert("a.out".into(), json!({"x": 1}));
  if let Some(state) = original.node_states.get_mut("a") {
    state.status = NodeStatus::Done;
    state.attempts = 2;
    state.output = Some(json!({"out": {"x": 1}}));
  }
  original.annotations.push(Annotation {
    at: Utc::now(),
    note: "checked".into(),
  });
  original.log.push(entry(99, LogEvent::RunCreated, None));

  store.save_run(&original).await.unwrap();
  store
    .append_log("r1", &entry(1, LogEvent::RunCreated, None))
    .await
    .unwrap();
  store
    .append_log("r1", &entry(2, LogEvent::NodeCompleted, Some("a")))
    .await
    .unwrap();

  let loaded = store.load_run("r1").await.unwrap();
  assert_eq!(loaded.status, RunStatus::Success);
  assert_eq!(loaded.node_status("a"), Some(NodeStatus::Done));
  assert_eq!(loaded.node("a").unwrap().attempts, 2);
  assert_eq!(loaded.variables["a.out"], json!({"x": 1}));
  assert_eq!(loaded.annotations.len(), 1);

  // The snapshot's own log is not persisted; appended entries are
  let events: Vec<LogEvent> = loaded.log.iter().map(|e| e.event).collect();
  assert_eq!(events, vec![LogEvent::RunCreated, LogEvent::NodeCompleted]);
  assert_eq!(loaded.log[1].node_id.as_deref(), Some("a"));
}

async fn check_append_is_idempotent(store: &dyn Store) {
  store.save_run(&run("r2", "wf", "alice", 0)).await.unwrap();

  let first = entry(1, LogEvent::RunStarted, None);
  store.append_log("r2", &first).await.unwrap();
  let mut redelivered = first.clone();
  redelivered.event = LogEvent::RunFinished;
  store.append_log("r2", &redelivered).await.unwrap();

  let loaded = store.load_run("r2").await.unwrap();
  assert_eq!(loaded.log.len(), 1);
  assert_eq!(loaded.log[0].event, LogEvent::RunStarted);
}

async fn check_last_write_wins(store: &dyn Store) {
  let mut snapshot = run("r3", "wf", "alice", 0);
  store.save_run(&snapshot).await.unwrap();
  snapshot.status = RunStatus::Running;
  store.save_run(&snapshot).await.unwrap();
  snapshot.status = RunStatus::Canceled;
  store.save_run(&snapshot).await.unwrap();

  assert_eq!(
    store.load_run("r3").await.unwrap().status,
    RunStatus::Canceled
  );
}

async fn check_not_found(store: &dyn Store) {
  let err = store.load_run("missing").await.unwrap_err();
  assert!(matches!(err, StoreError::NotFound(id) if id == "missing"));
}

async fn check_list_runs(store: &dyn Store) {
  let mut old = run("old", "listed", "alice", 30);
  old.status = RunStatus::Failed;
  let mut mid = run("mid", "listed", "bob", 20);
  mid.status = RunStatus::Success;
  let mut new = run("new", "listed", "alice", 10);
  new.status = RunStatus::Success;
  let other = run("other", "elsewhere", "alice", 0);

  for r in [&mid, &old, &new, &other] {
    store.save_run(r).await.unwrap();
  }

  let ids = |runs: Vec<weft_store::RunSummary>| -> Vec<String> {
    runs.into_iter().map(|r| r.run_id).collect()
  };

  let all = store
    .list_runs("listed", &RunFilter::default())
    .await
    .unwrap();
  assert_eq!(ids(all), vec!["new", "mid", "old"]);

  let succeeded = store
    .list_runs("listed", &RunFilter::default().status(RunStatus::Success))
    .await
    .unwrap();
  assert_eq!(ids(succeeded), vec!["new", "mid"]);

  let by_alice = store
    .list_runs("listed", &RunFilter::default().triggered_by("alice"))
    .await
    .unwrap();
  assert_eq!(ids(by_alice), vec!["new", "old"]);

  let limited = store
    .list_runs("listed", &RunFilter::default().limit(1))
    .await
    .unwrap();
  assert_eq!(ids(limited), vec!["new"]);
}

#[tokio::test]
async fn test_memory_store() {
  let store = MemoryStore::new();
  check_roundtrip(&store).await;
  check_append_is_idempotent(&store).await;
  check_last_write_wins(&store).await;
  check_not_found(&store).await;
  check_list_runs(&store).await;
}

#[tokio::test]
async fn test_sqlite_store() {
  let (_dir, store) = sqlite().await;
  check_roundtrip(&store).await;
  check_append_is_idempotent(&store).await;
  check_last_write_wins(&store).await;
  check_not_found(&store).await;
  check_list_runs(&store).await;
}

#[tokio::test]
async fn test_sqlite_store_survives_reopen() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("weft.db");

  {
    let store = SqliteStore::open(&path).await.unwrap();
    store.save_run(&run("persisted", "wf", "alice", 0)).await.unwrap();
    store
      .append_log("persisted", &entry(1, LogEvent::RunCreated, None))
      .await
      .unwrap();
  }

  let store = SqliteStore::open(&path).await.unwrap();
  let loaded = store.load_run("persisted").await.unwrap();
  assert_eq!(loaded.triggered_by, "alice");
  assert_eq!(loaded.log.len(), 1);
}
