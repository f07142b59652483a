//! Per-run state and the append-only run log.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde_json::json;
use tokio::sync::watch;
use tracing::{trace, warn};
use weft_capability::Outcome;
use weft_store::{
  Annotation, LogEntry, LogEvent, NodeError, NodeStatus, Run, RunStatus, Store, StoreError,
  Variables,
};

use crate::events::{ExecutionEvent, ExecutionNotifier};

/// Owns the [`Run`] of one execution.
///
/// Every state transition and log append goes through the ledger's single
/// lock. Snapshots are clones taken under that lock. Appended entries are
/// forwarded to the store and the notifier after the lock is released.
pub struct RunLedger {
  run: Mutex<Run>,
  store: Arc<dyn Store>,
  notifier: Arc<dyn ExecutionNotifier>,
  status: watch::Sender<RunStatus>,
}

impl RunLedger {
  pub fn new(run: Run, store: Arc<dyn Store>, notifier: Arc<dyn ExecutionNotifier>) -> Self {
    let (status, _) = watch::channel(run.status);
    Self {
      run: Mutex::new(run),
      store,
      notifier,
      status,
    }
  }

  fn lock(&self) -> MutexGuard<'_, Run> {
    self.run.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn run_id(&self) -> String {
    self.lock().run_id.clone()
  }

  pub fn snapshot(&self) -> Run {
    self.lock().clone()
  }

  pub fn status(&self) -> RunStatus {
    *self.status.borrow()
  }

  /// Receiver that observes status changes.
  pub fn subscribe(&self) -> watch::Receiver<RunStatus> {
    self.status.subscribe()
  }

  pub fn variables(&self) -> Variables {
    self.lock().variables.clone()
  }

  /// Append an entry to the run log.
  pub async fn append(
    &self,
    node_id: Option<&str>,
    event: LogEvent,
    detail: serde_json::Value,
  ) -> LogEntry {
    let (run_id, workflow_id, entry) = {
      let mut run = self.lock();
      let entry = LogEntry {
        seq: run.log.len() as u64 + 1,
        timestamp: Utc::now(),
        node_id: node_id.map(str::to_string),
        event,
        detail,
      };
      run.log.push(entry.clone());
      (run.run_id.clone(), run.workflow_id.clone(), entry)
    };

    trace!(run_id = %run_id, seq = entry.seq, event = %entry.event, "run_log_appended");

    if let Err(e) = self.store.append_log(&run_id, &entry).await {
      warn!(run_id = %run_id, seq = entry.seq, error = %e, "log_persist_failed");
    }
    self.notifier.notify(ExecutionEvent {
      run_id,
      workflow_id,
      entry: entry.clone(),
    });
    entry
  }

  /// Save the current snapshot.
  pub async fn checkpoint(&self) -> Result<(), StoreError> {
    let snapshot = self.snapshot();
    self.store.save_run(&snapshot).await
  }

  async fn checkpoint_or_warn(&self) {
    if let Err(e) = self.checkpoint().await {
      warn!(run_id = %self.run_id(), error = %e, "snapshot_persist_failed");
    }
  }

  /// Mark the run as running on first dispatch.
  pub(crate) async fn start(&self) {
    {
      let mut run = self.lock();
      run.status = RunStatus::Running;
      run.started_at = Some(Utc::now());
    }
    self.status.send_replace(RunStatus::Running);
    self.append(None, LogEvent::RunStarted, json!({})).await;
  }

  /// Record the terminal status. The watch fires only after the final
  /// snapshot has been handed to the store.
  pub(crate) async fn finish(&self, status: RunStatus) {
    {
      let mut run = self.lock();
      run.status = status;
      run.finished_at = Some(Utc::now());
    }
    self
      .append(None, LogEvent::RunFinished, json!({ "status": status }))
      .await;
    self.checkpoint_or_warn().await;
    self.status.send_replace(status);
  }

  fn set_status(&self, node_id: &str, status: NodeStatus) {
    let mut run = self.lock();
    let state = run.node_states.entry(node_id.to_string()).or_default();
    state.status = status;
  }

  pub(crate) async fn node_ready(&self, node_id: &str) {
    self.set_status(node_id, NodeStatus::Ready);
    self
      .append(Some(node_id), LogEvent::NodeReady, json!({}))
      .await;
  }

  pub(crate) async fn node_started(&self, node_id: &str, iteration: u32) {
    {
      let mut run = self.lock();
      let state = run.node_states.entry(node_id.to_string()).or_default();
      state.status = NodeStatus::Running;
      state.attempts = 0;
      state.iterations = iteration;
      state.error = None;
      state.route = None;
      state.started_at = Some(Utc::now());
      state.finished_at = None;
    }
    self
      .append(
        Some(node_id),
        LogEvent::NodeStarted,
        json!({ "iteration": iteration }),
      )
      .await;
  }

  pub(crate) async fn attempt_started(&self, node_id: &str, attempt: u32) {
    {
      let mut run = self.lock();
      if let Some(state) = run.node_states.get_mut(node_id) {
        state.attempts = attempt;
      }
    }
    self
      .append(
        Some(node_id),
        LogEvent::AttemptStarted,
        json!({ "attempt": attempt }),
      )
      .await;
  }

  pub(crate) async fn node_succeeded(&self, node_id: &str, outcome: &Outcome, attempts: u32) {
    {
      let mut run = self.lock();
      for (port, value) in &outcome.outputs {
        run
          .variables
          .insert(format!("{node_id}.{port}"), value.clone());
      }
      let state = run.node_states.entry(node_id.to_string()).or_default();
      state.status = NodeStatus::Done;
      state.attempts = attempts;
      state.output = Some(serde_json::Value::Object(outcome.outputs.clone()));
      state.route = outcome.route.clone();
      state.error = None;
      state.finished_at = Some(Utc::now());
    }
    self
      .append(
        Some(node_id),
        LogEvent::NodeCompleted,
        json!({ "attempts": attempts }),
      )
      .await;
    if let Some(route) = &outcome.route {
      self
        .append(
          Some(node_id),
          LogEvent::RouteSelected,
          json!({ "route": route }),
        )
        .await;
    }
    self.checkpoint_or_warn().await;
  }

  pub(crate) async fn node_failed(&self, node_id: &str, status: NodeStatus, error: NodeError) {
    let detail = json!({
      "kind": error.kind,
      "message": error.message,
      "attempt": error.attempt,
      "status": status,
    });
    {
      let mut run = self.lock();
      let state = run.node_states.entry(node_id.to_string()).or_default();
      state.status = status;
      if error.attempt > state.attempts {
        state.attempts = error.attempt;
      }
      state.error = Some(error);
      state.finished_at = Some(Utc::now());
    }
    self
      .append(Some(node_id), LogEvent::NodeFailed, detail)
      .await;
    self.checkpoint_or_warn().await;
  }

  pub(crate) async fn node_skipped(&self, node_id: &str, reason: &str) {
    {
      let mut run = self.lock();
      let state = run.node_states.entry(node_id.to_string()).or_default();
      state.status = NodeStatus::Skipped;
      state.finished_at = Some(Utc::now());
    }
    self
      .append(
        Some(node_id),
        LogEvent::NodeSkipped,
        json!({ "reason": reason }),
      )
      .await;
    self.checkpoint_or_warn().await;
  }

  /// Put a loop body node back to waiting for the next iteration.
  pub(crate) fn reset_node(&self, node_id: &str) {
    let mut run = self.lock();
    let state = run.node_states.entry(node_id.to_string()).or_default();
    state.status = NodeStatus::Waiting;
    state.error = None;
    state.route = None;
    state.finished_at = None;
  }

  /// Ask for cancellation.
  ///
  /// Returns `false` when the run already finished; the reason is then kept
  /// as an annotation instead.
  pub(crate) async fn request_cancel(&self, reason: &str) -> bool {
    let terminal = {
      let mut run = self.lock();
      let terminal = run.status.is_terminal();
      if terminal {
        run.annotations.push(Annotation {
          at: Utc::now(),
          note: reason.to_string(),
        });
      }
      terminal
    };

    if terminal {
      self.checkpoint_or_warn().await;
      return false;
    }

    self
      .append(None, LogEvent::CancelRequested, json!({ "reason": reason }))
      .await;
    true
  }
}
