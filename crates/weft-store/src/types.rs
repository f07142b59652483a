use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Run variables: payload seeds plus `node_id.output` entries.
pub type Variables = BTreeMap<String, serde_json::Value>;

/// Status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum RunStatus {
  Pending,
  Running,
  Success,
  Failed,
  Canceled,
  TimedOut,
}

impl RunStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      RunStatus::Success | RunStatus::Failed | RunStatus::Canceled | RunStatus::TimedOut
    )
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      RunStatus::Pending => "pending",
      RunStatus::Running => "running",
      RunStatus::Success => "success",
      RunStatus::Failed => "failed",
      RunStatus::Canceled => "canceled",
      RunStatus::TimedOut => "timed_out",
    }
  }
}

impl fmt::Display for RunStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Status of a node within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
  Waiting,
  Ready,
  Running,
  Done,
  Failed,
  Skipped,
  /// The node's total deadline elapsed before it succeeded.
  TimedOut,
}

impl NodeStatus {
  /// Done, failed, skipped or timed out.
  pub fn is_settled(&self) -> bool {
    matches!(
      self,
      NodeStatus::Done | NodeStatus::Failed | NodeStatus::Skipped | NodeStatus::TimedOut
    )
  }
}

/// Classification of a node failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  Retryable,
  Terminal,
  LoopLimitExceeded,
  DeadlineExceeded,
  CancellationRequested,
  UnknownKind,
}

/// A node failure as recorded on the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeError {
  pub kind: ErrorKind,
  pub message: String,
  /// Attempt on which the failure happened (0 when no attempt was made).
  pub attempt: u32,
}

impl NodeError {
  pub fn new(kind: ErrorKind, message: impl Into<String>, attempt: u32) -> Self {
    Self {
      kind,
      message: message.into(),
      attempt,
    }
  }
}

impl fmt::Display for NodeError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:?} (attempt {}): {}", self.kind, self.attempt, self.message)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
  pub status: NodeStatus,
  /// Attempts made in the latest activation.
  pub attempts: u32,
  /// Times the node has been dispatched. Above 1 only inside loops.
  pub iterations: u32,
  /// Output ports of the latest successful activation.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub output: Option<serde_json::Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub route: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<NodeError>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub started_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub finished_at: Option<DateTime<Utc>>,
}

impl Default for NodeState {
  fn default() -> Self {
    Self {
      status: NodeStatus::Waiting,
      attempts: 0,
      iterations: 0,
      output: None,
      route: None,
      error: None,
      started_at: None,
      finished_at: None,
    }
  }
}

/// Kind of a run log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum LogEvent {
  RunCreated,
  RunStarted,
  NodeReady,
  NodeStarted,
  AttemptStarted,
  AttemptSucceeded,
  AttemptFailed,
  RetryScheduled,
  NodeCompleted,
  NodeFailed,
  NodeSkipped,
  RouteSelected,
  LoopIteration,
  CancelRequested,
  RunFinished,
}

impl LogEvent {
  pub fn as_str(&self) -> &'static str {
    match self {
      LogEvent::RunCreated => "run_created",
      LogEvent::RunStarted => "run_started",
      LogEvent::NodeReady => "node_ready",
      LogEvent::NodeStarted => "node_started",
      LogEvent::AttemptStarted => "attempt_started",
      LogEvent::AttemptSucceeded => "attempt_succeeded",
      LogEvent::AttemptFailed => "attempt_failed",
      LogEvent::RetryScheduled => "retry_scheduled",
      LogEvent::NodeCompleted => "node_completed",
      LogEvent::NodeFailed => "node_failed",
      LogEvent::NodeSkipped => "node_skipped",
      LogEvent::RouteSelected => "route_selected",
      LogEvent::LoopIteration => "loop_iteration",
      LogEvent::CancelRequested => "cancel_requested",
      LogEvent::RunFinished => "run_finished",
    }
  }
}

impl fmt::Display for LogEvent {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// One entry of a run's append-only log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
  /// Position in the run log, starting at 1.
  pub seq: u64,
  pub timestamp: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub node_id: Option<String>,
  pub event: LogEvent,
  #[serde(default)]
  pub detail: serde_json::Value,
}

/// A note attached to a run after it finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
  pub at: DateTime<Utc>,
  pub note: String,
}

/// One execution of a workflow against a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
  pub run_id: String,
  pub workflow_id: String,
  pub status: RunStatus,
  /// Principal that started the run. Stored, never interpreted.
  pub triggered_by: String,
  pub created_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub started_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub finished_at: Option<DateTime<Utc>>,
  pub node_states: BTreeMap<String, NodeState>,
  pub variables: Variables,
  #[serde(default)]
  pub log: Vec<LogEntry>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub annotations: Vec<Annotation>,
}

impl Run {
  /// A pending run with every node waiting.
  pub fn new<'a>(
    run_id: impl Into<String>,
    workflow_id: impl Into<String>,
    triggered_by: impl Into<String>,
    node_ids: impl IntoIterator<Item = &'a str>,
  ) -> Self {
    Self {
      run_id: run_id.into(),
      workflow_id: workflow_id.into(),
      status: RunStatus::Pending,
      triggered_by: triggered_by.into(),
      created_at: Utc::now(),
      started_at: None,
      finished_at: None,
      node_states: node_ids
        .into_iter()
        .map(|id| (id.to_string(), NodeState::default()))
        .collect(),
      variables: Variables::new(),
      log: Vec::new(),
      annotations: Vec::new(),
    }
  }

  pub fn node(&self, node_id: &str) -> Option<&NodeState> {
    self.node_states.get(node_id)
  }

  pub fn node_status(&self, node_id: &str) -> Option<NodeStatus> {
    self.node_states.get(node_id).map(|s| s.status)
  }

  pub fn summary(&self) -> RunSummary {
    RunSummary {
      run_id: self.run_id.clone(),
      workflow_id: self.workflow_id.clone(),
      status: self.status,
      triggered_by: self.triggered_by.clone(),
      created_at: self.created_at,
      finished_at: self.finished_at,
    }
  }

  /// Log entries for one node, in order.
  pub fn node_log<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a LogEntry> + 'a {
    self
      .log
      .iter()
      .filter(move |e| e.node_id.as_deref() == Some(node_id))
  }
}

/// Listing view of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RunSummary {
  pub run_id: String,
  pub workflow_id: String,
  pub status: RunStatus,
  pub triggered_by: String,
  pub created_at: DateTime<Utc>,
  pub finished_at: Option<DateTime<Utc>>,
}

/// Filter for [`Store::list_runs`](crate::Store::list_runs).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunFilter {
  pub status: Option<RunStatus>,
  pub triggered_by: Option<String>,
  pub limit: Option<usize>,
}

impl RunFilter {
  pub fn status(mut self, status: RunStatus) -> Self {
    self.status = Some(status);
    self
  }

  pub fn triggered_by(mut self, principal: impl Into<String>) -> Self {
    self.triggered_by = Some(principal.into());
    self
  }

  pub fn limit(mut self, limit: usize) -> Self {
    self.limit = Some(limit);
    self
  }

  pub fn matches(&self, summary: &RunSummary) -> bool {
    self.status.is_none_or(|s| s == summary.status)
      && self
        .triggered_by
        .as_deref()
        .is_none_or(|p| p == summary.triggered_by)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_status_strings_roundtrip_serde() {
    assert_eq!(serde_json::to_value(RunStatus::TimedOut).unwrap(), "timed_out");
    assert_eq!(
      serde_json::to_value(LogEvent::AttemptFailed).unwrap(),
      LogEvent::AttemptFailed.as_str()
    );
  }

  #[test]
  fn test_new_run_is_pending_with_waiting_nodes() {
    let run = Run::new("r1", "wf", "alice", ["a", "b"]);
    assert_eq!(run.status, RunStatus::Pending);
    assert_eq!(run.node_status("a"), Some(NodeStatus::Waiting));
    assert_eq!(run.node_states.len(), 2);
    assert!(!run.status.is_terminal());
  }

  #[test]
  fn test_filter_matches() {
    let summary = Run::new("r1", "wf", "alice", []).summary();
    assert!(RunFilter::default().matches(&summary));
    assert!(RunFilter::default().status(RunStatus::Pending).matches(&summary));
    assert!(!RunFilter::default().status(RunStatus::Failed).matches(&summary));
    assert!(!RunFilter::default().triggered_by("bob").matches(&summary));
  }
}
