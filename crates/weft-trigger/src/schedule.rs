use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use weft_runtime::{Engine, RunRequest};
use weft_workflow::Workflow;

use crate::error::TriggerError;
use crate::event::now_millis;

/// Fires a workflow every `interval_ms` of one of its `schedule` nodes.
///
/// Runs are started without waiting for earlier ones to finish. Missed
/// ticks are skipped rather than replayed.
pub struct ScheduleTrigger {
  engine: Engine,
  workflow: Arc<Workflow>,
  node_id: String,
  interval: Duration,
  principal: String,
}

impl ScheduleTrigger {
  pub fn new(
    engine: Engine,
    workflow: Arc<Workflow>,
    node_id: impl Into<String>,
  ) -> Result<Self, TriggerError> {
    let node_id = node_id.into();
    let node = workflow
      .node(&node_id)
      .filter(|n| n.is_trigger())
      .ok_or_else(|| TriggerError::NotATrigger {
        node_id: node_id.clone(),
        workflow_id: workflow.workflow_id.clone(),
      })?;

    if node.kind != "schedule" {
      return Err(TriggerError::InvalidSchedule {
        node_id,
        message: format!("kind is '{}', expected 'schedule'", node.kind),
      });
    }
    let interval_ms = node
      .config
      .get("interval_ms")
      .and_then(|v| v.as_u64())
      .filter(|ms| *ms > 0)
      .ok_or_else(|| TriggerError::InvalidSchedule {
        node_id: node_id.clone(),
        message: "'interval_ms' must be a positive integer".to_string(),
      })?;

    let principal = format!("schedule:{node_id}");
    Ok(Self {
      engine,
      workflow,
      node_id,
      interval: Duration::from_millis(interval_ms),
      principal,
    })
  }

  pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
    self.principal = principal.into();
    self
  }

  pub fn interval(&self) -> Duration {
    self.interval
  }

  /// Tick until cancelled. Returns the number of runs started.
  pub async fn run(self, cancel: CancellationToken) -> u64 {
    let mut ticker = tokio::time::interval(self.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately
    ticker.tick().await;

    info!(
      workflow_id = %self.workflow.workflow_id,
      node_id = %self.node_id,
      interval_ms = self.interval.as_millis() as u64,
      "schedule_started"
    );

    let mut fired = 0;
    loop {
      tokio::select! {
        _ = cancel.cancelled() => break,
        _ = ticker.tick() => {}
      }

      let request = RunRequest::new(json!({ "scheduled_at": now_millis(), "tick": fired + 1 }))
        .with_triggered_by(self.principal.as_str())
        .with_entry(self.node_id.as_str());

      match self.engine.start_run_with(self.workflow.clone(), request).await {
        Ok(handle) => {
          fired += 1;
          info!(
            workflow_id = %self.workflow.workflow_id,
            node_id = %self.node_id,
            run_id = %handle.id(),
            tick = fired,
            "schedule_fired"
          );
        }
        Err(e) => {
          error!(workflow_id = %self.workflow.workflow_id, node_id = %self.node_id, error = %e, "run_start_failed");
        }
      }
    }

    info!(workflow_id = %self.workflow.workflow_id, node_id = %self.node_id, fired, "schedule_stopped");
    fired
  }
}
