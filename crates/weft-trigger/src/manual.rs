use std::sync::Arc;

use tracing::info;
use weft_runtime::{Engine, RunHandle, RunRequest};
use weft_workflow::Workflow;

use crate::error::TriggerError;

/// Starts runs on user action.
#[derive(Clone)]
pub struct ManualTrigger {
  engine: Engine,
  workflow: Arc<Workflow>,
  entry: Option<String>,
}

impl ManualTrigger {
  pub fn new(engine: Engine, workflow: Arc<Workflow>) -> Self {
    Self {
      engine,
      workflow,
      entry: None,
    }
  }

  /// Start every run from `node_id`, skipping the workflow's other triggers.
  pub fn at(mut self, node_id: impl Into<String>) -> Result<Self, TriggerError> {
    let node_id = node_id.into();
    if !self.workflow.node(&node_id).is_some_and(|n| n.is_trigger()) {
      return Err(TriggerError::NotATrigger {
        node_id,
        workflow_id: self.workflow.workflow_id.clone(),
      });
    }
    self.entry = Some(node_id);
    Ok(self)
  }

  pub async fn fire(
    &self,
    payload: serde_json::Value,
    principal: &str,
  ) -> Result<RunHandle, TriggerError> {
    let mut request = RunRequest::new(payload).with_triggered_by(principal);
    request.entry = self.entry.clone();

    let handle = self
      .engine
      .start_run_with(self.workflow.clone(), request)
      .await?;
    info!(
      workflow_id = %self.workflow.workflow_id,
      run_id = %handle.id(),
      principal,
      "manual_trigger_fired"
    );
    Ok(handle)
  }
}
