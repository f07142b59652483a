//! Workflow runner with channel-based triggering.
//!
//! The `WorkflowRunner` owns an mpsc channel of [`TriggerEvent`]s and starts
//! one run per event on the engine.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use weft_runtime::{Engine, RunRequest};
use weft_workflow::Workflow;

use crate::error::TriggerError;
use crate::event::TriggerEvent;

/// A runner that executes a workflow in response to trigger events.
///
/// # Usage
///
/// ```ignore
/// let runner = WorkflowRunner::new(engine, workflow);
///
/// // Get sender for external triggers (webhooks, UI, etc.)
/// let sender = runner.sender();
///
/// // Start the execution loop
/// let cancel = CancellationToken::new();
/// runner.start(cancel).await?;
/// ```
pub struct WorkflowRunner {
  sender: mpsc::Sender<TriggerEvent>,
  receiver: mpsc::Receiver<TriggerEvent>,
  engine: Engine,
  workflow: Arc<Workflow>,
}

impl WorkflowRunner {
  pub fn new(engine: Engine, workflow: Arc<Workflow>) -> Self {
    Self::with_buffer_size(engine, workflow, 100)
  }

  pub fn with_buffer_size(engine: Engine, workflow: Arc<Workflow>, buffer_size: usize) -> Self {
    let (sender, receiver) = mpsc::channel(buffer_size);
    Self {
      sender,
      receiver,
      engine,
      workflow,
    }
  }

  /// Sender handle for webhooks, UI handlers, poll tasks, etc.
  pub fn sender(&self) -> mpsc::Sender<TriggerEvent> {
    self.sender.clone()
  }

  /// Queue an event through the runner's own channel.
  pub async fn run(&self, event: TriggerEvent) -> Result<(), TriggerError> {
    self
      .sender
      .send(event)
      .await
      .map_err(|_| TriggerError::ChannelClosed)
  }

  pub fn workflow(&self) -> &Workflow {
    &self.workflow
  }

  /// Start the execution loop.
  ///
  /// Runs one event at a time until the token is cancelled or every sender
  /// is gone. Cancelling the token also cancels the run in flight.
  pub async fn start(mut self, cancel: CancellationToken) -> Result<(), TriggerError> {
    let workflow_id = self.workflow.workflow_id.clone();
    info!(workflow_id = %workflow_id, workflow_name = %self.workflow.name, "runner_started");

    // Our own sender would keep the channel open forever
    drop(self.sender);

    loop {
      let event = tokio::select! {
        _ = cancel.cancelled() => {
          info!(workflow_id = %workflow_id, "runner_cancelled");
          break;
        }
        event = self.receiver.recv() => event,
      };

      let Some(event) = event else {
        info!(workflow_id = %workflow_id, "runner_channel_closed");
        break;
      };

      let request = RunRequest::new(event.payload)
        .with_triggered_by(event.principal)
        .with_entry(event.trigger_id);
      let handle = match self
        .engine
        .start_run_with(self.workflow.clone(), request)
        .await
      {
        Ok(handle) => handle,
        Err(e) => {
          error!(workflow_id = %workflow_id, event_id = %event.event_id, error = %e, "run_start_failed");
          continue;
        }
      };

      let run = tokio::select! {
        run = handle.wait() => run,
        _ = cancel.cancelled() => {
          handle.cancel("runner stopped").await;
          let run = handle.wait().await;
          warn!(workflow_id = %workflow_id, run_id = %run.run_id, "runner_cancelled");
          break;
        }
      };

      info!(
        workflow_id = %workflow_id,
        event_id = %event.event_id,
        run_id = %run.run_id,
        status = %run.status,
        "run_completed"
      );
    }

    Ok(())
  }
}
