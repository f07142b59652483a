//! Entry point for starting, observing and cancelling runs.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use weft_capability::{CapabilityRegistry, Providers};
use weft_store::{
  Annotation, LogEvent, Run, RunFilter, RunStatus, RunSummary, Store, StoreError,
};
use weft_workflow::Workflow;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::ledger::RunLedger;
use crate::scheduler::{RunPlan, Scheduler};
use crate::usage::{EXECUTION_RESOURCE, UsageRecord, UsageTracker};

/// Parameters of a single run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
  pub payload: serde_json::Value,
  /// Opaque principal id. Stored, never interpreted.
  pub triggered_by: String,
  /// Trigger node the run starts from. Other triggers are skipped.
  pub entry: Option<String>,
  /// Providers for this run. Unset slots fall back to the engine's.
  pub providers: Providers,
}

impl RunRequest {
  pub fn new(payload: serde_json::Value) -> Self {
    Self {
      payload,
      ..Self::default()
    }
  }

  pub fn with_triggered_by(mut self, principal: impl Into<String>) -> Self {
    self.triggered_by = principal.into();
    self
  }

  pub fn with_entry(mut self, node_id: impl Into<String>) -> Self {
    self.entry = Some(node_id.into());
    self
  }

  pub fn with_providers(mut self, providers: Providers) -> Self {
    self.providers = providers;
    self
  }
}

/// Handle to a started run.
#[derive(Clone)]
pub struct RunHandle {
  run_id: String,
  ledger: Arc<RunLedger>,
  cancel: CancellationToken,
}

impl RunHandle {
  pub fn id(&self) -> &str {
    &self.run_id
  }

  pub fn status(&self) -> RunStatus {
    self.ledger.status()
  }

  pub fn snapshot(&self) -> Run {
    self.ledger.snapshot()
  }

  /// Request cooperative cancellation. Completed nodes keep their results.
  /// On a finished run the reason is recorded as an annotation.
  pub async fn cancel(&self, reason: &str) {
    if self.ledger.request_cancel(reason).await {
      info!(run_id = %self.run_id, reason, "run_cancel_requested");
      self.cancel.cancel();
    }
  }

  /// Wait for a terminal status and return the final run.
  pub async fn wait(&self) -> Run {
    let mut status = self.ledger.subscribe();
    // The ledger owns the sender, so the channel cannot close while we hold it
    let _ = status.wait_for(|s| s.is_terminal()).await;
    self.ledger.snapshot()
  }
}

/// The workflow execution engine.
///
/// Cheap to clone. Each run is driven by its own task; the engine only keeps
/// handles to runs that have not finished yet.
#[derive(Clone)]
pub struct Engine {
  registry: Arc<CapabilityRegistry>,
  store: Arc<dyn Store>,
  config: EngineConfig,
  providers: Providers,
  usage: Option<Arc<dyn UsageTracker>>,
  active: Arc<RwLock<HashMap<String, RunHandle>>>,
}

impl Engine {
  pub fn new(registry: CapabilityRegistry, store: Arc<dyn Store>, config: EngineConfig) -> Self {
    Self {
      registry: Arc::new(registry),
      store,
      config,
      providers: Providers::default(),
      usage: None,
      active: Arc::new(RwLock::new(HashMap::new())),
    }
  }

  pub fn with_usage_tracker(mut self, tracker: Arc<dyn UsageTracker>) -> Self {
    self.usage = Some(tracker);
    self
  }

  /// Providers used by runs that do not bring their own.
  pub fn with_providers(mut self, providers: Providers) -> Self {
    self.providers = providers;
    self
  }

  pub fn registry(&self) -> &CapabilityRegistry {
    &self.registry
  }

  pub fn store(&self) -> &Arc<dyn Store> {
    &self.store
  }

  pub async fn start_run(
    &self,
    workflow: impl Into<Arc<Workflow>>,
    payload: serde_json::Value,
    triggered_by: &str,
  ) -> Result<RunHandle, EngineError> {
    self
      .start_run_with(
        workflow,
        RunRequest::new(payload).with_triggered_by(triggered_by),
      )
      .await
  }

  #[instrument(
    name = "start_run",
    skip_all,
    fields(workflow_id = tracing::field::Empty, run_id = tracing::field::Empty)
  )]
  pub async fn start_run_with(
    &self,
    workflow: impl Into<Arc<Workflow>>,
    request: RunRequest,
  ) -> Result<RunHandle, EngineError> {
    let workflow: Arc<Workflow> = workflow.into();
    let span = tracing::Span::current();
    span.record("workflow_id", workflow.workflow_id.as_str());

    if let Some(entry) = &request.entry {
      if !workflow.node(entry).is_some_and(|n| n.is_trigger()) {
        return Err(EngineError::InvalidEntry {
          node_id: entry.clone(),
          workflow_id: workflow.workflow_id.clone(),
        });
      }
    }

    let run_id = uuid::Uuid::new_v4().to_string();
    span.record("run_id", run_id.as_str());

    let mut run = Run::new(
      &run_id,
      &workflow.workflow_id,
      &request.triggered_by,
      workflow.nodes().iter().map(|n| n.node_id.as_str()),
    );
    if let Some(seed) = request.payload.as_object() {
      run
        .variables
        .extend(seed.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    let ledger = Arc::new(RunLedger::new(
      run,
      self.store.clone(),
      self.config.notifier.clone(),
    ));
    ledger
      .append(
        None,
        LogEvent::RunCreated,
        json!({
          "workflow_id": workflow.workflow_id,
          "triggered_by": request.triggered_by,
        }),
      )
      .await;
    ledger.checkpoint().await?;

    let cancel = CancellationToken::new();
    let handle = RunHandle {
      run_id: run_id.clone(),
      ledger: ledger.clone(),
      cancel: cancel.clone(),
    };
    self
      .active
      .write()
      .await
      .insert(run_id.clone(), handle.clone());

    info!(
      run_id = %run_id,
      workflow_id = %workflow.workflow_id,
      triggered_by = %request.triggered_by,
      "run_created"
    );

    let deadline = workflow
      .timeout
      .or(self.config.run_timeout)
      .map(|timeout| Instant::now() + timeout);
    let plan = RunPlan {
      workflow,
      registry: self.registry.clone(),
      providers: request.providers.or(&self.providers),
      default_retry: self.config.default_retry,
      payload: request.payload,
      entry: request.entry,
      deadline,
    };
    let scheduler = Scheduler::new(plan, ledger, cancel);

    let active = self.active.clone();
    let usage = self.usage.clone();
    let principal = request.triggered_by;
    tokio::spawn(async move {
      let status = scheduler.drive().await;
      active.write().await.remove(&run_id);

      if let Some(tracker) = usage {
        let record = UsageRecord {
          user_id: principal,
          resource_kind: EXECUTION_RESOURCE.to_string(),
          run_id,
          status,
        };
        tokio::spawn(async move {
          let run_id = record.run_id.clone();
          if let Err(e) = tracker.record(record).await {
            warn!(run_id = %run_id, error = %e, "usage_tracking_failed");
          }
        });
      }
    });

    Ok(handle)
  }

  /// Handle of a run that is still executing.
  pub async fn handle(&self, run_id: &str) -> Option<RunHandle> {
    self.active.read().await.get(run_id).cloned()
  }

  /// Consistent snapshot of a run, live or persisted.
  pub async fn get_run(&self, run_id: &str) -> Result<Run, EngineError> {
    if let Some(handle) = self.handle(run_id).await {
      return Ok(handle.snapshot());
    }

    match self.store.load_run(run_id).await {
      Ok(run) => Ok(run),
      Err(StoreError::NotFound(_)) => Err(EngineError::RunNotFound {
        run_id: run_id.to_string(),
      }),
      Err(e) => Err(e.into()),
    }
  }

  /// Cancel a live run, or annotate a finished one with the reason.
  pub async fn cancel_run(&self, run_id: &str, reason: &str) -> Result<(), EngineError> {
    if let Some(handle) = self.handle(run_id).await {
      handle.cancel(reason).await;
      return Ok(());
    }

    let mut run = match self.store.load_run(run_id).await {
      Ok(run) => run,
      Err(StoreError::NotFound(_)) => {
        return Err(EngineError::RunNotFound {
          run_id: run_id.to_string(),
        });
      }
      Err(e) => return Err(e.into()),
    };

    run.annotations.push(Annotation {
      at: Utc::now(),
      note: reason.to_string(),
    });
    self.store.save_run(&run).await?;
    info!(run_id = %run_id, reason, "run_annotated");
    Ok(())
  }

  pub async fn list_runs(
    &self,
    workflow_id: &str,
    filter: &RunFilter,
  ) -> Result<Vec<RunSummary>, EngineError> {
    Ok(self.store.list_runs(workflow_id, filter).await?)
  }
}
