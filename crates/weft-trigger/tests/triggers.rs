use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use weft_capability::CapabilityRegistry;
use weft_config::{EdgeDef, JoinStrategy, NodeDef, WorkflowDef};
use weft_runtime::{Engine, EngineConfig};
use weft_store::{MemoryStore, NodeStatus, RunFilter, RunStatus};
use weft_trigger::{ManualTrigger, ScheduleTrigger, TriggerError, TriggerEvent, WorkflowRunner};
use weft_workflow::Workflow;

fn engine() -> Engine {
  Engine::new(
    CapabilityRegistry::with_builtins(),
    Arc::new(MemoryStore::new()),
    EngineConfig::default(),
  )
}

fn workflow() -> Arc<Workflow> {
  let def = WorkflowDef {
    workflow_id: "wf".to_string(),
    name: "triggers".to_string(),
    timeout_ms: None,
    retry: None,
    nodes: vec![
      NodeDef::new("button", "manual"),
      NodeDef::new("hook", "event"),
      NodeDef::new("tick", "schedule").with_config(json!({"interval_ms": 100})),
      NodeDef::new("a", "set")
        .with_config(json!({"values": {"v": "{{ source }}"}}))
        .with_join(JoinStrategy::Any),
    ],
    edges: vec![
      EdgeDef::new("button", "a"),
      EdgeDef::new("hook", "a"),
      EdgeDef::new("tick", "a"),
    ],
  };
  Arc::new(Workflow::load(def, &CapabilityRegistry::with_builtins()).unwrap())
}

#[tokio::test]
async fn test_manual_trigger_fires_from_entry() {
  let trigger = ManualTrigger::new(engine(), workflow()).at("button").unwrap();

  let run = trigger
    .fire(json!({"source": "button"}), "alice")
    .await
    .unwrap()
    .wait()
    .await;

  assert_eq!(run.status, RunStatus::Success);
  assert_eq!(run.triggered_by, "alice");
  assert_eq!(run.node_status("button"), Some(NodeStatus::Done));
  assert_eq!(run.node_status("hook"), Some(NodeStatus::Skipped));
  assert_eq!(run.variables["a.v"], json!("button"));
}

#[test]
fn test_manual_trigger_rejects_non_trigger_entry() {
  let result = ManualTrigger::new(engine(), workflow()).at("a");
  assert!(matches!(result, Err(TriggerError::NotATrigger { node_id, .. }) if node_id == "a"));
}

#[tokio::test]
async fn test_runner_runs_each_event_until_channel_closes() {
  let engine = engine();
  let runner = WorkflowRunner::new(engine.clone(), workflow());
  let sender = runner.sender();

  let task = tokio::spawn(runner.start(CancellationToken::new()));
  for principal in ["alice", "bob"] {
    let event = TriggerEvent::new("hook", json!({"source": principal})).with_principal(principal);
    sender.send(event).await.unwrap();
  }
  drop(sender);
  task.await.unwrap().unwrap();

  let runs = engine.list_runs("wf", &RunFilter::default()).await.unwrap();
  assert_eq!(runs.len(), 2);
  assert!(runs.iter().all(|r| r.status == RunStatus::Success));
  let bob = engine
    .list_runs("wf", &RunFilter::default().triggered_by("bob"))
    .await
    .unwrap();
  assert_eq!(bob.len(), 1);
}

#[tokio::test]
async fn test_runner_skips_events_for_unknown_triggers() {
  let engine = engine();
  let runner = WorkflowRunner::new(engine.clone(), workflow());

  runner
    .run(TriggerEvent::new("a", json!({})))
    .await
    .unwrap();
  runner
    .run(TriggerEvent::new("hook", json!({"source": "hook"})))
    .await
    .unwrap();

  let cancel = CancellationToken::new();
  let task = tokio::spawn(runner.start(cancel.clone()));
  tokio::time::sleep(Duration::from_millis(200)).await;
  cancel.cancel();
  task.await.unwrap().unwrap();

  let runs = engine.list_runs("wf", &RunFilter::default()).await.unwrap();
  assert_eq!(runs.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_schedule_fires_every_interval_until_cancelled() {
  let engine = engine();
  let schedule = ScheduleTrigger::new(engine.clone(), workflow(), "tick").unwrap();
  assert_eq!(schedule.interval(), Duration::from_millis(100));

  let cancel = CancellationToken::new();
  let task = tokio::spawn(schedule.run(cancel.clone()));
  tokio::time::sleep(Duration::from_millis(350)).await;
  cancel.cancel();
  let fired = task.await.unwrap();

  assert_eq!(fired, 3);
  let runs = engine
    .list_runs("wf", &RunFilter::default().triggered_by("schedule:tick"))
    .await
    .unwrap();
  assert_eq!(runs.len(), 3);
}

#[test]
fn test_schedule_requires_schedule_node() {
  let result = ScheduleTrigger::new(engine(), workflow(), "hook");
  assert!(matches!(result, Err(TriggerError::InvalidSchedule { .. })));

  let result = ScheduleTrigger::new(engine(), workflow(), "missing");
  assert!(matches!(result, Err(TriggerError::NotATrigger { .. })));
}
