//! Load-time validation of workflow definitions.

use serde_json::json;
use weft_capability::{CapabilityRegistry, Category, LogicKind};
use weft_config::{EdgeDef, JoinStrategy, NodeDef, RetryPolicyDef, WorkflowDef};
use weft_workflow::{RetryPolicy, ValidationError, Workflow};

fn def(nodes: Vec<NodeDef>, edges: Vec<EdgeDef>) -> WorkflowDef {
  WorkflowDef {
    workflow_id: "wf".to_string(),
    name: "test".to_string(),
    timeout_ms: None,
    retry: None,
    nodes,
    edges,
  }
}

fn load(def: WorkflowDef) -> Result<Workflow, ValidationError> {
  Workflow::load(def, &CapabilityRegistry::with_builtins())
}

fn trigger() -> NodeDef {
  NodeDef::new("start", "manual")
}

fn set(id: &str) -> NodeDef {
  NodeDef::new(id, "set").with_config(json!({"values": {"v": id}}))
}

fn counter_loop(id: &str, max: u32) -> NodeDef {
  NodeDef::new(id, "loop").with_config(json!({"max_iterations": max}))
}

#[test]
fn test_linear_workflow_loads() {
  let wf = load(def(
    vec![trigger(), set("a"), set("b")],
    vec![EdgeDef::new("start", "a"), EdgeDef::new("a", "b")],
  ))
  .unwrap();

  assert_eq!(wf.nodes().len(), 3);
  assert_eq!(wf.graph().order(), ["start", "a", "b"]);
  assert_eq!(wf.graph().triggers(), ["start"]);
  assert_eq!(wf.edges()[0].to_input, "start");
  assert_eq!(wf.node("a").unwrap().category, Category::Transform);
}

#[test]
fn test_order_is_topological_then_declaration() {
  // b is declared before a but depends on it
  let wf = load(def(
    vec![trigger(), set("b"), set("a"), set("c")],
    vec![
      EdgeDef::new("start", "a"),
      EdgeDef::new("a", "b"),
      EdgeDef::new("start", "c"),
    ],
  ))
  .unwrap();

  assert_eq!(wf.graph().order(), ["start", "a", "b", "c"]);
  assert!(wf.graph().rank("a") < wf.graph().rank("b"));
}

#[test]
fn test_empty_workflow() {
  assert!(matches!(load(def(vec![], vec![])), Err(ValidationError::Empty)));
}

#[test]
fn test_duplicate_node_id() {
  let err = load(def(vec![trigger(), set("a"), set("a")], vec![])).unwrap_err();
  assert!(matches!(err, ValidationError::DuplicateNodeId { node_id } if node_id == "a"));
}

#[test]
fn test_edge_to_unknown_node() {
  let err = load(def(vec![trigger()], vec![EdgeDef::new("start", "ghost")])).unwrap_err();
  assert!(matches!(err, ValidationError::InvalidEdge { to, .. } if to == "ghost"));
}

#[test]
fn test_unknown_kind() {
  let err = load(def(
    vec![trigger(), NodeDef::new("a", "teleport")],
    vec![EdgeDef::new("start", "a")],
  ))
  .unwrap_err();
  assert!(matches!(err, ValidationError::UnknownKind { kind, .. } if kind == "teleport"));
}

#[test]
fn test_invalid_config_is_reported_per_node() {
  let err = load(def(
    vec![trigger(), NodeDef::new("b", "branch")],
    vec![EdgeDef::new("start", "b")],
  ))
  .unwrap_err();
  assert!(matches!(err, ValidationError::InvalidConfig { node_id, .. } if node_id == "b"));
}

#[test]
fn test_loop_without_cap_rejected() {
  let err = load(def(
    vec![trigger(), NodeDef::new("l", "loop")],
    vec![EdgeDef::new("start", "l")],
  ))
  .unwrap_err();
  assert!(matches!(err, ValidationError::InvalidConfig { node_id, .. } if node_id == "l"));
}

#[test]
fn test_trigger_mid_graph() {
  let err = load(def(
    vec![trigger(), set("a"), NodeDef::new("late", "event")],
    vec![EdgeDef::new("start", "a"), EdgeDef::new("a", "late")],
  ))
  .unwrap_err();
  assert!(matches!(err, ValidationError::TriggerHasIncoming { node_id } if node_id == "late"));
}

#[test]
fn test_no_trigger() {
  let err = load(def(vec![set("a")], vec![])).unwrap_err();
  assert!(matches!(err, ValidationError::NoTrigger));
}

#[test]
fn test_orphan_node() {
  let err = load(def(
    vec![trigger(), set("a"), set("lonely")],
    vec![EdgeDef::new("start", "a")],
  ))
  .unwrap_err();
  assert!(matches!(err, ValidationError::OrphanNode { node_id } if node_id == "lonely"));
}

#[test]
fn test_unconditional_cycle() {
  let err = load(def(
    vec![trigger(), set("a"), set("b")],
    vec![
      EdgeDef::new("start", "a"),
      EdgeDef::new("a", "b"),
      EdgeDef::new("b", "a"),
    ],
  ))
  .unwrap_err();
  match err {
    ValidationError::CycleDetected { nodes } => assert_eq!(nodes, vec!["a", "b"]),
    other => panic!("expected CycleDetected, got {other:?}"),
  }
}

#[test]
fn test_conditional_cycle_without_loop_node() {
  let err = load(def(
    vec![
      trigger(),
      NodeDef::new("check", "branch").with_config(json!({"condition": "true"})),
      set("work"),
    ],
    vec![
      EdgeDef::new("start", "check"),
      EdgeDef::new("check", "work").when("true"),
      EdgeDef::new("work", "check"),
    ],
  ))
  .unwrap_err();
  assert!(matches!(err, ValidationError::UnboundedCycle { .. }));
}

#[test]
fn test_two_loops_in_one_cycle() {
  let err = load(def(
    vec![trigger(), counter_loop("outer", 3), counter_loop("inner", 3)],
    vec![
      EdgeDef::new("start", "outer"),
      EdgeDef::new("outer", "inner").when("body"),
      EdgeDef::new("inner", "outer").when("body"),
    ],
  ))
  .unwrap_err();
  assert!(matches!(err, ValidationError::NestedLoop { .. }));
}

#[test]
fn test_loop_body_is_analysed() {
  let wf = load(def(
    vec![
      trigger(),
      counter_loop("retry_loop", 3),
      set("attempt"),
      set("check"),
      set("after"),
    ],
    vec![
      EdgeDef::new("start", "retry_loop"),
      EdgeDef::new("retry_loop", "attempt").when("body"),
      EdgeDef::new("attempt", "check"),
      EdgeDef::new("check", "retry_loop"),
      EdgeDef::new("retry_loop", "after").when("done"),
    ],
  ))
  .unwrap();

  let graph = wf.graph();
  let body = graph.loop_body("retry_loop").unwrap();
  assert_eq!(body.nodes, vec!["attempt", "check"]);
  assert_eq!(body.entry_edges, vec![1]);
  assert_eq!(body.inner_edges, vec![2]);
  assert_eq!(body.back_edges, vec![3]);
  assert!(graph.is_back_edge(3));
  assert_eq!(graph.enclosing_loop("check"), Some("retry_loop"));
  assert_eq!(graph.enclosing_loop("after"), None);
  assert_eq!(wf.node("retry_loop").unwrap().iteration_cap, Some(3));
  assert_eq!(
    wf.node("retry_loop").unwrap().category,
    Category::Logic(LogicKind::Loop)
  );
  assert_eq!(
    graph.order(),
    ["start", "retry_loop", "attempt", "check", "after"]
  );
}

#[test]
fn test_self_looping_loop_has_an_empty_body() {
  let wf = load(def(
    vec![trigger(), counter_loop("repeat", 3), set("after")],
    vec![
      EdgeDef::new("start", "repeat"),
      EdgeDef::new("repeat", "repeat").when("body"),
      EdgeDef::new("repeat", "after").when("done"),
    ],
  ))
  .unwrap();

  let graph = wf.graph();
  let body = graph.loop_body("repeat").unwrap();
  assert!(body.nodes.is_empty());
  assert!(body.entry_edges.is_empty());
  assert_eq!(body.back_edges, vec![1]);
  assert!(graph.is_back_edge(1));
}

#[test]
fn test_loop_body_cannot_escape() {
  let err = load(def(
    vec![
      trigger(),
      counter_loop("l", 3),
      set("body"),
      NodeDef::new("side", "log"),
    ],
    vec![
      EdgeDef::new("start", "l"),
      EdgeDef::new("l", "body").when("body"),
      EdgeDef::new("body", "l"),
      EdgeDef::new("body", "side"),
    ],
  ))
  .unwrap_err();
  assert!(
    matches!(err, ValidationError::LoopBodyEscapes { loop_id, to, .. } if loop_id == "l" && to == "side")
  );
}

#[test]
fn test_loop_entry_needs_label() {
  let err = load(def(
    vec![
      trigger(),
      counter_loop("l", 3),
      NodeDef::new("gate", "branch").with_config(json!({"condition": "true"})),
    ],
    vec![
      EdgeDef::new("start", "l"),
      EdgeDef::new("l", "gate"),
      EdgeDef::new("gate", "l").when("true"),
    ],
  ))
  .unwrap_err();
  assert!(matches!(err, ValidationError::UnconditionalLoopEntry { .. }));
}

#[test]
fn test_loop_reached_only_from_body() {
  let err = load(def(
    vec![trigger(), counter_loop("l", 3), set("body"), set("x")],
    vec![
      EdgeDef::new("start", "x"),
      EdgeDef::new("l", "body").when("body"),
      EdgeDef::new("body", "l"),
    ],
  ))
  .unwrap_err();
  assert!(matches!(err, ValidationError::OrphanNode { node_id } if node_id == "l"));
}

#[test]
fn test_conditional_edge_from_action() {
  let err = load(def(
    vec![trigger(), set("a"), set("b")],
    vec![EdgeDef::new("start", "a"), EdgeDef::new("a", "b").when("yes")],
  ))
  .unwrap_err();
  assert!(matches!(err, ValidationError::ConditionalEdgeFromNonLogic { from, .. } if from == "a"));
}

#[test]
fn test_retry_policy_checked() {
  let err = load(def(
    vec![
      trigger(),
      set("a").with_retry(RetryPolicyDef {
        max_attempts: Some(0),
        ..Default::default()
      }),
    ],
    vec![EdgeDef::new("start", "a")],
  ))
  .unwrap_err();
  assert!(matches!(err, ValidationError::InvalidRetryPolicy { scope, .. } if scope == "a"));
}

#[test]
fn test_retry_merges_workflow_and_node() {
  let mut definition = def(
    vec![
      trigger(),
      set("a")
        .with_retry(RetryPolicyDef {
          max_attempts: Some(3),
          ..Default::default()
        })
        .with_timeout_ms(250),
      set("b"),
    ],
    vec![EdgeDef::new("start", "a"), EdgeDef::new("a", "b")],
  );
  definition.retry = Some(RetryPolicyDef {
    max_attempts: Some(5),
    backoff_base_ms: Some(10),
    ..Default::default()
  });
  let wf = load(definition).unwrap();

  let a = RetryPolicy::from_def(&wf.node("a").unwrap().retry, &RetryPolicy::default());
  assert_eq!(a.max_attempts, 3);
  assert_eq!(a.backoff.base.as_millis(), 10);
  assert_eq!(a.attempt_timeout.map(|d| d.as_millis()), Some(250));

  let b = RetryPolicy::from_def(&wf.node("b").unwrap().retry, &RetryPolicy::default());
  assert_eq!(b.max_attempts, 5);
}

#[test]
fn test_from_json() {
  let wf = Workflow::from_json(
    r#"{
      "workflow_id": "triage",
      "name": "Triage",
      "timeout_ms": 5000,
      "nodes": [
        {"node_id": "start", "kind": "event"},
        {"node_id": "route", "kind": "branch", "config": {"condition": "x > 0", "then": "pos", "else": "neg"}},
        {"node_id": "pos", "kind": "log"},
        {"node_id": "neg", "kind": "log"},
        {"node_id": "join", "kind": "merge", "join": "any"}
      ],
      "edges": [
        {"from": "start", "to": "route"},
        {"from": "route", "to": "pos", "condition": "pos"},
        {"from": "route", "to": "neg", "condition": "neg"},
        {"from": "pos", "to": "join"},
        {"from": "neg", "to": "join"}
      ]
    }"#,
    &CapabilityRegistry::with_builtins(),
  )
  .unwrap();

  assert_eq!(wf.workflow_id, "triage");
  assert_eq!(wf.timeout.map(|t| t.as_millis()), Some(5000));
  assert_eq!(wf.node("join").unwrap().join, JoinStrategy::Any);
  assert_eq!(wf.graph().incoming("join"), [3, 4]);
  assert_eq!(wf.graph().outgoing("route"), [1, 2]);
}

#[test]
fn test_from_json_parse_error() {
  let err = Workflow::from_json("{not json", &CapabilityRegistry::with_builtins()).unwrap_err();
  assert!(matches!(err, ValidationError::Parse(_)));
}
