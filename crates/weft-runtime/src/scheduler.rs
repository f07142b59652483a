//! Graph traversal for one run.
//!
//! The scheduler works in waves: settle the frontier, dispatch every READY
//! node concurrently through the [`Supervisor`], wait for the wave, then
//! apply the results in topological order. Applying results decides which
//! outgoing edges are live, and the next settle pass turns those edges into
//! new READY or SKIPPED nodes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::json;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use weft_capability::builtin::{LOOP_BODY, PAYLOAD_INPUT};
use weft_capability::{CapabilityRegistry, Invocation, Outcome, Providers};
use weft_config::JoinStrategy;
use weft_store::{ErrorKind, LogEvent, NodeError, NodeStatus, RunStatus};
use weft_workflow::{Node, RetryPolicy, Workflow};

use crate::ledger::RunLedger;
use crate::supervisor::{Supervised, Supervisor, sleep_until};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeState {
  Pending,
  Live,
  Dead,
}

enum Readiness {
  Ready,
  Skip(&'static str),
}

/// Everything one run needs besides its ledger.
pub(crate) struct RunPlan {
  pub workflow: Arc<Workflow>,
  pub registry: Arc<CapabilityRegistry>,
  pub providers: Providers,
  pub default_retry: RetryPolicy,
  pub payload: serde_json::Value,
  pub entry: Option<String>,
  pub deadline: Option<Instant>,
}

pub(crate) struct Scheduler {
  plan: RunPlan,
  ledger: Arc<RunLedger>,
  run_id: String,
  /// User cancellation.
  cancel: CancellationToken,
  /// Child of `cancel`; also fired on blocking failure and run timeout.
  abort: CancellationToken,
  edges: Vec<EdgeState>,
  status: HashMap<String, NodeStatus>,
  activations: HashMap<String, u32>,
  body_routings: HashMap<String, u32>,
  open_loops: HashSet<String>,
  timed_out: bool,
  failure: Option<RunStatus>,
}

impl Scheduler {
  pub(crate) fn new(plan: RunPlan, ledger: Arc<RunLedger>, cancel: CancellationToken) -> Self {
    let run_id = ledger.run_id();
    let edges = vec![EdgeState::Pending; plan.workflow.edges().len()];
    let status = plan
      .workflow
      .nodes()
      .iter()
      .map(|n| (n.node_id.clone(), NodeStatus::Waiting))
      .collect();
    let abort = cancel.child_token();

    Self {
      plan,
      ledger,
      run_id,
      cancel,
      abort,
      edges,
      status,
      activations: HashMap::new(),
      body_routings: HashMap::new(),
      open_loops: HashSet::new(),
      timed_out: false,
      failure: None,
    }
  }

  /// Run the workflow to a terminal status.
  #[instrument(
    name = "run_drive",
    skip(self),
    fields(run_id = %self.run_id, workflow_id = %self.plan.workflow.workflow_id)
  )]
  pub(crate) async fn drive(mut self) -> RunStatus {
    self.skip_other_triggers().await;
    let mut started = false;

    loop {
      if self.cancel.is_cancelled() {
        break;
      }
      if self.plan.deadline.is_some_and(|d| Instant::now() >= d) {
        self.timed_out = true;
        break;
      }

      let ready = self.settle().await;
      if ready.is_empty() {
        break;
      }

      if !started {
        self.ledger.start().await;
        info!(run_id = %self.run_id, "run_started");
        started = true;
      }

      info!(run_id = %self.run_id, ready_nodes = ?ready, "wave_dispatched");
      let results = self.run_wave(ready).await;
      self.apply(results).await;

      if self.failure.is_some() || self.timed_out || self.cancel.is_cancelled() {
        break;
      }
    }

    let status = if self.cancel.is_cancelled() {
      RunStatus::Canceled
    } else if self.timed_out {
      RunStatus::TimedOut
    } else if let Some(status) = self.failure {
      status
    } else {
      RunStatus::Success
    };

    if status == RunStatus::Success {
      self.skip_unreached().await;
    }

    self.ledger.finish(status).await;
    match status {
      RunStatus::Success => info!(run_id = %self.run_id, "run_succeeded"),
      RunStatus::Canceled => warn!(run_id = %self.run_id, "run_canceled"),
      other => error!(run_id = %self.run_id, status = %other, "run_failed"),
    }
    status
  }

  async fn skip_other_triggers(&mut self) {
    let Some(entry) = self.plan.entry.clone() else {
      return;
    };
    let workflow = self.plan.workflow.clone();
    for trigger in workflow.graph().triggers() {
      if *trigger != entry {
        self.skip(trigger, "not the entry trigger").await;
      }
    }
  }

  async fn skip_unreached(&mut self) {
    let workflow = self.plan.workflow.clone();
    for node_id in workflow.graph().order() {
      if self.status[node_id] == NodeStatus::Waiting {
        self.skip(node_id, "not reached").await;
      }
    }
  }

  async fn skip(&mut self, node_id: &str, reason: &str) {
    self.status.insert(node_id.to_string(), NodeStatus::Skipped);
    self.kill_outgoing(node_id);
    self.ledger.node_skipped(node_id, reason).await;
    info!(run_id = %self.run_id, node_id = %node_id, reason, "node_skipped");
  }

  fn kill_outgoing(&mut self, node_id: &str) {
    let workflow = self.plan.workflow.clone();
    for &edge in workflow.graph().outgoing(node_id) {
      self.edges[edge] = EdgeState::Dead;
    }
  }

  /// Propagate edge states until nothing changes. Returns READY nodes in
  /// dispatch order.
  async fn settle(&mut self) -> Vec<String> {
    let workflow = self.plan.workflow.clone();

    loop {
      let mut changed = false;
      for node_id in workflow.graph().order() {
        let Some(node) = workflow.node(node_id) else {
          continue;
        };
        let decision = match self.status[node_id] {
          NodeStatus::Waiting => self.readiness(&workflow, node),
          NodeStatus::Done if self.open_loops.contains(node_id) => self.loop_reentry(&workflow, node),
          _ => None,
        };

        match decision {
          Some(Readiness::Ready) => {
            self.status.insert(node_id.clone(), NodeStatus::Ready);
            self.ledger.node_ready(node_id).await;
            changed = true;
          }
          Some(Readiness::Skip(reason)) => {
            self.skip(node_id, reason).await;
            changed = true;
          }
          None => {}
        }
      }
      if !changed {
        break;
      }
    }

    workflow
      .graph()
      .order()
      .iter()
      .filter(|id| self.status[id.as_str()] == NodeStatus::Ready)
      .cloned()
      .collect()
  }

  fn readiness(&self, workflow: &Workflow, node: &Node) -> Option<Readiness> {
    if node.is_trigger() {
      return Some(Readiness::Ready);
    }

    let states: Vec<EdgeState> = workflow
      .graph()
      .forward_incoming(&node.node_id)
      .map(|i| self.edges[i])
      .collect();
    let live = states.iter().filter(|s| **s == EdgeState::Live).count();
    let dead = states.iter().filter(|s| **s == EdgeState::Dead).count();

    match node.join {
      JoinStrategy::All if dead > 0 => Some(Readiness::Skip("an upstream source was skipped")),
      JoinStrategy::All if live == states.len() => Some(Readiness::Ready),
      JoinStrategy::Any if live > 0 => Some(Readiness::Ready),
      JoinStrategy::Any if dead == states.len() => {
        Some(Readiness::Skip("every upstream source was skipped"))
      }
      _ => None,
    }
  }

  /// A loop node that routed into its body runs again once every
  /// loop-back edge has resolved.
  fn loop_reentry(&self, workflow: &Workflow, node: &Node) -> Option<Readiness> {
    let body = workflow.graph().loop_body(&node.node_id)?;
    body
      .back_edges
      .iter()
      .all(|&e| self.edges[e] != EdgeState::Pending)
      .then_some(Readiness::Ready)
  }

  fn collect_inputs(
    &self,
    workflow: &Workflow,
    node: &Node,
    variables: &weft_store::Variables,
  ) -> serde_json::Map<String, serde_json::Value> {
    let mut inputs = serde_json::Map::new();
    if node.is_trigger() {
      inputs.insert(PAYLOAD_INPUT.to_string(), self.plan.payload.clone());
      return inputs;
    }

    for &i in workflow.graph().incoming(&node.node_id) {
      let edge = workflow.edge(i);
      if self.edges[i] == EdgeState::Live {
        let value = variables
          .get(&edge.variable())
          .cloned()
          .unwrap_or(serde_json::Value::Null);
        inputs.insert(edge.to_input.clone(), value);
      } else {
        inputs
          .entry(edge.to_input.clone())
          .or_insert(serde_json::Value::Null);
      }
    }
    inputs
  }

  async fn run_wave(&mut self, ready: Vec<String>) -> Vec<(String, Supervised)> {
    let workflow = self.plan.workflow.clone();
    let variables = Arc::new(self.ledger.variables());
    let mut results = Vec::new();
    let mut ids = Vec::new();
    let mut handles = Vec::new();

    for node_id in ready {
      let Some(node) = workflow.node(&node_id) else {
        continue;
      };
      let iteration = {
        let count = self.activations.entry(node_id.clone()).or_insert(0);
        *count += 1;
        *count
      };
      self.status.insert(node_id.clone(), NodeStatus::Running);
      self.ledger.node_started(&node_id, iteration).await;
      info!(run_id = %self.run_id, node_id = %node_id, iteration, "node_started");

      let capability = match self.plan.registry.resolve(&node.kind) {
        Ok(capability) => capability,
        Err(e) => {
          error!(run_id = %self.run_id, node_id = %node_id, error = %e, "capability_not_found");
          if !node.non_blocking {
            self.abort.cancel();
          }
          results.push((
            node_id,
            Supervised::failed(ErrorKind::UnknownKind, e.to_string(), 0),
          ));
          continue;
        }
      };

      let invocation = Invocation {
        run_id: self.run_id.clone(),
        node_id: node_id.clone(),
        attempt: 1,
        iteration,
        config: node.config.clone(),
        inputs: self.collect_inputs(&workflow, node, &variables),
        variables: variables.clone(),
        providers: self.plan.providers.clone(),
        cancel: self.abort.clone(),
      };
      let policy = RetryPolicy::from_def(&node.retry, &self.plan.default_retry);
      let supervisor =
        Supervisor::new(policy, self.abort.child_token()).with_ledger(self.ledger.clone());
      let abort = self.abort.clone();
      let blocking = !node.non_blocking;

      ids.push(node_id);
      handles.push(tokio::spawn(async move {
        let result = supervisor.run(capability, invocation).await;
        if blocking && result.is_failure() {
          abort.cancel();
        }
        result
      }));
    }

    let wave = futures::future::join_all(handles);
    tokio::pin!(wave);
    let joined = tokio::select! {
      joined = &mut wave => joined,
      _ = sleep_until(self.plan.deadline) => {
        warn!(run_id = %self.run_id, "run_timed_out");
        self.timed_out = true;
        self.abort.cancel();
        wave.await
      }
    };

    for (node_id, joined) in ids.into_iter().zip(joined) {
      let result = joined.unwrap_or_else(|e| {
        Supervised::failed(ErrorKind::Terminal, format!("node task failed: {e}"), 0)
      });
      results.push((node_id, result));
    }

    let graph = workflow.graph();
    results.sort_by_key(|(node_id, _)| graph.rank(node_id));
    results
  }

  async fn apply(&mut self, results: Vec<(String, Supervised)>) {
    let workflow = self.plan.workflow.clone();

    for (node_id, result) in results {
      let Some(node) = workflow.node(&node_id) else {
        continue;
      };
      match result {
        Supervised::Succeeded { outcome, attempts } => {
          self.succeed(&workflow, node, outcome, attempts).await;
        }
        Supervised::Failed { error, status } => {
          self.fail(node, status, error).await;
        }
      }
    }
  }

  async fn succeed(&mut self, workflow: &Workflow, node: &Node, outcome: Outcome, attempts: u32) {
    let node_id = node.node_id.as_str();
    let body = if node.is_loop() {
      workflow.graph().loop_body(node_id)
    } else {
      None
    };

    let Some(body) = body else {
      self.ledger.node_succeeded(node_id, &outcome, attempts).await;
      self.status.insert(node_id.to_string(), NodeStatus::Done);
      info!(run_id = %self.run_id, node_id = %node_id, attempts, "node_completed");
      let route = outcome.route.as_deref();
      for &edge in workflow.graph().outgoing(node_id) {
        self.edges[edge] = release(workflow, node, edge, route);
      }
      return;
    };

    if outcome.route.as_deref() == Some(LOOP_BODY) {
      let routings = {
        let count = self.body_routings.entry(node_id.to_string()).or_insert(0);
        *count += 1;
        *count
      };
      let cap = node.iteration_cap.unwrap_or(1);
      if routings > cap {
        let error = NodeError::new(
          ErrorKind::LoopLimitExceeded,
          format!("loop exceeded its cap of {cap} iterations"),
          attempts,
        );
        self.fail(node, NodeStatus::Failed, error).await;
        return;
      }

      self.ledger.node_succeeded(node_id, &outcome, attempts).await;
      self.status.insert(node_id.to_string(), NodeStatus::Done);
      self
        .ledger
        .append(
          Some(node_id),
          LogEvent::LoopIteration,
          json!({ "iteration": routings, "max_iterations": cap }),
        )
        .await;
      info!(run_id = %self.run_id, node_id = %node_id, iteration = routings, "loop_iteration");

      for body_node in &body.nodes {
        self.status.insert(body_node.clone(), NodeStatus::Waiting);
        self.ledger.reset_node(body_node);
      }
      for edge in body.edges() {
        self.edges[edge] = EdgeState::Pending;
      }
      for &edge in &body.entry_edges {
        self.edges[edge] = release(workflow, node, edge, Some(LOOP_BODY));
      }
      // A loop that routes onto itself has no body to resolve its back edge.
      for &edge in &body.back_edges {
        if workflow.edge(edge).from == node_id {
          self.edges[edge] = release(workflow, node, edge, Some(LOOP_BODY));
        }
      }
      self.open_loops.insert(node_id.to_string());
    } else {
      self.ledger.node_succeeded(node_id, &outcome, attempts).await;
      self.status.insert(node_id.to_string(), NodeStatus::Done);
      self.open_loops.remove(node_id);
      info!(run_id = %self.run_id, node_id = %node_id, "loop_finished");

      let route = outcome.route.as_deref();
      for &edge in workflow.graph().outgoing(node_id) {
        self.edges[edge] = if body.entry_edges.contains(&edge) {
          EdgeState::Dead
        } else {
          release(workflow, node, edge, route)
        };
      }
    }
  }

  async fn fail(&mut self, node: &Node, mut status: NodeStatus, mut error: NodeError) {
    let node_id = node.node_id.as_str();

    // Aborted because something else ended the run
    let collateral =
      error.kind == ErrorKind::CancellationRequested && !self.cancel.is_cancelled();
    if collateral {
      if self.timed_out {
        error.kind = ErrorKind::DeadlineExceeded;
        error.message = "run timeout elapsed".to_string();
        status = NodeStatus::TimedOut;
      } else {
        error.message = "aborted after a blocking failure".to_string();
      }
    }

    error!(
      run_id = %self.run_id,
      node_id = %node_id,
      kind = ?error.kind,
      attempt = error.attempt,
      error = %error.message,
      non_blocking = node.non_blocking,
      "node_failed"
    );

    self.ledger.node_failed(node_id, status, error).await;
    self.status.insert(node_id.to_string(), status);
    self.open_loops.remove(node_id);
    self.kill_outgoing(node_id);

    if !node.non_blocking && !collateral && self.failure.is_none() {
      self.failure = Some(if status == NodeStatus::TimedOut {
        RunStatus::TimedOut
      } else {
        RunStatus::Failed
      });
      self.abort.cancel();
    }
  }
}

/// Edge state after its source completed with `route`.
fn release(workflow: &Workflow, node: &Node, edge: usize, route: Option<&str>) -> EdgeState {
  match &workflow.edge(edge).condition {
    Some(label) if node.is_logic() => {
      if route == Some(label.as_str()) {
        EdgeState::Live
      } else {
        EdgeState::Dead
      }
    }
    _ => EdgeState::Live,
  }
}
