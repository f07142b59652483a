use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::time::Duration;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use weft_capability::CapabilityRegistry;
use weft_config::{RetryPolicyDef, WorkflowDef};

use crate::error::ValidationError;
use crate::graph::{Graph, LoopBody};
use crate::node::{Edge, Node};
use crate::retry::RetryPolicy;

/// A validated workflow ready for execution.
#[derive(Debug, Clone)]
pub struct Workflow {
  pub workflow_id: String,
  pub name: String,
  /// Whole-run bound.
  pub timeout: Option<Duration>,
  nodes: Vec<Node>,
  index: HashMap<String, usize>,
  edges: Vec<Edge>,
  graph: Graph,
}

impl Workflow {
  /// Parse and load a JSON definition.
  pub fn from_json(source: &str, registry: &CapabilityRegistry) -> Result<Self, ValidationError> {
    let def = WorkflowDef::from_json(source)?;
    Self::load(def, registry)
  }

  /// Validate a definition against the capabilities in `registry`.
  pub fn load(def: WorkflowDef, registry: &CapabilityRegistry) -> Result<Self, ValidationError> {
    if def.nodes.is_empty() {
      return Err(ValidationError::Empty);
    }

    let mut index = HashMap::with_capacity(def.nodes.len());
    for (i, node) in def.nodes.iter().enumerate() {
      if index.insert(node.node_id.clone(), i).is_some() {
        return Err(ValidationError::DuplicateNodeId {
          node_id: node.node_id.clone(),
        });
      }
    }

    for edge in &def.edges {
      if !index.contains_key(&edge.from) || !index.contains_key(&edge.to) {
        return Err(ValidationError::InvalidEdge {
          from: edge.from.clone(),
          to: edge.to.clone(),
        });
      }
    }

    let workflow_retry = def.retry.clone().unwrap_or_default();
    let mut nodes = Vec::with_capacity(def.nodes.len());
    let mut node_retries = Vec::with_capacity(def.nodes.len());

    for node in def.nodes {
      let capability = registry
        .resolve(&node.kind)
        .map_err(|_| ValidationError::UnknownKind {
          node_id: node.node_id.clone(),
          kind: node.kind.clone(),
        })?;

      capability
        .check_config(&node.config)
        .map_err(|message| ValidationError::InvalidConfig {
          node_id: node.node_id.clone(),
          kind: node.kind.clone(),
          message,
        })?;

      let category = capability.category();
      let iteration_cap = if category.is_loop() {
        let cap = capability
          .iteration_cap(&node.config)
          .filter(|cap| *cap >= 1)
          .ok_or_else(|| ValidationError::MissingIterationCap {
            node_id: node.node_id.clone(),
          })?;
        Some(cap)
      } else {
        None
      };

      let mut retry = match &node.retry {
        Some(own) => own.overlay(&workflow_retry),
        None => workflow_retry.clone(),
      };
      if node.timeout_ms.is_some() {
        retry.attempt_timeout_ms = node.timeout_ms;
      }
      node_retries.push((node.node_id.clone(), node.retry.clone(), node.timeout_ms));

      nodes.push(Node {
        node_id: node.node_id,
        kind: node.kind,
        category,
        config: node.config,
        join: node.join,
        non_blocking: node.non_blocking,
        retry,
        iteration_cap,
      });
    }

    let edges: Vec<Edge> = def
      .edges
      .into_iter()
      .map(|edge| Edge {
        to_input: edge.to_input.unwrap_or_else(|| edge.from.clone()),
        from: edge.from,
        from_output: edge.from_output,
        to: edge.to,
        condition: edge.condition,
      })
      .collect();

    let mut incoming: HashMap<String, Vec<usize>> = HashMap::new();
    let mut outgoing: HashMap<String, Vec<usize>> = HashMap::new();
    for node in &nodes {
      incoming.entry(node.node_id.clone()).or_default();
      outgoing.entry(node.node_id.clone()).or_default();
    }
    for (i, edge) in edges.iter().enumerate() {
      outgoing.entry(edge.from.clone()).or_default().push(i);
      incoming.entry(edge.to.clone()).or_default().push(i);
    }

    // Triggers sit at the start of the graph only
    for node in nodes.iter().filter(|n| n.is_trigger()) {
      if incoming.get(&node.node_id).is_some_and(|v| !v.is_empty()) {
        return Err(ValidationError::TriggerHasIncoming {
          node_id: node.node_id.clone(),
        });
      }
    }
    let triggers: Vec<String> = nodes
      .iter()
      .filter(|n| n.is_trigger())
      .map(|n| n.node_id.clone())
      .collect();
    if triggers.is_empty() {
      return Err(ValidationError::NoTrigger);
    }
    for node in nodes.iter().filter(|n| !n.is_trigger()) {
      if incoming.get(&node.node_id).is_none_or(|v| v.is_empty()) {
        return Err(ValidationError::OrphanNode {
          node_id: node.node_id.clone(),
        });
      }
    }

    let pairs: Vec<(usize, usize)> = edges
      .iter()
      .map(|e| (index[&e.from], index[&e.to]))
      .collect();
    let names = |ids: &[usize]| -> Vec<String> { ids.iter().map(|&i| nodes[i].node_id.clone()).collect() };

    let unconditional: Vec<(usize, usize)> = edges
      .iter()
      .zip(&pairs)
      .filter(|(edge, _)| !edge.is_conditional())
      .map(|(_, pair)| *pair)
      .collect();
    if let Some(cycle) = cyclic_components(nodes.len(), &unconditional).into_iter().next() {
      return Err(ValidationError::CycleDetected {
        nodes: names(&cycle),
      });
    }

    let mut loops = Vec::new();
    for component in cyclic_components(nodes.len(), &pairs) {
      let loop_nodes: Vec<usize> = component
        .iter()
        .copied()
        .filter(|&i| nodes[i].is_loop())
        .collect();
      let loop_idx = match loop_nodes.as_slice() {
        [] => {
          return Err(ValidationError::UnboundedCycle {
            nodes: names(&component),
          });
        }
        [single] => *single,
        _ => {
          return Err(ValidationError::NestedLoop {
            nodes: names(&component),
          });
        }
      };

      let members: HashSet<usize> = component.iter().copied().collect();

      // Every cycle in the component must pass through the loop node
      let rest: Vec<(usize, usize)> = pairs
        .iter()
        .copied()
        .filter(|(from, to)| {
          *from != loop_idx && *to != loop_idx && members.contains(from) && members.contains(to)
        })
        .collect();
      if let Some(cycle) = cyclic_components(nodes.len(), &rest).into_iter().next() {
        return Err(ValidationError::UnboundedCycle {
          nodes: names(&cycle),
        });
      }

      let in_body = |i: usize| i != loop_idx && members.contains(&i);
      let loop_id = nodes[loop_idx].node_id.clone();
      let mut body = LoopBody {
        loop_id: loop_id.clone(),
        nodes: Vec::new(),
        entry_edges: Vec::new(),
        inner_edges: Vec::new(),
        back_edges: Vec::new(),
      };

      for (i, &(from, to)) in pairs.iter().enumerate() {
        let escapes = (in_body(from) && !members.contains(&to))
          || (in_body(to) && !members.contains(&from));
        if escapes {
          return Err(ValidationError::LoopBodyEscapes {
            loop_id: loop_id.clone(),
            from: edges[i].from.clone(),
            to: edges[i].to.clone(),
          });
        }

        if to == loop_idx && members.contains(&from) {
          body.back_edges.push(i);
        } else if from == loop_idx && in_body(to) {
          if !edges[i].is_conditional() {
            return Err(ValidationError::UnconditionalLoopEntry {
              from: edges[i].from.clone(),
              to: edges[i].to.clone(),
            });
          }
          body.entry_edges.push(i);
        } else if in_body(from) && in_body(to) {
          body.inner_edges.push(i);
        }
      }

      body.nodes = component
        .iter()
        .copied()
        .filter(|&i| in_body(i))
        .map(|i| nodes[i].node_id.clone())
        .collect();
      loops.push(body);
    }

    for edge in edges.iter().filter(|e| e.is_conditional()) {
      if !nodes[index[&edge.from]].is_logic() {
        return Err(ValidationError::ConditionalEdgeFromNonLogic {
          from: edge.from.clone(),
          to: edge.to.clone(),
        });
      }
    }

    let back_edges: HashSet<usize> = loops
      .iter()
      .flat_map(|body| body.back_edges.iter().copied())
      .collect();

    // A loop node entered only from its own body never starts
    for node in nodes.iter().filter(|n| !n.is_trigger()) {
      let has_forward = incoming
        .get(&node.node_id)
        .is_some_and(|v| v.iter().any(|i| !back_edges.contains(i)));
      if !has_forward {
        return Err(ValidationError::OrphanNode {
          node_id: node.node_id.clone(),
        });
      }
    }

    let forward: Vec<(usize, usize)> = pairs
      .iter()
      .enumerate()
      .filter(|(i, _)| !back_edges.contains(i))
      .map(|(_, pair)| *pair)
      .collect();
    let order_idx = topological_order(nodes.len(), &forward).ok_or_else(|| {
      ValidationError::CycleDetected {
        nodes: nodes.iter().map(|n| n.node_id.clone()).collect(),
      }
    })?;
    let position: HashMap<usize, usize> = order_idx
      .iter()
      .enumerate()
      .map(|(pos, &i)| (i, pos))
      .collect();
    for body in &mut loops {
      body
        .nodes
        .sort_by_key(|id| position.get(&index[id]).copied().unwrap_or(usize::MAX));
    }
    let order = names(&order_idx);

    if let Some(retry) = &def.retry {
      RetryPolicy::check(retry).map_err(|message| ValidationError::InvalidRetryPolicy {
        scope: def.workflow_id.clone(),
        message,
      })?;
    }
    for (node_id, retry, timeout_ms) in node_retries {
      check_node_retry(&node_id, retry.as_ref(), timeout_ms)?;
    }

    let graph = Graph::new(incoming, outgoing, order, triggers, loops);

    Ok(Self {
      workflow_id: def.workflow_id,
      name: def.name,
      timeout: def.timeout_ms.map(Duration::from_millis),
      nodes,
      index,
      edges,
      graph,
    })
  }

  /// Nodes in declaration order.
  pub fn nodes(&self) -> &[Node] {
    &self.nodes
  }

  pub fn node(&self, node_id: &str) -> Option<&Node> {
    self.index.get(node_id).map(|&i| &self.nodes[i])
  }

  pub fn edges(&self) -> &[Edge] {
    &self.edges
  }

  pub fn edge(&self, index: usize) -> &Edge {
    &self.edges[index]
  }

  pub fn graph(&self) -> &Graph {
    &self.graph
  }
}

fn check_node_retry(
  node_id: &str,
  retry: Option<&RetryPolicyDef>,
  timeout_ms: Option<u64>,
) -> Result<(), ValidationError> {
  let invalid = |message: String| ValidationError::InvalidRetryPolicy {
    scope: node_id.to_string(),
    message,
  };
  if let Some(retry) = retry {
    RetryPolicy::check(retry).map_err(invalid)?;
  }
  if timeout_ms == Some(0) {
    return Err(invalid("timeout_ms must be positive".to_string()));
  }
  Ok(())
}

/// Strongly connected components that contain a cycle, as sorted node
/// indices. Components are ordered by their first node.
fn cyclic_components(count: usize, edges: &[(usize, usize)]) -> Vec<Vec<usize>> {
  let mut graph: DiGraph<(), ()> = DiGraph::with_capacity(count, edges.len());
  for _ in 0..count {
    graph.add_node(());
  }
  for &(from, to) in edges {
    graph.add_edge(NodeIndex::new(from), NodeIndex::new(to), ());
  }

  let mut components: Vec<Vec<usize>> = tarjan_scc(&graph)
    .into_iter()
    .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
    .map(|scc| {
      let mut ids: Vec<usize> = scc.iter().map(|n| n.index()).collect();
      ids.sort_unstable();
      ids
    })
    .collect();
  components.sort();
  components
}

/// Kahn's algorithm, picking the lowest declaration index among ready nodes.
/// `None` when the edges contain a cycle.
fn topological_order(count: usize, edges: &[(usize, usize)]) -> Option<Vec<usize>> {
  let mut in_degree = vec![0usize; count];
  let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); count];
  for &(from, to) in edges {
    in_degree[to] += 1;
    downstream[from].push(to);
  }

  let mut ready: BinaryHeap<Reverse<usize>> = (0..count)
    .filter(|&i| in_degree[i] == 0)
    .map(Reverse)
    .collect();
  let mut order = Vec::with_capacity(count);

  while let Some(Reverse(i)) = ready.pop() {
    order.push(i);
    for &next in &downstream[i] {
      in_degree[next] -= 1;
      if in_degree[next] == 0 {
        ready.push(Reverse(next));
      }
    }
  }

  (order.len() == count).then_some(order)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_topological_order_breaks_ties_by_declaration() {
    // 0 -> 2, 1 -> 2, 0 -> 3
    let order = topological_order(4, &[(0, 2), (1, 2), (0, 3)]).unwrap();
    assert_eq!(order, vec![0, 1, 2, 3]);

    let order = topological_order(3, &[(2, 0), (1, 0)]).unwrap();
    assert_eq!(order, vec![1, 2, 0]);
  }

  #[test]
  fn test_topological_order_rejects_cycle() {
    assert!(topological_order(2, &[(0, 1), (1, 0)]).is_none());
  }

  #[test]
  fn test_cyclic_components() {
    let components = cyclic_components(4, &[(0, 1), (1, 2), (2, 1), (3, 3)]);
    assert_eq!(components, vec![vec![1, 2], vec![3]]);
    assert!(cyclic_components(3, &[(0, 1), (1, 2)]).is_empty());
  }
}
