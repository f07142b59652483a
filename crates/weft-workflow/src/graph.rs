use std::collections::{HashMap, HashSet};

/// The repeated part of a loop.
///
/// A loop node and its body form one strongly connected component. Every
/// path from the loop node into the body leaves on an entry edge and comes
/// back on a loop-back edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopBody {
  pub loop_id: String,
  /// Body nodes in topological order.
  pub nodes: Vec<String>,
  /// Edges from the loop node into the body.
  pub entry_edges: Vec<usize>,
  /// Edges between body nodes.
  pub inner_edges: Vec<usize>,
  /// Edges from the body (or the loop node itself) back to the loop node.
  pub back_edges: Vec<usize>,
}

impl LoopBody {
  pub fn contains(&self, node_id: &str) -> bool {
    self.nodes.iter().any(|n| n == node_id)
  }

  /// Every edge that is reset when the body is re-entered.
  pub fn edges(&self) -> impl Iterator<Item = usize> + '_ {
    self
      .entry_edges
      .iter()
      .chain(&self.inner_edges)
      .chain(&self.back_edges)
      .copied()
  }
}

/// Graph structure for traversal. Edges are referred to by their index in
/// [`Workflow::edges`](crate::Workflow::edges).
#[derive(Debug, Clone)]
pub struct Graph {
  /// node_id -> incoming edge indices, in declaration order.
  incoming: HashMap<String, Vec<usize>>,
  /// node_id -> outgoing edge indices, in declaration order.
  outgoing: HashMap<String, Vec<usize>>,
  /// Topological order over forward edges, ties broken by declaration order.
  order: Vec<String>,
  rank: HashMap<String, usize>,
  triggers: Vec<String>,
  loops: HashMap<String, LoopBody>,
  /// body node -> loop node.
  enclosing: HashMap<String, String>,
  back_edges: HashSet<usize>,
}

impl Graph {
  pub(crate) fn new(
    incoming: HashMap<String, Vec<usize>>,
    outgoing: HashMap<String, Vec<usize>>,
    order: Vec<String>,
    triggers: Vec<String>,
    loops: Vec<LoopBody>,
  ) -> Self {
    let rank = order
      .iter()
      .enumerate()
      .map(|(i, id)| (id.clone(), i))
      .collect();

    let mut enclosing = HashMap::new();
    let mut back_edges = HashSet::new();
    for body in &loops {
      for node_id in &body.nodes {
        enclosing.insert(node_id.clone(), body.loop_id.clone());
      }
      back_edges.extend(body.back_edges.iter().copied());
    }

    Self {
      incoming,
      outgoing,
      order,
      rank,
      triggers,
      loops: loops
        .into_iter()
        .map(|body| (body.loop_id.clone(), body))
        .collect(),
      enclosing,
      back_edges,
    }
  }

  pub fn incoming(&self, node_id: &str) -> &[usize] {
    self
      .incoming
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  pub fn outgoing(&self, node_id: &str) -> &[usize] {
    self
      .outgoing
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Incoming edges excluding loop-back edges.
  pub fn forward_incoming(&self, node_id: &str) -> impl Iterator<Item = usize> + '_ {
    self
      .incoming(node_id)
      .iter()
      .copied()
      .filter(|i| !self.back_edges.contains(i))
  }

  /// Node ids in dispatch order.
  pub fn order(&self) -> &[String] {
    &self.order
  }

  /// Position of a node in [`Graph::order`].
  pub fn rank(&self, node_id: &str) -> usize {
    self.rank.get(node_id).copied().unwrap_or(usize::MAX)
  }

  pub fn triggers(&self) -> &[String] {
    &self.triggers
  }

  pub fn loop_body(&self, loop_id: &str) -> Option<&LoopBody> {
    self.loops.get(loop_id)
  }

  pub fn loops(&self) -> impl Iterator<Item = &LoopBody> {
    self.loops.values()
  }

  /// The loop whose body contains `node_id`.
  pub fn enclosing_loop(&self, node_id: &str) -> Option<&str> {
    self.enclosing.get(node_id).map(String::as_str)
  }

  pub fn is_back_edge(&self, edge: usize) -> bool {
    self.back_edges.contains(&edge)
  }
}
