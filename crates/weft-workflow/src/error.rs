use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
  #[error("failed to parse workflow definition: {0}")]
  Parse(#[from] serde_json::Error),

  #[error("workflow has no nodes")]
  Empty,

  #[error("duplicate node id: {node_id}")]
  DuplicateNodeId { node_id: String },

  #[error("edge references unknown node: from={from}, to={to}")]
  InvalidEdge { from: String, to: String },

  #[error("node '{node_id}' has unknown kind '{kind}'")]
  UnknownKind { node_id: String, kind: String },

  #[error("node '{node_id}' ({kind}) has invalid config: {message}")]
  InvalidConfig {
    node_id: String,
    kind: String,
    message: String,
  },

  #[error("trigger node '{node_id}' has incoming edges")]
  TriggerHasIncoming { node_id: String },

  #[error("workflow has no trigger node")]
  NoTrigger,

  #[error("node '{node_id}' is not reachable from any trigger")]
  OrphanNode { node_id: String },

  #[error("cycle detected through nodes: {}", .nodes.join(", "))]
  CycleDetected { nodes: Vec<String> },

  #[error("cycle through nodes {} does not pass through a loop node", .nodes.join(", "))]
  UnboundedCycle { nodes: Vec<String> },

  #[error("cycle through nodes {} contains more than one loop node", .nodes.join(", "))]
  NestedLoop { nodes: Vec<String> },

  #[error("loop node '{node_id}' has no iteration cap")]
  MissingIterationCap { node_id: String },

  #[error("conditional edge {from} -> {to} must start at a logic node")]
  ConditionalEdgeFromNonLogic { from: String, to: String },

  #[error("edge {from} -> {to} crosses the body boundary of loop '{loop_id}'")]
  LoopBodyEscapes {
    loop_id: String,
    from: String,
    to: String,
  },

  #[error("edge {from} -> {to} enters the body of loop '{from}' without a route label")]
  UnconditionalLoopEntry { from: String, to: String },

  #[error("invalid retry policy on '{scope}': {message}")]
  InvalidRetryPolicy { scope: String, message: String },
}
