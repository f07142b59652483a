use serde::{Deserialize, Serialize};

use crate::edge::EdgeDef;
use crate::node::NodeDef;
use crate::retry::RetryPolicyDef;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDef {
  pub workflow_id: String,
  pub name: String,
  /// Whole-run bound. Exceeding it ends the run as timed out.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
  /// Applies to every node that does not override it.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub retry: Option<RetryPolicyDef>,
  pub nodes: Vec<NodeDef>,
  #[serde(default)]
  pub edges: Vec<EdgeDef>,
}

impl WorkflowDef {
  pub fn from_json(source: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(source)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{DEFAULT_OUTPUT, JoinStrategy};

  #[test]
  fn test_parse_with_defaults() {
    let def = WorkflowDef::from_json(
      r#"{
        "workflow_id": "wf-1",
        "name": "Branching",
        "nodes": [
          { "node_id": "start", "kind": "manual" },
          { "node_id": "route", "kind": "branch", "config": { "condition": "x > 0" } },
          { "node_id": "merge", "kind": "merge", "join": "any", "non_blocking": true }
        ],
        "edges": [
          { "from": "start", "to": "route" },
          { "from": "route", "to": "merge", "condition": "true", "to_input": "value" }
        ]
      }"#,
    )
    .unwrap();

    assert_eq!(def.nodes.len(), 3);
    assert_eq!(def.nodes[0].join, JoinStrategy::All);
    assert!(def.nodes[0].config.is_object());
    assert_eq!(def.nodes[2].join, JoinStrategy::Any);
    assert!(def.nodes[2].non_blocking);
    assert_eq!(def.edges[0].from_output, DEFAULT_OUTPUT);
    assert_eq!(def.edges[0].to_input, None);
    assert_eq!(def.edges[1].condition.as_deref(), Some("true"));
    assert_eq!(def.edges[1].to_input.as_deref(), Some("value"));
    assert!(def.retry.is_none());
  }

  #[test]
  fn test_builders() {
    let edge = EdgeDef::new("a", "b").when("pos").to_input("left");
    assert_eq!(edge.condition.as_deref(), Some("pos"));
    assert_eq!(edge.to_input.as_deref(), Some("left"));

    let node = NodeDef::new("n", "log").non_blocking();
    assert!(node.non_blocking);
  }
}
