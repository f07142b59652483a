use serde::{Deserialize, Serialize};
use weft_capability::Category;
use weft_config::{JoinStrategy, RetryPolicyDef};

/// A validated node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
  pub node_id: String,
  pub kind: String,
  /// Category of the capability the node was validated against.
  pub category: Category,
  pub config: serde_json::Value,
  pub join: JoinStrategy,
  pub non_blocking: bool,
  /// Node settings overlaid on the workflow settings. Engine defaults fill
  /// whatever is still unset.
  pub retry: RetryPolicyDef,
  /// Set for loop nodes only.
  pub iteration_cap: Option<u32>,
}

impl Node {
  pub fn is_trigger(&self) -> bool {
    self.category == Category::Trigger
  }

  pub fn is_logic(&self) -> bool {
    self.category.is_logic()
  }

  pub fn is_loop(&self) -> bool {
    self.category.is_loop()
  }
}

/// A validated edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
  pub from: String,
  pub from_output: String,
  pub to: String,
  /// Input name on the target node.
  pub to_input: String,
  /// Route label of the source logic node this edge follows.
  pub condition: Option<String>,
}

impl Edge {
  pub fn is_conditional(&self) -> bool {
    self.condition.is_some()
  }

  /// Run variable this edge reads from.
  pub fn variable(&self) -> String {
    format!("{}.{}", self.from, self.from_output)
  }
}
