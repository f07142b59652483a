use serde::{Deserialize, Serialize};

/// How a node with several incoming edges decides it is ready.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStrategy {
  /// Every incoming edge must be live. A single dead edge skips the node.
  #[default]
  All,
  /// The first live edge makes the node ready; later arrivals are ignored.
  Any,
}
