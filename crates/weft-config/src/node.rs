use serde::{Deserialize, Serialize};

use crate::enums::JoinStrategy;
use crate::retry::RetryPolicyDef;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
  pub node_id: String,
  /// Capability kind, e.g. `manual`, `branch`, `ai-call`.
  pub kind: String,
  /// Opaque to the engine; checked and read by the capability.
  #[serde(default = "empty_config")]
  pub config: serde_json::Value,
  #[serde(default)]
  pub join: JoinStrategy,
  /// A failure of this node does not fail the run.
  #[serde(default)]
  pub non_blocking: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub retry: Option<RetryPolicyDef>,
  /// Per-attempt bound. Takes precedence over `retry.attempt_timeout_ms`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
}

fn empty_config() -> serde_json::Value {
  serde_json::Value::Object(serde_json::Map::new())
}

impl NodeDef {
  pub fn new(node_id: impl Into<String>, kind: impl Into<String>) -> Self {
    Self {
      node_id: node_id.into(),
      kind: kind.into(),
      config: empty_config(),
      join: JoinStrategy::All,
      non_blocking: false,
      retry: None,
      timeout_ms: None,
    }
  }

  pub fn with_config(mut self, config: serde_json::Value) -> Self {
    self.config = config;
    self
  }

  pub fn with_join(mut self, join: JoinStrategy) -> Self {
    self.join = join;
    self
  }

  pub fn with_retry(mut self, retry: RetryPolicyDef) -> Self {
    self.retry = Some(retry);
    self
  }

  pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
    self.timeout_ms = Some(timeout_ms);
    self
  }

  pub fn non_blocking(mut self) -> Self {
    self.non_blocking = true;
    self
  }
}
