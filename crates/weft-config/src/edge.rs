use serde::{Deserialize, Serialize};

/// Output port used when an edge does not name one.
pub const DEFAULT_OUTPUT: &str = "out";

fn default_output() -> String {
  DEFAULT_OUTPUT.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDef {
  pub from: String,
  #[serde(default = "default_output")]
  pub from_output: String,
  pub to: String,
  /// Input name on the target. Defaults to the source node id.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub to_input: Option<String>,
  /// Route label. Only live when the source's routing decision matches.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub condition: Option<String>,
}

impl EdgeDef {
  /// Unconditional edge between the default ports of two nodes.
  pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
    Self {
      from: from.into(),
      from_output: default_output(),
      to: to.into(),
      to_input: None,
      condition: None,
    }
  }

  /// Same edge, only followed when the source routes to `label`.
  pub fn when(mut self, label: impl Into<String>) -> Self {
    self.condition = Some(label.into());
    self
  }

  pub fn from_output(mut self, port: impl Into<String>) -> Self {
    self.from_output = port.into();
    self
  }

  pub fn to_input(mut self, input: impl Into<String>) -> Self {
    self.to_input = Some(input.into());
    self
  }
}
