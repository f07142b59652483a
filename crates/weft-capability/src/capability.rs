use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::CapabilityError;
use crate::provider::Providers;

/// Port name used when a capability produces a single value.
pub const DEFAULT_PORT: &str = "out";

/// Run variables: payload seeds plus `node_id.output` entries.
pub type Variables = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicKind {
  /// Picks outgoing edges by route label (branch, switch).
  Route,
  /// Re-enters a body subgraph until it routes `done` or hits its cap.
  Loop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
  Trigger,
  Action,
  Transform,
  Logic(LogicKind),
}

impl Category {
  pub fn is_logic(&self) -> bool {
    matches!(self, Category::Logic(_))
  }

  pub fn is_loop(&self) -> bool {
    matches!(self, Category::Logic(LogicKind::Loop))
  }
}

/// Everything a capability receives for one attempt.
#[derive(Debug, Clone)]
pub struct Invocation {
  pub run_id: String,
  pub node_id: String,
  /// 1-based attempt number within the current retry sequence.
  pub attempt: u32,
  /// 1-based activation count. Only loop nodes and loop bodies see values above 1.
  pub iteration: u32,
  pub config: serde_json::Value,
  /// Values delivered by incoming edges, keyed by target input name.
  pub inputs: serde_json::Map<String, serde_json::Value>,
  pub variables: Arc<Variables>,
  pub providers: Providers,
  /// Cancellation or deadline signal. Honouring it is cooperative.
  pub cancel: CancellationToken,
}

impl Invocation {
  pub fn new(node_id: impl Into<String>, config: serde_json::Value) -> Self {
    Self {
      run_id: String::new(),
      node_id: node_id.into(),
      attempt: 1,
      iteration: 1,
      config,
      inputs: serde_json::Map::new(),
      variables: Arc::new(Variables::new()),
      providers: Providers::default(),
      cancel: CancellationToken::new(),
    }
  }

  pub fn with_input(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
    self.inputs.insert(name.into(), value);
    self
  }

  pub fn with_variables(mut self, variables: Variables) -> Self {
    self.variables = Arc::new(variables);
    self
  }

  pub fn with_iteration(mut self, iteration: u32) -> Self {
    self.iteration = iteration;
    self
  }

  pub fn with_providers(mut self, providers: Providers) -> Self {
    self.providers = providers;
    self
  }

  /// The node's input as a single value.
  ///
  /// A lone input is returned as-is; several inputs are merged into an
  /// object keyed by input name; no inputs yields null.
  pub fn input(&self) -> serde_json::Value {
    match self.inputs.len() {
      0 => serde_json::Value::Null,
      1 => self
        .inputs
        .values()
        .next()
        .cloned()
        .unwrap_or(serde_json::Value::Null),
      _ => serde_json::Value::Object(self.inputs.clone()),
    }
  }

  /// Read a string field from the config.
  pub fn config_str(&self, field: &str) -> Option<&str> {
    self.config.get(field).and_then(|v| v.as_str())
  }
}

/// What a successful invocation produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
  /// Output ports. Stored in the run variables as `node_id.port`.
  pub outputs: serde_json::Map<String, serde_json::Value>,
  /// Routing decision. Only meaningful for logic capabilities.
  pub route: Option<String>,
}

impl Outcome {
  /// Outcome with a single value on the default `out` port.
  pub fn data(value: serde_json::Value) -> Self {
    Self::default().with_output(DEFAULT_PORT, value)
  }

  pub fn with_output(mut self, port: impl Into<String>, value: serde_json::Value) -> Self {
    self.outputs.insert(port.into(), value);
    self
  }

  pub fn routed(mut self, label: impl Into<String>) -> Self {
    self.route = Some(label.into());
    self
  }
}

/// The executable behaviour behind a node kind.
#[async_trait]
pub trait Capability: Send + Sync {
  fn category(&self) -> Category;

  /// Schema check run at load time. Returns a human-readable reason on failure.
  fn check_config(&self, _config: &serde_json::Value) -> Result<(), String> {
    Ok(())
  }

  /// Iteration cap for loop capabilities, read from the node config.
  fn iteration_cap(&self, _config: &serde_json::Value) -> Option<u32> {
    None
  }

  async fn invoke(&self, invocation: Invocation) -> Result<Outcome, CapabilityError>;
}
