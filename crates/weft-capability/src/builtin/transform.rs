use async_trait::async_trait;

use super::config_object;
use crate::capability::{Capability, Category, Invocation, Outcome};
use crate::error::CapabilityError;
use crate::expr;

/// Build an object from templated values.
///
/// Config: `values`, an object whose string leaves are templates (or `=expr`
/// expressions). The resolved object goes on `out`, and each top-level key
/// is also exposed as its own output port.
#[derive(Debug, Clone, Copy)]
pub struct Set;

#[async_trait]
impl Capability for Set {
  fn category(&self) -> Category {
    Category::Transform
  }

  fn check_config(&self, config: &serde_json::Value) -> Result<(), String> {
    match config_object(config)?.get("values") {
      Some(serde_json::Value::Object(_)) => Ok(()),
      Some(_) => Err("'values' must be an object".to_string()),
      None => Err("missing required field 'values'".to_string()),
    }
  }

  async fn invoke(&self, invocation: Invocation) -> Result<Outcome, CapabilityError> {
    let values = invocation
      .config
      .get("values")
      .ok_or_else(|| CapabilityError::terminal("missing 'values'"))?;
    let resolved = expr::resolve(values, &expr::context(&invocation))?;

    let mut outcome = Outcome::default();
    if let serde_json::Value::Object(fields) = &resolved {
      for (key, value) in fields {
        outcome.outputs.insert(key.clone(), value.clone());
      }
    }
    Ok(outcome.with_output(crate::DEFAULT_PORT, resolved))
  }
}

/// Collect every input into one object keyed by input name.
#[derive(Debug, Clone, Copy)]
pub struct Merge;

#[async_trait]
impl Capability for Merge {
  fn category(&self) -> Category {
    Category::Transform
  }

  async fn invoke(&self, invocation: Invocation) -> Result<Outcome, CapabilityError> {
    Ok(Outcome::data(serde_json::Value::Object(invocation.inputs)))
  }
}
