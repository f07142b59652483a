use async_trait::async_trait;

use super::config_object;
use crate::capability::{Capability, Category, Invocation, Outcome};
use crate::error::CapabilityError;

/// Input name under which the scheduler hands a trigger its payload.
pub const PAYLOAD_INPUT: &str = "payload";

/// Trigger kinds. They all forward the run payload on `out`; they differ in
/// what config they accept.
#[derive(Debug, Clone, Copy)]
pub struct PayloadTrigger {
  scheduled: bool,
}

impl PayloadTrigger {
  pub fn manual() -> Self {
    Self { scheduled: false }
  }

  pub fn event() -> Self {
    Self { scheduled: false }
  }

  pub fn schedule() -> Self {
    Self { scheduled: true }
  }
}

#[async_trait]
impl Capability for PayloadTrigger {
  fn category(&self) -> Category {
    Category::Trigger
  }

  fn check_config(&self, config: &serde_json::Value) -> Result<(), String> {
    if !self.scheduled {
      return Ok(());
    }
    match config_object(config)?.get("interval_ms") {
      Some(v) if v.as_u64().is_some_and(|ms| ms > 0) => Ok(()),
      Some(_) => Err("'interval_ms' must be a positive integer".to_string()),
      None => Err("missing required field 'interval_ms'".to_string()),
    }
  }

  async fn invoke(&self, invocation: Invocation) -> Result<Outcome, CapabilityError> {
    let payload = invocation
      .inputs
      .get(PAYLOAD_INPUT)
      .cloned()
      .unwrap_or(serde_json::Value::Null);
    Ok(Outcome::data(payload))
  }
}
