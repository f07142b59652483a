use async_trait::async_trait;
use tracing::info;

use super::optional_str;
use crate::capability::{Capability, Category, Invocation, Outcome};
use crate::error::CapabilityError;
use crate::expr;

/// Emit a message through tracing and pass the input through.
///
/// Config: optional `message` template. Without one the input is logged.
#[derive(Debug, Clone, Copy)]
pub struct Log;

#[async_trait]
impl Capability for Log {
  fn category(&self) -> Category {
    Category::Action
  }

  fn check_config(&self, config: &serde_json::Value) -> Result<(), String> {
    optional_str(config, "message").map(|_| ())
  }

  async fn invoke(&self, invocation: Invocation) -> Result<Outcome, CapabilityError> {
    let input = invocation.input();
    let message = match invocation.config_str("message") {
      Some(template) => expr::render(template, &expr::context(&invocation))?,
      None => input.to_string(),
    };

    info!(
      run_id = %invocation.run_id,
      node_id = %invocation.node_id,
      message = %message,
      "workflow_log"
    );

    Ok(
      Outcome::data(input).with_output("message", serde_json::Value::String(message)),
    )
  }
}
