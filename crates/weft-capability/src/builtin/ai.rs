use async_trait::async_trait;
use tracing::debug;

use super::{config_object, require_str};
use crate::capability::{Capability, Category, Invocation, Outcome};
use crate::error::CapabilityError;
use crate::expr;
use crate::provider::{AiRequest, ProviderError};

/// Call the run's AI provider.
///
/// Config: `model`, `prompt` (template), optional `tools` array passed to the
/// provider untouched. Outputs `out`/`text` with the response text and
/// `tool_calls`.
#[derive(Debug, Clone, Copy)]
pub struct AiCall;

#[async_trait]
impl Capability for AiCall {
  fn category(&self) -> Category {
    Category::Action
  }

  fn check_config(&self, config: &serde_json::Value) -> Result<(), String> {
    require_str(config, "model")?;
    require_str(config, "prompt")?;
    match config_object(config)?.get("tools") {
      None | Some(serde_json::Value::Array(_)) => Ok(()),
      Some(_) => Err("'tools' must be an array".to_string()),
    }
  }

  async fn invoke(&self, invocation: Invocation) -> Result<Outcome, CapabilityError> {
    let provider = invocation
      .providers
      .ai()
      .cloned()
      .ok_or_else(|| CapabilityError::terminal("no AI provider configured for this run"))?;

    let model = invocation
      .config_str("model")
      .ok_or_else(|| CapabilityError::terminal("missing 'model'"))?
      .to_string();
    let template = invocation
      .config_str("prompt")
      .ok_or_else(|| CapabilityError::terminal("missing 'prompt'"))?;
    let prompt = expr::render(template, &expr::context(&invocation))?;
    let tools = invocation
      .config
      .get("tools")
      .and_then(|t| t.as_array())
      .cloned()
      .unwrap_or_default();

    debug!(node_id = %invocation.node_id, model = %model, "ai_call_started");

    let request = AiRequest {
      model,
      prompt,
      tools,
    };
    let response = tokio::select! {
      result = provider.invoke(request) => result,
      _ = invocation.cancel.cancelled() => {
        return Err(CapabilityError::terminal("ai call cancelled"));
      }
    };

    let response = response.map_err(|e| match e {
      ProviderError::Transient { message } => CapabilityError::retryable(message),
      ProviderError::Rejected { message } => CapabilityError::terminal(message),
    })?;

    let tool_calls = serde_json::to_value(&response.tool_calls)
      .map_err(|e| CapabilityError::terminal(format!("failed to encode tool calls: {e}")))?;
    let text = serde_json::Value::String(response.text);

    Ok(
      Outcome::data(text.clone())
        .with_output("text", text)
        .with_output("tool_calls", tool_calls),
    )
  }
}
