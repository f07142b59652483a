use async_trait::async_trait;

use super::{config_object, optional_str, require_str};
use crate::capability::{Capability, Category, Invocation, LogicKind, Outcome};
use crate::error::CapabilityError;
use crate::expr;

/// Two-way branch on a condition.
///
/// Config: `condition` (expression), optional `then`/`else` route labels
/// (default `"true"`/`"false"`). The input passes through on `out`.
#[derive(Debug, Clone, Copy)]
pub struct Branch;

#[async_trait]
impl Capability for Branch {
  fn category(&self) -> Category {
    Category::Logic(LogicKind::Route)
  }

  fn check_config(&self, config: &serde_json::Value) -> Result<(), String> {
    require_str(config, "condition")?;
    optional_str(config, "then")?;
    optional_str(config, "else")?;
    Ok(())
  }

  async fn invoke(&self, invocation: Invocation) -> Result<Outcome, CapabilityError> {
    let condition = invocation
      .config_str("condition")
      .ok_or_else(|| CapabilityError::terminal("missing 'condition'"))?;
    let ctx = expr::context(&invocation);
    let matched = expr::condition(condition, &ctx)?;

    let label = if matched {
      invocation.config_str("then").unwrap_or("true")
    } else {
      invocation.config_str("else").unwrap_or("false")
    };

    Ok(
      Outcome::data(invocation.input())
        .with_output("matched", serde_json::Value::Bool(matched))
        .routed(label),
    )
  }
}

/// Multi-way branch. The first case whose `when` holds picks the route.
///
/// Config: `cases: [{when, route}]`, optional `default`. With no match and no
/// default the node routes nowhere and every conditional edge goes dead.
#[derive(Debug, Clone, Copy)]
pub struct Switch;

#[async_trait]
impl Capability for Switch {
  fn category(&self) -> Category {
    Category::Logic(LogicKind::Route)
  }

  fn check_config(&self, config: &serde_json::Value) -> Result<(), String> {
    let cases = config_object(config)?
      .get("cases")
      .and_then(|c| c.as_array())
      .ok_or("'cases' must be an array")?;
    for (i, case) in cases.iter().enumerate() {
      require_str(case, "when").map_err(|e| format!("cases[{i}]: {e}"))?;
      require_str(case, "route").map_err(|e| format!("cases[{i}]: {e}"))?;
    }
    optional_str(config, "default")?;
    Ok(())
  }

  async fn invoke(&self, invocation: Invocation) -> Result<Outcome, CapabilityError> {
    let ctx = expr::context(&invocation);
    let cases = invocation
      .config
      .get("cases")
      .and_then(|c| c.as_array())
      .cloned()
      .unwrap_or_default();

    let mut route = None;
    for case in &cases {
      let (Some(when), Some(label)) = (
        case.get("when").and_then(|v| v.as_str()),
        case.get("route").and_then(|v| v.as_str()),
      ) else {
        return Err(CapabilityError::terminal("switch case needs 'when' and 'route'"));
      };
      if expr::condition(when, &ctx)? {
        route = Some(label.to_string());
        break;
      }
    }
    let route = route.or_else(|| invocation.config_str("default").map(str::to_string));

    let mut outcome = Outcome::data(invocation.input());
    outcome.route = route;
    Ok(outcome)
  }
}

/// Route label that enters the loop body.
pub const LOOP_BODY: &str = "body";
/// Route label that leaves the loop.
pub const LOOP_DONE: &str = "done";

/// Bounded loop.
///
/// Config: `max_iterations` (required, >= 1) and an optional `while`
/// expression evaluated with `loop.index` set to the current activation.
/// Routes `body` while the condition holds, `done` otherwise. The scheduler
/// enforces the cap.
#[derive(Debug, Clone, Copy)]
pub struct Loop;

#[async_trait]
impl Capability for Loop {
  fn category(&self) -> Category {
    Category::Logic(LogicKind::Loop)
  }

  fn check_config(&self, config: &serde_json::Value) -> Result<(), String> {
    match config_object(config)?.get("max_iterations") {
      Some(v) if v.as_u64().is_some_and(|n| n >= 1 && n <= u32::MAX as u64) => {}
      Some(_) => return Err("'max_iterations' must be an integer >= 1".to_string()),
      None => return Err("missing required field 'max_iterations'".to_string()),
    }
    optional_str(config, "while")?;
    Ok(())
  }

  fn iteration_cap(&self, config: &serde_json::Value) -> Option<u32> {
    config
      .get("max_iterations")
      .and_then(|v| v.as_u64())
      .and_then(|n| u32::try_from(n).ok())
      .filter(|n| *n >= 1)
  }

  async fn invoke(&self, invocation: Invocation) -> Result<Outcome, CapabilityError> {
    let keep_going = match invocation.config_str("while") {
      Some(condition) => expr::condition(condition, &expr::context(&invocation))?,
      None => true,
    };

    let label = if keep_going { LOOP_BODY } else { LOOP_DONE };
    Ok(
      Outcome::data(invocation.input())
        .with_output("index", serde_json::json!(invocation.iteration))
        .routed(label),
    )
  }
}
