//! Expression and template evaluation for node configs.
//!
//! Conditions (`branch.condition`, `switch.cases[].when`, `loop.while`) are
//! minijinja expressions. String values in `set.values` and the `log` and
//! `ai-call` prompts are minijinja templates; a string starting with `=` is
//! evaluated as an expression instead so it can yield non-string values.
//!
//! The evaluation context is built from the invocation:
//!
//! - payload seeds at the top level (`{{ ticket_id }}`)
//! - one object per upstream node holding its ports (`{{ classify.out }}`)
//! - `input` (the node's merged input) and `inputs` (inputs by name)
//! - `loop.index` (1-based activation count)

use minijinja::Environment;
use serde_json::{Map, Value};

use crate::capability::Invocation;
use crate::error::CapabilityError;

/// Build the template context for an invocation.
pub fn context(invocation: &Invocation) -> Value {
  let mut root = Map::new();

  for (key, value) in invocation.variables.iter() {
    if !key.contains('.') {
      root.insert(key.clone(), value.clone());
    }
  }

  // Node outputs shadow payload seeds with the same name
  for (key, value) in invocation.variables.iter() {
    let Some((node, port)) = key.split_once('.') else {
      continue;
    };
    let entry = root
      .entry(node.to_string())
      .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
      *entry = Value::Object(Map::new());
    }
    if let Value::Object(ports) = entry {
      ports.insert(port.to_string(), value.clone());
    }
  }

  root.insert("input".to_string(), invocation.input());
  root.insert(
    "inputs".to_string(),
    Value::Object(invocation.inputs.clone()),
  );
  root.insert(
    "loop".to_string(),
    serde_json::json!({ "index": invocation.iteration }),
  );

  Value::Object(root)
}

fn eval_raw(expression: &str, ctx: &Value) -> Result<minijinja::Value, CapabilityError> {
  let env = Environment::new();
  let compiled = env
    .compile_expression(expression)
    .map_err(|e| CapabilityError::terminal(format!("invalid expression '{expression}': {e}")))?;
  compiled
    .eval(ctx)
    .map_err(|e| CapabilityError::terminal(format!("failed to evaluate '{expression}': {e}")))
}

/// Evaluate an expression to a JSON value.
pub fn evaluate(expression: &str, ctx: &Value) -> Result<Value, CapabilityError> {
  let value = eval_raw(expression, ctx)?;
  serde_json::to_value(&value)
    .map_err(|e| CapabilityError::terminal(format!("expression '{expression}' produced an unrepresentable value: {e}")))
}

/// Evaluate an expression for truthiness.
pub fn condition(expression: &str, ctx: &Value) -> Result<bool, CapabilityError> {
  Ok(eval_raw(expression, ctx)?.is_true())
}

/// Render a template string.
pub fn render(template: &str, ctx: &Value) -> Result<String, CapabilityError> {
  let env = Environment::new();
  env
    .render_str(template, ctx)
    .map_err(|e| CapabilityError::terminal(format!("failed to render template: {e}")))
}

/// Resolve a config value: `=expr` strings are evaluated, other strings are
/// rendered, containers are walked, everything else is returned unchanged.
pub fn resolve(value: &Value, ctx: &Value) -> Result<Value, CapabilityError> {
  match value {
    Value::String(s) => match s.strip_prefix('=') {
      Some(expression) => evaluate(expression.trim(), ctx),
      None => render(s, ctx).map(Value::String),
    },
    Value::Array(items) => items
      .iter()
      .map(|item| resolve(item, ctx))
      .collect::<Result<Vec<_>, _>>()
      .map(Value::Array),
    Value::Object(fields) => {
      let mut resolved = Map::new();
      for (key, item) in fields {
        resolved.insert(key.clone(), resolve(item, ctx)?);
      }
      Ok(Value::Object(resolved))
    }
    other => Ok(other.clone()),
  }
}
