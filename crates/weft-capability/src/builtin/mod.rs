//! Built-in node kinds.
//!
//! | kind       | category  |
//! |------------|-----------|
//! | `manual`   | trigger   |
//! | `event`    | trigger   |
//! | `schedule` | trigger   |
//! | `branch`   | logic     |
//! | `switch`   | logic     |
//! | `loop`     | logic     |
//! | `set`      | transform |
//! | `merge`    | transform |
//! | `log`      | action    |
//! | `ai-call`  | action    |

mod action;
mod ai;
mod logic;
mod transform;
mod trigger;

use std::sync::Arc;

pub use action::Log;
pub use ai::AiCall;
pub use logic::{Branch, LOOP_BODY, LOOP_DONE, Loop, Switch};
pub use transform::{Merge, Set};
pub use trigger::{PAYLOAD_INPUT, PayloadTrigger};

use crate::capability::Capability;

pub(crate) fn all() -> Vec<(&'static str, Arc<dyn Capability>)> {
  vec![
    ("manual", Arc::new(PayloadTrigger::manual())),
    ("event", Arc::new(PayloadTrigger::event())),
    ("schedule", Arc::new(PayloadTrigger::schedule())),
    ("branch", Arc::new(Branch)),
    ("switch", Arc::new(Switch)),
    ("loop", Arc::new(Loop)),
    ("set", Arc::new(Set)),
    ("merge", Arc::new(Merge)),
    ("log", Arc::new(Log)),
    ("ai-call", Arc::new(AiCall)),
  ]
}

fn config_object<'a>(
  config: &'a serde_json::Value,
) -> Result<&'a serde_json::Map<String, serde_json::Value>, String> {
  match config {
    serde_json::Value::Object(map) => Ok(map),
    serde_json::Value::Null => Err("config must be an object, got null".to_string()),
    other => Err(format!("config must be an object, got {other}")),
  }
}

fn require_str<'a>(config: &'a serde_json::Value, field: &str) -> Result<&'a str, String> {
  match config_object(config)?.get(field) {
    Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Ok(s),
    Some(serde_json::Value::String(_)) => Err(format!("'{field}' must not be empty")),
    Some(_) => Err(format!("'{field}' must be a string")),
    None => Err(format!("missing required field '{field}'")),
  }
}

fn optional_str<'a>(config: &'a serde_json::Value, field: &str) -> Result<Option<&'a str>, String> {
  match config_object(config)?.get(field) {
    None | Some(serde_json::Value::Null) => Ok(None),
    Some(serde_json::Value::String(s)) => Ok(Some(s)),
    Some(_) => Err(format!("'{field}' must be a string")),
  }
}
