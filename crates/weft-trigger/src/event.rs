use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Event emitted by a trigger to start workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
  /// Unique identifier for this trigger event
  pub event_id: String,

  /// Trigger node the run should start from
  pub trigger_id: String,

  /// Payload data from the trigger
  pub payload: serde_json::Value,

  /// Principal recorded as `triggered_by`
  #[serde(default)]
  pub principal: String,

  /// Timestamp when the event was emitted (Unix millis)
  pub timestamp: u64,
}

impl TriggerEvent {
  pub fn new(trigger_id: impl Into<String>, payload: serde_json::Value) -> Self {
    Self {
      event_id: uuid::Uuid::new_v4().to_string(),
      trigger_id: trigger_id.into(),
      payload,
      principal: String::new(),
      timestamp: now_millis(),
    }
  }

  pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
    self.principal = principal.into();
    self
  }
}

pub(crate) fn now_millis() -> u64 {
  u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_trigger_event() {
    let event = TriggerEvent::new("hook", serde_json::json!({"key": "value"})).with_principal("bob");

    assert_eq!(event.trigger_id, "hook");
    assert_eq!(event.principal, "bob");
    assert_eq!(event.payload["key"], "value");
    assert!(event.timestamp > 0);
    assert!(uuid::Uuid::parse_str(&event.event_id).is_ok());
  }

  #[test]
  fn test_principal_defaults_when_missing() {
    let event: TriggerEvent = serde_json::from_value(serde_json::json!({
      "event_id": "evt_123",
      "trigger_id": "trg_456",
      "payload": {},
      "timestamp": 1704067200000u64,
    }))
    .unwrap();

    assert_eq!(event.principal, "");
  }
}
