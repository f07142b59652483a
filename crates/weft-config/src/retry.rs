use serde::{Deserialize, Serialize};

/// Retry and timeout settings as written in a definition.
///
/// Every field is optional so that a node can override only part of the
/// workflow-level policy. Unset fields fall through to the workflow level
/// and then to the engine defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicyDef {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_attempts: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub backoff_base_ms: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub backoff_factor: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub backoff_cap_ms: Option<u64>,
  /// Bound on a single attempt.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub attempt_timeout_ms: Option<u64>,
  /// Bound on all attempts plus the delays between them.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub deadline_ms: Option<u64>,
}

impl RetryPolicyDef {
  /// Overlay `self` on top of `base`: fields set here win.
  pub fn overlay(&self, base: &RetryPolicyDef) -> RetryPolicyDef {
    RetryPolicyDef {
      max_attempts: self.max_attempts.or(base.max_attempts),
      backoff_base_ms: self.backoff_base_ms.or(base.backoff_base_ms),
      backoff_factor: self.backoff_factor.or(base.backoff_factor),
      backoff_cap_ms: self.backoff_cap_ms.or(base.backoff_cap_ms),
      attempt_timeout_ms: self.attempt_timeout_ms.or(base.attempt_timeout_ms),
      deadline_ms: self.deadline_ms.or(base.deadline_ms),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_overlay_prefers_node_fields() {
    let workflow = RetryPolicyDef {
      max_attempts: Some(5),
      backoff_base_ms: Some(200),
      ..Default::default()
    };
    let node = RetryPolicyDef {
      max_attempts: Some(2),
      deadline_ms: Some(1_000),
      ..Default::default()
    };

    let merged = node.overlay(&workflow);
    assert_eq!(merged.max_attempts, Some(2));
    assert_eq!(merged.backoff_base_ms, Some(200));
    assert_eq!(merged.deadline_ms, Some(1_000));
    assert_eq!(merged.backoff_cap_ms, None);
  }
}
