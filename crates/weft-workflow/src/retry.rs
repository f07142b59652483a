use std::time::Duration;

use weft_config::RetryPolicyDef;

/// Exponential backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
  pub base: Duration,
  pub factor: f64,
  pub cap: Duration,
}

impl Backoff {
  /// Delay after failed attempt `attempt` (1-based): `min(base * factor^(attempt-1), cap)`.
  pub fn delay(&self, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
    let millis = self.base.as_millis() as f64 * self.factor.powi(exponent);
    let cap = self.cap.as_millis() as f64;
    if !millis.is_finite() || millis >= cap {
      return self.cap;
    }
    Duration::from_millis(millis.round() as u64)
  }
}

/// Fully resolved retry and timeout policy for one node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub backoff: Backoff,
  pub attempt_timeout: Option<Duration>,
  pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 1,
      backoff: Backoff {
        base: Duration::from_millis(100),
        factor: 2.0,
        cap: Duration::from_secs(30),
      },
      attempt_timeout: None,
      deadline: None,
    }
  }
}

impl RetryPolicy {
  /// Resolve a definition, taking unset fields from `fallback`.
  pub fn from_def(def: &RetryPolicyDef, fallback: &RetryPolicy) -> Self {
    let base = def
      .backoff_base_ms
      .map(Duration::from_millis)
      .unwrap_or(fallback.backoff.base);
    let cap = def
      .backoff_cap_ms
      .map(Duration::from_millis)
      .unwrap_or(fallback.backoff.cap)
      .max(base);

    Self {
      max_attempts: def.max_attempts.unwrap_or(fallback.max_attempts).max(1),
      backoff: Backoff {
        base,
        factor: def.backoff_factor.unwrap_or(fallback.backoff.factor),
        cap,
      },
      attempt_timeout: def
        .attempt_timeout_ms
        .map(Duration::from_millis)
        .or(fallback.attempt_timeout),
      deadline: def
        .deadline_ms
        .map(Duration::from_millis)
        .or(fallback.deadline),
    }
  }

  /// Sanity check a definition as written.
  pub fn check(def: &RetryPolicyDef) -> Result<(), String> {
    if def.max_attempts == Some(0) {
      return Err("max_attempts must be at least 1".to_string());
    }
    if let Some(factor) = def.backoff_factor {
      if !factor.is_finite() || factor < 1.0 {
        return Err(format!("backoff_factor must be a finite number >= 1, got {factor}"));
      }
    }
    if let (Some(base), Some(cap)) = (def.backoff_base_ms, def.backoff_cap_ms) {
      if cap < base {
        return Err(format!("backoff_cap_ms ({cap}) is below backoff_base_ms ({base})"));
      }
    }
    if def.attempt_timeout_ms == Some(0) {
      return Err("attempt_timeout_ms must be positive".to_string());
    }
    if def.deadline_ms == Some(0) {
      return Err("deadline_ms must be positive".to_string());
    }
    Ok(())
  }
}
