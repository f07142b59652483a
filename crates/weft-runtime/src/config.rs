use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use weft_workflow::RetryPolicy;

use crate::events::{ExecutionNotifier, NoopNotifier};

/// Engine-wide settings.
#[derive(Clone)]
pub struct EngineConfig {
  /// Policy for nodes whose workflow and node definitions set no retry fields.
  pub default_retry: RetryPolicy,
  /// Upper bound on a run when the workflow carries no `timeout_ms`.
  pub run_timeout: Option<Duration>,
  pub notifier: Arc<dyn ExecutionNotifier>,
}

impl EngineConfig {
  pub fn with_default_retry(mut self, policy: RetryPolicy) -> Self {
    self.default_retry = policy;
    self
  }

  pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
    self.run_timeout = Some(timeout);
    self
  }

  pub fn with_notifier(mut self, notifier: impl ExecutionNotifier + 'static) -> Self {
    self.notifier = Arc::new(notifier);
    self
  }
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      default_retry: RetryPolicy::default(),
      run_timeout: None,
      notifier: Arc::new(NoopNotifier),
    }
  }
}

impl fmt::Debug for EngineConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EngineConfig")
      .field("default_retry", &self.default_retry)
      .field("run_timeout", &self.run_timeout)
      .finish_non_exhaustive()
  }
}
