//! Retry and timeout supervision of a single node.

use std::future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use weft_capability::{Capability, CapabilityError, Invocation, Outcome};
use weft_store::{ErrorKind, LogEvent, NodeError, NodeStatus};
use weft_workflow::RetryPolicy;

use crate::ledger::RunLedger;

/// Final result of a supervised node.
#[derive(Debug, Clone, PartialEq)]
pub enum Supervised {
  Succeeded { outcome: Outcome, attempts: u32 },
  Failed { error: NodeError, status: NodeStatus },
}

impl Supervised {
  pub fn is_failure(&self) -> bool {
    matches!(self, Supervised::Failed { .. })
  }

  pub(crate) fn failed(kind: ErrorKind, message: impl Into<String>, attempt: u32) -> Self {
    Supervised::Failed {
      error: NodeError::new(kind, message, attempt),
      status: NodeStatus::Failed,
    }
  }
}

enum AttemptResult {
  Finished(Result<Outcome, CapabilityError>),
  AttemptTimedOut(Duration),
  DeadlineElapsed,
  Cancelled,
}

/// Runs a capability with bounded retries, exponential backoff and deadlines.
///
/// Attempt 1 runs at once. A retryable failure (or an attempt timeout) waits
/// `backoff.delay(attempt)` and tries again until `max_attempts` is spent.
/// Terminal failures surface immediately. Once the total deadline passes the
/// node is timed out no matter how many attempts remain.
///
/// Cancellation is cooperative: the token is checked between attempts and
/// handed to the capability. An invocation that ignores it is left running
/// in the background while the supervisor reports the cancellation.
pub struct Supervisor {
  policy: RetryPolicy,
  cancel: CancellationToken,
  ledger: Option<Arc<RunLedger>>,
}

impl Supervisor {
  pub fn new(policy: RetryPolicy, cancel: CancellationToken) -> Self {
    Self {
      policy,
      cancel,
      ledger: None,
    }
  }

  /// Record attempts in a run ledger.
  pub fn with_ledger(mut self, ledger: Arc<RunLedger>) -> Self {
    self.ledger = Some(ledger);
    self
  }

  async fn log(&self, node_id: &str, event: LogEvent, detail: serde_json::Value) {
    if let Some(ledger) = &self.ledger {
      ledger.append(Some(node_id), event, detail).await;
    }
  }

  #[instrument(
    name = "supervise",
    skip(self, capability, invocation),
    fields(
      run_id = %invocation.run_id,
      node_id = %invocation.node_id,
      max_attempts = self.policy.max_attempts,
    )
  )]
  pub async fn run(&self, capability: Arc<dyn Capability>, invocation: Invocation) -> Supervised {
    let node_id = invocation.node_id.clone();
    let deadline = self.policy.deadline.map(|d| Instant::now() + d);
    let mut attempt = 0;

    loop {
      attempt += 1;

      if self.cancel.is_cancelled() {
        return Supervised::failed(ErrorKind::CancellationRequested, "cancelled", attempt - 1);
      }

      if let Some(ledger) = &self.ledger {
        ledger.attempt_started(&node_id, attempt).await;
      }
      debug!(node_id = %node_id, attempt, "attempt_started");

      let result = self
        .attempt(capability.clone(), &invocation, attempt, deadline)
        .await;

      let (kind, message) = match result {
        AttemptResult::Finished(Ok(outcome)) => {
          self
            .log(
              &node_id,
              LogEvent::AttemptSucceeded,
              json!({ "attempt": attempt }),
            )
            .await;
          return Supervised::Succeeded {
            outcome,
            attempts: attempt,
          };
        }
        AttemptResult::Finished(Err(CapabilityError::Terminal { message })) => {
          self
            .attempt_failed(&node_id, attempt, ErrorKind::Terminal, &message)
            .await;
          return Supervised::failed(ErrorKind::Terminal, message, attempt);
        }
        AttemptResult::Finished(Err(CapabilityError::Retryable { message })) => {
          (ErrorKind::Retryable, message)
        }
        AttemptResult::AttemptTimedOut(limit) => (
          ErrorKind::DeadlineExceeded,
          format!("attempt exceeded {}ms", limit.as_millis()),
        ),
        AttemptResult::DeadlineElapsed => {
          return self.deadline_exceeded(&node_id, attempt).await;
        }
        AttemptResult::Cancelled => {
          self
            .attempt_failed(
              &node_id,
              attempt,
              ErrorKind::CancellationRequested,
              "cancelled",
            )
            .await;
          return Supervised::failed(ErrorKind::CancellationRequested, "cancelled", attempt);
        }
      };

      self.attempt_failed(&node_id, attempt, kind, &message).await;

      if attempt >= self.policy.max_attempts {
        warn!(node_id = %node_id, attempts = attempt, error = %message, "retries_exhausted");
        return Supervised::failed(kind, message, attempt);
      }

      let delay = self.policy.backoff.delay(attempt);
      self
        .log(
          &node_id,
          LogEvent::RetryScheduled,
          json!({ "attempt": attempt + 1, "delay_ms": delay.as_millis() as u64 }),
        )
        .await;
      info!(
        node_id = %node_id,
        next_attempt = attempt + 1,
        delay_ms = delay.as_millis() as u64,
        "retry_scheduled"
      );

      tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = sleep_until(deadline) => {
          return self.deadline_exceeded(&node_id, attempt).await;
        }
        _ = self.cancel.cancelled() => {
          return Supervised::failed(ErrorKind::CancellationRequested, "cancelled", attempt);
        }
      }
    }
  }

  async fn attempt(
    &self,
    capability: Arc<dyn Capability>,
    invocation: &Invocation,
    attempt: u32,
    deadline: Option<Instant>,
  ) -> AttemptResult {
    let attempt_cancel = self.cancel.child_token();
    let mut invocation = invocation.clone();
    invocation.attempt = attempt;
    invocation.cancel = attempt_cancel.clone();

    // The invocation runs on its own task so a capability that ignores
    // cancellation can finish in the background without holding the run.
    let task = tokio::spawn(async move { capability.invoke(invocation).await });

    let result = tokio::select! {
      biased;
      joined = task => match joined {
        Ok(result) => AttemptResult::Finished(result),
        Err(e) => AttemptResult::Finished(Err(CapabilityError::terminal(format!(
          "capability task failed: {e}"
        )))),
      },
      _ = self.cancel.cancelled() => AttemptResult::Cancelled,
      _ = sleep_until(deadline) => AttemptResult::DeadlineElapsed,
      _ = sleep_for(self.policy.attempt_timeout) => {
        AttemptResult::AttemptTimedOut(self.policy.attempt_timeout.unwrap_or_default())
      }
    };

    attempt_cancel.cancel();
    match result {
      // An error raised in reaction to cancellation is the cancellation
      AttemptResult::Finished(Err(_)) if self.cancel.is_cancelled() => AttemptResult::Cancelled,
      other => other,
    }
  }

  async fn attempt_failed(&self, node_id: &str, attempt: u32, kind: ErrorKind, message: &str) {
    warn!(node_id = %node_id, attempt, kind = ?kind, error = %message, "attempt_failed");
    self
      .log(
        node_id,
        LogEvent::AttemptFailed,
        json!({ "attempt": attempt, "kind": kind, "message": message }),
      )
      .await;
  }

  async fn deadline_exceeded(&self, node_id: &str, attempt: u32) -> Supervised {
    let limit = self.policy.deadline.unwrap_or_default();
    let message = format!("node deadline of {}ms elapsed", limit.as_millis());
    self
      .attempt_failed(node_id, attempt, ErrorKind::DeadlineExceeded, &message)
      .await;
    Supervised::Failed {
      error: NodeError::new(ErrorKind::DeadlineExceeded, message, attempt),
      status: NodeStatus::TimedOut,
    }
  }
}

async fn sleep_for(duration: Option<Duration>) {
  match duration {
    Some(duration) => tokio::time::sleep(duration).await,
    None => future::pending().await,
  }
}

pub(crate) async fn sleep_until(deadline: Option<Instant>) {
  match deadline {
    Some(deadline) => tokio::time::sleep_until(deadline).await,
    None => future::pending().await,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use serde_json::json;
  use std::sync::atomic::{AtomicU32, Ordering};
  use weft_capability::Category;
  use weft_workflow::Backoff;

  struct Scripted {
    calls: AtomicU32,
    /// Fail with a retryable error this many times before succeeding.
    failures: u32,
    terminal: bool,
  }

  #[async_trait]
  impl Capability for Scripted {
    fn category(&self) -> Category {
      Category::Action
    }

    async fn invoke(&self, _invocation: Invocation) -> Result<Outcome, CapabilityError> {
      let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
      if self.terminal {
        return Err(CapabilityError::terminal("bad input"));
      }
      if call <= self.failures {
        return Err(CapabilityError::retryable("flaky"));
      }
      Ok(Outcome::data(json!(call)))
    }
  }

  struct Hangs;

  #[async_trait]
  impl Capability for Hangs {
    fn category(&self) -> Category {
      Category::Action
    }

    async fn invoke(&self, _invocation: Invocation) -> Result<Outcome, CapabilityError> {
      tokio::time::sleep(Duration::from_secs(3600)).await;
      Ok(Outcome::default())
    }
  }

  fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
      max_attempts,
      backoff: Backoff {
        base: Duration::from_millis(10),
        factor: 2.0,
        cap: Duration::from_millis(40),
      },
      attempt_timeout: None,
      deadline: None,
    }
  }

  fn scripted(failures: u32, terminal: bool) -> Arc<Scripted> {
    Arc::new(Scripted {
      calls: AtomicU32::new(0),
      failures,
      terminal,
    })
  }

  #[tokio::test(start_paused = true)]
  async fn test_succeeds_after_retries() {
    let cap = scripted(2, false);
    let supervisor = Supervisor::new(policy(3), CancellationToken::new());
    let result = supervisor
      .run(cap.clone(), Invocation::new("b", json!({})))
      .await;

    assert!(matches!(result, Supervised::Succeeded { attempts: 3, .. }));
    assert_eq!(cap.calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_exhausts_attempts() {
    let cap = scripted(u32::MAX, false);
    let supervisor = Supervisor::new(policy(4), CancellationToken::new());
    let result = supervisor
      .run(cap.clone(), Invocation::new("b", json!({})))
      .await;

    match result {
      Supervised::Failed { error, status } => {
        assert_eq!(error.kind, ErrorKind::Retryable);
        assert_eq!(error.attempt, 4);
        assert_eq!(status, NodeStatus::Failed);
      }
      other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(cap.calls.load(Ordering::SeqCst), 4);
  }

  #[tokio::test(start_paused = true)]
  async fn test_terminal_error_is_not_retried() {
    let cap = scripted(0, true);
    let supervisor = Supervisor::new(policy(5), CancellationToken::new());
    let result = supervisor
      .run(cap.clone(), Invocation::new("b", json!({})))
      .await;

    assert!(matches!(
      result,
      Supervised::Failed { ref error, .. } if error.kind == ErrorKind::Terminal
    ));
    assert_eq!(cap.calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_attempt_timeout_is_retried_then_fails() {
    let mut policy = policy(2);
    policy.attempt_timeout = Some(Duration::from_millis(50));
    let supervisor = Supervisor::new(policy, CancellationToken::new());
    let result = supervisor
      .run(Arc::new(Hangs), Invocation::new("slow", json!({})))
      .await;

    match result {
      Supervised::Failed { error, status } => {
        assert_eq!(error.kind, ErrorKind::DeadlineExceeded);
        assert_eq!(error.attempt, 2);
        assert_eq!(status, NodeStatus::Failed);
      }
      other => panic!("expected failure, got {other:?}"),
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_total_deadline_times_out_node() {
    let mut policy = policy(100);
    policy.deadline = Some(Duration::from_millis(100));
    let supervisor = Supervisor::new(policy, CancellationToken::new());
    let result = supervisor
      .run(scripted(u32::MAX, false), Invocation::new("b", json!({})))
      .await;

    match result {
      Supervised::Failed { error, status } => {
        assert_eq!(error.kind, ErrorKind::DeadlineExceeded);
        assert_eq!(status, NodeStatus::TimedOut);
        assert!(error.attempt < 100);
      }
      other => panic!("expected timeout, got {other:?}"),
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_cancel_before_first_attempt() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let cap = scripted(0, false);
    let result = Supervisor::new(policy(3), cancel)
      .run(cap.clone(), Invocation::new("b", json!({})))
      .await;

    assert!(matches!(
      result,
      Supervised::Failed { ref error, .. } if error.kind == ErrorKind::CancellationRequested
    ));
    assert_eq!(cap.calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_cancel_during_hanging_attempt() {
    let cancel = CancellationToken::new();
    let supervisor = Supervisor::new(policy(3), cancel.clone());

    let trigger = cancel.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(20)).await;
      trigger.cancel();
    });

    let result = supervisor
      .run(Arc::new(Hangs), Invocation::new("slow", json!({})))
      .await;
    assert!(matches!(
      result,
      Supervised::Failed { ref error, .. } if error.kind == ErrorKind::CancellationRequested
    ));
  }
}
