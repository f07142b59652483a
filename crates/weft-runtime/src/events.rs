//! Execution events and notifiers for observability.
//!
//! Every entry appended to a run log is also handed to the engine's
//! notifier, so consumers can stream progress to a UI, mirror it elsewhere
//! or wait for specific transitions in tests.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;
use weft_store::LogEntry;

/// A run log entry, tagged with the run it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
  pub run_id: String,
  pub workflow_id: String,
  pub entry: LogEntry,
}

/// Trait for receiving execution events.
///
/// The engine calls `notify` for each event - implementations decide
/// what to do with them (persist, broadcast, log, ignore, etc.).
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// A notifier that sends events to an unbounded channel.
///
/// Sending never blocks a run, but the channel grows without limit until
/// the receiver drains it. Use [`BoundedChannelNotifier`] when the consumer
/// may fall behind.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }

  /// Notifier plus the receiving end of its channel.
  pub fn channel() -> (Self, mpsc::UnboundedReceiver<ExecutionEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Self::new(sender), receiver)
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Receiver may have been dropped
    let _ = self.sender.send(event);
  }
}

/// A notifier that sends events to a bounded channel.
///
/// Events that arrive while the channel is full are dropped and logged.
/// The run log remains the complete record.
#[derive(Debug, Clone)]
pub struct BoundedChannelNotifier {
  sender: mpsc::Sender<ExecutionEvent>,
}

impl BoundedChannelNotifier {
  pub fn new(sender: mpsc::Sender<ExecutionEvent>) -> Self {
    Self { sender }
  }

  /// Notifier plus the receiving end of a channel holding at most
  /// `capacity` undelivered events.
  pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ExecutionEvent>) {
    let (sender, receiver) = mpsc::channel(capacity);
    (Self::new(sender), receiver)
  }
}

impl ExecutionNotifier for BoundedChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    match self.sender.try_send(event) {
      Ok(()) | Err(TrySendError::Closed(_)) => {}
      Err(TrySendError::Full(event)) => {
        warn!(
          run_id = %event.run_id,
          seq = event.entry.seq,
          "execution_event_dropped"
        );
      }
    }
  }
}
