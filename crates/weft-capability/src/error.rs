//! Capability and registry errors.

use thiserror::Error;

/// Failure of a single capability invocation.
///
/// The capability classifies its own failures: retryable ones are transient
/// (network, timeouts, rate limits) and eligible for backoff, terminal ones
/// (bad config, rejected credentials, invalid data) fail the node at once.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
  #[error("{message}")]
  Retryable { message: String },

  #[error("{message}")]
  Terminal { message: String },
}

impl CapabilityError {
  pub fn retryable(message: impl Into<String>) -> Self {
    Self::Retryable {
      message: message.into(),
    }
  }

  pub fn terminal(message: impl Into<String>) -> Self {
    Self::Terminal {
      message: message.into(),
    }
  }

  pub fn is_retryable(&self) -> bool {
    matches!(self, Self::Retryable { .. })
  }

  pub fn message(&self) -> &str {
    match self {
      Self::Retryable { message } | Self::Terminal { message } => message,
    }
  }
}

/// Errors from registering or resolving capabilities.
#[derive(Debug, Error)]
pub enum RegistryError {
  #[error("no capability registered for kind '{kind}'")]
  NotFound { kind: String },

  #[error("capability kind '{kind}' is already registered")]
  DuplicateKind { kind: String },

  #[error("invalid config for kind '{kind}': {message}")]
  InvalidConfig { kind: String, message: String },
}
