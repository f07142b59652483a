//! Providers injected into a run.
//!
//! Capabilities never own credentials or clients. A run carries a
//! [`Providers`] bundle and each invocation borrows from it.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiRequest {
  pub model: String,
  pub prompt: String,
  #[serde(default)]
  pub tools: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
  pub name: String,
  #[serde(default)]
  pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AiResponse {
  pub text: String,
  #[serde(default)]
  pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
  /// Temporary failure (rate limit, network). Safe to retry.
  #[error("transient provider failure: {message}")]
  Transient { message: String },

  /// The provider refused the request (auth, invalid model, bad input).
  #[error("provider rejected request: {message}")]
  Rejected { message: String },
}

/// A model provider used by `ai-call` nodes.
#[async_trait]
pub trait AiProvider: Send + Sync {
  async fn invoke(&self, request: AiRequest) -> Result<AiResponse, ProviderError>;
}

/// Providers available to a run.
#[derive(Clone, Default)]
pub struct Providers {
  ai: Option<Arc<dyn AiProvider>>,
}

impl Providers {
  pub fn with_ai(mut self, provider: Arc<dyn AiProvider>) -> Self {
    self.ai = Some(provider);
    self
  }

  pub fn ai(&self) -> Option<&Arc<dyn AiProvider>> {
    self.ai.as_ref()
  }

  /// Fill unset providers from `fallback`.
  pub fn or(self, fallback: &Providers) -> Self {
    Self {
      ai: self.ai.or_else(|| fallback.ai.clone()),
    }
  }
}

impl fmt::Debug for Providers {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Providers")
      .field("ai", &self.ai.is_some())
      .finish()
  }
}
