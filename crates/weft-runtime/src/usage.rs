//! Usage reporting for billing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use weft_store::RunStatus;

pub const EXECUTION_RESOURCE: &str = "execution";

/// One billable unit, reported after a run reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
  pub user_id: String,
  pub resource_kind: String,
  pub run_id: String,
  pub status: RunStatus,
}

#[derive(Debug, Error)]
pub enum UsageError {
  #[error("usage tracker unavailable: {message}")]
  Unavailable { message: String },

  #[error("usage record rejected: {message}")]
  Rejected { message: String },
}

/// Receives usage records. Failures are logged and never affect the run.
#[async_trait]
pub trait UsageTracker: Send + Sync {
  async fn record(&self, record: UsageRecord) -> Result<(), UsageError>;
}
