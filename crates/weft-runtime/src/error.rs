use thiserror::Error;
use weft_store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
  #[error("run not found: {run_id}")]
  RunNotFound { run_id: String },

  #[error("entry node '{node_id}' is not a trigger of workflow '{workflow_id}'")]
  InvalidEntry {
    node_id: String,
    workflow_id: String,
  },

  #[error("store error: {0}")]
  Store(#[from] StoreError),
}
