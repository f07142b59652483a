use weft_runtime::EngineError;

/// Error type for trigger operations.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
  #[error("node '{node_id}' is not a trigger of workflow '{workflow_id}'")]
  NotATrigger {
    node_id: String,
    workflow_id: String,
  },

  #[error("invalid schedule on node '{node_id}': {message}")]
  InvalidSchedule { node_id: String, message: String },

  #[error("workflow runner channel closed")]
  ChannelClosed,

  #[error(transparent)]
  Engine(#[from] EngineError),
}
