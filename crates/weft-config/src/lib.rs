//! Weft Config
//!
//! This crate contains the serializable workflow definition types for Weft.
//! These types describe a workflow before it is validated and loaded into an
//! executable graph by `weft-workflow`.
//!
//! Definitions can be loaded from:
//! - JSON files (via the CLI)
//! - Record storage (as JSON blobs)

mod edge;
mod enums;
mod node;
mod retry;
mod workflow;

pub use edge::{DEFAULT_OUTPUT, EdgeDef};
pub use enums::JoinStrategy;
pub use node::NodeDef;
pub use retry::RetryPolicyDef;
pub use workflow::WorkflowDef;
