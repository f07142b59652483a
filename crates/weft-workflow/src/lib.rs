//! Weft Workflow
//!
//! The validated, executable form of a workflow definition.
//!
//! [`Workflow::load`] turns a `weft-config` [`WorkflowDef`](weft_config::WorkflowDef)
//! into a [`Workflow`] or fails with a [`ValidationError`] before any run is
//! created. A loaded workflow is immutable and carries:
//!
//! - nodes in declaration order, each tagged with its capability category
//! - edges with resolved input names
//! - the [`Graph`]: incoming/outgoing edges per node, a deterministic
//!   topological order and the body of every loop node
//! - the per-node retry settings, merged from workflow and node level

mod error;
mod graph;
mod node;
mod retry;
mod workflow;

pub use error::ValidationError;
pub use graph::{Graph, LoopBody};
pub use node::{Edge, Node};
pub use retry::{Backoff, RetryPolicy};
pub use workflow::Workflow;
