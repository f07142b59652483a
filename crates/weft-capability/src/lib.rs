//! Weft Capability
//!
//! A capability is the executable behaviour behind a node `kind`. This crate
//! defines the [`Capability`] trait every node kind implements, the
//! [`CapabilityRegistry`] that maps kinds to capabilities, and the built-in
//! kinds the engine ships with.
//!
//! Capabilities are stateless between invocations. Everything an invocation
//! needs arrives in the [`Invocation`]: the node config, the inputs resolved
//! from upstream edges, a read-only view of the run variables, the providers
//! injected for the run, and a cancellation signal.
//!
//! # Categories
//!
//! - `Trigger`: runs once at run start, turns the payload into outputs.
//! - `Action`: side-effecting work (calls out to a model, logs, ...).
//! - `Transform`: pure data shaping.
//! - `Logic`: returns a routing decision the scheduler uses to pick which
//!   outgoing edges are live. Loop nodes are logic nodes with an iteration cap.

pub mod builtin;
mod capability;
mod error;
pub mod expr;
mod provider;
mod registry;

pub use capability::{
  Capability, Category, DEFAULT_PORT, Invocation, LogicKind, Outcome, Variables,
};
pub use error::{CapabilityError, RegistryError};
pub use provider::{AiProvider, AiRequest, AiResponse, ProviderError, Providers, ToolCall};
pub use registry::CapabilityRegistry;
