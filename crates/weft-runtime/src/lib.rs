//! Weft workflow runtime.
//!
//! Executes validated [`weft_workflow::Workflow`]s against a capability
//! registry and a run store.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Engine                            │
//! │  - start_run / get_run / cancel_run / list_runs          │
//! │  - one task per run, handles for active runs             │
//! └──────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                      Scheduler                           │
//! │  - waves of READY nodes, edge liveness, joins, loops     │
//! │  - abort on blocking failure, run timeout                │
//! └──────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                     Supervisor                           │
//! │  - attempts, backoff, attempt and node deadlines         │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Every transition is recorded through the run's [`RunLedger`], which
//! forwards log entries to the store and the configured notifier.
//!
//! # Usage
//!
//! ```ignore
//! let registry = CapabilityRegistry::with_builtins();
//! let workflow = Workflow::from_json(&source, &registry)?;
//! let engine = Engine::new(registry, Arc::new(MemoryStore::new()), EngineConfig::default());
//!
//! let handle = engine.start_run(workflow, json!({"x": 1}), "user-1").await?;
//! let run = handle.wait().await;
//! ```

mod config;
mod engine;
mod error;
mod events;
mod ledger;
mod scheduler;
mod supervisor;
mod usage;

pub use config::EngineConfig;
pub use engine::{Engine, RunHandle, RunRequest};
pub use error::EngineError;
pub use events::{
  BoundedChannelNotifier, ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier,
};
pub use ledger::RunLedger;
pub use supervisor::{Supervised, Supervisor};
pub use usage::{EXECUTION_RESOURCE, UsageError, UsageRecord, UsageTracker};
