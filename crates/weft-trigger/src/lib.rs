//! Trigger adapters for Weft.
//!
//! Adapters turn outside stimuli into runs on a [`weft_runtime::Engine`]:
//!
//! - [`ManualTrigger`] starts a run on demand.
//! - [`WorkflowRunner`] drains a channel of [`TriggerEvent`]s, one run per event.
//! - [`ScheduleTrigger`] starts a run every `interval_ms` of a `schedule` node.

mod error;
mod event;
mod manual;
mod runner;
mod schedule;

pub use error::TriggerError;
pub use event::TriggerEvent;
pub use manual::ManualTrigger;
pub use runner::WorkflowRunner;
pub use schedule::ScheduleTrigger;
