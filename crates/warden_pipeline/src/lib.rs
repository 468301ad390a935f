//! Pipeline runtime (C4/C5/C7/C8).
//!
//! Wires the static handler registry (`warden_registry`) and the durable
//! state store (`warden_state`) into the dispatch pattern spec.md §4.4
//! describes: `chain(scan_task -> output_task -> group(notification_tasks))`
//! per `(scan, output)` pair in a matched job.

pub mod broker;
pub mod dispatch;
pub mod task_wrapper;

pub use broker::{BoxFuture, TaskBroker, TokioBroker};
pub use dispatch::Pipeline;

use thiserror::Error;
use warden_config::WorkflowConfigError;
use warden_protocol::WardenError;
use warden_registry::RegistryError;
use warden_state::StateError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Handler(#[from] WardenError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] WorkflowConfigError),

    #[error("malformed task payload: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("pipeline internal error: {0}")]
    Internal(String),
}
