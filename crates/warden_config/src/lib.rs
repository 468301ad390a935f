//! Workflow configuration: component/job model, YAML loading, and the
//! dotted-path rule matcher that decides which job applies to an inbound
//! event (C1).

pub mod loader;
pub mod matcher;
pub mod model;

pub use loader::WorkflowConfig;
pub use model::{Component, WorkflowJob};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowConfigError {
    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("unsupported config version: {0}")]
    UnsupportedVersion(String),

    #[error("config missing env var {var_name} for component {component}")]
    MissingEnv { component: String, var_name: String },

    #[error("invalid config: {0:?}")]
    Invalid(Vec<String>),

    #[error("could not resolve jsonpath: {0}")]
    JsonPath(String),

    #[error("invalid rule regex at {0}: {1}")]
    InvalidRule(String, String),
}
