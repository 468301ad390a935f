//! Verdict engine (C6): derives a `Check`'s externally-visible
//! `SecurityCheckStatus` from its `Scan` rows and the matching job's declared
//! outputs.
//!
//! Grounded on `original_source/app/secbot/inputs/gitlab/__init__.py`'s
//! `GitlabInput.fetch_status` and `app/secbot/inputs/__init__.py`'s
//! `SecbotInput.fetch_status`: count scans against what the job expects,
//! short-circuit on `ERROR`/`IN_PROGRESS`, then delegate to each eligible
//! output's own judgement once every scan has finished.

pub mod engine;

pub use engine::fetch_status;

use thiserror::Error;
use warden_config::WorkflowConfigError;
use warden_protocol::WardenError;
use warden_registry::RegistryError;
use warden_state::StateError;

#[derive(Debug, Error)]
pub enum VerdictError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Config(#[from] WorkflowConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// An output handler's `fetch_status` call failed — a vendor API error,
    /// malformed response, or similar. Surfaced as a hard error rather than
    /// folded into `ERROR`/`FAIL` silently, so an operator can tell "the
    /// pipeline disagrees with this commit" apart from "we couldn't ask".
    #[error("output handler failed while computing verdict: {0}")]
    Handler(#[from] WardenError),

    #[error("no workflow job matches check {0}")]
    NoMatchingJob(String),
}
