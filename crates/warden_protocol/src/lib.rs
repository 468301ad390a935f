//! Shared types for the security-check orchestrator.
//!
//! This crate has no I/O of its own: it defines the artifact payloads that
//! flow between pipeline stages (`model`), the status vocabularies every
//! other crate derives a verdict from (`status`), the content-addressed id
//! scheme used to key a `Check` (`ids`), and the error taxonomy each crate
//! boundary maps into (`error`).

pub mod error;
pub mod ids;
pub mod model;
pub mod status;

pub use error::WardenError;
pub use ids::security_id;
pub use model::{InputEvent, NotificationRequest, OutputResult, ScanResult, Tagged};
pub use status::{ScanStatus, SecurityCheckStatus, Severity};
