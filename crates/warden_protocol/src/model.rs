//! Artifact payloads carried between pipeline stages.
//!
//! The original implementation tags every payload crossing a task-broker
//! boundary with a `__pydantic_path_model__` string so the next worker can
//! dynamically import the right class to deserialize into. Rust has no
//! equivalent need: a `Tagged<T>` envelope here just carries a `kind` string
//! for observability/logging and routes structurally through the
//! `ScanHandler`/`OutputHandler`/`NotificationHandler` trait boundaries
//! instead of dynamic class lookup.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::status::ScanStatus;

/// A type that can be carried across a `warden_pipeline::broker::TaskBroker`
/// link. `KIND` is a short, stable discriminator used for log correlation.
pub trait Taggable {
    const KIND: &'static str;
}

/// Envelope wrapping a payload with its `Taggable::KIND`, so a task can log
/// what it's handling without downcasting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tagged<T> {
    pub kind: String,
    pub payload: T,
}

impl<T: Taggable> Tagged<T> {
    pub fn new(payload: T) -> Self {
        Self {
            kind: T::KIND.to_string(),
            payload,
        }
    }
}

/// Normalized webhook input, built from a source-control event before any
/// handler runs. This is what seeds a `Check` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputEvent {
    pub prefix: String,
    pub event_kind: String,
    pub project_ssh_url: String,
    pub project_name: String,
    pub commit_id: String,
    pub branch: String,
    pub source_url: String,
    pub raw_payload: Value,
}

impl Taggable for InputEvent {
    const KIND: &'static str = "input_event";
}

/// Result of running one scan handler. Feeds `warden_state::scan::complete_scan`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub scan_name: String,
    pub status: ScanStatus,
    pub response: Value,
    /// Test ids this scan produced in its upstream vulnerability-management
    /// system, keyed by output name, so an output handler knows what to poll.
    pub outputs_test_id: HashMap<String, String>,
}

impl Taggable for ScanResult {
    const KIND: &'static str = "scan_result";
}

/// Result of running one output handler against a scan's `outputs_test_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputResult {
    pub output_name: String,
    pub scan_name: String,
    /// `true` iff this output judged the scan's findings acceptable.
    pub passed: bool,
    /// Identifier this output's vendor assigned the uploaded scan ("test id"
    /// in DefectDojo's vocabulary), merged into the owning `Scan`'s
    /// `outputs_test_id` once the pipeline persists this result.
    pub external_test_id: String,
    pub details: Value,
    pub checked_at: DateTime<Utc>,
}

impl Taggable for OutputResult {
    const KIND: &'static str = "output_result";
}

/// Request to send one notification on one channel for one scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub scan_name: String,
    pub channel: String,
    pub payload: Value,
}

impl Taggable for NotificationRequest {
    const KIND: &'static str = "notification_request";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tagged_envelope_round_trips() {
        let result = ScanResult {
            scan_name: "gitleaks".into(),
            status: ScanStatus::Done,
            response: json!({"findings": 0}),
            outputs_test_id: HashMap::from([("defectdojo".into(), "42".into())]),
        };
        let tagged = Tagged::new(result);
        assert_eq!(tagged.kind, "scan_result");

        let json = serde_json::to_string(&tagged).unwrap();
        let back: Tagged<ScanResult> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, "scan_result");
        assert_eq!(back.payload.scan_name, "gitleaks");
    }
}
