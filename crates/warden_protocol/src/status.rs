//! Status vocabularies.
//!
//! `ScanStatus` is the internal (technical) lifecycle of a single scan task.
//! `SecurityCheckStatus` is the externally-visible verdict derived from the
//! full set of scans and outputs belonging to a `Check` (see `warden_verdict`).

use serde::{Deserialize, Serialize};

/// Internal scan lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    New,
    InProgress,
    /// We decided to skip this scan for some reason (e.g. no matching file paths).
    Skip,
    /// An exception happened while running the scan.
    Error,
    /// All data has been obtained.
    Done,
}

impl ScanStatus {
    /// A scan may only move into `InProgress` from `New` or `Error` (a retry).
    /// Every other source state is a programming error: attempting to claim a
    /// scan that is already running, skipped, or done.
    pub fn can_start(self) -> bool {
        matches!(self, ScanStatus::New | ScanStatus::Error)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ScanStatus::Skip | ScanStatus::Error | ScanStatus::Done)
    }
}

/// Externally-visible security check verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityCheckStatus {
    NotStarted,
    InProgress,
    /// An exception has happened somewhere in the pipeline.
    Error,
    /// All data has been obtained and we have vulnerabilities.
    Fail,
    /// All data has been obtained and we don't have vulnerabilities (or they
    /// are acceptable).
    Success,
}

/// Finding severity, ordered by `priority` from most to least important.
///
/// Mirrors the DefectDojo severity vocabulary this pipeline's reference
/// output handler speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Informational,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Lower is more important: `Critical` is `0`, `Informational` is `4`.
    pub fn priority(self) -> u8 {
        match self {
            Severity::Critical => 0,
            Severity::High => 1,
            Severity::Medium => 2,
            Severity::Low => 3,
            Severity::Informational => 4,
        }
    }
}

impl Ord for Severity {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority().cmp(&other.priority())
    }
}

impl PartialOrd for Severity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_can_start_only_from_new_or_error() {
        assert!(ScanStatus::New.can_start());
        assert!(ScanStatus::Error.can_start());
        assert!(!ScanStatus::InProgress.can_start());
        assert!(!ScanStatus::Done.can_start());
        assert!(!ScanStatus::Skip.can_start());
    }

    #[test]
    fn severity_priority_is_inverted() {
        assert!(Severity::Critical < Severity::High);
        assert!(Severity::High < Severity::Medium);
        assert!(Severity::Medium < Severity::Low);
        assert!(Severity::Low < Severity::Informational);
        assert_eq!(Severity::Critical.priority(), 0);
        assert_eq!(Severity::Informational.priority(), 4);
    }

    #[test]
    fn status_round_trips_through_json() {
        let s = SecurityCheckStatus::InProgress;
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let back: SecurityCheckStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
