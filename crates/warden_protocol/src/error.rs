//! Shared error taxonomy.
//!
//! Mirrors the original exception hierarchy (`SecbotException` and its
//! subclasses) as a flat `thiserror` enum rather than a class tree, since
//! every crate boundary here wants to pattern-match on the variant, not
//! catch a common base type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WardenError {
    /// We tried to check a scan's status and it came back failed.
    #[error("scan check failed: {0}")]
    ScanCheckFailed(String),

    /// We tried to start a scan that is not in a startable state (already
    /// in progress, already done, or skipped).
    #[error("scan cannot be scanned: {0}")]
    ScanCantBeScanned(String),

    /// A handler decided a scan should be skipped rather than errored, e.g.
    /// because an upstream service was unreachable for a reason that isn't
    /// this check's fault.
    #[error("scan execution skipped: {0}")]
    ScanExecutionSkipped(String),

    /// The inbound webhook request was structurally invalid or unauthorized.
    #[error("input error: {0}")]
    Input(String),

    /// The workflow configuration is invalid; carries every accumulated
    /// validation error rather than failing fast on the first one, mirroring
    /// the original's `SecbotConfigError`.
    #[error("config error: {0:?}")]
    Config(Vec<String>),

    /// The configuration references an environment variable that isn't set.
    #[error("config missing env var: {0}")]
    ConfigMissingEnv(String),

    /// Any other failure in the runtime (database, broker, vendor API).
    #[error("runtime error: {0}")]
    Runtime(#[source] anyhow::Error),
}

impl WardenError {
    /// HTTP status code this error should surface as at the ingress boundary.
    pub fn http_status(&self) -> u16 {
        match self {
            WardenError::Input(_) => 403,
            WardenError::Config(_) | WardenError::ConfigMissingEnv(_) => 500,
            WardenError::ScanCheckFailed(_)
            | WardenError::ScanCantBeScanned(_)
            | WardenError::ScanExecutionSkipped(_) => 409,
            WardenError::Runtime(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_errors_map_to_403() {
        let err = WardenError::Input("bad token".into());
        assert_eq!(err.http_status(), 403);
    }

    #[test]
    fn scan_cant_be_scanned_maps_to_409() {
        let err = WardenError::ScanCantBeScanned("gitleaks already in_progress".into());
        assert_eq!(err.http_status(), 409);
    }
}
