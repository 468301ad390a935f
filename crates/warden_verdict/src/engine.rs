//! The status-derivation algorithm itself (C6), spec.md §4.6 steps 1-7.

use std::collections::HashSet;

use warden_config::{Component, WorkflowConfig};
use warden_db::DbPool;
use warden_protocol::{ScanResult, ScanStatus, SecurityCheckStatus};
use warden_registry::{OutputHandler, Registry};
use warden_state::{CheckStore, Scan, ScanStore};

use crate::VerdictError;

/// Compute the externally-visible status for the check identified by
/// `external_id`, following spec.md §4.6 step by step:
///
/// 1. no `Check` -> `NOT_STARTED`.
/// 2-4. compare scan-row count against the matching job's declared scan
///    count -> `IN_PROGRESS` (too few) or `ERROR` (too many).
/// 5-6. drop `SKIP` scans, short-circuit on any remaining `ERROR` or
///    `IN_PROGRESS`.
/// 7. once every remaining scan is `DONE`, restrict to outputs/scans that
///    actually produced data and delegate to each eligible output's
///    `fetch_status`; `SUCCESS` iff every one agrees, else `FAIL`.
pub async fn fetch_status(
    pool: &DbPool,
    config: &WorkflowConfig,
    registry: &Registry,
    input_name: &str,
    external_id: &str,
) -> Result<SecurityCheckStatus, VerdictError> {
    let Some(check) = CheckStore::find_by_external_id(pool, external_id).await? else {
        return Ok(SecurityCheckStatus::NotStarted);
    };

    let job = config
        .matching_workflow_job(input_name, &check.event_payload)?
        .ok_or_else(|| VerdictError::NoMatchingJob(external_id.to_string()))?;

    let scans = ScanStore::list_by_check(pool, check.id).await?;
    let expected = job.scans.len();
    let actual = scans.len();

    if actual < expected {
        return Ok(SecurityCheckStatus::InProgress);
    }
    if actual > expected {
        return Ok(SecurityCheckStatus::Error);
    }

    let remaining: Vec<&Scan> = scans.iter().filter(|s| s.status != ScanStatus::Skip).collect();

    if remaining.iter().any(|s| s.status == ScanStatus::Error) {
        return Ok(SecurityCheckStatus::Error);
    }
    if remaining.iter().any(|s| s.status == ScanStatus::InProgress) {
        return Ok(SecurityCheckStatus::InProgress);
    }

    // Every remaining scan is DONE (possibly zero, if every scan was SKIP).
    let scan_output_names: HashSet<&str> = remaining
        .iter()
        .flat_map(|s| s.outputs_test_id.keys().map(String::as_str))
        .collect();
    let scan_names: HashSet<&str> = remaining.iter().map(|s| s.scan_name.as_str()).collect();

    let eligible_outputs: Vec<&Component> = job
        .outputs
        .iter()
        .filter(|o| scan_output_names.contains(o.name.as_str()))
        .collect();
    let eligible_scans: Vec<ScanResult> = remaining
        .iter()
        .filter(|s| scan_names.contains(s.scan_name.as_str()))
        .map(|s| ScanResult {
            scan_name: s.scan_name.clone(),
            status: s.status,
            response: s.response.clone().unwrap_or(serde_json::Value::Null),
            outputs_test_id: s.outputs_test_id.clone(),
        })
        .collect();

    for output in &eligible_outputs {
        let handler = registry.output(&output.handler_name)?;
        let passed = handler.fetch_status(output, &eligible_scans).await?;
        if !passed {
            return Ok(SecurityCheckStatus::Fail);
        }
    }

    Ok(SecurityCheckStatus::Success)
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use warden_db::{create_pool, DbConfig};
    use warden_protocol::{OutputResult, WardenError};
    use warden_state::{NewCheck, NewScan};

    fn config_yaml() -> WorkflowConfig {
        WorkflowConfig::from_yaml_str(
            r#"
version: "1.0"
components:
  gitleaks:
    handler_name: gitleaks
  defectdojo:
    handler_name: defectdojo
jobs:
  - name: default
    rules:
      gitlab: {}
    scans: [gitleaks]
    outputs: [defectdojo]
"#,
        )
        .unwrap()
    }

    struct FixedOutput(bool);

    #[async_trait]
    impl OutputHandler for FixedOutput {
        async fn run(&self, config: &Component, scan: &ScanResult) -> Result<OutputResult, WardenError> {
            Ok(OutputResult {
                output_name: config.name.clone(),
                scan_name: scan.scan_name.clone(),
                passed: self.0,
                external_test_id: "1".into(),
                details: serde_json::Value::Null,
                checked_at: chrono::Utc::now(),
            })
        }

        async fn fetch_status(&self, _config: &Component, _eligible: &[ScanResult]) -> Result<bool, WardenError> {
            Ok(self.0)
        }
    }

    async fn seed_check(pool: &DbPool) -> warden_state::Check {
        CheckStore::get_or_create(
            pool,
            NewCheck {
                external_id: "gitlab_x".into(),
                event_kind: "push".into(),
                event_payload: serde_json::json!({}),
                commit_id: "c".into(),
                branch: "main".into(),
                project_name: "p".into(),
                source_url: "u".into(),
                prefix: "gitlab".into(),
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn no_check_is_not_started() {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        let config = config_yaml();
        let mut registry = Registry::new();
        registry.register_output("defectdojo", std::sync::Arc::new(FixedOutput(true)));

        let status = fetch_status(&pool, &config, &registry, "gitlab", "gitlab_missing")
            .await
            .unwrap();
        assert_eq!(status, SecurityCheckStatus::NotStarted);
    }

    #[tokio::test]
    async fn fewer_scans_than_expected_is_in_progress() {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        seed_check(&pool).await;
        let config = config_yaml();
        let registry = Registry::new();

        let status = fetch_status(&pool, &config, &registry, "gitlab", "gitlab_x")
            .await
            .unwrap();
        assert_eq!(status, SecurityCheckStatus::InProgress);
    }

    #[tokio::test]
    async fn all_done_and_output_passes_is_success() {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        let check = seed_check(&pool).await;
        let scan = ScanStore::start_scan(&pool, check.id, "gitleaks").await.unwrap();
        ScanStore::complete_scan(&pool, scan.id, "defectdojo", "99", None)
            .await
            .unwrap();

        let config = config_yaml();
        let mut registry = Registry::new();
        registry.register_output("defectdojo", std::sync::Arc::new(FixedOutput(true)));

        let status = fetch_status(&pool, &config, &registry, "gitlab", "gitlab_x")
            .await
            .unwrap();
        assert_eq!(status, SecurityCheckStatus::Success);
    }

    #[tokio::test]
    async fn all_done_and_output_fails_is_fail() {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        let check = seed_check(&pool).await;
        let scan = ScanStore::start_scan(&pool, check.id, "gitleaks").await.unwrap();
        ScanStore::complete_scan(&pool, scan.id, "defectdojo", "99", None)
            .await
            .unwrap();

        let config = config_yaml();
        let mut registry = Registry::new();
        registry.register_output("defectdojo", std::sync::Arc::new(FixedOutput(false)));

        let status = fetch_status(&pool, &config, &registry, "gitlab", "gitlab_x")
            .await
            .unwrap();
        assert_eq!(status, SecurityCheckStatus::Fail);
    }

    #[tokio::test]
    async fn single_skipped_scan_is_success_without_invoking_output() {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        let check = seed_check(&pool).await;
        ScanStore::get_or_create(
            &pool,
            NewScan {
                check_id: check.id,
                scan_name: "gitleaks".into(),
            },
        )
        .await
        .unwrap();
        ScanStore::handle_failure(&pool, check.id, "gitleaks", true).await.unwrap();

        let config = config_yaml();
        // No output registered at all: if fetch_status were (incorrectly)
        // invoked, this would panic the registry lookup with UnknownOutput.
        let registry = Registry::new();

        let status = fetch_status(&pool, &config, &registry, "gitlab", "gitlab_x")
            .await
            .unwrap();
        assert_eq!(status, SecurityCheckStatus::Success);
    }

    #[tokio::test]
    async fn errored_scan_yields_error_status() {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        let check = seed_check(&pool).await;
        ScanStore::start_scan(&pool, check.id, "gitleaks").await.unwrap();
        ScanStore::handle_failure(&pool, check.id, "gitleaks", false).await.unwrap();

        let config = config_yaml();
        let registry = Registry::new();

        let status = fetch_status(&pool, &config, &registry, "gitlab", "gitlab_x")
            .await
            .unwrap();
        assert_eq!(status, SecurityCheckStatus::Error);
    }
}
