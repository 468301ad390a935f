//! Reference scan handler: clones the repository at the event's commit and
//! runs `gitleaks detect` over the checkout.
//!
//! Grounded on `original_source/app/secbot/inputs/gitlab/handlers/gitleaks/__init__.py`'s
//! `GitleaksHandler.run`: clone, run the scanner into a JSON report file,
//! stash the report as the scan's response. The original's vendored
//! `clone_repository`/`services.start_scan` helpers are replaced by a plain
//! `git clone` + `git checkout` and the `ScanStore::start_scan` call already
//! made by `warden_pipeline::dispatch` before `run` is invoked.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;
use warden_config::Component;
use warden_protocol::{InputEvent, ScanResult, ScanStatus, WardenError};
use warden_registry::ScanHandler;

#[derive(Debug, Deserialize)]
struct GitleaksConfig {
    #[serde(default = "default_format")]
    format: String,
}

fn default_format() -> String {
    "json".to_string()
}

impl Default for GitleaksConfig {
    fn default() -> Self {
        Self { format: default_format() }
    }
}

pub struct GitleaksHandler;

#[async_trait]
impl ScanHandler for GitleaksHandler {
    async fn run(&self, config: &Component, event: &InputEvent) -> Result<ScanResult, WardenError> {
        let cfg = match &config.config {
            Some(value) => serde_json::from_value::<GitleaksConfig>(value.clone())
                .map_err(|e| WardenError::Config(vec![format!("gitleaks config: {e}")]))?,
            None => GitleaksConfig::default(),
        };

        let workdir = std::env::temp_dir().join(format!(
            "warden-gitleaks-{}-{}",
            sanitize_for_path(&event.commit_id),
            std::process::id()
        ));
        tokio::fs::create_dir_all(&workdir)
            .await
            .map_err(|e| WardenError::Runtime(e.into()))?;
        let _cleanup = CleanupGuard(workdir.clone());

        clone_at_commit(&event.project_ssh_url, &event.commit_id, &workdir).await?;

        let report_path = workdir.join("report.json");
        let output = Command::new("gitleaks")
            .args(["detect", "--redact", "-f", &cfg.format, "-r"])
            .arg(&report_path)
            .current_dir(&workdir)
            .output()
            .await
            .map_err(|e| WardenError::ScanCheckFailed(format!("could not spawn gitleaks: {e}")))?;

        // gitleaks exits 0 when the scan is clean and 1 when it found leaks;
        // both are a completed scan. Anything else is a scanner failure.
        match output.status.code() {
            Some(0) | Some(1) => {}
            other => {
                return Err(WardenError::ScanCheckFailed(format!(
                    "gitleaks exited with {other:?}: {}",
                    String::from_utf8_lossy(&output.stderr)
                )));
            }
        }

        let report_bytes = tokio::fs::read(&report_path)
            .await
            .map_err(|e| WardenError::Runtime(e.into()))?;
        let findings: Value = serde_json::from_slice(&report_bytes)
            .map_err(|e| WardenError::ScanCheckFailed(format!("malformed gitleaks report: {e}")))?;

        Ok(ScanResult {
            scan_name: config.name.clone(),
            status: ScanStatus::Done,
            response: json!({
                "project_name": event.project_name,
                "project_ssh_url": event.project_ssh_url,
                "source_url": event.source_url,
                "commit_id": event.commit_id,
                "findings": findings,
            }),
            outputs_test_id: Default::default(),
        })
    }
}

async fn clone_at_commit(ssh_url: &str, commit_id: &str, workdir: &Path) -> Result<(), WardenError> {
    run_git(&["clone", ssh_url, "."], workdir).await?;
    run_git(&["checkout", commit_id], workdir).await?;
    Ok(())
}

async fn run_git(args: &[&str], workdir: &Path) -> Result<(), WardenError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(workdir)
        .output()
        .await
        .map_err(|e| WardenError::ScanCheckFailed(format!("could not spawn git: {e}")))?;
    if !output.status.success() {
        return Err(WardenError::ScanCheckFailed(format!(
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

fn sanitize_for_path(commit_id: &str) -> String {
    commit_id.chars().filter(|c| c.is_ascii_alphanumeric()).take(12).collect()
}

struct CleanupGuard(PathBuf);

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_format_is_json() {
        assert_eq!(GitleaksConfig::default().format, "json");
    }

    #[test]
    fn sanitize_strips_non_alphanumeric_and_truncates() {
        assert_eq!(sanitize_for_path("abc-123_def/456"), "abc123def456");
        assert_eq!(sanitize_for_path("da1560886d4f094c3e6c9ef40349f7d38b5d27d7").len(), 12);
    }
}
