//! Integration test: a job with two scans and one output dispatches two
//! independent chains, each completing its own scan row.
#![cfg(feature = "sqlite")]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use warden_config::{Component, WorkflowJob};
use warden_db::{create_pool, DbConfig};
use warden_pipeline::{Pipeline, TokioBroker};
use warden_protocol::{InputEvent, OutputResult, ScanResult, ScanStatus, WardenError};
use warden_registry::Registry;
use warden_state::{CheckStore, NewCheck, ScanStore};

struct NamedScan;

#[async_trait]
impl warden_registry::ScanHandler for NamedScan {
    async fn run(&self, config: &Component, _event: &InputEvent) -> Result<ScanResult, WardenError> {
        Ok(ScanResult {
            scan_name: config.name.clone(),
            status: ScanStatus::Done,
            response: serde_json::json!({}),
            outputs_test_id: HashMap::new(),
        })
    }
}

struct AlwaysPassOutput;

#[async_trait]
impl warden_registry::OutputHandler for AlwaysPassOutput {
    async fn run(&self, config: &Component, scan: &ScanResult) -> Result<OutputResult, WardenError> {
        Ok(OutputResult {
            output_name: config.name.clone(),
            scan_name: scan.scan_name.clone(),
            passed: true,
            external_test_id: format!("test-for-{}", scan.scan_name),
            details: serde_json::Value::Null,
            checked_at: Utc::now(),
        })
    }

    async fn fetch_status(&self, _config: &Component, _eligible: &[ScanResult]) -> Result<bool, WardenError> {
        Ok(true)
    }
}

fn component(name: &str, handler: &str) -> Component {
    Component {
        name: name.into(),
        handler_name: handler.into(),
        config: None,
        env: None,
    }
}

#[tokio::test]
async fn two_scans_against_one_output_both_complete() {
    let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
    let check = CheckStore::get_or_create(
        &pool,
        NewCheck {
            external_id: "gitlab_fanout".into(),
            event_kind: "push".into(),
            event_payload: serde_json::json!({}),
            commit_id: "c1".into(),
            branch: "main".into(),
            project_name: "team/repo".into(),
            source_url: "https://gitlab.example.com".into(),
            prefix: "gitlab".into(),
        },
    )
    .await
    .unwrap();

    let mut registry = Registry::new();
    registry.register_scan("gitleaks", Arc::new(NamedScan));
    registry.register_scan("semgrep", Arc::new(NamedScan));
    registry.register_output("defectdojo", Arc::new(AlwaysPassOutput));

    let job = WorkflowJob {
        name: "fanout".into(),
        input_name: "gitlab".into(),
        rules: HashMap::new(),
        scans: vec![component("gitleaks", "gitleaks"), component("semgrep", "semgrep")],
        outputs: vec![component("defectdojo", "defectdojo")],
        notifications: vec![],
    };

    let pipeline = Pipeline::new(pool.clone(), Arc::new(registry), Arc::new(TokioBroker));
    let event = InputEvent {
        prefix: "gitlab".into(),
        event_kind: "push".into(),
        project_ssh_url: "git@gitlab.example.com:team/repo.git".into(),
        project_name: "team/repo".into(),
        commit_id: "c1".into(),
        branch: "main".into(),
        source_url: "https://gitlab.example.com".into(),
        raw_payload: serde_json::json!({}),
    };

    pipeline.dispatch(check.id, &job, event).await;

    let gitleaks = ScanStore::find(&pool, check.id, "gitleaks").await.unwrap().unwrap();
    let semgrep = ScanStore::find(&pool, check.id, "semgrep").await.unwrap().unwrap();
    assert_eq!(gitleaks.status, ScanStatus::Done);
    assert_eq!(semgrep.status, ScanStatus::Done);
    assert_eq!(gitleaks.outputs_test_id.get("defectdojo").unwrap(), "test-for-gitleaks");
    assert_eq!(semgrep.outputs_test_id.get("defectdojo").unwrap(), "test-for-semgrep");
}
