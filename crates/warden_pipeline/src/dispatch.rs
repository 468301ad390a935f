//! Scan x output -> notifications dispatch (C4), layered on the scan
//! lifecycle (C5) and notification dedup (C7).
//!
//! Grounded on `original_source/app/secbot/inputs/__init__.py`'s
//! `SecbotInput.run`: for every `(scan, output)` pair in a matched job, build
//! and enqueue one chain. Each chain hands its stage's result to the next
//! through a tagged JSON cell rather than Celery's return-value piping, since
//! everything here runs in-process — but the value still crosses the
//! boundary as JSON via `task_wrapper`, the same as it would over a real
//! broker.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use warden_config::{Component, WorkflowJob};
use warden_db::DbPool;
use warden_protocol::{InputEvent, NotificationRequest, OutputResult, ScanResult};
use warden_registry::{NotificationHandler, OutputHandler, Registry, ScanHandler};
use warden_state::{CheckStore, NotificationStore, ScanStore};

use crate::broker::BoxFuture;
use crate::task_wrapper::{default_on_failure, from_tagged_json, to_tagged_json};
use crate::{PipelineError, TaskBroker};

pub struct Pipeline {
    pool: DbPool,
    registry: Arc<Registry>,
    broker: Arc<dyn TaskBroker>,
}

impl Pipeline {
    pub fn new(pool: DbPool, registry: Arc<Registry>, broker: Arc<dyn TaskBroker>) -> Self {
        Self {
            pool,
            registry,
            broker,
        }
    }

    /// Dispatch every `(scan, output)` pair declared by `job` for `check_id`.
    /// Pairs run concurrently; within a pair, the chain runs scan -> output
    /// -> group(notifications) strictly in order. A failing pair is logged
    /// and does not affect its siblings, matching spec.md §4.4's "failure in
    /// a link halts that chain only".
    pub async fn dispatch(&self, check_id: i64, job: &WorkflowJob, event: InputEvent) {
        let mut handles = Vec::with_capacity(job.scans.len() * job.outputs.len());

        for scan_component in &job.scans {
            for output_component in &job.outputs {
                let pool = self.pool.clone();
                let registry = self.registry.clone();
                let broker = self.broker.clone();
                let scan_component = scan_component.clone();
                let output_component = output_component.clone();
                let notifications = job.notifications.clone();
                let event = event.clone();

                handles.push(tokio::spawn(async move {
                    run_chain(
                        pool,
                        registry,
                        broker,
                        check_id,
                        scan_component,
                        output_component,
                        notifications,
                        event,
                    )
                    .await
                }));
            }
        }

        for handle in handles {
            if let Err(join_err) = handle.await {
                tracing::error!(check_id, error = %join_err, "dispatch chain task panicked");
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_chain(
    pool: DbPool,
    registry: Arc<Registry>,
    broker: Arc<dyn TaskBroker>,
    check_id: i64,
    scan_component: Component,
    output_component: Component,
    notification_components: Vec<Component>,
    event: InputEvent,
) {
    let scan_cell: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
    let output_cell: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
    let scan_name = scan_component.name.clone();

    let scan_step = build_scan_step(
        pool.clone(),
        registry.clone(),
        check_id,
        scan_component,
        event,
        scan_cell.clone(),
    );
    let output_step = build_output_step(
        pool.clone(),
        registry.clone(),
        check_id,
        output_component,
        scan_cell,
        output_cell.clone(),
    );
    let notify_step = build_notify_step(
        pool,
        registry,
        broker.clone(),
        check_id,
        scan_name.clone(),
        notification_components,
        output_cell,
    );

    if let Err(err) = broker.chain(vec![scan_step, output_step, notify_step]).await {
        tracing::warn!(check_id, scan = %scan_name, error = %err, "pipeline chain failed");
    }
}

fn build_scan_step(
    pool: DbPool,
    registry: Arc<Registry>,
    check_id: i64,
    component: Component,
    event: InputEvent,
    result_cell: Arc<Mutex<Option<Value>>>,
) -> BoxFuture<'static, Result<(), PipelineError>> {
    Box::pin(async move {
        let outcome = run_scan(&pool, &registry, check_id, &component, &event).await;
        match outcome {
            Ok(scan_result) => {
                let tagged = to_tagged_json(&scan_result)?;
                *result_cell.lock().await = Some(tagged);
                Ok(())
            }
            Err(err) => {
                if let Ok(handler) = registry.scan(&component.handler_name) {
                    handler.on_failure(&component, &event, &err).await;
                }
                if let Err(state_err) = default_on_failure(&pool, check_id, &component.name, &err).await {
                    tracing::warn!(check_id, scan = %component.name, error = %state_err, "failed to record scan failure");
                }
                Err(PipelineError::from(err))
            }
        }
    })
}

async fn run_scan(
    pool: &DbPool,
    registry: &Registry,
    check_id: i64,
    component: &Component,
    event: &InputEvent,
) -> Result<ScanResult, warden_protocol::WardenError> {
    ScanStore::start_scan(pool, check_id, &component.name)
        .await
        .map_err(state_error_to_warden)?;

    let handler = registry
        .scan(&component.handler_name)
        .map_err(|e| warden_protocol::WardenError::Input(e.to_string()))?;
    handler.run(component, event).await
}

fn build_output_step(
    pool: DbPool,
    registry: Arc<Registry>,
    check_id: i64,
    component: Component,
    scan_cell: Arc<Mutex<Option<Value>>>,
    result_cell: Arc<Mutex<Option<Value>>>,
) -> BoxFuture<'static, Result<(), PipelineError>> {
    Box::pin(async move {
        let tagged = scan_cell
            .lock()
            .await
            .take()
            .ok_or_else(|| PipelineError::Internal("output stage ran without a scan result".into()))?;
        let scan_result: ScanResult = from_tagged_json(tagged)?;
        let scan_name = scan_result.scan_name.clone();

        match run_output(&pool, &registry, check_id, &component, &scan_result).await {
            Ok(output_result) => {
                let tagged = to_tagged_json(&output_result)?;
                *result_cell.lock().await = Some(tagged);
                Ok(())
            }
            Err(err) => {
                if let Ok(handler) = registry.output(&component.handler_name) {
                    handler.on_failure(&component, &scan_result, &err).await;
                }
                if let Err(state_err) = default_on_failure(&pool, check_id, &scan_name, &err).await {
                    tracing::warn!(check_id, scan = %scan_name, error = %state_err, "failed to record output failure");
                }
                Err(PipelineError::from(err))
            }
        }
    })
}

async fn run_output(
    pool: &DbPool,
    registry: &Registry,
    check_id: i64,
    component: &Component,
    scan_result: &ScanResult,
) -> Result<OutputResult, warden_protocol::WardenError> {
    let scan_row = ScanStore::find(pool, check_id, &scan_result.scan_name)
        .await
        .map_err(state_error_to_warden)?
        .ok_or_else(|| {
            warden_protocol::WardenError::Runtime(anyhow::anyhow!(
                "scan row for {} vanished before output stage",
                scan_result.scan_name
            ))
        })?;

    let handler = registry
        .output(&component.handler_name)
        .map_err(|e| warden_protocol::WardenError::Input(e.to_string()))?;
    let output_result = handler.run(component, scan_result).await?;

    ScanStore::complete_scan(
        pool,
        scan_row.id,
        &component.name,
        &output_result.external_test_id,
        Some(scan_result.response.clone()),
    )
    .await
    .map_err(state_error_to_warden)?;

    Ok(output_result)
}

#[allow(clippy::too_many_arguments)]
fn build_notify_step(
    pool: DbPool,
    registry: Arc<Registry>,
    broker: Arc<dyn TaskBroker>,
    check_id: i64,
    scan_name: String,
    notifications: Vec<Component>,
    output_cell: Arc<Mutex<Option<Value>>>,
) -> BoxFuture<'static, Result<(), PipelineError>> {
    Box::pin(async move {
        let tagged = output_cell
            .lock()
            .await
            .take()
            .ok_or_else(|| PipelineError::Internal("notification stage ran without an output result".into()))?;
        let output_result: OutputResult = from_tagged_json(tagged)?;

        let scan_row = ScanStore::find(&pool, check_id, &scan_name)
            .await?
            .ok_or_else(|| PipelineError::Internal(format!("scan {scan_name} vanished before notify stage")))?;

        let mut tasks = Vec::with_capacity(notifications.len());
        for component in notifications {
            let pool = pool.clone();
            let registry = registry.clone();
            let output_result = output_result.clone();
            let scan_id = scan_row.id;
            tasks.push(Box::pin(async move {
                run_one_notification(&pool, &registry, scan_id, &component, &output_result).await
            }) as BoxFuture<'static, Result<(), PipelineError>>);
        }

        broker.group(tasks).await;
        Ok(())
    })
}

async fn run_one_notification(
    pool: &DbPool,
    registry: &Registry,
    scan_id: i64,
    component: &Component,
    output_result: &OutputResult,
) -> Result<(), PipelineError> {
    let channel = component
        .config
        .as_ref()
        .and_then(|c| c.get("channel"))
        .and_then(|v| v.as_str())
        .unwrap_or(&component.name)
        .to_string();

    let payload = serde_json::to_value(output_result)?;
    let Some(notification) = NotificationStore::claim_for_send(pool, scan_id, &channel, &payload).await? else {
        return Ok(());
    };

    let request = NotificationRequest {
        scan_name: output_result.scan_name.clone(),
        channel: channel.clone(),
        payload: notification.payload.clone(),
    };

    let handler = registry.notification(&component.handler_name)?;
    match handler.run(component, &request).await {
        Ok(()) => {
            NotificationStore::mark_sent(pool, notification.id).await?;
            Ok(())
        }
        Err(err) => {
            handler.on_failure(component, &request, &err).await;
            Err(PipelineError::from(err))
        }
    }
}

fn state_error_to_warden(err: warden_state::StateError) -> warden_protocol::WardenError {
    match err {
        warden_state::StateError::ScanCantBeScanned(msg) => warden_protocol::WardenError::ScanCantBeScanned(msg),
        other => warden_protocol::WardenError::Runtime(other.into()),
    }
}

/// Look up a `Check`'s `id` by `external_id`, creating nothing. Used by
/// `warden::ingress` before calling `Pipeline::dispatch`.
pub async fn require_check_id(pool: &DbPool, external_id: &str) -> Result<i64, PipelineError> {
    CheckStore::find_by_external_id(pool, external_id)
        .await?
        .map(|check| check.id)
        .ok_or_else(|| PipelineError::Internal(format!("no check for external_id {external_id}")))
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use warden_db::{create_pool, DbConfig};
    use warden_protocol::{ScanStatus, WardenError};
    use warden_state::NewCheck;

    struct OkScan;

    #[async_trait]
    impl warden_registry::ScanHandler for OkScan {
        async fn run(&self, config: &Component, _event: &InputEvent) -> Result<ScanResult, WardenError> {
            Ok(ScanResult {
                scan_name: config.name.clone(),
                status: ScanStatus::Done,
                response: serde_json::json!({"findings": 0}),
                outputs_test_id: HashMap::new(),
            })
        }
    }

    struct OkOutput;

    #[async_trait]
    impl warden_registry::OutputHandler for OkOutput {
        async fn run(&self, config: &Component, scan: &ScanResult) -> Result<OutputResult, WardenError> {
            Ok(OutputResult {
                output_name: config.name.clone(),
                scan_name: scan.scan_name.clone(),
                passed: true,
                external_test_id: "42".into(),
                details: serde_json::Value::Null,
                checked_at: Utc::now(),
            })
        }

        async fn fetch_status(&self, _config: &Component, _eligible: &[ScanResult]) -> Result<bool, WardenError> {
            Ok(true)
        }
    }

    struct RecordingNotification(std::sync::Arc<std::sync::Mutex<Vec<String>>>);

    #[async_trait]
    impl warden_registry::NotificationHandler for RecordingNotification {
        async fn run(&self, _config: &Component, request: &NotificationRequest) -> Result<(), WardenError> {
            self.0.lock().unwrap().push(request.channel.clone());
            Ok(())
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

    async fn seed_check(pool: &DbPool) -> i64 {
        let check = CheckStore::get_or_create(
            pool,
            NewCheck {
                external_id: "gitlab_abc".into(),
                event_kind: "push".into(),
                event_payload: serde_json::json!({}),
                commit_id: "abc".into(),
                branch: "main".into(),
                project_name: "team/repo".into(),
                source_url: "https://gitlab.example.com".into(),
                prefix: "gitlab".into(),
            },
        )
        .await
        .unwrap();
        check.id
    }

    #[tokio::test]
    async fn dispatch_runs_scan_output_and_notification() {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        let check_id = seed_check(&pool).await;

        let sent = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut registry = Registry::new();
        registry.register_scan("gitleaks", std::sync::Arc::new(OkScan));
        registry.register_output("defectdojo", std::sync::Arc::new(OkOutput));
        registry.register_notification("slack", std::sync::Arc::new(RecordingNotification(sent.clone())));

        let job = WorkflowJob {
            name: "default".into(),
            input_name: "gitlab".into(),
            rules: HashMap::new(),
            scans: vec![component("gitleaks", "gitleaks")],
            outputs: vec![component("defectdojo", "defectdojo")],
            notifications: vec![component("slack", "slack")],
        };

        let pipeline = Pipeline::new(pool.clone(), std::sync::Arc::new(registry), std::sync::Arc::new(crate::TokioBroker));
        let event = InputEvent {
            prefix: "gitlab".into(),
            event_kind: "push".into(),
            project_ssh_url: "git@gitlab.example.com:team/repo.git".into(),
            project_name: "team/repo".into(),
            commit_id: "abc".into(),
            branch: "main".into(),
            source_url: "https://gitlab.example.com".into(),
            raw_payload: serde_json::json!({}),
        };

        pipeline.dispatch(check_id, &job, event).await;

        let scan = ScanStore::find(&pool, check_id, "gitleaks").await.unwrap().unwrap();
        assert_eq!(scan.status, ScanStatus::Done);
        assert_eq!(scan.outputs_test_id.get("defectdojo").unwrap(), "42");
        assert_eq!(sent.lock().unwrap().as_slice(), ["slack"]);
    }

    #[tokio::test]
    async fn scan_failure_halts_chain_before_output_runs() {
        struct FailingScan;

        #[async_trait]
        impl warden_registry::ScanHandler for FailingScan {
            async fn run(&self, _config: &Component, _event: &InputEvent) -> Result<ScanResult, WardenError> {
                Err(WardenError::Runtime(anyhow::anyhow!("scanner crashed")))
            }
        }

        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        let check_id = seed_check(&pool).await;

        let mut registry = Registry::new();
        registry.register_scan("gitleaks", std::sync::Arc::new(FailingScan));
        registry.register_output("defectdojo", std::sync::Arc::new(OkOutput));

        let job = WorkflowJob {
            name: "default".into(),
            input_name: "gitlab".into(),
            rules: HashMap::new(),
            scans: vec![component("gitleaks", "gitleaks")],
            outputs: vec![component("defectdojo", "defectdojo")],
            notifications: vec![],
        };

        let pipeline = Pipeline::new(pool.clone(), std::sync::Arc::new(registry), std::sync::Arc::new(crate::TokioBroker));
        let event = InputEvent {
            prefix: "gitlab".into(),
            event_kind: "push".into(),
            project_ssh_url: "git@gitlab.example.com:team/repo.git".into(),
            project_name: "team/repo".into(),
            commit_id: "abc".into(),
            branch: "main".into(),
            source_url: "https://gitlab.example.com".into(),
            raw_payload: serde_json::json!({}),
        };

        pipeline.dispatch(check_id, &job, event).await;

        let scan = ScanStore::find(&pool, check_id, "gitleaks").await.unwrap().unwrap();
        assert_eq!(scan.status, ScanStatus::Error);
        assert!(scan.outputs_test_id.is_empty());
    }
}
