//! Wires the static registry, workflow config, and pipeline into one
//! long-lived `Runtime`.
//!
//! Replaces the original's module-level `security_bot` singleton
//! (`app/main.py`'s `security_bot = SecurityBot(...)`, imported ambiently
//! from `app/routers/gitlab.py`) with an explicit struct the caller
//! constructs once and threads through — see spec.md §9's DESIGN NOTES on
//! replacing global singletons with an explicit `Runtime`.

use std::path::Path;
use std::sync::Arc;

use warden_config::WorkflowConfig;
use warden_db::{create_pool, DbConfig, DbPool};
use warden_pipeline::{Pipeline, TokioBroker};
use warden_protocol::{security_id, SecurityCheckStatus, WardenError};
use warden_registry::Registry;
use warden_state::{CheckStore, NewCheck};

use crate::handlers::{defectdojo::DefectDojoHandler, gitleaks::GitleaksHandler, slack::SlackHandler};
use crate::ingress::{self, GitlabEventKind};

/// The GitLab source-control prefix this binary speaks. Kept as a constant
/// rather than threaded through the CLI since `warden` only ever talks to
/// one kind of upstream today; a second source would earn its own prefix
/// and its own `ingress`-shaped module.
pub const GITLAB_PREFIX: &str = "gitlab";

pub struct Runtime {
    pool: DbPool,
    config: WorkflowConfig,
    registry: Arc<Registry>,
    pipeline: Pipeline,
    webhook_tokens: Vec<String>,
}

impl Runtime {
    pub async fn bootstrap(config_path: &Path, db: DbConfig, webhook_tokens: Vec<String>) -> anyhow::Result<Self> {
        let config = WorkflowConfig::from_yaml_file(config_path)?;
        let pool = create_pool(db).await?;

        let mut registry = Registry::new();
        registry.register_scan("gitleaks", Arc::new(GitleaksHandler));
        registry.register_output("defectdojo", Arc::new(DefectDojoHandler::new()));
        registry.register_notification("slack", Arc::new(SlackHandler::new()));
        let registry = Arc::new(registry);

        let pipeline = Pipeline::new(pool.clone(), registry.clone(), Arc::new(TokioBroker));

        Ok(Self {
            pool,
            config,
            registry,
            pipeline,
            webhook_tokens,
        })
    }

    /// Handle one GitLab webhook delivery end to end: verify the token,
    /// classify the event, create-or-find the `Check` row, and hand off to
    /// the pipeline. Returns the JSON body the caller should answer with; an
    /// `Err`'s `WardenError::http_status` is the status code to answer with
    /// instead.
    ///
    /// A delivery for a `(project, commit)` pair already on record is
    /// answered with `ok_reply()` without dispatching again: `ScanStore`'s
    /// lifecycle only allows a scan to start from `New` or `Error`, so a
    /// second dispatch for an already-`Done` scan would otherwise flip it to
    /// `Error` via `default_on_failure`'s `ScanCantBeScanned` handling. That
    /// makes the ingress layer, not the pipeline, the right place to enforce
    /// "a duplicate webhook delivery is a no-op" (spec.md §8).
    pub async fn handle_webhook(
        &self,
        token: &str,
        event_header: Option<&str>,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, WardenError> {
        if !ingress::token_is_allowed(token, &self.webhook_tokens) {
            return Err(WardenError::Input("X-Gitlab-Token header is invalid".to_string()));
        }

        let Some(kind) = ingress::classify_event(event_header, &payload) else {
            return Ok(ingress::ok_reply());
        };

        let event = ingress::build_input_event(GITLAB_PREFIX, kind, &payload)?;

        let job = self
            .config
            .matching_workflow_job(GITLAB_PREFIX, &event.raw_payload)
            .map_err(|e| WardenError::Config(vec![e.to_string()]))?;
        let Some(job) = job else {
            tracing::info!(event = kind.as_str(), project = %event.project_name, "no matching workflow job");
            return Ok(ingress::ok_reply());
        };

        let external_id = security_id(GITLAB_PREFIX, &event.project_ssh_url, &event.commit_id);
        let already_seen = CheckStore::find_by_external_id(&self.pool, &external_id)
            .await
            .map_err(|e| WardenError::Runtime(e.into()))?
            .is_some();

        let check = CheckStore::get_or_create(
            &self.pool,
            NewCheck {
                external_id: external_id.clone(),
                event_kind: event.event_kind.clone(),
                event_payload: event.raw_payload.clone(),
                commit_id: event.commit_id.clone(),
                branch: event.branch.clone(),
                project_name: event.project_name.clone(),
                source_url: event.source_url.clone(),
                prefix: GITLAB_PREFIX.to_string(),
            },
        )
        .await
        .map_err(|e| WardenError::Runtime(e.into()))?;

        if already_seen {
            return Ok(ingress::ok_reply());
        }

        self.pipeline.dispatch(check.id, job, event).await;
        Ok(ingress::ok_reply())
    }

    pub async fn fetch_status(
        &self,
        input_name: &str,
        external_id: &str,
    ) -> Result<SecurityCheckStatus, warden_verdict::VerdictError> {
        warden_verdict::fetch_status(&self.pool, &self.config, &self.registry, input_name, external_id).await
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }
}
