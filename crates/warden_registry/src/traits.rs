//! Handler trait interfaces (C2).
//!
//! Mirrors `SecbotHandler`/`SecbotScanHandler`/`SecbotOutputHandler`/
//! `SecbotNotificationHandler`: a unified `run` entry point per handler role,
//! plus an optional `on_failure` hook the pipeline calls when `run` errors.
//! Celery's dynamic task wrapping (`pydantic_celery_converter`,
//! `async_celery_task`) has no counterpart here — `warden_pipeline::TaskBroker`
//! calls these trait methods directly.

use async_trait::async_trait;
use warden_config::Component;
use warden_protocol::{InputEvent, NotificationRequest, OutputResult, ScanResult, WardenError};

#[async_trait]
pub trait ScanHandler: Send + Sync {
    async fn run(&self, config: &Component, event: &InputEvent) -> Result<ScanResult, WardenError>;

    /// Called when `run` returns an error that isn't `ScanExecutionSkipped`.
    /// Default is a no-op, matching `SecbotHandler.on_failure`'s empty body.
    async fn on_failure(&self, _config: &Component, _event: &InputEvent, _error: &WardenError) {}
}

#[async_trait]
pub trait OutputHandler: Send + Sync {
    async fn run(&self, config: &Component, scan: &ScanResult) -> Result<OutputResult, WardenError>;

    /// Resolve whether the eligible scans for this check currently pass this
    /// output's judgement. `eligible_scans` is restricted to the scans the
    /// verdict engine considers relevant for this output (see `warden_verdict`).
    async fn fetch_status(
        &self,
        config: &Component,
        eligible_scans: &[ScanResult],
    ) -> Result<bool, WardenError>;

    async fn on_failure(&self, _config: &Component, _scan: &ScanResult, _error: &WardenError) {}
}

#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn run(&self, config: &Component, request: &NotificationRequest) -> Result<(), WardenError>;

    async fn on_failure(&self, _config: &Component, _request: &NotificationRequest, _error: &WardenError) {}
}
