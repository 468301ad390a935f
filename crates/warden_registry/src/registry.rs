//! Static handler registry (C2).
//!
//! Replaces the original's Celery-task-name-based dynamic dispatch
//! (`secbot.handler.{config_name}`, discovered via module autodiscovery)
//! with an explicit, compile-time-checked map populated once at startup —
//! see the DESIGN NOTES guidance to thread handlers as explicit dependencies
//! rather than rediscover them at runtime.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::traits::{NotificationHandler, OutputHandler, ScanHandler};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no scan handler registered for {0}")]
    UnknownScan(String),
    #[error("no output handler registered for {0}")]
    UnknownOutput(String),
    #[error("no notification handler registered for {0}")]
    UnknownNotification(String),
}

#[derive(Default)]
pub struct Registry {
    scans: HashMap<String, Arc<dyn ScanHandler>>,
    outputs: HashMap<String, Arc<dyn OutputHandler>>,
    notifications: HashMap<String, Arc<dyn NotificationHandler>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_scan(&mut self, handler_name: impl Into<String>, handler: Arc<dyn ScanHandler>) {
        self.scans.insert(handler_name.into(), handler);
    }

    pub fn register_output(&mut self, handler_name: impl Into<String>, handler: Arc<dyn OutputHandler>) {
        self.outputs.insert(handler_name.into(), handler);
    }

    pub fn register_notification(
        &mut self,
        handler_name: impl Into<String>,
        handler: Arc<dyn NotificationHandler>,
    ) {
        self.notifications.insert(handler_name.into(), handler);
    }

    pub fn scan(&self, handler_name: &str) -> Result<Arc<dyn ScanHandler>, RegistryError> {
        self.scans
            .get(handler_name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownScan(handler_name.to_string()))
    }

    pub fn output(&self, handler_name: &str) -> Result<Arc<dyn OutputHandler>, RegistryError> {
        self.outputs
            .get(handler_name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownOutput(handler_name.to_string()))
    }

    pub fn notification(
        &self,
        handler_name: &str,
    ) -> Result<Arc<dyn NotificationHandler>, RegistryError> {
        self.notifications
            .get(handler_name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownNotification(handler_name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use warden_config::Component;
    use warden_protocol::{InputEvent, ScanResult, ScanStatus, WardenError};

    struct NoopScan;

    #[async_trait]
    impl ScanHandler for NoopScan {
        async fn run(&self, _config: &Component, _event: &InputEvent) -> Result<ScanResult, WardenError> {
            Ok(ScanResult {
                scan_name: "noop".into(),
                status: ScanStatus::Done,
                response: serde_json::Value::Null,
                outputs_test_id: Default::default(),
            })
        }
    }

    #[test]
    fn unregistered_handler_is_an_error() {
        let registry = Registry::new();
        assert!(matches!(
            registry.scan("gitleaks"),
            Err(RegistryError::UnknownScan(_))
        ));
    }

    #[test]
    fn registered_handler_is_found() {
        let mut registry = Registry::new();
        registry.register_scan("noop", Arc::new(NoopScan));
        assert!(registry.scan("noop").is_ok());
    }
}
