//! Reference notification handler: renders an output's findings as Slack
//! block-kit messages and posts them to every configured channel.
//!
//! Grounded on `original_source/app/secbot/inputs/gitlab/handlers/slack/`:
//! `utils.py`'s `generate_message_blocks`/`SEVERITY_TO_EMOJI` and
//! `__init__.py`'s `SlackHandler.run`. Per-channel send-once dedup
//! (`SlackNotifications.is_sent`) is handled upstream by
//! `warden_state::NotificationStore::claim_for_send` before this handler
//! ever runs, so `run` here only needs to render and send.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use warden_config::Component;
use warden_protocol::{NotificationRequest, WardenError};
use warden_registry::NotificationHandler;

#[derive(Debug, Deserialize)]
struct SlackConfig {
    #[serde(default = "default_render_limit")]
    render_limit: usize,
}

fn default_render_limit() -> usize {
    10
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self { render_limit: default_render_limit() }
    }
}

pub struct SlackHandler {
    client: reqwest::Client,
}

impl SlackHandler {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

impl Default for SlackHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationHandler for SlackHandler {
    async fn run(&self, config: &Component, request: &NotificationRequest) -> Result<(), WardenError> {
        let cfg = match &config.config {
            Some(value) => serde_json::from_value::<SlackConfig>(value.clone())
                .map_err(|e| WardenError::Config(vec![format!("slack config: {e}")]))?,
            None => SlackConfig::default(),
        };

        let Some(blocks) = generate_message_blocks(request, cfg.render_limit) else {
            return Ok(());
        };

        let token = config
            .env
            .as_ref()
            .and_then(|env| env.get("SLACK_TOKEN"))
            .cloned()
            .flatten()
            .ok_or_else(|| WardenError::ConfigMissingEnv("SLACK_TOKEN".to_string()))?;

        self.client
            .post("https://slack.com/api/chat.postMessage")
            .bearer_auth(token)
            .json(&json!({"channel": request.channel, "blocks": blocks}))
            .send()
            .await
            .map_err(|e| WardenError::Runtime(e.into()))?
            .error_for_status()
            .map_err(|e| WardenError::Runtime(e.into()))?;
        Ok(())
    }
}

/// `None` when there's nothing worth notifying about (no findings), mirroring
/// `generate_message_blocks` returning `None` for a zero-finding output.
fn generate_message_blocks(request: &NotificationRequest, render_limit: usize) -> Option<Value> {
    let findings = request.payload.get("details")?.get("findings")?.as_array()?;
    if findings.is_empty() {
        return None;
    }

    let project_name = request
        .payload
        .get("details")
        .and_then(|d| d.get("project_name"))
        .and_then(Value::as_str)
        .unwrap_or("unknown project");

    let mut blocks = vec![section(format!(
        "Scan *{}* found *{}* new findings in *{}*:",
        request.scan_name,
        findings.len(),
        project_name
    ))];

    for finding in findings.iter().take(render_limit) {
        let title = finding.get("title").and_then(Value::as_str).unwrap_or("finding");
        let severity = finding.get("severity").and_then(Value::as_str).unwrap_or("Informational");
        blocks.push(section(format!("{} {title}", severity_emoji(severity))));
    }

    if findings.len() > render_limit {
        blocks.push(section(format!(
            ":no_bell: *{}* were stripped from this notification :no_bell:",
            findings.len() - render_limit
        )));
    }

    Some(Value::Array(blocks))
}

fn section(text: String) -> Value {
    json!({"type": "section", "text": {"type": "mrkdwn", "text": text}})
}

fn severity_emoji(severity: &str) -> &'static str {
    match severity {
        "Critical" => ":red_circle:",
        "High" => ":large_orange_circle:",
        "Medium" => ":large_yellow_circle:",
        "Low" => ":large_green_circle:",
        _ => ":white_circle:",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_findings(findings: Value) -> NotificationRequest {
        NotificationRequest {
            scan_name: "gitleaks".into(),
            channel: "#security".into(),
            payload: json!({"details": {"project_name": "team/repo", "findings": findings}}),
        }
    }

    #[test]
    fn no_findings_produces_no_message() {
        let request = request_with_findings(json!([]));
        assert!(generate_message_blocks(&request, 10).is_none());
    }

    #[test]
    fn findings_beyond_render_limit_are_noted_as_stripped() {
        let findings = json!([
            {"title": "a", "severity": "Critical"},
            {"title": "b", "severity": "Low"},
            {"title": "c", "severity": "Medium"},
        ]);
        let request = request_with_findings(findings);
        let blocks = generate_message_blocks(&request, 1).unwrap();
        let blocks = blocks.as_array().unwrap();
        // header + 1 rendered finding + stripped-count notice
        assert_eq!(blocks.len(), 3);
        assert!(blocks[2]["text"]["text"].as_str().unwrap().contains("2"));
    }

    #[test]
    fn severity_emoji_covers_known_levels() {
        assert_eq!(severity_emoji("Critical"), ":red_circle:");
        assert_eq!(severity_emoji("Informational"), ":white_circle:");
        assert_eq!(severity_emoji("unknown"), ":white_circle:");
    }
}
