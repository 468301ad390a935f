//! GitLab webhook contract (spec.md §6): token verification, event-kind
//! classification, and `InputEvent` construction from a raw JSON payload.
//!
//! Grounded on `original_source/app/secbot/inputs/gitlab/dependencies.py`
//! (`get_gitlab_webhook_token_header`, `gitlab_event`) and
//! `original_source/app/secbot/inputs/gitlab/schemas/{base,push,tag,merge_request}.py`.
//! The original wires these as FastAPI dependencies resolved per-request;
//! here they're plain functions a caller (an HTTP handler living outside
//! this crate, per spec.md's Non-goals) composes explicitly.

use serde_json::{json, Value};
use warden_protocol::{InputEvent, WardenError};

/// The three GitLab webhook events this pipeline understands. Any other
/// `X-Gitlab-Event` value isn't an error: the caller answers `200 OK` and
/// does nothing, matching `app/routers/gitlab.py`'s "unsupported event"
/// branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitlabEventKind {
    Push,
    TagPush,
    MergeRequest,
}

impl GitlabEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GitlabEventKind::Push => "push",
            GitlabEventKind::TagPush => "tag_push",
            GitlabEventKind::MergeRequest => "merge_request",
        }
    }

    fn from_header_value(value: &str) -> Option<Self> {
        match value {
            "Push Hook" => Some(Self::Push),
            "Tag Push Hook" => Some(Self::TagPush),
            "Merge Request Hook" => Some(Self::MergeRequest),
            _ => None,
        }
    }

    /// `System Hook` deliveries (triggered by GitLab itself rather than a
    /// single project) use different payload field names per event: push
    /// and tag_push carry `event_name`, merge_request carries `event_type`.
    fn from_system_hook_payload(payload: &Value) -> Option<Self> {
        let name = payload
            .get("event_name")
            .or_else(|| payload.get("event_type"))
            .and_then(Value::as_str)?;
        match name {
            "push" => Some(Self::Push),
            "tag_push" => Some(Self::TagPush),
            "merge_request" => Some(Self::MergeRequest),
            _ => None,
        }
    }
}

/// Classify a webhook delivery from its `X-Gitlab-Event` header and (for
/// `System Hook` deliveries) its payload. `None` means "not one of the
/// events we act on".
pub fn classify_event(event_header: Option<&str>, payload: &Value) -> Option<GitlabEventKind> {
    match event_header {
        Some("System Hook") => GitlabEventKind::from_system_hook_payload(payload),
        Some(value) => GitlabEventKind::from_header_value(value),
        None => None,
    }
}

/// Constant-time comparison of the `X-Gitlab-Token` header against the
/// configured allow-list, so a timing side-channel can't be used to narrow
/// down a valid token byte by byte.
pub fn token_is_allowed(token: &str, allowlist: &[String]) -> bool {
    allowlist
        .iter()
        .any(|candidate| constant_time_eq(token.as_bytes(), candidate.as_bytes()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// The `200 OK` body every webhook delivery we accept (acted on or not)
/// answers with.
pub fn ok_reply() -> Value {
    json!({"status": "ok"})
}

/// The `403` body for an invalid `X-Gitlab-Token`, matching
/// `app/routers/gitlab.py`'s documented error response shape.
pub fn forbidden_reply() -> Value {
    json!({"code": "FORBIDDEN", "message": "X-Gitlab-Token header is invalid", "details": null})
}

/// Build an `InputEvent` from a raw GitLab webhook payload. Field layout
/// follows `schemas/base.py`'s `Project`/`Commit`/`Repository` models and the
/// per-event `target_branch`/`commit` properties in `schemas/push.py`,
/// `schemas/tag.py`, and `schemas/merge_request.py`.
pub fn build_input_event(prefix: &str, kind: GitlabEventKind, payload: &Value) -> Result<InputEvent, WardenError> {
    let project = payload.get("project").ok_or_else(|| missing_field("project"))?;
    let project_ssh_url = text(project, "git_ssh_url")?.to_string();
    let project_name = text(project, "path_with_namespace")
        .or_else(|_| text(project, "name"))?
        .to_string();
    let source_url = text(project, "web_url")?.to_string();

    let (commit_id, branch) = match kind {
        GitlabEventKind::Push => (
            text(payload, "after")?.to_string(),
            branch_from_ref(text(payload, "ref")?, "refs/heads/"),
        ),
        GitlabEventKind::TagPush => (
            text(payload, "checkout_sha")?.to_string(),
            branch_from_ref(text(payload, "ref")?, "refs/tags/"),
        ),
        GitlabEventKind::MergeRequest => {
            let attrs = payload.get("object_attributes").ok_or_else(|| missing_field("object_attributes"))?;
            let last_commit = attrs
                .get("last_commit")
                .ok_or_else(|| missing_field("object_attributes.last_commit"))?;
            (
                text(last_commit, "id")?.to_string(),
                text(attrs, "source_branch")?.to_string(),
            )
        }
    };

    Ok(InputEvent {
        prefix: prefix.to_string(),
        event_kind: kind.as_str().to_string(),
        project_ssh_url,
        project_name,
        commit_id,
        branch,
        source_url,
        raw_payload: payload.clone(),
    })
}

fn branch_from_ref(git_ref: &str, prefix: &str) -> String {
    git_ref.strip_prefix(prefix).unwrap_or(git_ref).to_string()
}

fn text<'a>(value: &'a Value, field: &str) -> Result<&'a str, WardenError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| missing_field(field))
}

fn missing_field(field: &str) -> WardenError {
    WardenError::Input(format!("missing or non-string field `{field}` in gitlab webhook payload"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_payload() -> Value {
        json!({
            "object_kind": "push",
            "event_name": "push",
            "after": "da1560886d4f094c3e6c9ef40349f7d38b5d27d7",
            "ref": "refs/heads/main",
            "project": {
                "name": "Diaspora",
                "path_with_namespace": "mike/diaspora",
                "web_url": "https://example.com/mike/diaspora",
                "git_ssh_url": "git@example.com:mike/diaspora.git",
            },
        })
    }

    fn merge_request_payload() -> Value {
        json!({
            "object_kind": "merge_request",
            "event_type": "merge_request",
            "project": {
                "name": "Gitlab Test",
                "path_with_namespace": "gitlabhq/gitlab-test",
                "web_url": "https://example.com/gitlabhq/gitlab-test",
                "git_ssh_url": "git@example.com:gitlabhq/gitlab-test.git",
            },
            "object_attributes": {
                "target_branch": "master",
                "source_branch": "ms-viewport",
                "last_commit": {"id": "da1560886d4f094c3e6c9ef40349f7d38b5d27d7"},
            },
        })
    }

    #[test]
    fn header_maps_known_events() {
        assert_eq!(classify_event(Some("Push Hook"), &json!({})), Some(GitlabEventKind::Push));
        assert_eq!(classify_event(Some("Tag Push Hook"), &json!({})), Some(GitlabEventKind::TagPush));
        assert_eq!(
            classify_event(Some("Merge Request Hook"), &json!({})),
            Some(GitlabEventKind::MergeRequest)
        );
    }

    #[test]
    fn unknown_header_is_ignored() {
        assert_eq!(classify_event(Some("Issue Hook"), &json!({})), None);
        assert_eq!(classify_event(None, &json!({})), None);
    }

    #[test]
    fn system_hook_resolves_via_payload_event_name_or_type() {
        assert_eq!(
            classify_event(Some("System Hook"), &json!({"event_name": "push"})),
            Some(GitlabEventKind::Push)
        );
        assert_eq!(
            classify_event(Some("System Hook"), &json!({"event_type": "merge_request"})),
            Some(GitlabEventKind::MergeRequest)
        );
        assert_eq!(classify_event(Some("System Hook"), &json!({"event_name": "issue"})), None);
    }

    #[test]
    fn token_check_accepts_exact_match_and_rejects_others() {
        let allowlist = vec!["s3cr3t".to_string(), "other".to_string()];
        assert!(token_is_allowed("s3cr3t", &allowlist));
        assert!(token_is_allowed("other", &allowlist));
        assert!(!token_is_allowed("wrong", &allowlist));
        assert!(!token_is_allowed("", &allowlist));
    }

    #[test]
    fn builds_push_event() {
        let event = build_input_event("gitlab", GitlabEventKind::Push, &push_payload()).unwrap();
        assert_eq!(event.commit_id, "da1560886d4f094c3e6c9ef40349f7d38b5d27d7");
        assert_eq!(event.branch, "main");
        assert_eq!(event.project_name, "mike/diaspora");
        assert_eq!(event.project_ssh_url, "git@example.com:mike/diaspora.git");
    }

    #[test]
    fn builds_merge_request_event_from_object_attributes() {
        let event = build_input_event("gitlab", GitlabEventKind::MergeRequest, &merge_request_payload()).unwrap();
        assert_eq!(event.commit_id, "da1560886d4f094c3e6c9ef40349f7d38b5d27d7");
        assert_eq!(event.branch, "ms-viewport");
        assert_eq!(event.project_name, "gitlabhq/gitlab-test");
    }

    #[test]
    fn missing_project_is_an_input_error() {
        let err = build_input_event("gitlab", GitlabEventKind::Push, &json!({"after": "x", "ref": "refs/heads/main"}))
            .unwrap_err();
        assert!(matches!(err, WardenError::Input(_)));
    }
}
