//! Content-addressed id scheme for a `Check`.
//!
//! A check's `external_id` ties a webhook event to a stable, source-control
//! independent key: `"<prefix>_" + sha256(project_ssh_path + "_" + commit_id)`.
//! `prefix` disambiguates between multiple source-control instances sharing
//! one orchestrator (e.g. several GitLab hosts).

use sha2::{Digest, Sha256};

/// Strip a `git@` ssh prefix and a trailing `.git` suffix from a project path.
pub fn strip_ssh_decorations(git_ssh_url: &str) -> &str {
    let project = git_ssh_url.strip_prefix("git@").unwrap_or(git_ssh_url);
    project.strip_suffix(".git").unwrap_or(project)
}

/// Compute the external id for a `(project_ssh_url, commit_id)` pair under `prefix`.
pub fn security_id(prefix: &str, project_ssh_url: &str, commit_id: &str) -> String {
    let project_path = strip_ssh_decorations(project_ssh_url);
    let hash_input = format!("{project_path}_{commit_id}");
    let mut hasher = Sha256::new();
    hasher.update(hash_input.as_bytes());
    format!("{prefix}_{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_ssh_prefix_and_git_suffix() {
        assert_eq!(
            strip_ssh_decorations("git@gitlab.example.com:team/repo.git"),
            "gitlab.example.com:team/repo"
        );
        assert_eq!(strip_ssh_decorations("gitlab.example.com:team/repo"), "gitlab.example.com:team/repo");
    }

    #[test]
    fn same_inputs_produce_same_id() {
        let a = security_id("gitlab", "git@gitlab.example.com:team/repo.git", "abc123");
        let b = security_id("gitlab", "git@gitlab.example.com:team/repo.git", "abc123");
        assert_eq!(a, b);
        assert!(a.starts_with("gitlab_"));
        // prefix_ + 64 hex chars
        assert_eq!(a.len(), "gitlab_".len() + 64);
    }

    #[test]
    fn different_commits_produce_different_ids() {
        let a = security_id("gitlab", "git@gitlab.example.com:team/repo.git", "abc123");
        let b = security_id("gitlab", "git@gitlab.example.com:team/repo.git", "def456");
        assert_ne!(a, b);
    }

    #[test]
    fn different_prefixes_produce_different_ids() {
        let a = security_id("gitlab", "git@gitlab.example.com:team/repo.git", "abc123");
        let b = security_id("gitlab-eu", "git@gitlab.example.com:team/repo.git", "abc123");
        assert_ne!(a, b);
    }
}
