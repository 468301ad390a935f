//! Dotted-path rule matching (C1).
//!
//! A job's `rules` map dotted JSON paths (e.g. `"project.namespace"`) to a
//! regex that the value at that path must fully match. This mirrors the
//! original's `get_jsonpath_value`/`is_job_valid_for_rules`: no partial
//! matches, and a path that doesn't resolve to a string is a config/runtime
//! mismatch, not a silent non-match.

use regex::Regex;
use serde_json::Value;

use crate::model::WorkflowJob;
use crate::WorkflowConfigError;

/// Walk a dotted path through a JSON object, returning the string at the end.
///
/// Splits only on the first `.`, recursing on the remainder — matching the
/// original's `key, rest_keys = path.split(".", 1)`. Notably, if the first
/// segment's value isn't itself an object, the original falls through to
/// returning that segment's own value rather than an error — we keep that
/// quirk rather than silently "fixing" it.
pub fn jsonpath_value<'a>(data: &'a Value, path: &str) -> Result<&'a str, WorkflowConfigError> {
    let obj = data
        .as_object()
        .ok_or_else(|| WorkflowConfigError::JsonPath(path.to_string()))?;

    match path.split_once('.') {
        Some((key, rest)) => {
            let value = obj
                .get(key)
                .ok_or_else(|| WorkflowConfigError::JsonPath(path.to_string()))?;
            if value.is_object() {
                jsonpath_value(value, rest)
            } else {
                value
                    .as_str()
                    .ok_or_else(|| WorkflowConfigError::JsonPath(path.to_string()))
            }
        }
        None => obj
            .get(path)
            .and_then(Value::as_str)
            .ok_or_else(|| WorkflowConfigError::JsonPath(path.to_string())),
    }
}

/// True iff `job`'s rules all fully match `data`. A job with no rules
/// matches everything.
pub fn job_matches(job: &WorkflowJob, data: &Value) -> Result<bool, WorkflowConfigError> {
    if job.rules.is_empty() {
        return Ok(true);
    }

    for (path, pattern) in &job.rules {
        let value = jsonpath_value(data, path)?;
        let regex = Regex::new(&format!("^(?:{pattern})$"))
            .map_err(|e| WorkflowConfigError::InvalidRule(path.clone(), e.to_string()))?;
        if !regex.is_match(value) {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn job(rules: HashMap<String, String>) -> WorkflowJob {
        WorkflowJob {
            name: "job".into(),
            input_name: "gitlab".into(),
            rules,
            scans: vec![],
            outputs: vec![],
            notifications: vec![],
        }
    }

    #[test]
    fn nested_path_resolves() {
        let data = json!({"project": {"namespace": "security-team"}});
        assert_eq!(
            jsonpath_value(&data, "project.namespace").unwrap(),
            "security-team"
        );
    }

    #[test]
    fn no_rules_matches_everything() {
        let j = job(HashMap::new());
        assert!(job_matches(&j, &json!({"anything": "goes"})).unwrap());
    }

    #[test]
    fn regex_is_full_match_not_partial() {
        let mut rules = HashMap::new();
        rules.insert("branch".to_string(), "main".to_string());
        let j = job(rules);
        assert!(job_matches(&j, &json!({"branch": "main"})).unwrap());
        assert!(!job_matches(&j, &json!({"branch": "main-2"})).unwrap());
    }

    #[test]
    fn missing_path_is_an_error_not_a_non_match() {
        let mut rules = HashMap::new();
        rules.insert("missing.path".to_string(), ".*".to_string());
        let j = job(rules);
        assert!(job_matches(&j, &json!({"branch": "main"})).is_err());
    }
}
