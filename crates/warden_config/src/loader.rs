//! YAML config loading and job indexing (C1).

use std::collections::HashMap;

use crate::matcher::job_matches;
use crate::model::{Component, RawConfig, WorkflowJob};
use crate::WorkflowConfigError;

const SUPPORTED_VERSION: &str = "1.0";

/// A loaded, validated workflow configuration: jobs indexed by the input
/// source name they apply to (e.g. `"gitlab"`).
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    jobs_by_input: HashMap<String, Vec<WorkflowJob>>,
}

impl WorkflowConfig {
    pub fn from_yaml_str(contents: &str) -> Result<Self, WorkflowConfigError> {
        let raw: RawConfig = serde_yaml::from_str(contents)
            .map_err(|e| WorkflowConfigError::Parse(e.to_string()))?;
        Self::from_raw(raw)
    }

    pub fn from_yaml_file(path: &std::path::Path) -> Result<Self, WorkflowConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| WorkflowConfigError::Parse(e.to_string()))?;
        Self::from_yaml_str(&contents)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, WorkflowConfigError> {
        let version = raw.version_string();
        if version != SUPPORTED_VERSION {
            return Err(WorkflowConfigError::UnsupportedVersion(version));
        }

        let mut components: HashMap<String, Component> = HashMap::new();
        for (name, raw_component) in &raw.components {
            let mut env = None;
            if let Some(raw_env) = &raw_component.env {
                let mut resolved = HashMap::with_capacity(raw_env.len());
                for (key, var_name) in raw_env {
                    let value = std::env::var(var_name).ok();
                    if value.is_none() {
                        return Err(WorkflowConfigError::MissingEnv {
                            component: name.clone(),
                            var_name: var_name.clone(),
                        });
                    }
                    resolved.insert(key.clone(), value);
                }
                env = Some(resolved);
            }
            components.insert(
                name.clone(),
                Component {
                    name: name.clone(),
                    handler_name: raw_component.handler_name.clone(),
                    config: raw_component.config.clone(),
                    env,
                },
            );
        }

        if components.is_empty() {
            return Err(WorkflowConfigError::Invalid(vec![
                "no components found in config".to_string(),
            ]));
        }

        let resolve = |names: &[String], errors: &mut Vec<String>| -> Vec<Component> {
            names
                .iter()
                .filter_map(|name| {
                    let found = components.get(name).cloned();
                    if found.is_none() {
                        errors.push(format!("unknown component referenced: {name}"));
                    }
                    found
                })
                .collect()
        };

        let mut jobs_by_input: HashMap<String, Vec<WorkflowJob>> = HashMap::new();
        let mut errors = Vec::new();

        for job in &raw.jobs {
            let scans = resolve(&job.scans, &mut errors);
            let outputs = resolve(&job.outputs, &mut errors);
            let notifications = resolve(&job.notifications, &mut errors);

            for (input_name, rules) in &job.rules {
                jobs_by_input
                    .entry(input_name.clone())
                    .or_default()
                    .push(WorkflowJob {
                        name: job.name.clone(),
                        input_name: input_name.clone(),
                        rules: rules.clone(),
                        scans: scans.clone(),
                        outputs: outputs.clone(),
                        notifications: notifications.clone(),
                    });
            }
        }

        if !errors.is_empty() {
            return Err(WorkflowConfigError::Invalid(errors));
        }

        if jobs_by_input.is_empty() {
            return Err(WorkflowConfigError::Invalid(vec![
                "no jobs found in config".to_string(),
            ]));
        }

        Ok(Self { jobs_by_input })
    }

    /// Return the single job matching `input_name` and `data`, if any.
    /// More than one match is a configuration error: only one job per event
    /// is supported, same as the original.
    pub fn matching_workflow_job(
        &self,
        input_name: &str,
        data: &serde_json::Value,
    ) -> Result<Option<&WorkflowJob>, WorkflowConfigError> {
        let candidates = match self.jobs_by_input.get(input_name) {
            Some(jobs) => jobs,
            None => return Ok(None),
        };

        let mut matches = Vec::new();
        for job in candidates {
            if job_matches(job, data)? {
                matches.push(job);
            }
        }

        match matches.len() {
            0 => Ok(None),
            1 => Ok(Some(matches[0])),
            _ => Err(WorkflowConfigError::Invalid(vec![format!(
                "multiple jobs matched input {input_name}"
            )])),
        }
    }
}
