//! Config model types (C1).

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

/// A handler instantiation: which handler to run, with what static config and
/// which environment variables to resolve at load time.
#[derive(Debug, Clone, Deserialize)]
pub struct RawComponent {
    pub handler_name: String,
    #[serde(default)]
    pub config: Option<Value>,
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
}

/// A fully-resolved component: env values have been looked up.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub name: String,
    pub handler_name: String,
    pub config: Option<Value>,
    pub env: Option<HashMap<String, Option<String>>>,
}

/// Raw job entry as written in the YAML file, before components are resolved.
#[derive(Debug, Clone, Deserialize)]
pub struct RawJob {
    pub name: String,
    /// Maps an input source name (e.g. "gitlab") to the rule set that must
    /// match for this job to run against events from that source.
    pub rules: HashMap<String, HashMap<String, String>>,
    pub scans: Vec<String>,
    pub outputs: Vec<String>,
    #[serde(default)]
    pub notifications: Vec<String>,
}

/// A job resolved against one input source, with its component definitions
/// inlined. One `RawJob` with rules for N input sources expands into N
/// `WorkflowJob`s, one per input source.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowJob {
    pub name: String,
    pub input_name: String,
    pub rules: HashMap<String, String>,
    pub scans: Vec<Component>,
    pub outputs: Vec<Component>,
    pub notifications: Vec<Component>,
}

/// Top-level YAML document shape.
///
/// `version` is captured as a raw YAML value rather than a `String` because
/// an unquoted `version: 1.0` parses as a YAML float, not a string — the
/// original stringifies it with `str(version)` before looking it up in its
/// version table, and we do the same via `version_string`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfig {
    pub version: serde_yaml::Value,
    pub components: HashMap<String, RawComponent>,
    pub jobs: Vec<RawJob>,
}

impl RawConfig {
    pub fn version_string(&self) -> String {
        match &self.version {
            serde_yaml::Value::String(s) => s.clone(),
            serde_yaml::Value::Number(n) => n.to_string(),
            other => serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
        }
    }
}
