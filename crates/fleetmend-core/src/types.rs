//! Raw inventory types shared between discovery and the checker.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Filter name matching the cloud-side instance lifecycle state.
pub const STATE_FILTER: &str = "instance-state-name";

/// Prefix marking a filter that matches a tag value.
pub const TAG_FILTER_PREFIX: &str = "tag:";

/// One instance as reported by fleet discovery, before interpretation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawInstance {
    pub instance_id: String,
    pub launch_time: DateTime<Utc>,
    #[serde(default)]
    pub private_ip: Option<String>,
    #[serde(default)]
    pub public_ip: Option<String>,
    /// Name of the key pair the instance was launched with.
    #[serde(default)]
    pub key_name: Option<String>,
    /// Lifecycle state name (`running`, `stopped`, ...).
    #[serde(default = "default_state")]
    pub state: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

fn default_state() -> String {
    "running".to_string()
}

impl RawInstance {
    /// Tag value by name, or an empty string.
    pub fn tag(&self, name: &str) -> &str {
        self.tags.get(name).map(String::as_str).unwrap_or("")
    }
}

/// A single `name = any of values` filter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Filter {
    pub name: String,
    pub values: Vec<String>,
}

impl Filter {
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            values: vec![value.to_string()],
        }
    }

    pub fn any_of(name: &str, values: &[String]) -> Self {
        Self {
            name: name.to_string(),
            values: values.to_vec(),
        }
    }

    fn matches(&self, instance: &RawInstance) -> bool {
        let actual = if self.name == STATE_FILTER {
            instance.state.as_str()
        } else if let Some(tag) = self.name.strip_prefix(TAG_FILTER_PREFIX) {
            instance.tag(tag)
        } else {
            return false;
        };
        self.values.iter().any(|v| v == actual)
    }
}

/// Conjunction of filters selecting the monitored population.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TagFilter {
    pub filters: Vec<Filter>,
}

impl TagFilter {
    /// The standard monitored-fleet filter: running HTTP services that are
    /// online in `environment` behind one of the given nginx configurations.
    pub fn fleet(environment: &str, nginx_configurations: &[String]) -> Self {
        Self {
            filters: vec![
                Filter::new("tag:Environment", environment),
                Filter::new("tag:Service-Type", "http"),
                Filter::new("tag:Online", "yes"),
                Filter::new(STATE_FILTER, "running"),
                Filter::any_of("tag:Nginx-Configuration", nginx_configurations),
            ],
        }
    }

    /// Evaluate the filter locally. Unknown filter names never match.
    pub fn matches(&self, instance: &RawInstance) -> bool {
        self.filters.iter().all(|f| f.matches(instance))
    }
}

/// Cloud lifecycle state used while polling a hard restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceRunState {
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
    Other(String),
}

impl InstanceRunState {
    pub fn from_name(name: &str) -> Self {
        match name {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            "shutting-down" => Self::ShuttingDown,
            "terminated" => Self::Terminated,
            other => Self::Other(other.to_string()),
        }
    }
}
