//! Domain types for the fleet checker.
//!
//! An [`InstanceDescriptor`] is rebuilt from discovery every cycle. Identity
//! across cycles is the `instance_id`; nothing else carries over.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fleetmend_core::RawInstance;

/// Unique identifier for a cloud instance.
pub type InstanceId = String;

/// Version tag of the published snapshot schema.
pub const SNAPSHOT_VERSION: &str = "1.0.0";

/// Health path used by root-path services without a `Healthcheck-Path` tag.
pub const DEFAULT_HEALTH_PATH: &str = "healthcheck";

/// Tag names read from discovered instances.
pub mod tags {
    pub const ENVIRONMENT: &str = "Environment";
    pub const REPOSITORY: &str = "Repository";
    pub const PATH_NAME: &str = "Path-Name";
    pub const NAME: &str = "Name";
    pub const BUILD_NUMBER: &str = "Build-Number";
    pub const HEALTHCHECK_PATH: &str = "Healthcheck-Path";
    pub const TERMINATE_ON_FAULT: &str = "Terminate-On-Fault";
    pub const AUTO_SCALING_GROUP: &str = "aws:autoscaling:groupName";
}

// ── Descriptor ────────────────────────────────────────────────────

/// Last observed state of the service on an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    #[default]
    Unknown,
    Online,
    Offline,
}

/// Per-cycle view of one monitored instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceDescriptor {
    pub instance_id: InstanceId,
    pub instance_name: String,
    pub launch_time: DateTime<Utc>,
    pub private_address: Option<String>,
    pub public_address: Option<String>,
    /// `Path-Name` tag; `/` or empty for root-mounted services.
    pub path_name: String,
    /// Health path for root-mounted services.
    pub health_path: String,
    pub environment: String,
    pub repository: String,
    pub build_number: u32,
    /// Key pair name, used to locate remote credentials.
    pub key_name: Option<String>,
    pub terminate_on_fault: bool,
    pub auto_scaling_group: Option<String>,
    pub service_status: ServiceStatus,
    pub last_error_code: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl InstanceDescriptor {
    /// Interpret a raw discovered instance.
    pub fn from_raw(raw: &RawInstance) -> Self {
        let health_path = match raw.tag(tags::HEALTHCHECK_PATH).trim_matches('/') {
            "" => DEFAULT_HEALTH_PATH.to_string(),
            path => path.to_string(),
        };

        Self {
            instance_id: raw.instance_id.clone(),
            instance_name: raw.tag(tags::NAME).to_string(),
            launch_time: raw.launch_time,
            private_address: non_empty(raw.private_ip.as_deref()),
            public_address: non_empty(raw.public_ip.as_deref()),
            path_name: raw.tag(tags::PATH_NAME).to_string(),
            health_path,
            environment: raw.tag(tags::ENVIRONMENT).to_string(),
            repository: raw.tag(tags::REPOSITORY).to_string(),
            build_number: raw.tag(tags::BUILD_NUMBER).trim().parse().unwrap_or(0),
            key_name: non_empty(raw.key_name.as_deref()),
            terminate_on_fault: is_truthy(raw.tag(tags::TERMINATE_ON_FAULT)),
            auto_scaling_group: non_empty(Some(raw.tag(tags::AUTO_SCALING_GROUP))),
            service_status: ServiceStatus::Unknown,
            last_error_code: None,
            last_checked_at: None,
        }
    }

    /// Address used for health probes: public if present, else private.
    pub fn probe_address(&self) -> Option<&str> {
        self.public_address
            .as_deref()
            .or(self.private_address.as_deref())
    }

    /// Address used for remote commands: private if present, else public.
    pub fn remote_address(&self) -> Option<&str> {
        self.private_address
            .as_deref()
            .or(self.public_address.as_deref())
    }

    pub fn in_auto_scaling_group(&self) -> bool {
        self.auto_scaling_group.is_some()
    }

    /// Whether the service is mounted at the root path.
    pub fn is_root_path(&self) -> bool {
        matches!(self.path_name.trim(), "" | "/")
    }

    pub fn mark_online(&mut self, at: DateTime<Utc>) {
        self.service_status = ServiceStatus::Online;
        self.last_error_code = None;
        self.last_checked_at = Some(at);
    }

    pub fn mark_offline(&mut self, at: DateTime<Utc>, reason: String) {
        self.service_status = ServiceStatus::Offline;
        self.last_error_code = Some(reason);
        self.last_checked_at = Some(at);
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "yes" | "true" | "1"
    )
}

// ── Hard restarts ─────────────────────────────────────────────────

/// Terminal (or pending) state of a supervised hard restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum HardRestartState {
    Pending,
    Succeeded,
    TimedOut,
    Failed(String),
}

// ── Snapshot ──────────────────────────────────────────────────────

/// Remediation bookkeeping for one instance, as exposed to readers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemediationSummary {
    pub instance_id: InstanceId,
    pub consecutive_failures: u32,
    pub escalation_count: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub hard_restarts: u32,
    pub last_hard_restart: Option<HardRestartState>,
}

/// The latest completed scan, published as a whole.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FleetSnapshot {
    pub version: String,
    /// When the scan finished; `None` before the first scan.
    pub timestamp: Option<DateTime<Utc>>,
    pub instances: Vec<InstanceDescriptor>,
    pub remediation: Vec<RemediationSummary>,
}

impl FleetSnapshot {
    /// Snapshot served before the first scan completes.
    pub fn empty() -> Self {
        Self {
            version: SNAPSHOT_VERSION.to_string(),
            timestamp: None,
            instances: Vec::new(),
            remediation: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn raw(tags: &[(&str, &str)]) -> RawInstance {
        RawInstance {
            instance_id: "i-0123".to_string(),
            launch_time: "2024-05-01T10:00:00Z".parse().unwrap(),
            private_ip: Some("10.0.1.7".to_string()),
            public_ip: None,
            key_name: Some("prod-key".to_string()),
            state: "running".to_string(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn from_raw_reads_tags() {
        let d = InstanceDescriptor::from_raw(&raw(&[
            ("Environment", "production"),
            ("Repository", "accounts"),
            ("Path-Name", "accounts"),
            ("Name", "accounts-1"),
            ("Build-Number", "412"),
        ]));
        assert_eq!(d.instance_id, "i-0123");
        assert_eq!(d.repository, "accounts");
        assert_eq!(d.path_name, "accounts");
        assert_eq!(d.instance_name, "accounts-1");
        assert_eq!(d.build_number, 412);
        assert_eq!(d.health_path, "healthcheck");
        assert_eq!(d.key_name.as_deref(), Some("prod-key"));
        assert!(!d.terminate_on_fault);
        assert!(!d.in_auto_scaling_group());
        assert_eq!(d.service_status, ServiceStatus::Unknown);
    }

    #[test]
    fn non_numeric_build_number_is_zero() {
        let d = InstanceDescriptor::from_raw(&raw(&[("Build-Number", "latest")]));
        assert_eq!(d.build_number, 0);
    }

    #[test]
    fn custom_health_path_is_trimmed() {
        let d = InstanceDescriptor::from_raw(&raw(&[("Healthcheck-Path", "/status/")]));
        assert_eq!(d.health_path, "status");
    }

    #[test]
    fn terminate_on_fault_flag() {
        for value in ["yes", "true", "TRUE", "1"] {
            let d = InstanceDescriptor::from_raw(&raw(&[("Terminate-On-Fault", value)]));
            assert!(d.terminate_on_fault, "{value} should set the flag");
        }
        let d = InstanceDescriptor::from_raw(&raw(&[("Terminate-On-Fault", "no")]));
        assert!(!d.terminate_on_fault);
    }

    #[test]
    fn auto_scaling_group_membership() {
        let d = InstanceDescriptor::from_raw(&raw(&[("aws:autoscaling:groupName", "api-asg")]));
        assert!(d.in_auto_scaling_group());
        assert_eq!(d.auto_scaling_group.as_deref(), Some("api-asg"));
    }

    #[test]
    fn probe_address_prefers_public() {
        let mut r = raw(&[]);
        r.public_ip = Some("54.1.2.3".to_string());
        let d = InstanceDescriptor::from_raw(&r);
        assert_eq!(d.probe_address(), Some("54.1.2.3"));
        assert_eq!(d.remote_address(), Some("10.0.1.7"));
    }

    #[test]
    fn empty_addresses_are_absent() {
        let mut r = raw(&[]);
        r.private_ip = Some(String::new());
        let d = InstanceDescriptor::from_raw(&r);
        assert_eq!(d.probe_address(), None);
        assert_eq!(d.remote_address(), None);
    }

    #[test]
    fn root_path_detection() {
        assert!(InstanceDescriptor::from_raw(&raw(&[("Path-Name", "/")])).is_root_path());
        assert!(InstanceDescriptor::from_raw(&raw(&[])).is_root_path());
        assert!(!InstanceDescriptor::from_raw(&raw(&[("Path-Name", "api")])).is_root_path());
    }

    #[test]
    fn mark_offline_then_online_clears_error() {
        let mut d = InstanceDescriptor::from_raw(&raw(&[]));
        let now = Utc::now();
        d.mark_offline(now, "connection refused".to_string());
        assert_eq!(d.service_status, ServiceStatus::Offline);
        assert_eq!(d.last_error_code.as_deref(), Some("connection refused"));

        d.mark_online(now);
        assert_eq!(d.service_status, ServiceStatus::Online);
        assert_eq!(d.last_error_code, None);
        assert_eq!(d.last_checked_at, Some(now));
    }

    #[test]
    fn snapshot_serializes_state_tags() {
        let state = HardRestartState::Failed("stop refused".to_string());
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["reason"], "stop refused");

        let snap = FleetSnapshot::empty();
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["version"], SNAPSHOT_VERSION);
        assert!(json["instances"].as_array().unwrap().is_empty());
    }
}
