//! fleetmend.toml configuration parser.
//!
//! Configuration is loaded once at startup and never mutated afterwards.
//! Every field has a default, so an absent file is equivalent to an empty
//! one. Environment variables are applied on top of the file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment value used when neither the file nor the environment set one.
pub const DEFAULT_ENVIRONMENT: &str = "production";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration for `{field}`: {value:?}")]
    InvalidDuration { field: &'static str, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FleetConfig {
    /// Value of the `Environment` tag the monitored fleet must carry.
    pub environment: String,
    /// Directory holding `<key-name>.pem` files for remote restarts.
    pub ssh_keys_dir: Option<PathBuf>,
    /// Remote user for service restarts.
    pub ssh_user: String,
    pub notifications: NotificationConfig,
    pub policy: PolicyConfig,
    pub routing: RoutingConfig,
    pub checker: CheckerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct NotificationConfig {
    /// Bearer token for the notification channel.
    pub token: Option<String>,
    /// Webhook receiving failure notices. Logged only when unset.
    pub url: Option<String>,
}

/// Thresholds and windows of the remediation state machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PolicyConfig {
    /// Failures tolerated before a restart is attempted.
    pub restart_threshold: u32,
    /// Prior escalations required before operators are involved.
    pub reporting_threshold: u32,
    /// Grace period after launch during which an instance is not probed.
    pub initialization_grace: String,
    pub soft_restart_cooldown: String,
    pub hard_restart_cooldown: String,
    /// How long an escalation count survives without a new escalation.
    pub escalation_decay: String,
}

/// Health URL construction rules per service family.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RoutingConfig {
    pub default_port: u16,
    pub alternate_port: u16,
    /// `Path-Name` values served on `alternate_port`.
    pub alternate_port_paths: Vec<String>,
    /// Repositories probed at a root-level `/healthcheck` on a fixed port.
    pub gateways: BTreeMap<String, u16>,
    pub probe_timeout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CheckerConfig {
    /// Time between cycle starts.
    pub interval: String,
    pub alive_log_interval: String,
    /// Upper bound on in-flight probes per cycle.
    pub probe_concurrency: usize,
    pub hard_restart_timeout: String,
    pub hard_restart_poll_interval: String,
    /// Accepted values of the `Nginx-Configuration` tag.
    pub nginx_configurations: Vec<String>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            environment: DEFAULT_ENVIRONMENT.to_string(),
            ssh_keys_dir: None,
            ssh_user: "ubuntu".to_string(),
            notifications: NotificationConfig::default(),
            policy: PolicyConfig::default(),
            routing: RoutingConfig::default(),
            checker: CheckerConfig::default(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            restart_threshold: 3,
            reporting_threshold: 3,
            initialization_grace: "90s".to_string(),
            soft_restart_cooldown: "45s".to_string(),
            hard_restart_cooldown: "180s".to_string(),
            escalation_decay: "1h".to_string(),
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_port: 3000,
            alternate_port: 4000,
            alternate_port_paths: vec!["webhooks".to_string(), "loyalty".to_string()],
            gateways: BTreeMap::from([("connex2".to_string(), 22000)]),
            probe_timeout: "5s".to_string(),
        }
    }
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            interval: "9s".to_string(),
            alive_log_interval: "10m".to_string(),
            probe_concurrency: 16,
            hard_restart_timeout: "10m".to_string(),
            hard_restart_poll_interval: "10s".to_string(),
            nginx_configurations: vec![
                "api".to_string(),
                "app".to_string(),
                "connex".to_string(),
            ],
        }
    }
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Load the effective configuration: optional file, then process
    /// environment, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    ///
    /// `FLEETMEND_ENV` wins over the legacy `env` variable. Empty values are
    /// treated as unset.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(env) = get("FLEETMEND_ENV").or_else(|| get("env")) {
            self.environment = env;
        }
        if let Some(dir) = get("SSH_KEYS_LOCATION") {
            self.ssh_keys_dir = Some(PathBuf::from(dir));
        }
        if let Some(token) = get("NOTIFY_TOKEN") {
            self.notifications.token = Some(token);
        }
        if let Some(url) = get("NOTIFY_URL") {
            self.notifications.url = Some(url);
        }
    }

    /// Reject configurations the checker cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.environment.trim().is_empty() {
            return Err(ConfigError::Invalid("environment must not be empty".into()));
        }
        if self.checker.probe_concurrency == 0 {
            return Err(ConfigError::Invalid("probe_concurrency must be at least 1".into()));
        }

        let durations: [(&'static str, &str); 9] = [
            ("policy.initialization_grace", &self.policy.initialization_grace),
            ("policy.soft_restart_cooldown", &self.policy.soft_restart_cooldown),
            ("policy.hard_restart_cooldown", &self.policy.hard_restart_cooldown),
            ("policy.escalation_decay", &self.policy.escalation_decay),
            ("routing.probe_timeout", &self.routing.probe_timeout),
            ("checker.interval", &self.checker.interval),
            ("checker.alive_log_interval", &self.checker.alive_log_interval),
            ("checker.hard_restart_timeout", &self.checker.hard_restart_timeout),
            ("checker.hard_restart_poll_interval", &self.checker.hard_restart_poll_interval),
        ];
        for (field, value) in durations {
            match parse_duration(value) {
                Some(d) if !d.is_zero() || field == "policy.initialization_grace" => {}
                _ => {
                    return Err(ConfigError::InvalidDuration {
                        field,
                        value: value.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl PolicyConfig {
    pub fn initialization_grace(&self) -> Duration {
        parse_duration(&self.initialization_grace).unwrap_or(Duration::from_secs(90))
    }

    pub fn soft_restart_cooldown(&self) -> Duration {
        parse_duration(&self.soft_restart_cooldown).unwrap_or(Duration::from_secs(45))
    }

    pub fn hard_restart_cooldown(&self) -> Duration {
        parse_duration(&self.hard_restart_cooldown).unwrap_or(Duration::from_secs(180))
    }

    pub fn escalation_decay(&self) -> Duration {
        parse_duration(&self.escalation_decay).unwrap_or(Duration::from_secs(3600))
    }
}

impl RoutingConfig {
    pub fn probe_timeout(&self) -> Duration {
        parse_duration(&self.probe_timeout).unwrap_or(Duration::from_secs(5))
    }
}

impl CheckerConfig {
    pub fn interval(&self) -> Duration {
        parse_duration(&self.interval).unwrap_or(Duration::from_secs(9))
    }

    pub fn alive_log_interval(&self) -> Duration {
        parse_duration(&self.alive_log_interval).unwrap_or(Duration::from_secs(600))
    }

    pub fn hard_restart_timeout(&self) -> Duration {
        parse_duration(&self.hard_restart_timeout).unwrap_or(Duration::from_secs(600))
    }

    pub fn hard_restart_poll_interval(&self) -> Duration {
        parse_duration(&self.hard_restart_poll_interval).unwrap_or(Duration::from_secs(10))
    }
}

/// Parse a duration string like "5s", "500ms", "3m", "1h".
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok()?.checked_mul(60).map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok()?.checked_mul(3600).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = FleetConfig::default();
        config.validate().unwrap();
        assert_eq!(config.environment, "production");
        assert_eq!(config.policy.restart_threshold, 3);
        assert_eq!(config.policy.soft_restart_cooldown(), Duration::from_secs(45));
        assert_eq!(config.policy.hard_restart_cooldown(), Duration::from_secs(180));
        assert_eq!(config.policy.escalation_decay(), Duration::from_secs(3600));
        assert_eq!(config.checker.interval(), Duration::from_secs(9));
        assert_eq!(config.routing.probe_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn parse_partial_file() {
        let toml_str = r#"
environment = "sandbox"

[policy]
restart_threshold = 5
initialization_grace = "3m"

[routing.gateways]
edge = 9000
"#;
        let config: FleetConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.environment, "sandbox");
        assert_eq!(config.policy.restart_threshold, 5);
        assert_eq!(config.policy.reporting_threshold, 3);
        assert_eq!(config.policy.initialization_grace(), Duration::from_secs(180));
        assert_eq!(config.routing.gateways.get("edge"), Some(&9000));
        assert!(!config.routing.gateways.contains_key("connex2"));
        assert_eq!(config.routing.default_port, 3000);
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleetmend.toml");
        std::fs::write(&path, "ssh_user = \"admin\"\n[checker]\nprobe_concurrency = 4\n").unwrap();

        let config = FleetConfig::from_file(&path).unwrap();
        assert_eq!(config.ssh_user, "admin");
        assert_eq!(config.checker.probe_concurrency, 4);
    }

    #[test]
    fn from_file_missing_is_io_error() {
        let err = FleetConfig::from_file(Path::new("/nonexistent/fleetmend.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn env_overrides_file_values() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("env", "staging"),
            ("SSH_KEYS_LOCATION", "/etc/keys"),
            ("NOTIFY_TOKEN", "tok"),
        ]);
        let mut config = FleetConfig::default();
        config.apply_env(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.environment, "staging");
        assert_eq!(config.ssh_keys_dir, Some(PathBuf::from("/etc/keys")));
        assert_eq!(config.notifications.token.as_deref(), Some("tok"));
        assert_eq!(config.notifications.url, None);
    }

    #[test]
    fn fleetmend_env_wins_over_legacy_env() {
        let vars: HashMap<&str, &str> =
            HashMap::from([("env", "staging"), ("FLEETMEND_ENV", "sandbox")]);
        let mut config = FleetConfig::default();
        config.apply_env(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.environment, "sandbox");
    }

    #[test]
    fn empty_env_value_keeps_default() {
        let mut config = FleetConfig::default();
        config.apply_env(|k| (k == "env").then(|| "  ".to_string()));
        assert_eq!(config.environment, "production");
    }

    #[test]
    fn validate_rejects_bad_duration() {
        let mut config = FleetConfig::default();
        config.policy.soft_restart_cooldown = "soon".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidDuration { field: "policy.soft_restart_cooldown", .. }
        ));
    }

    #[test]
    fn validate_rejects_overflowing_duration() {
        let mut config = FleetConfig::default();
        config.checker.hard_restart_timeout = "307445734561825861m".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidDuration { field: "checker.hard_restart_timeout", .. }
        ));
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let mut config = FleetConfig::default();
        config.checker.interval = "0s".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_allows_zero_grace() {
        let mut config = FleetConfig::default();
        config.policy.initialization_grace = "0s".to_string();
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = FleetConfig::default();
        config.checker.probe_concurrency = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("abc"), None);
        assert_eq!(parse_duration("307445734561825861m"), None);
        assert_eq!(parse_duration("5124095576030432h"), None);
    }
}
