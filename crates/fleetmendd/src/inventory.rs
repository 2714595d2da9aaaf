//! File-backed fleet for dry runs and local testing.
//!
//! The inventory is a TOML file of `[[instances]]` tables, re-read on every
//! discovery so it can be edited while the daemon runs:
//!
//! ```toml
//! [[instances]]
//! instance_id = "i-local-1"
//! launch_time = "2024-05-01T10:00:00Z"
//! private_ip = "127.0.0.1"
//! tags = { Environment = "production", Repository = "accounts" }
//! ```
//!
//! Lifecycle calls never leave the process. They are logged and tracked in
//! memory so hard restarts and terminations behave plausibly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Deserialize;
use tracing::info;

use fleetmend_core::{InstanceRunState, RawInstance, TagFilter};
use fleetmend_health::gateway::GatewayFuture;
use fleetmend_health::{CloudControl, FleetDiscovery, GatewayError};

#[derive(Debug, Default, Deserialize)]
struct InventoryFile {
    #[serde(default)]
    instances: Vec<RawInstance>,
}

pub struct StaticInventory {
    path: PathBuf,
    states: Mutex<HashMap<String, InstanceRunState>>,
}

impl StaticInventory {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            states: Mutex::new(HashMap::new()),
        }
    }

    async fn load(&self) -> Result<Vec<RawInstance>, GatewayError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| GatewayError::Api(format!("{}: {e}", self.path.display())))?;
        let file: InventoryFile =
            toml::from_str(&content).map_err(|e| GatewayError::Malformed(e.to_string()))?;
        Ok(file.instances)
    }

    fn set_state(&self, instance_id: &str, state: InstanceRunState) {
        if let Ok(mut states) = self.states.lock() {
            states.insert(instance_id.to_string(), state);
        }
    }

    fn state_of(&self, instance_id: &str) -> Option<InstanceRunState> {
        self.states
            .lock()
            .ok()
            .and_then(|states| states.get(instance_id).cloned())
    }
}

fn state_name(state: &InstanceRunState) -> &str {
    match state {
        InstanceRunState::Pending => "pending",
        InstanceRunState::Running => "running",
        InstanceRunState::Stopping => "stopping",
        InstanceRunState::Stopped => "stopped",
        InstanceRunState::ShuttingDown => "shutting-down",
        InstanceRunState::Terminated => "terminated",
        InstanceRunState::Other(name) => name.as_str(),
    }
}

impl FleetDiscovery for StaticInventory {
    fn discover<'a>(&'a self, filter: &'a TagFilter) -> GatewayFuture<'a, Vec<RawInstance>> {
        Box::pin(async move {
            let mut instances = self.load().await?;
            for instance in &mut instances {
                if let Some(state) = self.state_of(&instance.instance_id) {
                    instance.state = state_name(&state).to_string();
                }
            }
            instances.retain(|i| filter.matches(i));
            Ok(instances)
        })
    }
}

impl CloudControl for StaticInventory {
    fn stop<'a>(&'a self, instance_id: &'a str) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            info!(%instance_id, "inventory: stop");
            self.set_state(instance_id, InstanceRunState::Stopped);
            Ok(())
        })
    }

    fn start<'a>(&'a self, instance_id: &'a str) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            info!(%instance_id, "inventory: start");
            self.set_state(instance_id, InstanceRunState::Running);
            Ok(())
        })
    }

    fn terminate<'a>(&'a self, instance_id: &'a str) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            info!(%instance_id, "inventory: terminate");
            self.set_state(instance_id, InstanceRunState::Terminated);
            Ok(())
        })
    }

    fn describe_state<'a>(&'a self, instance_id: &'a str) -> GatewayFuture<'a, InstanceRunState> {
        Box::pin(async move {
            if let Some(state) = self.state_of(instance_id) {
                return Ok(state);
            }
            self.load()
                .await?
                .into_iter()
                .find(|i| i.instance_id == instance_id)
                .map(|i| InstanceRunState::from_name(&i.state))
                .ok_or_else(|| GatewayError::Api(format!("{instance_id} not in inventory")))
        })
    }
}
