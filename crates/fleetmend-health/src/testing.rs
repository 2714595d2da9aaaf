//! In-memory collaborators for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use fleetmend_core::{InstanceRunState, RawInstance, TagFilter};
use fleetmend_state::InstanceDescriptor;

use crate::gateway::{
    CloudControl, FleetDiscovery, Gateway, GatewayError, GatewayFuture, Notifier, RemoteCommand,
};
use crate::prober::{HealthProbe, ProbeError, ProbeFuture};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Discover,
    Run { address: String, command: String },
    Stop(String),
    Start(String),
    Terminate(String),
    Describe(String),
    Notify(String),
}

/// Scriptable fleet implementing every collaborator trait.
#[derive(Default)]
pub(crate) struct FakeFleet {
    pub instances: Mutex<Vec<RawInstance>>,
    pub discovery_error: Mutex<Option<GatewayError>>,
    pub restart_error: Mutex<Option<GatewayError>>,
    pub terminate_error: Mutex<Option<GatewayError>>,
    /// States returned by successive `describe_state` calls. Once drained,
    /// `describe_state` keeps returning the last one.
    pub states: Mutex<VecDeque<InstanceRunState>>,
    pub calls: Mutex<Vec<Call>>,
}

impl FakeFleet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn gateway(self: &Arc<Self>) -> Gateway {
        Gateway {
            discovery: self.clone(),
            remote: self.clone(),
            cloud: self.clone(),
            notifier: self.clone(),
        }
    }

    pub fn set_instances(&self, instances: Vec<RawInstance>) {
        *self.instances.lock().unwrap() = instances;
    }

    pub fn fail_restarts(&self, error: Option<GatewayError>) {
        *self.restart_error.lock().unwrap() = error;
    }

    pub fn fail_discovery(&self, error: Option<GatewayError>) {
        *self.discovery_error.lock().unwrap() = error;
    }

    pub fn script_states(&self, states: &[InstanceRunState]) {
        *self.states.lock().unwrap() = states.iter().cloned().collect();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl FleetDiscovery for FakeFleet {
    fn discover<'a>(&'a self, _filter: &'a TagFilter) -> GatewayFuture<'a, Vec<RawInstance>> {
        Box::pin(async move {
            self.record(Call::Discover);
            if let Some(e) = self.discovery_error.lock().unwrap().clone() {
                return Err(e);
            }
            Ok(self.instances.lock().unwrap().clone())
        })
    }
}

impl RemoteCommand for FakeFleet {
    fn run<'a>(
        &'a self,
        address: &'a str,
        _key_name: Option<&'a str>,
        command: &'a str,
    ) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            self.record(Call::Run {
                address: address.to_string(),
                command: command.to_string(),
            });
            match self.restart_error.lock().unwrap().clone() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })
    }
}

impl CloudControl for FakeFleet {
    fn stop<'a>(&'a self, instance_id: &'a str) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            self.record(Call::Stop(instance_id.to_string()));
            Ok(())
        })
    }

    fn start<'a>(&'a self, instance_id: &'a str) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            self.record(Call::Start(instance_id.to_string()));
            Ok(())
        })
    }

    fn terminate<'a>(&'a self, instance_id: &'a str) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            self.record(Call::Terminate(instance_id.to_string()));
            match self.terminate_error.lock().unwrap().clone() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })
    }

    fn describe_state<'a>(&'a self, instance_id: &'a str) -> GatewayFuture<'a, InstanceRunState> {
        Box::pin(async move {
            self.record(Call::Describe(instance_id.to_string()));
            let mut states = self.states.lock().unwrap();
            let state = if states.len() > 1 {
                states.pop_front()
            } else {
                states.front().cloned()
            };
            Ok(state.unwrap_or(InstanceRunState::Running))
        })
    }
}

impl Notifier for FakeFleet {
    fn notify<'a>(&'a self, instance: &'a InstanceDescriptor) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            self.record(Call::Notify(instance.instance_id.clone()));
            Ok(())
        })
    }
}

/// Prober returning scripted results per instance; unscripted instances
/// are healthy.
#[derive(Default)]
pub(crate) struct FakeProber {
    results: Mutex<HashMap<String, Result<bool, ProbeError>>>,
    probed: Mutex<Vec<String>>,
}

impl FakeProber {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, instance_id: &str, result: Result<bool, ProbeError>) {
        self.results
            .lock()
            .unwrap()
            .insert(instance_id.to_string(), result);
    }

    pub fn probed(&self) -> Vec<String> {
        self.probed.lock().unwrap().clone()
    }

    pub fn clear_probed(&self) {
        self.probed.lock().unwrap().clear();
    }
}

impl HealthProbe for FakeProber {
    fn probe<'a>(&'a self, instance: &'a mut InstanceDescriptor) -> ProbeFuture<'a> {
        Box::pin(async move {
            self.probed.lock().unwrap().push(instance.instance_id.clone());
            let result = self
                .results
                .lock()
                .unwrap()
                .get(&instance.instance_id)
                .cloned()
                .unwrap_or(Ok(true));
            let now = Utc::now();
            match &result {
                Ok(true) => instance.mark_online(now),
                Ok(false) => instance.mark_offline(now, "status 500".to_string()),
                Err(e) => instance.mark_offline(now, e.to_string()),
            }
            result
        })
    }
}

/// A raw instance that passes the standard fleet filter.
pub(crate) fn raw_instance(id: &str, launched: DateTime<Utc>) -> RawInstance {
    let tags = [
        ("Environment", "production"),
        ("Service-Type", "http"),
        ("Online", "yes"),
        ("Nginx-Configuration", "api"),
        ("Repository", "accounts"),
        ("Path-Name", "accounts"),
    ];
    RawInstance {
        instance_id: id.to_string(),
        launch_time: launched,
        private_ip: Some("10.0.0.10".to_string()),
        public_ip: None,
        key_name: Some("prod".to_string()),
        state: "running".to_string(),
        tags: tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}
