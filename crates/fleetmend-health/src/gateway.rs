//! Collaborator boundary: fleet discovery and remote actions.
//!
//! The checker never talks to a cloud API or a remote shell directly. It
//! goes through these traits, injected at startup, so the remediation logic
//! can be driven by in-memory fakes in tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

use fleetmend_core::{InstanceRunState, RawInstance, TagFilter};
use fleetmend_state::InstanceDescriptor;

/// Boxed future alias for collaborator calls.
pub type GatewayFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, GatewayError>> + Send + 'a>>;

/// Errors reported by collaborators.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// Something required for the action is missing (key material, tags).
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// A remote or local command ran and failed.
    #[error("command failed: {0}")]
    Command(String),

    /// The cloud control plane rejected or failed the call.
    #[error("cloud api error: {0}")]
    Api(String),

    /// The collaborator returned data that could not be interpreted.
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Resolves the monitored instance set.
pub trait FleetDiscovery: Send + Sync {
    fn discover<'a>(&'a self, filter: &'a TagFilter) -> GatewayFuture<'a, Vec<RawInstance>>;
}

/// Runs a command on a live host over an authenticated session.
pub trait RemoteCommand: Send + Sync {
    /// `key_name` names the credential to authenticate with.
    fn run<'a>(
        &'a self,
        address: &'a str,
        key_name: Option<&'a str>,
        command: &'a str,
    ) -> GatewayFuture<'a, ()>;
}

/// Cloud control plane operations on a single instance.
pub trait CloudControl: Send + Sync {
    fn stop<'a>(&'a self, instance_id: &'a str) -> GatewayFuture<'a, ()>;

    fn start<'a>(&'a self, instance_id: &'a str) -> GatewayFuture<'a, ()>;

    fn terminate<'a>(&'a self, instance_id: &'a str) -> GatewayFuture<'a, ()>;

    fn describe_state<'a>(&'a self, instance_id: &'a str) -> GatewayFuture<'a, InstanceRunState>;
}

/// Best-effort operator alerting.
pub trait Notifier: Send + Sync {
    fn notify<'a>(&'a self, instance: &'a InstanceDescriptor) -> GatewayFuture<'a, ()>;
}

/// The set of collaborators the checker acts through.
#[derive(Clone)]
pub struct Gateway {
    pub discovery: Arc<dyn FleetDiscovery>,
    pub remote: Arc<dyn RemoteCommand>,
    pub cloud: Arc<dyn CloudControl>,
    pub notifier: Arc<dyn Notifier>,
}

impl Gateway {
    /// Restart the service process named by the instance's repository tag.
    pub async fn restart_service(&self, instance: &InstanceDescriptor) -> Result<(), GatewayError> {
        let command = restart_command(instance)?;
        let address = instance.remote_address().ok_or_else(|| {
            GatewayError::Precondition(format!("{} has no address", instance.instance_id))
        })?;
        self.remote
            .run(address, instance.key_name.as_deref(), &command)
            .await
    }
}

/// The service restart command for an instance.
pub fn restart_command(instance: &InstanceDescriptor) -> Result<String, GatewayError> {
    let service = instance.repository.trim();
    if service.is_empty() {
        return Err(GatewayError::Precondition(format!(
            "{} has no service name",
            instance.instance_id
        )));
    }
    Ok(format!("sudo service {service} restart"))
}
