//! EC2 discovery and lifecycle control through the `aws` command line.

use std::process::Stdio;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use fleetmend_core::{InstanceRunState, RawInstance, TagFilter};
use fleetmend_health::gateway::GatewayFuture;
use fleetmend_health::{CloudControl, FleetDiscovery, GatewayError};

#[derive(Debug, Clone)]
pub struct AwsCliFleet {
    program: String,
    region: Option<String>,
}

impl Default for AwsCliFleet {
    fn default() -> Self {
        Self {
            program: "aws".to_string(),
            region: None,
        }
    }
}

impl AwsCliFleet {
    pub fn new(region: Option<String>) -> Self {
        Self {
            region,
            ..Self::default()
        }
    }

    /// Run `aws ec2 <args>` and return stdout.
    async fn ec2(&self, args: &[String]) -> Result<Vec<u8>, GatewayError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("ec2").args(args).args(["--output", "json"]);
        if let Some(region) = &self.region {
            cmd.args(["--region", region]);
        }
        cmd.stdin(Stdio::null());

        debug!(program = %self.program, ?args, "running aws cli");
        let output = cmd
            .output()
            .await
            .map_err(|e| GatewayError::Command(format!("{}: {e}", self.program)))?;
        if !output.status.success() {
            return Err(GatewayError::Api(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(output.stdout)
    }

    async fn lifecycle(&self, action: &str, instance_id: &str) -> Result<(), GatewayError> {
        self.ec2(&[action.to_string(), "--instance-ids".into(), instance_id.into()])
            .await?;
        info!(%instance_id, action, "instance lifecycle call accepted");
        Ok(())
    }
}

impl FleetDiscovery for AwsCliFleet {
    fn discover<'a>(&'a self, filter: &'a TagFilter) -> GatewayFuture<'a, Vec<RawInstance>> {
        Box::pin(async move {
            let mut args = vec!["describe-instances".to_string()];
            args.extend(filter_args(filter));
            let stdout = self.ec2(&args).await?;
            parse_describe_instances(&stdout)
        })
    }
}

impl CloudControl for AwsCliFleet {
    fn stop<'a>(&'a self, instance_id: &'a str) -> GatewayFuture<'a, ()> {
        Box::pin(self.lifecycle("stop-instances", instance_id))
    }

    fn start<'a>(&'a self, instance_id: &'a str) -> GatewayFuture<'a, ()> {
        Box::pin(self.lifecycle("start-instances", instance_id))
    }

    fn terminate<'a>(&'a self, instance_id: &'a str) -> GatewayFuture<'a, ()> {
        Box::pin(self.lifecycle("terminate-instances", instance_id))
    }

    fn describe_state<'a>(&'a self, instance_id: &'a str) -> GatewayFuture<'a, InstanceRunState> {
        Box::pin(async move {
            let args = [
                "describe-instances".to_string(),
                "--instance-ids".to_string(),
                instance_id.to_string(),
            ];
            let stdout = self.ec2(&args).await?;
            let instance = parse_describe_instances(&stdout)?
                .into_iter()
                .find(|i| i.instance_id == instance_id)
                .ok_or_else(|| GatewayError::Malformed(format!("{instance_id} not in response")))?;
            Ok(InstanceRunState::from_name(&instance.state))
        })
    }
}

/// `--filters Name=<name>,Values=<v1>,<v2> ...`
pub fn filter_args(filter: &TagFilter) -> Vec<String> {
    if filter.filters.is_empty() {
        return Vec::new();
    }
    let mut args = vec!["--filters".to_string()];
    args.extend(
        filter
            .filters
            .iter()
            .map(|f| format!("Name={},Values={}", f.name, f.values.join(","))),
    );
    args
}

// ── describe-instances output ──────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstancesOutput {
    #[serde(default)]
    reservations: Vec<Reservation>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Reservation {
    #[serde(default)]
    instances: Vec<Ec2Instance>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Ec2Instance {
    instance_id: String,
    launch_time: DateTime<Utc>,
    private_ip_address: Option<String>,
    public_ip_address: Option<String>,
    key_name: Option<String>,
    state: Ec2State,
    #[serde(default)]
    tags: Vec<Ec2Tag>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Ec2State {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Ec2Tag {
    key: String,
    #[serde(default)]
    value: String,
}

/// Flatten `describe-instances` JSON into raw instances, in response order.
pub fn parse_describe_instances(json: &[u8]) -> Result<Vec<RawInstance>, GatewayError> {
    let output: DescribeInstancesOutput =
        serde_json::from_slice(json).map_err(|e| GatewayError::Malformed(e.to_string()))?;
    Ok(output
        .reservations
        .into_iter()
        .flat_map(|r| r.instances)
        .map(|i| RawInstance {
            instance_id: i.instance_id,
            launch_time: i.launch_time,
            private_ip: i.private_ip_address,
            public_ip: i.public_ip_address,
            key_name: i.key_name,
            state: i.state.name,
            tags: i.tags.into_iter().map(|t| (t.key, t.value)).collect(),
        })
        .collect())
}
