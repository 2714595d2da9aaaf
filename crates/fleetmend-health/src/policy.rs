//! Per-instance remediation state machine.
//!
//! Evaluation of one instance in one cycle:
//!
//! 1. [`RemediationPolicy::precheck`] skips instances in cooldown, then
//!    instances still inside their initialization grace.
//! 2. The caller probes the instance.
//! 3. [`RemediationPolicy::apply`] folds the outcome into the
//!    [`RemediationStore`] and performs at most one remediation.
//!
//! The escalation check uses the count *before* this remediation
//! increments it.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use fleetmend_core::config::PolicyConfig;
use fleetmend_state::{InstanceDescriptor, RemediationStore, remediation::deadline};

use crate::gateway::Gateway;
use crate::prober::ProbeError;
use crate::restart::HardRestartSupervisor;

/// Thresholds and windows the policy runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySettings {
    /// Remediate once consecutive failures exceed this.
    pub restart_threshold: u32,
    /// Notify (or terminate) once this many escalations are already recorded.
    pub reporting_threshold: u32,
    pub initialization_grace: Duration,
    pub soft_restart_cooldown: Duration,
    pub hard_restart_cooldown: Duration,
    pub escalation_decay: Duration,
}

impl From<&PolicyConfig> for PolicySettings {
    fn from(config: &PolicyConfig) -> Self {
        Self {
            restart_threshold: config.restart_threshold,
            reporting_threshold: config.reporting_threshold,
            initialization_grace: config.initialization_grace(),
            soft_restart_cooldown: config.soft_restart_cooldown(),
            hard_restart_cooldown: config.hard_restart_cooldown(),
            escalation_decay: config.escalation_decay(),
        }
    }
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self::from(&PolicyConfig::default())
    }
}

/// Why an instance was not probed this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A recent remediation is still settling.
    Cooldown,
    /// The instance launched inside the initialization grace.
    Starting,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cooldown => write!(f, "cooldown"),
            Self::Starting => write!(f, "starting"),
        }
    }
}

/// Result of a health probe, as seen by the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Healthy,
    Unhealthy,
    /// The probe could not complete; counted as a failure.
    Error(String),
}

impl From<Result<bool, ProbeError>> for ProbeOutcome {
    fn from(result: Result<bool, ProbeError>) -> Self {
        match result {
            Ok(true) => Self::Healthy,
            Ok(false) => Self::Unhealthy,
            Err(e) => Self::Error(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemediationAction {
    SoftRestart,
    HardRestart,
    Terminated,
    /// The terminate call was rejected; bookkeeping is kept.
    TerminateFailed,
}

/// What the policy did with one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Skipped(SkipReason),
    Healthy {
        /// The instance had failures before this observation.
        recovered: bool,
    },
    Faulty {
        failures: u32,
    },
    Remediated {
        failures: u32,
        action: RemediationAction,
        /// Operators were alerted as part of this remediation.
        notified: bool,
    },
}

#[derive(Debug, Clone, Default)]
pub struct RemediationPolicy {
    settings: PolicySettings,
}

impl RemediationPolicy {
    pub fn new(settings: PolicySettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &PolicySettings {
        &self.settings
    }

    /// Skip checks, run before probing. Cooldown wins over grace.
    pub fn precheck(
        &self,
        store: &RemediationStore,
        instance: &InstanceDescriptor,
        now: DateTime<Utc>,
    ) -> Option<SkipReason> {
        if store.in_cooldown(&instance.instance_id, now) {
            return Some(SkipReason::Cooldown);
        }
        if now < deadline(instance.launch_time, self.settings.initialization_grace) {
            return Some(SkipReason::Starting);
        }
        None
    }

    /// Fold a probe outcome into the store, remediating if due.
    pub async fn apply(
        &self,
        store: &mut RemediationStore,
        instance: &InstanceDescriptor,
        outcome: ProbeOutcome,
        now: DateTime<Utc>,
        gateway: &Gateway,
        supervisor: &HardRestartSupervisor,
    ) -> Decision {
        match outcome {
            ProbeOutcome::Healthy => self.on_healthy(store, instance, now),
            ProbeOutcome::Unhealthy => {
                self.on_faulty(store, instance, now, gateway, supervisor)
                    .await
            }
            ProbeOutcome::Error(reason) => {
                warn!(
                    instance_id = %instance.instance_id,
                    error = %reason,
                    "health check could not complete"
                );
                self.on_faulty(store, instance, now, gateway, supervisor)
                    .await
            }
        }
    }

    fn on_healthy(
        &self,
        store: &mut RemediationStore,
        instance: &InstanceDescriptor,
        now: DateTime<Utc>,
    ) -> Decision {
        let id = instance.instance_id.as_str();
        let recovered = store.consecutive_failures(id) > 0;
        if recovered {
            info!(
                instance_id = %id,
                failures = store.consecutive_failures(id),
                "service back to normal"
            );
        }
        if store.decay_escalation(id, now) {
            info!(instance_id = %id, "escalation count reset");
        }
        store.reset_failures(id);
        store.clear_cooldown(id);
        Decision::Healthy { recovered }
    }

    async fn on_faulty(
        &self,
        store: &mut RemediationStore,
        instance: &InstanceDescriptor,
        now: DateTime<Utc>,
        gateway: &Gateway,
        supervisor: &HardRestartSupervisor,
    ) -> Decision {
        let id = instance.instance_id.as_str();
        let failures = store.record_failure(id);
        warn!(
            instance_id = %id,
            name = %instance.instance_name,
            failures,
            "instance failed health check"
        );
        if failures <= self.settings.restart_threshold {
            return Decision::Faulty { failures };
        }

        let prior = store.escalation_count(id);
        let mut notified = false;
        if prior >= self.settings.reporting_threshold {
            if instance.in_auto_scaling_group() {
                warn!(
                    instance_id = %id,
                    group = instance.auto_scaling_group.as_deref().unwrap_or_default(),
                    escalations = prior,
                    "terminating instance for replacement by its autoscaling group"
                );
                return Decision::Remediated {
                    failures,
                    action: terminate(store, instance, gateway).await,
                    notified: false,
                };
            }
            if let Err(e) = gateway.notifier.notify(instance).await {
                warn!(instance_id = %id, error = %e, "failure notification not delivered");
            }
            notified = true;
        }

        let escalations = store.escalate(id, now, self.settings.escalation_decay);
        error!(instance_id = %id, failures, escalations, "instance is out, restarting service");

        match gateway.restart_service(instance).await {
            Ok(()) => {
                info!(instance_id = %id, "service restarted");
                store.start_cooldown(id, now, self.settings.soft_restart_cooldown);
                Decision::Remediated {
                    failures,
                    action: RemediationAction::SoftRestart,
                    notified,
                }
            }
            Err(e) if instance.terminate_on_fault => {
                warn!(instance_id = %id, error = %e, "service restart failed, terminating instance");
                Decision::Remediated {
                    failures,
                    action: terminate(store, instance, gateway).await,
                    notified,
                }
            }
            Err(e) => {
                error!(instance_id = %id, error = %e, "service restart failed, restarting instance");
                supervisor.spawn(id);
                store.hard_restart_started(id);
                store.start_cooldown(id, now, self.settings.hard_restart_cooldown);
                Decision::Remediated {
                    failures,
                    action: RemediationAction::HardRestart,
                    notified,
                }
            }
        }
    }
}

/// Terminate an instance; its bookkeeping is dropped once the call succeeds.
async fn terminate(
    store: &mut RemediationStore,
    instance: &InstanceDescriptor,
    gateway: &Gateway,
) -> RemediationAction {
    let id = instance.instance_id.as_str();
    match gateway.cloud.terminate(id).await {
        Ok(()) => {
            info!(instance_id = %id, "instance terminated");
            store.forget(id);
            RemediationAction::Terminated
        }
        Err(e) => {
            error!(instance_id = %id, error = %e, "terminate failed");
            RemediationAction::TerminateFailed
        }
    }
}
