//! fleetmend-health — health checking and self-healing for a cloud fleet.
//!
//! # Architecture
//!
//! ```text
//! FleetChecker (one long-lived task)
//!   ├── FleetDiscovery::discover(TagFilter) → Vec<RawInstance>
//!   ├── RemediationPolicy::precheck()  → skip (cooldown / starting) or probe
//!   ├── HealthProbe::probe()           → fan-out, bounded by a semaphore
//!   ├── RemediationPolicy::apply()     → sequential, mutates RemediationStore
//!   │     ├── soft restart   (RemoteCommand)
//!   │     ├── hard restart   (HardRestartSupervisor → CloudControl)
//!   │     ├── terminate      (CloudControl)
//!   │     └── notify         (Notifier)
//!   └── SnapshotPublisher::publish()   → whole-snapshot swap
//! ```
//!
//! # Escalation
//!
//! A failing instance is restarted once its consecutive failures exceed the
//! restart threshold. A soft (service) restart is always tried first; a
//! hard (VM stop/start) restart only follows a failed soft restart. Each
//! remediation bumps an escalation counter that decays an hour after the
//! last escalation. Once the counter has already reached the reporting
//! threshold, operators are notified, or the instance is terminated if an
//! autoscaling group will replace it.

pub mod checker;
pub mod gateway;
pub mod policy;
pub mod prober;
pub mod restart;

#[cfg(test)]
mod testing;

pub use checker::{CycleReport, FleetChecker};
pub use gateway::{
    CloudControl, FleetDiscovery, Gateway, GatewayError, Notifier, RemoteCommand,
};
pub use policy::{
    Decision, PolicySettings, ProbeOutcome, RemediationAction, RemediationPolicy, SkipReason,
};
pub use prober::{HealthProbe, HttpProber, ProbeError};
pub use restart::{HardRestartReport, HardRestartSupervisor, run_hard_restart};
