//! Supervised hard restarts (VM stop, then start).
//!
//! Each hard restart runs as its own task, bounded by an overall timeout.
//! Its terminal state is sent back to the checker over an unbounded mpsc
//! channel and folded into the remediation store at the next cycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use fleetmend_core::InstanceRunState;
use fleetmend_state::HardRestartState;

use crate::gateway::{CloudControl, GatewayError};

/// Terminal state of one hard restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardRestartReport {
    pub instance_id: String,
    pub state: HardRestartState,
}

pub struct HardRestartSupervisor {
    cloud: Arc<dyn CloudControl>,
    timeout: Duration,
    poll_interval: Duration,
    reports: mpsc::UnboundedSender<HardRestartReport>,
}

impl HardRestartSupervisor {
    /// Create a supervisor and the receiver its reports arrive on.
    pub fn new(
        cloud: Arc<dyn CloudControl>,
        timeout: Duration,
        poll_interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<HardRestartReport>) {
        let (reports, rx) = mpsc::unbounded_channel();
        let supervisor = Self {
            cloud,
            timeout,
            poll_interval,
            reports,
        };
        (supervisor, rx)
    }

    /// Start a hard restart in the background.
    pub fn spawn(&self, instance_id: &str) -> JoinHandle<HardRestartState> {
        let cloud = self.cloud.clone();
        let reports = self.reports.clone();
        let timeout = self.timeout;
        let poll_interval = self.poll_interval;
        let instance_id = instance_id.to_string();

        tokio::spawn(async move {
            let state = run_hard_restart(cloud.as_ref(), &instance_id, poll_interval, timeout).await;
            match &state {
                HardRestartState::Succeeded => info!(%instance_id, "hard restart finished"),
                other => warn!(%instance_id, state = ?other, "hard restart did not complete"),
            }
            // The checker may already be gone during shutdown.
            let _ = reports.send(HardRestartReport {
                instance_id,
                state: state.clone(),
            });
            state
        })
    }
}

/// Stop the instance, wait for `stopped`, start it, wait for `running`.
pub async fn run_hard_restart(
    cloud: &dyn CloudControl,
    instance_id: &str,
    poll_interval: Duration,
    timeout: Duration,
) -> HardRestartState {
    match tokio::time::timeout(timeout, stop_then_start(cloud, instance_id, poll_interval)).await {
        Ok(Ok(())) => HardRestartState::Succeeded,
        Ok(Err(e)) => HardRestartState::Failed(e.to_string()),
        Err(_) => HardRestartState::TimedOut,
    }
}

async fn stop_then_start(
    cloud: &dyn CloudControl,
    instance_id: &str,
    poll_interval: Duration,
) -> Result<(), GatewayError> {
    info!(%instance_id, "stopping instance");
    cloud.stop(instance_id).await?;
    wait_for_state(cloud, instance_id, InstanceRunState::Stopped, poll_interval).await?;
    info!(%instance_id, "instance stopped, starting");

    cloud.start(instance_id).await?;
    wait_for_state(cloud, instance_id, InstanceRunState::Running, poll_interval).await?;
    info!(%instance_id, "instance running");
    Ok(())
}

async fn wait_for_state(
    cloud: &dyn CloudControl,
    instance_id: &str,
    target: InstanceRunState,
    poll_interval: Duration,
) -> Result<(), GatewayError> {
    loop {
        tokio::time::sleep(poll_interval).await;
        let state = cloud.describe_state(instance_id).await?;
        if state == target {
            return Ok(());
        }
        if state == InstanceRunState::Terminated {
            return Err(GatewayError::Api(format!(
                "{instance_id} was terminated during restart"
            )));
        }
        debug!(%instance_id, ?state, ?target, "waiting for instance state");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, FakeFleet};

    const POLL: Duration = Duration::from_secs(10);
    const TIMEOUT: Duration = Duration::from_secs(600);

    #[tokio::test(start_paused = true)]
    async fn stopped_then_running_succeeds() {
        let fleet = FakeFleet::new();
        fleet.script_states(&[
            InstanceRunState::Stopping,
            InstanceRunState::Stopped,
            InstanceRunState::Pending,
            InstanceRunState::Running,
        ]);

        let state = run_hard_restart(fleet.as_ref(), "i-1", POLL, TIMEOUT).await;

        assert_eq!(state, HardRestartState::Succeeded);
        let calls = fleet.calls();
        assert_eq!(calls.first(), Some(&Call::Stop("i-1".into())));
        let start_at = calls
            .iter()
            .position(|c| *c == Call::Start("i-1".into()))
            .unwrap();
        // Started only after two polls saw the instance stop.
        assert_eq!(calls[1..start_at].len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn never_running_times_out() {
        let fleet = FakeFleet::new();
        fleet.script_states(&[InstanceRunState::Stopped, InstanceRunState::Pending]);

        let state = run_hard_restart(fleet.as_ref(), "i-1", POLL, TIMEOUT).await;

        assert_eq!(state, HardRestartState::TimedOut);
        assert!(fleet.calls().contains(&Call::Start("i-1".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn terminated_while_waiting_fails() {
        let fleet = FakeFleet::new();
        fleet.script_states(&[InstanceRunState::Terminated]);

        let state = run_hard_restart(fleet.as_ref(), "i-1", POLL, TIMEOUT).await;

        assert!(matches!(state, HardRestartState::Failed(_)));
        assert!(!fleet.calls().contains(&Call::Start("i-1".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_restart_reports_back() {
        let fleet = FakeFleet::new();
        fleet.script_states(&[InstanceRunState::Stopped, InstanceRunState::Running]);
        let (supervisor, mut reports) = HardRestartSupervisor::new(fleet.clone(), TIMEOUT, POLL);

        let handle = supervisor.spawn("i-9");
        assert_eq!(handle.await.unwrap(), HardRestartState::Succeeded);

        let report = reports.recv().await.unwrap();
        assert_eq!(
            report,
            HardRestartReport {
                instance_id: "i-9".into(),
                state: HardRestartState::Succeeded,
            }
        );
    }
}
