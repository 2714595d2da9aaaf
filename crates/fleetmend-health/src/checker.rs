//! The periodic discover, probe, remediate, publish loop.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use fleetmend_core::{FleetConfig, TagFilter};
use fleetmend_state::{
    FleetSnapshot, InstanceDescriptor, InstanceId, RemediationStore, SNAPSHOT_VERSION,
    SnapshotPublisher,
};

use crate::gateway::{Gateway, GatewayError};
use crate::policy::{Decision, PolicySettings, ProbeOutcome, RemediationPolicy};
use crate::prober::HealthProbe;
use crate::restart::{HardRestartReport, HardRestartSupervisor};

/// What one cycle did, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub discovered: usize,
    pub decisions: Vec<(InstanceId, Decision)>,
}

impl CycleReport {
    pub fn skipped(&self) -> usize {
        self.decisions
            .iter()
            .filter(|(_, d)| matches!(d, Decision::Skipped(_)))
            .count()
    }

    pub fn remediated(&self) -> usize {
        self.decisions
            .iter()
            .filter(|(_, d)| matches!(d, Decision::Remediated { .. }))
            .count()
    }

    pub fn decision(&self, instance_id: &str) -> Option<&Decision> {
        self.decisions
            .iter()
            .find(|(id, _)| id == instance_id)
            .map(|(_, d)| d)
    }
}

pub struct FleetChecker {
    filter: TagFilter,
    policy: RemediationPolicy,
    store: RemediationStore,
    gateway: Gateway,
    prober: Arc<dyn HealthProbe>,
    supervisor: HardRestartSupervisor,
    reports: mpsc::UnboundedReceiver<HardRestartReport>,
    publisher: SnapshotPublisher,
    interval: Duration,
    alive_log_interval: Duration,
    probe_concurrency: usize,
    last_alive_log: Instant,
    last_instance_count: usize,
}

impl FleetChecker {
    pub fn new(
        config: &FleetConfig,
        gateway: Gateway,
        prober: Arc<dyn HealthProbe>,
        publisher: SnapshotPublisher,
    ) -> Self {
        let (supervisor, reports) = HardRestartSupervisor::new(
            gateway.cloud.clone(),
            config.checker.hard_restart_timeout(),
            config.checker.hard_restart_poll_interval(),
        );
        Self {
            filter: TagFilter::fleet(&config.environment, &config.checker.nginx_configurations),
            policy: RemediationPolicy::new(PolicySettings::from(&config.policy)),
            store: RemediationStore::new(),
            gateway,
            prober,
            supervisor,
            reports,
            publisher,
            interval: config.checker.interval(),
            alive_log_interval: config.checker.alive_log_interval(),
            probe_concurrency: config.checker.probe_concurrency.max(1),
            last_alive_log: Instant::now(),
            last_instance_count: 0,
        }
    }

    pub fn store(&self) -> &RemediationStore {
        &self.store
    }

    pub fn filter(&self) -> &TagFilter {
        &self.filter
    }

    /// Run until `shutdown` flips to true or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            probe_concurrency = self.probe_concurrency,
            "fleet checker started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_cycle().await {
                        Ok(report) => debug!(
                            discovered = report.discovered,
                            skipped = report.skipped(),
                            remediated = report.remediated(),
                            "cycle complete"
                        ),
                        Err(e) => error!(error = %e, "fleet discovery failed, keeping previous snapshot"),
                    }
                    self.log_alive();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("fleet checker stopping");
                        break;
                    }
                }
            }
        }
    }

    /// One full cycle. A discovery error aborts the cycle before anything
    /// is probed or published.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, GatewayError> {
        self.drain_restart_reports();

        let raw = self.gateway.discovery.discover(&self.filter).await?;
        let mut instances: Vec<InstanceDescriptor> =
            raw.iter().map(InstanceDescriptor::from_raw).collect();
        let count = instances.len();
        self.last_instance_count = count;

        let live: HashSet<&str> = instances.iter().map(|i| i.instance_id.as_str()).collect();
        let dropped = self.store.prune(|id| live.contains(id));
        if !dropped.is_empty() {
            debug!(instances = ?dropped, "dropped bookkeeping for instances no longer discovered");
        }

        let mut decisions: Vec<Option<Decision>> = vec![None; count];
        let mut sampled: Vec<DateTime<Utc>> = Vec::with_capacity(count);
        let permits = Arc::new(Semaphore::new(self.probe_concurrency));
        let mut probes = JoinSet::new();

        for (idx, instance) in instances.iter().enumerate() {
            let now = Utc::now();
            sampled.push(now);
            if let Some(reason) = self.policy.precheck(&self.store, instance, now) {
                info!(instance_id = %instance.instance_id, %reason, "instance skipped");
                decisions[idx] = Some(Decision::Skipped(reason));
                continue;
            }

            let prober = self.prober.clone();
            let permits = permits.clone();
            let mut instance = instance.clone();
            probes.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let result = prober.probe(&mut instance).await;
                (idx, instance, result)
            });
        }

        let mut outcomes: Vec<Option<ProbeOutcome>> = vec![None; count];
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((idx, probed, result)) => {
                    instances[idx] = probed;
                    outcomes[idx] = Some(ProbeOutcome::from(result));
                }
                Err(e) => error!(error = %e, "probe task failed"),
            }
        }

        for (idx, outcome) in outcomes.into_iter().enumerate() {
            let Some(outcome) = outcome else { continue };
            let decision = self
                .policy
                .apply(
                    &mut self.store,
                    &instances[idx],
                    outcome,
                    sampled[idx],
                    &self.gateway,
                    &self.supervisor,
                )
                .await;
            decisions[idx] = Some(decision);
        }

        let now = Utc::now();
        let remediation = instances
            .iter()
            .map(|i| self.store.summary(&i.instance_id, now))
            .collect();
        let report = CycleReport {
            discovered: count,
            decisions: instances
                .iter()
                .zip(decisions)
                .filter_map(|(i, d)| d.map(|d| (i.instance_id.clone(), d)))
                .collect(),
        };
        self.publisher.publish(FleetSnapshot {
            version: SNAPSHOT_VERSION.to_string(),
            timestamp: Some(now),
            instances,
            remediation,
        });
        Ok(report)
    }

    fn drain_restart_reports(&mut self) {
        while let Ok(report) = self.reports.try_recv() {
            debug!(instance_id = %report.instance_id, state = ?report.state, "hard restart report");
            self.store
                .hard_restart_finished(&report.instance_id, report.state);
        }
    }

    fn log_alive(&mut self) {
        if self.last_alive_log.elapsed() >= self.alive_log_interval {
            info!(instances = self.last_instance_count, "fleet checker alive");
            self.last_alive_log = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeDelta;
    use fleetmend_core::InstanceRunState;
    use fleetmend_state::{HardRestartState, ServiceStatus, SnapshotReader, snapshot_channel};

    use crate::policy::{RemediationAction, SkipReason};
    use crate::prober::ProbeError;
    use crate::testing::{Call, FakeFleet, FakeProber, raw_instance};

    fn long_ago() -> DateTime<Utc> {
        Utc::now() - TimeDelta::hours(1)
    }

    struct Harness {
        fleet: Arc<FakeFleet>,
        prober: Arc<FakeProber>,
        reader: SnapshotReader,
        checker: FleetChecker,
    }

    fn harness(config: FleetConfig) -> Harness {
        let fleet = FakeFleet::new();
        let prober = FakeProber::new();
        let (publisher, reader) = snapshot_channel();
        let checker = FleetChecker::new(&config, fleet.gateway(), prober.clone(), publisher);
        Harness {
            fleet,
            prober,
            reader,
            checker,
        }
    }

    #[tokio::test]
    async fn cycle_publishes_in_discovery_order() {
        let mut h = harness(FleetConfig::default());
        h.fleet.set_instances(vec![
            raw_instance("i-b", long_ago()),
            raw_instance("i-a", long_ago()),
            raw_instance("i-c", long_ago()),
        ]);
        h.prober.set("i-a", Ok(false));

        let report = h.checker.run_cycle().await.unwrap();

        assert_eq!(report.discovered, 3);
        let snap = h.reader.latest();
        let ids: Vec<_> = snap.instances.iter().map(|i| i.instance_id.as_str()).collect();
        assert_eq!(ids, ["i-b", "i-a", "i-c"]);
        assert!(snap.timestamp.is_some());
        assert_eq!(snap.instances[0].service_status, ServiceStatus::Online);
        assert_eq!(snap.instances[1].service_status, ServiceStatus::Offline);
        assert_eq!(snap.remediation[1].consecutive_failures, 1);
        assert_eq!(report.decision("i-a"), Some(&Decision::Faulty { failures: 1 }));
    }

    #[tokio::test]
    async fn discovery_failure_keeps_previous_snapshot() {
        let mut h = harness(FleetConfig::default());
        h.fleet.set_instances(vec![raw_instance("i-1", long_ago())]);
        h.checker.run_cycle().await.unwrap();
        let before = h.reader.latest();

        h.fleet
            .fail_discovery(Some(GatewayError::Api("throttled".into())));
        let err = h.checker.run_cycle().await.unwrap_err();

        assert_eq!(err, GatewayError::Api("throttled".into()));
        assert_eq!(*h.reader.latest(), *before);
    }

    #[tokio::test]
    async fn vanished_instance_bookkeeping_is_dropped() {
        let mut h = harness(FleetConfig::default());
        h.fleet.set_instances(vec![
            raw_instance("i-1", long_ago()),
            raw_instance("i-2", long_ago()),
        ]);
        h.prober.set("i-1", Ok(false));
        h.prober.set("i-2", Ok(false));
        h.checker.run_cycle().await.unwrap();

        h.fleet
            .fail_discovery(Some(GatewayError::Api("throttled".into())));
        h.checker.run_cycle().await.unwrap_err();
        assert_eq!(h.checker.store().consecutive_failures("i-1"), 1);

        h.fleet.fail_discovery(None);
        h.fleet.set_instances(vec![raw_instance("i-2", long_ago())]);
        h.checker.run_cycle().await.unwrap();

        assert_eq!(h.checker.store().consecutive_failures("i-1"), 0);
        assert_eq!(h.checker.store().consecutive_failures("i-2"), 2);
    }

    #[tokio::test]
    async fn just_launched_instance_is_not_probed() {
        let mut config = FleetConfig::default();
        config.policy.initialization_grace = "3m".into();
        let mut h = harness(config);
        h.fleet
            .set_instances(vec![raw_instance("i-new", Utc::now() - TimeDelta::seconds(1))]);

        let report = h.checker.run_cycle().await.unwrap();

        assert_eq!(report.decision("i-new"), Some(&Decision::Skipped(SkipReason::Starting)));
        assert!(h.prober.probed().is_empty());
        // Skipped instances are still published.
        assert_eq!(h.reader.latest().instances.len(), 1);
    }

    #[tokio::test]
    async fn fourth_failure_restarts_then_cooldown_skips() {
        let mut h = harness(FleetConfig::default());
        h.fleet.set_instances(vec![raw_instance("i-1", long_ago())]);
        h.prober.set("i-1", Ok(false));

        for expected in 1..=3 {
            let report = h.checker.run_cycle().await.unwrap();
            assert_eq!(report.decision("i-1"), Some(&Decision::Faulty { failures: expected }));
        }
        let report = h.checker.run_cycle().await.unwrap();
        assert_eq!(
            report.decision("i-1"),
            Some(&Decision::Remediated {
                failures: 4,
                action: RemediationAction::SoftRestart,
                notified: false,
            })
        );

        h.prober.clear_probed();
        let report = h.checker.run_cycle().await.unwrap();
        assert_eq!(report.decision("i-1"), Some(&Decision::Skipped(SkipReason::Cooldown)));
        assert!(h.prober.probed().is_empty());
        assert_eq!(h.fleet.count(|c| matches!(c, Call::Run { .. })), 1);
        assert!(h.reader.latest().remediation[0].cooldown_until.is_some());
    }

    #[tokio::test]
    async fn healthy_cycles_are_idempotent() {
        let mut h = harness(FleetConfig::default());
        h.fleet.set_instances(vec![
            raw_instance("i-1", long_ago()),
            raw_instance("i-2", long_ago()),
        ]);
        h.checker.run_cycle().await.unwrap();
        let first = h.checker.store().clone();

        h.checker.run_cycle().await.unwrap();
        assert_eq!(*h.checker.store(), first);
        assert_eq!(first, RemediationStore::new());
    }

    #[tokio::test]
    async fn probes_respect_concurrency_bound() {
        let mut config = FleetConfig::default();
        config.checker.probe_concurrency = 2;
        let mut h = harness(config);
        let instances = (0..10)
            .map(|n| raw_instance(&format!("i-{n}"), long_ago()))
            .collect();
        h.fleet.set_instances(instances);
        h.prober
            .set("i-7", Err(ProbeError::Connect("connection refused".into())));

        let report = h.checker.run_cycle().await.unwrap();

        assert_eq!(h.prober.probed().len(), 10);
        assert_eq!(report.decisions.len(), 10);
        assert_eq!(report.decision("i-7"), Some(&Decision::Faulty { failures: 1 }));
        assert_eq!(
            h.reader.latest().instances[7].last_error_code.as_deref(),
            Some("connection failed: connection refused")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn hard_restart_report_lands_in_store() {
        let mut h = harness(FleetConfig::default());
        h.fleet.set_instances(vec![raw_instance("i-1", long_ago())]);
        h.fleet
            .fail_restarts(Some(GatewayError::Command("ssh exited with 255".into())));
        h.fleet
            .script_states(&[InstanceRunState::Stopped, InstanceRunState::Running]);
        h.prober.set("i-1", Ok(false));

        for _ in 0..4 {
            h.checker.run_cycle().await.unwrap();
        }
        assert_eq!(
            h.checker.store().hard_restart("i-1").map(|r| r.last.clone()),
            Some(HardRestartState::Pending)
        );

        // Let the supervised restart poll through stop and start.
        tokio::time::sleep(Duration::from_secs(60)).await;
        h.checker.run_cycle().await.unwrap();

        let record = h.checker.store().hard_restart("i-1").unwrap();
        assert_eq!(record.last, HardRestartState::Succeeded);
        assert!(h.fleet.calls().contains(&Call::Start("i-1".into())));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let h = harness(FleetConfig::default());
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(h.checker.run(rx));

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("checker did not stop")
            .unwrap();
    }
}
