//! Remediation bookkeeping keyed by instance ID.
//!
//! Three independent maps drive the remediation policy:
//!
//! - faults: consecutive failed probes,
//! - cooldowns: post-remediation windows during which an instance is skipped,
//! - escalations: remediations fired within the decay window.
//!
//! Reset points remove the entry instead of writing a zeroed one, so an
//! absent entry and a cleared entry are indistinguishable and repeated
//! healthy cycles leave the store unchanged.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::types::{HardRestartState, InstanceId, RemediationSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FaultState {
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownState {
    pub active: bool,
    pub resume_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationState {
    pub escalation_count: u32,
    /// Once passed, the next healthy observation resets the count.
    pub decay_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardRestartRecord {
    pub count: u32,
    pub last: HardRestartState,
}

/// Per-instance remediation state, owned by a single checker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemediationStore {
    faults: HashMap<InstanceId, FaultState>,
    cooldowns: HashMap<InstanceId, CooldownState>,
    escalations: HashMap<InstanceId, EscalationState>,
    hard_restarts: HashMap<InstanceId, HardRestartRecord>,
}

impl RemediationStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Faults ─────────────────────────────────────────────────────

    pub fn consecutive_failures(&self, id: &str) -> u32 {
        self.faults
            .get(id)
            .map(|f| f.consecutive_failures)
            .unwrap_or(0)
    }

    /// Count one more failed probe and return the new total.
    pub fn record_failure(&mut self, id: &str) -> u32 {
        let fault = self.faults.entry(id.to_string()).or_default();
        fault.consecutive_failures = fault.consecutive_failures.saturating_add(1);
        fault.consecutive_failures
    }

    pub fn reset_failures(&mut self, id: &str) {
        self.faults.remove(id);
    }

    // ── Cooldowns ──────────────────────────────────────────────────

    /// Whether `id` is inside an active cooldown window at `now`.
    pub fn in_cooldown(&self, id: &str, now: DateTime<Utc>) -> bool {
        self.cooldowns
            .get(id)
            .is_some_and(|c| c.active && now < c.resume_at)
    }

    pub fn start_cooldown(&mut self, id: &str, now: DateTime<Utc>, window: Duration) {
        self.cooldowns.insert(
            id.to_string(),
            CooldownState {
                active: true,
                resume_at: deadline(now, window),
            },
        );
    }

    pub fn clear_cooldown(&mut self, id: &str) {
        self.cooldowns.remove(id);
    }

    // ── Escalations ────────────────────────────────────────────────

    pub fn escalation_count(&self, id: &str) -> u32 {
        self.escalations
            .get(id)
            .map(|e| e.escalation_count)
            .unwrap_or(0)
    }

    /// Record one more remediation and push the decay deadline out.
    /// Returns the new count.
    pub fn escalate(&mut self, id: &str, now: DateTime<Utc>, decay: Duration) -> u32 {
        let count = self.escalation_count(id).saturating_add(1);
        self.escalations.insert(
            id.to_string(),
            EscalationState {
                escalation_count: count,
                decay_at: deadline(now, decay),
            },
        );
        count
    }

    /// Reset the escalation count if its decay deadline has passed.
    /// Returns true when a non-zero count was cleared.
    pub fn decay_escalation(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        let due = self
            .escalations
            .get(id)
            .is_some_and(|e| e.escalation_count > 0 && e.decay_at < now);
        if due {
            self.escalations.remove(id);
        }
        due
    }

    // ── Hard restarts ──────────────────────────────────────────────

    pub fn hard_restart(&self, id: &str) -> Option<&HardRestartRecord> {
        self.hard_restarts.get(id)
    }

    pub fn hard_restart_started(&mut self, id: &str) {
        let record = self
            .hard_restarts
            .entry(id.to_string())
            .or_insert(HardRestartRecord {
                count: 0,
                last: HardRestartState::Pending,
            });
        record.count = record.count.saturating_add(1);
        record.last = HardRestartState::Pending;
    }

    pub fn hard_restart_finished(&mut self, id: &str, state: HardRestartState) {
        let record = self
            .hard_restarts
            .entry(id.to_string())
            .or_insert(HardRestartRecord {
                count: 1,
                last: HardRestartState::Pending,
            });
        record.last = state;
    }

    // ── Whole-instance ─────────────────────────────────────────────

    /// Drop all bookkeeping for an instance that will not come back.
    pub fn forget(&mut self, id: &str) {
        self.faults.remove(id);
        self.cooldowns.remove(id);
        self.escalations.remove(id);
        self.hard_restarts.remove(id);
    }

    /// Drop bookkeeping for every instance `is_live` rejects, except those
    /// with a hard restart still pending. Returns the dropped IDs.
    pub fn prune<F>(&mut self, is_live: F) -> Vec<InstanceId>
    where
        F: Fn(&str) -> bool,
    {
        let mut stale: Vec<InstanceId> = self
            .faults
            .keys()
            .chain(self.cooldowns.keys())
            .chain(self.escalations.keys())
            .chain(self.hard_restarts.keys())
            .filter(|id| !is_live(id.as_str()))
            .filter(|id| {
                self.hard_restarts
                    .get(id.as_str())
                    .is_none_or(|h| h.last != HardRestartState::Pending)
            })
            .cloned()
            .collect();
        stale.sort();
        stale.dedup();
        for id in &stale {
            self.forget(id);
        }
        stale
    }

    /// Reader-facing view of one instance's bookkeeping.
    pub fn summary(&self, id: &str, now: DateTime<Utc>) -> RemediationSummary {
        let hard = self.hard_restarts.get(id);
        RemediationSummary {
            instance_id: id.to_string(),
            consecutive_failures: self.consecutive_failures(id),
            escalation_count: self.escalation_count(id),
            cooldown_until: self
                .cooldowns
                .get(id)
                .filter(|c| c.active && now < c.resume_at)
                .map(|c| c.resume_at),
            hard_restarts: hard.map(|h| h.count).unwrap_or(0),
            last_hard_restart: hard.map(|h| h.last.clone()),
        }
    }
}

/// `now + window`, saturating at the far future.
pub fn deadline(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(window)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
