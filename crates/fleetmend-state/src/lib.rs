//! fleetmend-state — in-process state for the fleet checker.
//!
//! # Contents
//!
//! - [`InstanceDescriptor`]: the per-cycle read model of one instance,
//!   rebuilt from discovery every cycle and keyed by instance ID.
//! - [`RemediationStore`]: fault, cooldown, escalation, and hard-restart
//!   bookkeeping. Owned by the checker, never persisted.
//! - [`SnapshotPublisher`] / [`SnapshotReader`]: whole-value publication of
//!   the latest scan so readers never observe a half-written snapshot.
//! - [`CredentialStore`]: redb-backed user table for the HTTP front end.
//!   Values are JSON-serialized into `&[u8]` columns.

pub mod credentials;
pub mod error;
pub mod remediation;
pub mod snapshot;
pub mod tables;
pub mod types;

pub use credentials::CredentialStore;
pub use error::{StateError, StateResult};
pub use remediation::{CooldownState, EscalationState, FaultState, RemediationStore};
pub use snapshot::{SnapshotPublisher, SnapshotReader, snapshot_channel};
pub use types::*;
