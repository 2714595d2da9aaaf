//! fleetmend-core — shared configuration and inventory types.
//!
//! Holds the pieces every other fleetmend crate needs: the process-wide
//! [`FleetConfig`] (TOML file plus environment overrides), the
//! [`RawInstance`] shape returned by fleet discovery, and the [`TagFilter`]
//! used to select the monitored instance population.

pub mod config;
pub mod types;

pub use config::{ConfigError, FleetConfig, parse_duration};
pub use types::*;
