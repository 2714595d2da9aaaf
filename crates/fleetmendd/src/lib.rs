//! fleetmendd internals: default collaborators and daemon assembly.

pub mod aws_cli;
pub mod daemon;
pub mod inventory;
pub mod notify;
pub mod ssh;

pub use aws_cli::AwsCliFleet;
pub use daemon::{DaemonOptions, build_gateway, run_daemon};
pub use inventory::StaticInventory;
pub use notify::{LogNotifier, WebhookNotifier, notifier_from_config};
pub use ssh::SshCommandRunner;
