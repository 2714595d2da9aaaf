//! Daemon mode: the fleet checker plus the status front end.
//!
//! Startup order:
//! 1. Open the credential store
//! 2. Assemble the collaborators (AWS CLI or a static inventory)
//! 3. Spawn the checker loop
//! 4. Serve HTTP until Ctrl-C, then stop the checker

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info};

use fleetmend_core::FleetConfig;
use fleetmend_health::{FleetChecker, Gateway, HttpProber};
use fleetmend_state::{CredentialStore, snapshot_channel};

use crate::aws_cli::AwsCliFleet;
use crate::inventory::StaticInventory;
use crate::notify::notifier_from_config;
use crate::ssh::SshCommandRunner;

/// Daemon settings that come from the command line rather than the config.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub port: u16,
    pub credentials: PathBuf,
    pub inventory: Option<PathBuf>,
    pub region: Option<String>,
}

/// Wire up the collaborators for `config`.
///
/// With an inventory file, discovery and lifecycle calls stay local;
/// otherwise they go through the `aws` CLI.
pub fn build_gateway(
    config: &FleetConfig,
    inventory: Option<&Path>,
    region: Option<String>,
) -> anyhow::Result<Gateway> {
    let notifier = notifier_from_config(&config.notifications)
        .context("invalid notification settings")?;
    let remote = Arc::new(SshCommandRunner::new(
        config.ssh_keys_dir.clone(),
        &config.ssh_user,
    ));

    let gateway = match inventory {
        Some(path) => {
            info!(path = %path.display(), "using static inventory");
            let fleet = Arc::new(StaticInventory::new(path));
            Gateway {
                discovery: fleet.clone(),
                remote,
                cloud: fleet,
                notifier,
            }
        }
        None => {
            let fleet = Arc::new(AwsCliFleet::new(region));
            Gateway {
                discovery: fleet.clone(),
                remote,
                cloud: fleet,
                notifier,
            }
        }
    };
    Ok(gateway)
}

pub async fn run_daemon(config: FleetConfig, options: DaemonOptions) -> anyhow::Result<()> {
    info!(environment = %config.environment, "fleetmend daemon starting");

    if let Some(parent) = options
        .credentials
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
    {
        std::fs::create_dir_all(parent)?;
    }
    let credentials = CredentialStore::open(&options.credentials)
        .with_context(|| format!("open credential store {}", options.credentials.display()))?;
    info!(path = ?options.credentials, "credential store opened");

    let gateway = build_gateway(&config, options.inventory.as_deref(), options.region.clone())?;
    let prober = Arc::new(HttpProber::new(config.routing.clone()));
    let (publisher, reader) = snapshot_channel();
    let checker = FleetChecker::new(&config, gateway, prober, publisher);

    // ── Checker loop ───────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let checker_handle = tokio::spawn(checker.run(shutdown_rx));

    // ── Status front end ───────────────────────────────────────
    let state = fleetmend_api::ApiState::new(reader, credentials, env!("CARGO_PKG_VERSION"));
    let router = fleetmend_api::build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], options.port));
    info!(%addr, "status server starting");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c, serving until killed");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = checker_handle.await;
    info!("fleetmend daemon stopped");
    Ok(())
}
