//! fleetmendd — fleet health checker and self-healing daemon.
//!
//! # Usage
//!
//! ```text
//! fleetmendd run --port 3000 --config /etc/fleetmend.toml
//! fleetmendd run --inventory fleet.toml          # local dry run
//! fleetmendd user add ops --password hunter2 --level 2
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use fleetmend_core::FleetConfig;
use fleetmend_state::CredentialStore;
use fleetmendd::{DaemonOptions, run_daemon};

const DEFAULT_CREDENTIALS: &str = "secrets/users.redb";

#[derive(Parser)]
#[command(name = "fleetmendd", about = "Fleet health checker and self-healing daemon", version)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the checker and the status server.
    Run {
        /// Port for the status server.
        #[arg(long, default_value = "3000")]
        port: u16,

        /// TOML configuration file. Environment variables override it.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Credential store for the status server.
        #[arg(long, default_value = DEFAULT_CREDENTIALS)]
        credentials: PathBuf,

        /// Read the fleet from a TOML inventory instead of EC2.
        #[arg(long)]
        inventory: Option<PathBuf>,

        /// AWS region passed to the aws CLI.
        #[arg(long)]
        region: Option<String>,
    },

    /// Manage status-server users.
    User {
        #[command(subcommand)]
        command: UserCommand,
    },
}

#[derive(Subcommand)]
enum UserCommand {
    /// Add or replace a user.
    Add {
        username: String,

        #[arg(long)]
        password: String,

        /// Access level; must be at least 1.
        #[arg(long, default_value = "1")]
        level: u32,

        #[arg(long, default_value = DEFAULT_CREDENTIALS)]
        credentials: PathBuf,
    },

    /// Remove a user.
    Remove {
        username: String,

        #[arg(long, default_value = DEFAULT_CREDENTIALS)]
        credentials: PathBuf,
    },

    /// List usernames.
    List {
        #[arg(long, default_value = DEFAULT_CREDENTIALS)]
        credentials: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,fleetmendd=debug,fleetmend=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run {
            port,
            config,
            credentials,
            inventory,
            region,
        } => {
            let config = FleetConfig::load(config.as_deref())?;
            let options = DaemonOptions {
                port,
                credentials,
                inventory,
                region,
            };
            run_daemon(config, options).await
        }
        Command::User { command } => run_user_command(command),
    }
}

fn run_user_command(command: UserCommand) -> anyhow::Result<()> {
    match command {
        UserCommand::Add {
            username,
            password,
            level,
            credentials,
        } => {
            if let Some(parent) = credentials.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let store = CredentialStore::open(&credentials)?;
            store.put_user(&username, &password, level)?;
            info!(%username, level, "user stored");
        }
        UserCommand::Remove {
            username,
            credentials,
        } => {
            let store = CredentialStore::open(&credentials)?;
            if store.delete_user(&username)? {
                info!(%username, "user removed");
            } else {
                anyhow::bail!("no such user: {username}");
            }
        }
        UserCommand::List { credentials } => {
            let store = CredentialStore::open(&credentials)?;
            for name in store.list_usernames()? {
                println!("{name}");
            }
        }
    }
    Ok(())
}
