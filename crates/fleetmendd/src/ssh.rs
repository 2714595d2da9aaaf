//! Remote service restarts over `ssh`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info};

use fleetmend_health::gateway::GatewayFuture;
use fleetmend_health::{GatewayError, RemoteCommand};

/// Upper bound on one remote command, connection included.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct SshCommandRunner {
    keys_dir: Option<PathBuf>,
    user: String,
    port: u16,
}

impl SshCommandRunner {
    pub fn new(keys_dir: Option<PathBuf>, user: &str) -> Self {
        Self {
            keys_dir,
            user: user.to_string(),
            port: 22,
        }
    }

    /// `<keys_dir>/<key_name>.pem`, which must exist.
    pub fn key_path(&self, key_name: Option<&str>) -> Result<PathBuf, GatewayError> {
        let dir = self
            .keys_dir
            .as_deref()
            .ok_or_else(|| GatewayError::Precondition("no key directory configured".into()))?;
        if !dir.is_dir() {
            return Err(GatewayError::Precondition(format!(
                "key directory {} does not exist",
                dir.display()
            )));
        }
        let key_name = key_name
            .filter(|k| !k.is_empty())
            .ok_or_else(|| GatewayError::Precondition("instance has no key name".into()))?;
        let path = dir.join(format!("{key_name}.pem"));
        if !path.is_file() {
            return Err(GatewayError::Precondition(format!(
                "key file {} not found",
                path.display()
            )));
        }
        Ok(path)
    }

    pub fn command_args(&self, key: &Path, address: &str, command: &str) -> Vec<String> {
        vec![
            "-i".to_string(),
            key.display().to_string(),
            "-p".to_string(),
            self.port.to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "ConnectTimeout=10".to_string(),
            format!("{}@{address}", self.user),
            command.to_string(),
        ]
    }
}

impl RemoteCommand for SshCommandRunner {
    fn run<'a>(
        &'a self,
        address: &'a str,
        key_name: Option<&'a str>,
        command: &'a str,
    ) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            let key = self.key_path(key_name)?;
            let args = self.command_args(&key, address, command);
            debug!(%address, %command, "running remote command");

            let output = tokio::time::timeout(
                COMMAND_TIMEOUT,
                Command::new("ssh")
                    .args(&args)
                    .stdin(Stdio::null())
                    .kill_on_drop(true)
                    .output(),
            )
            .await
            .map_err(|_| GatewayError::Command(format!("ssh to {address} timed out")))?
            .map_err(|e| GatewayError::Command(format!("ssh: {e}")))?;

            if !output.status.success() {
                return Err(GatewayError::Command(format!(
                    "ssh to {address} exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
            info!(%address, %command, "remote command succeeded");
            Ok(())
        })
    }
}
