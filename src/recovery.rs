//! Remote restart of stale nodes.

use std::net::IpAddr;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time;
use tracing::{debug, info};

use crate::config::RestartConfig;
use crate::error::RecoveryError;
use crate::receiver::is_valid_node_id;

/// Something that can relaunch a node's process on the host at `address`.
///
/// `Ok` carries the command's combined output.
#[async_trait]
pub trait Restarter: Send + Sync {
    async fn restart(&self, node_id: &str, address: IpAddr) -> Result<String, RecoveryError>;
}

/// Restarts nodes over ssh.
#[derive(Debug, Clone)]
pub struct SshRestarter {
    config: RestartConfig,
}

impl SshRestarter {
    pub fn new(config: RestartConfig) -> Self {
        Self { config }
    }

    /// The shell command run on the remote host.
    pub fn remote_command(&self, node_id: &str) -> String {
        let launch = self.config.launch_command.replace("{node_id}", node_id);
        if self.config.remote_dir.is_empty() {
            launch
        } else {
            format!("cd {} && {}", self.config.remote_dir, launch)
        }
    }

    fn command(&self, node_id: &str, address: IpAddr) -> Command {
        let mut cmd = Command::new(&self.config.ssh_program);
        cmd.args(["-o", "BatchMode=yes", "-o"])
            .arg(format!("ConnectTimeout={}", self.config.timeout_s))
            .arg(format!("{}@{}", self.config.ssh_user, address))
            .arg(self.remote_command(node_id))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Restarter for SshRestarter {
    async fn restart(&self, node_id: &str, address: IpAddr) -> Result<String, RecoveryError> {
        // the id is spliced into a remote shell command
        if !is_valid_node_id(node_id) {
            return Err(RecoveryError::InvalidNodeId(node_id.escape_debug().to_string()));
        }
        let timeout = self.config.timeout();
        debug!("Running restart for {} on {}: {}", node_id, address, self.remote_command(node_id));

        let output = time::timeout(timeout, self.command(node_id, address).output())
            .await
            .map_err(|_| RecoveryError::TimedOut(timeout))??;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            Ok(combined)
        } else {
            Err(RecoveryError::Failed {
                status: output.status.to_string(),
                output: combined,
            })
        }
    }
}

/// Turns a stale node into a restart attempt. Never retries; the next
/// staleness cycle is the retry.
#[derive(Clone)]
pub struct RecoveryActuator {
    restarter: Arc<dyn Restarter>,
}

impl RecoveryActuator {
    pub fn new(restarter: Arc<dyn Restarter>) -> Self {
        Self { restarter }
    }

    pub async fn recover(
        &self,
        node_id: &str,
        last_address: Option<IpAddr>,
    ) -> Result<String, RecoveryError> {
        let address = last_address.ok_or(RecoveryError::NoAddress)?;
        info!("Restarting node {} at {}", node_id, address);
        self.restarter.restart(node_id, address).await
    }
}
