//! Runtime settings for both process modes.
//!
//! Defaults are built in, an optional TOML file overrides them, and
//! command-line flags override the file (see `main.rs`).

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::VigilError;

pub const DEFAULT_PORT: u16 = 10000;

/// Detaches the relaunched announcer so the ssh session ends once it has
/// started.
pub const DEFAULT_LAUNCH_COMMAND: &str =
    "nohup ./vigil announce {node_id} </dev/null >vigil.log 2>&1 &";

/// Top level of the TOML config file.
///
/// ```toml
/// [coordinator]
/// listen_port = 10000
/// heartbeat_timeout_s = 15
///
/// [coordinator.restart]
/// ssh_user = "ops"
///
/// [announcer]
/// coordinator = "orion01:10000"
/// ```
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub coordinator: CoordinatorConfig,
    pub announcer: AnnouncerConfig,
}

impl FileConfig {
    /// Read `path`, or fall back to defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, VigilError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = fs::read_to_string(path).map_err(|source| VigilError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| VigilError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorConfig {
    pub listen_host: IpAddr,
    pub listen_port: u16,
    /// A node is stale once its last heartbeat is older than this.
    pub heartbeat_timeout_s: u64,
    pub sweep_interval_s: u64,
    pub restart: RestartConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            listen_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listen_port: DEFAULT_PORT,
            heartbeat_timeout_s: 15,
            sweep_interval_s: 1,
            restart: RestartConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_host, self.listen_port)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_s)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_s)
    }

    pub fn validate(&self) -> Result<(), VigilError> {
        if self.heartbeat_timeout_s == 0 {
            return Err(VigilError::Config(
                "heartbeat_timeout_s must be greater than 0".to_string(),
            ));
        }
        if self.sweep_interval_s == 0 {
            return Err(VigilError::Config(
                "sweep_interval_s must be greater than 0".to_string(),
            ));
        }
        self.restart.validate()
    }
}

/// How a stale node is brought back: `ssh <user>@<addr> "cd <remote_dir> && <launch_command>"`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RestartConfig {
    pub ssh_program: String,
    pub ssh_user: String,
    pub remote_dir: String,
    /// `{node_id}` is replaced with the identifier of the node being restarted.
    /// The command must return once the node is started; a foreground
    /// process keeps ssh open until `timeout_s` expires.
    pub launch_command: String,
    pub timeout_s: u64,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            ssh_program: "ssh".to_string(),
            ssh_user: "vigil".to_string(),
            remote_dir: "vigil".to_string(),
            launch_command: DEFAULT_LAUNCH_COMMAND.to_string(),
            timeout_s: 30,
        }
    }
}

impl RestartConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_s)
    }

    pub fn validate(&self) -> Result<(), VigilError> {
        if self.ssh_program.trim().is_empty() {
            return Err(VigilError::Config("ssh_program must not be empty".to_string()));
        }
        if self.ssh_user.trim().is_empty() {
            return Err(VigilError::Config("ssh_user must not be empty".to_string()));
        }
        if self.launch_command.trim().is_empty() {
            return Err(VigilError::Config(
                "launch_command must not be empty".to_string(),
            ));
        }
        if self.timeout_s == 0 {
            return Err(VigilError::Config(
                "restart timeout_s must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AnnouncerConfig {
    /// `host:port` of the coordinator's liveness endpoint.
    pub coordinator: String,
    pub announce_interval_s: u64,
}

impl Default for AnnouncerConfig {
    fn default() -> Self {
        Self {
            coordinator: format!("127.0.0.1:{}", DEFAULT_PORT),
            announce_interval_s: 5,
        }
    }
}

impl AnnouncerConfig {
    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.announce_interval_s)
    }

    pub fn validate(&self) -> Result<(), VigilError> {
        if self.coordinator.trim().is_empty() {
            return Err(VigilError::Config("coordinator must not be empty".to_string()));
        }
        if self.announce_interval_s == 0 {
            return Err(VigilError::Config(
                "announce_interval_s must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
