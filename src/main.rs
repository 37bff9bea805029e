use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::{signal, sync::Notify};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vigil::announcer::Announcer;
use vigil::coordinator::Coordinator;
use vigil::recovery::SshRestarter;
use vigil::{new_registry, FileConfig};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
struct Args {
    /// TOML file with [coordinator] and [announcer] sections
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, help = "Address to receive heartbeats on [default: 0.0.0.0]")]
    host: Option<IpAddr>,
    #[arg(long, help = "UDP port to receive heartbeats on [default: 10000]")]
    port: Option<u16>,
    #[arg(
        long,
        help = "Seconds without a heartbeat before a node is restarted [default: 15]"
    )]
    timeout: Option<u64>,
    #[arg(long, help = "Seconds between staleness sweeps [default: 1]")]
    sweep_interval: Option<u64>,
    #[arg(long, help = "Remote user for ssh restarts [default: vigil]")]
    ssh_user: Option<String>,
    #[arg(long, help = "Remote working directory for restarts [default: vigil]")]
    remote_dir: Option<String>,
    /// Command run on the node's host; `{node_id}` is substituted
    #[arg(long)]
    launch_command: Option<String>,
    #[arg(long, help = "Seconds before a restart attempt is abandoned [default: 30]")]
    restart_timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Send heartbeats for a node to the coordinator
    Announce {
        /// Identifier this node announces itself as
        node_id: String,
        #[arg(long, help = "Coordinator host:port [default: 127.0.0.1:10000]")]
        coordinator: Option<String>,
        #[arg(long, help = "Seconds between heartbeats [default: 5]")]
        interval: Option<u64>,
    },
}

/// Layer command-line flags over the file (or default) configuration.
fn apply_overrides(args: &Args, config: &mut FileConfig) {
    let coordinator = &mut config.coordinator;
    if let Some(host) = args.host {
        coordinator.listen_host = host;
    }
    if let Some(port) = args.port {
        coordinator.listen_port = port;
    }
    if let Some(timeout) = args.timeout {
        coordinator.heartbeat_timeout_s = timeout;
    }
    if let Some(interval) = args.sweep_interval {
        coordinator.sweep_interval_s = interval;
    }

    let restart = &mut coordinator.restart;
    if let Some(user) = &args.ssh_user {
        restart.ssh_user = user.clone();
    }
    if let Some(dir) = &args.remote_dir {
        restart.remote_dir = dir.clone();
    }
    if let Some(command) = &args.launch_command {
        restart.launch_command = command.clone();
    }
    if let Some(timeout) = args.restart_timeout {
        restart.timeout_s = timeout;
    }

    if let Some(Command::Announce {
        coordinator,
        interval,
        ..
    }) = &args.command
    {
        if let Some(endpoint) = coordinator {
            config.announcer.coordinator = endpoint.clone();
        }
        if let Some(interval) = interval {
            config.announcer.announce_interval_s = *interval;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut config = FileConfig::load(args.config.as_deref())?;
    apply_overrides(&args, &mut config);

    let version = env!("CARGO_PKG_VERSION");
    let build = option_env!("GIT_COMMIT_HASH").unwrap_or("unknown");

    let shutdown_notify = Arc::new(Notify::new());
    tokio::spawn({
        let interrupt_handle = shutdown_notify.clone();
        async move {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                return;
            }
            interrupt_handle.notify_waiters();
        }
    });

    match &args.command {
        Some(Command::Announce { node_id, .. }) => {
            config.announcer.validate()?;
            info!("vigil {} ({}) announcing as {}", version, build, node_id);
            Announcer::new(node_id.as_str(), config.announcer)
                .run(shutdown_notify)
                .await?;
        }
        None => {
            let restarter = Arc::new(SshRestarter::new(config.coordinator.restart.clone()));
            let coordinator =
                Coordinator::bind(&config.coordinator, new_registry(), restarter).await?;
            info!("vigil {} ({}) coordinator starting", version, build);
            coordinator.run(shutdown_notify).await;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let args = Args::parse_from([
            "vigil",
            "--port",
            "12000",
            "--timeout",
            "30",
            "--ssh-user",
            "ops",
        ]);
        let mut config = FileConfig::default();
        apply_overrides(&args, &mut config);

        assert_eq!(config.coordinator.listen_port, 12000);
        assert_eq!(config.coordinator.heartbeat_timeout_s, 30);
        assert_eq!(config.coordinator.sweep_interval_s, 1);
        assert_eq!(config.coordinator.restart.ssh_user, "ops");
    }

    #[test]
    fn announce_takes_node_id() {
        let args = Args::parse_from([
            "vigil",
            "announce",
            "node_1",
            "--coordinator",
            "orion01:10000",
        ]);
        let mut config = FileConfig::default();
        apply_overrides(&args, &mut config);

        assert!(matches!(
            args.command,
            Some(Command::Announce { ref node_id, .. }) if node_id == "node_1"
        ));
        assert_eq!(config.announcer.coordinator, "orion01:10000");
        assert_eq!(config.announcer.announce_interval_s, 5);
    }

    #[test]
    fn announce_without_node_id_is_a_usage_error() {
        assert!(Args::try_parse_from(["vigil", "announce"]).is_err());
    }
}
