//! Node side: periodic fire-and-forget heartbeats to the coordinator.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::Notify;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::config::AnnouncerConfig;
use crate::error::VigilError;
use crate::receiver::is_valid_node_id;

pub fn heartbeat_message(node_id: &str) -> String {
    format!("{} heartbeat", node_id)
}

/// Unspecified local address in the same family as `remote`.
pub fn local_bind_addr(remote: &SocketAddr) -> SocketAddr {
    match remote {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    }
}

pub struct Announcer {
    node_id: String,
    config: AnnouncerConfig,
}

impl Announcer {
    pub fn new(node_id: impl Into<String>, config: AnnouncerConfig) -> Self {
        Self {
            node_id: node_id.into(),
            config,
        }
    }

    /// Resolve the coordinator and open a UDP socket aimed at it.
    pub async fn connect(&self) -> Result<UdpSocket, VigilError> {
        let connect_err = |source| VigilError::Connect {
            endpoint: self.config.coordinator.clone(),
            source,
        };
        let remote = lookup_host(self.config.coordinator.as_str())
            .await
            .map_err(connect_err)?
            .next()
            .ok_or_else(|| {
                connect_err(io::Error::new(
                    io::ErrorKind::NotFound,
                    "endpoint resolved to no addresses",
                ))
            })?;
        let socket = UdpSocket::bind(local_bind_addr(&remote))
            .await
            .map_err(connect_err)?;
        socket.connect(remote).await.map_err(connect_err)?;
        Ok(socket)
    }

    /// Announce immediately and then every interval until shutdown.
    /// Send failures are logged and the loop carries on.
    pub async fn run(self, shutdown: Arc<Notify>) -> Result<(), VigilError> {
        if !is_valid_node_id(&self.node_id) {
            return Err(VigilError::Config(format!(
                "node id {:?} must be 1-128 characters of [A-Za-z0-9_.-]",
                self.node_id
            )));
        }
        let socket = self.connect().await?;
        let message = heartbeat_message(&self.node_id);
        info!(
            "Announcing {} to {} every {:?}",
            self.node_id,
            self.config.coordinator,
            self.config.announce_interval()
        );

        let mut interval = time::interval(self.config.announce_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let shutdown_signal = shutdown.notified();
        tokio::pin!(shutdown_signal);
        shutdown_signal.as_mut().enable();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match socket.send(message.as_bytes()).await {
                        Ok(_) => debug!("Sent heartbeat: {}", message),
                        Err(e) => error!("Error sending heartbeat: {}", e),
                    }
                }
                _ = &mut shutdown_signal => {
                    info!("Announcer: shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receiver::parse_node_id;

    #[test]
    fn message_round_trips_through_parser() {
        let message = heartbeat_message("node_1");
        assert_eq!(message, "node_1 heartbeat");
        assert_eq!(parse_node_id(message.as_bytes()), Ok("node_1"));
    }

    #[test]
    fn bind_family_follows_coordinator() {
        let v4: SocketAddr = "10.0.0.5:10000".parse().unwrap();
        let v6: SocketAddr = "[fd00::5]:10000".parse().unwrap();
        assert_eq!(local_bind_addr(&v4), "0.0.0.0:0".parse::<SocketAddr>().unwrap());
        assert_eq!(local_bind_addr(&v6), "[::]:0".parse::<SocketAddr>().unwrap());
    }

    #[tokio::test]
    async fn invalid_node_id_is_a_startup_error() {
        let announcer = Announcer::new("node 1;rm", AnnouncerConfig::default());
        let result = announcer.run(Arc::new(Notify::new())).await;
        assert!(matches!(result, Err(VigilError::Config(_))));
    }

    #[tokio::test]
    async fn unresolvable_coordinator_is_a_startup_error() {
        let announcer = Announcer::new(
            "node_1",
            AnnouncerConfig {
                coordinator: "not an endpoint".to_string(),
                ..AnnouncerConfig::default()
            },
        );
        assert!(matches!(
            announcer.connect().await,
            Err(VigilError::Connect { .. })
        ));
    }

    #[tokio::test]
    async fn sends_heartbeats_to_coordinator() {
        let coordinator = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let shutdown = Arc::new(Notify::new());
        let announcer = Announcer::new(
            "node_5",
            AnnouncerConfig {
                coordinator: coordinator.local_addr().unwrap().to_string(),
                announce_interval_s: 5,
            },
        );
        let task = tokio::spawn(announcer.run(shutdown.clone()));

        let mut buf = [0u8; 64];
        let (len, _) = coordinator.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"node_5 heartbeat");

        shutdown.notify_waiters();
        task.await.unwrap().unwrap();
    }
}
