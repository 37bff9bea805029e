//! Inbound liveness path: UDP datagrams in, registry updates out.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use futures_util::Stream;
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::error::{ProtocolError, VigilError};
use crate::registry::SharedRegistry;
use crate::server_loop::serve_stream;
use crate::types::{Datagram, GenericBoxedStream};

/// Announcements are a node id plus a word; anything longer is truncated.
pub const MAX_DATAGRAM: usize = 1024;

/// Longest accepted node identifier.
pub const MAX_NODE_ID: usize = 128;

/// Node ids end up in the remote restart command, so only
/// `[A-Za-z0-9_.-]` is accepted.
pub fn is_valid_node_id(node_id: &str) -> bool {
    !node_id.is_empty()
        && node_id.len() <= MAX_NODE_ID
        && node_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
}

/// Extract the node identifier: the first whitespace-delimited token.
pub fn parse_node_id(payload: &[u8]) -> Result<&str, ProtocolError> {
    let text = std::str::from_utf8(payload).map_err(|_| ProtocolError::NotUtf8)?;
    let node_id = text.split_whitespace().next().ok_or(ProtocolError::Empty)?;
    if !is_valid_node_id(node_id) {
        return Err(ProtocolError::InvalidNodeId(node_id.escape_debug().to_string()));
    }
    Ok(node_id)
}

/// Pause after `consecutive_errors` receive failures in a row: 10ms,
/// doubling up to one second.
pub fn recv_backoff(consecutive_errors: u32) -> Duration {
    let exponent = consecutive_errors.saturating_sub(1).min(7);
    Duration::from_millis(10 << exponent).min(Duration::from_secs(1))
}

/// Apply one datagram to the registry. Malformed payloads leave it untouched.
pub fn handle_datagram(registry: &SharedRegistry, datagram: Datagram) {
    let node_id = match parse_node_id(&datagram.payload) {
        Ok(node_id) => node_id,
        Err(e) => {
            warn!("Discarding datagram from {}: {}", datagram.source, e);
            return;
        }
    };

    let address = datagram.source.ip();
    if registry.record_heartbeat(node_id, Some(address)) {
        info!("Node {} registered from {}", node_id, address);
    } else {
        debug!("Heartbeat from {} ({})", node_id, address);
    }
}

/// Yield datagrams forever; receive errors are logged and skipped, backing
/// off while they persist.
pub fn datagram_stream(socket: UdpSocket) -> impl Stream<Item = Datagram> {
    stream! {
        let mut buffer = vec![0u8; MAX_DATAGRAM];
        let mut consecutive_errors: u32 = 0;
        loop {
            match socket.recv_from(&mut buffer).await {
                Ok((len, source)) => {
                    consecutive_errors = 0;
                    yield Datagram {
                        payload: buffer[..len].to_vec(),
                        source,
                    };
                }
                Err(e) => {
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    let pause = recv_backoff(consecutive_errors);
                    error!(
                        "Error receiving heartbeat ({} in a row, retrying in {:?}): {}",
                        consecutive_errors, pause, e
                    );
                    time::sleep(pause).await;
                }
            }
        }
    }
}

pub struct LivenessReceiver {
    socket: UdpSocket,
    registry: SharedRegistry,
}

impl LivenessReceiver {
    /// Bind the liveness endpoint. This is the only receiver failure that
    /// reaches the caller.
    pub async fn bind(addr: SocketAddr, registry: SharedRegistry) -> Result<Self, VigilError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| VigilError::Bind { addr, source })?;
        Ok(Self { socket, registry })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive until shutdown is signalled.
    pub async fn run(self, shutdown: Arc<Notify>) {
        match self.socket.local_addr() {
            Ok(addr) => info!("Listening for heartbeats on udp://{}", addr),
            Err(e) => error!("Listening for heartbeats on unknown address: {}", e),
        }

        let registry = self.registry;
        let stream: GenericBoxedStream<Datagram> = Box::pin(datagram_stream(self.socket));
        serve_stream(stream, shutdown, move |datagram| {
            handle_datagram(&registry, datagram)
        })
        .await;

        info!("Liveness receiver stopped");
    }
}
