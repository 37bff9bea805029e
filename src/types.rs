use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;

use futures_util::Stream;
use tokio::time::Instant;

/// Liveness state kept for one node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeRecord {
    pub last_seen: Instant,
    /// Advisory; only the restart path reads it.
    pub last_address: Option<IpAddr>,
}

/// A registry entry that outlived the heartbeat timeout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaleNode {
    pub node_id: String,
    pub last_address: Option<IpAddr>,
    pub last_seen: Instant,
}

/// One inbound liveness datagram.
#[derive(Clone, Debug)]
pub struct Datagram {
    pub payload: Vec<u8>,
    pub source: SocketAddr,
}

pub type GenericBoxedStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;
