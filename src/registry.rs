use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::types::{NodeRecord, StaleNode};

pub type SharedRegistry = Arc<Registry>;

pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::default())
}

/// Liveness state for every known node.
///
/// Timestamp and address live in the same record behind one lock, so a
/// reader never sees one updated without the other. No operation holds the
/// lock across I/O.
#[derive(Debug, Default)]
pub struct Registry {
    nodes: Mutex<HashMap<String, NodeRecord>>,
}

impl Registry {
    fn nodes(&self) -> MutexGuard<'_, HashMap<String, NodeRecord>> {
        // every mutation is a single map operation, so a poisoned map is still consistent
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create or refresh the record for `node_id`. Returns `true` when the
    /// node was not tracked before.
    pub fn record_heartbeat(&self, node_id: &str, address: Option<IpAddr>) -> bool {
        self.record_heartbeat_at(node_id, address, Instant::now())
    }

    pub fn record_heartbeat_at(
        &self,
        node_id: &str,
        address: Option<IpAddr>,
        at: Instant,
    ) -> bool {
        let record = NodeRecord {
            last_seen: at,
            last_address: address,
        };
        self.nodes().insert(node_id.to_string(), record).is_none()
    }

    /// Every node whose last heartbeat is more than `timeout` older than `now`.
    pub fn snapshot_stale(&self, timeout: Duration, now: Instant) -> Vec<StaleNode> {
        self.nodes()
            .iter()
            .filter(|(_, record)| now.saturating_duration_since(record.last_seen) > timeout)
            .map(|(node_id, record)| StaleNode {
                node_id: node_id.clone(),
                last_address: record.last_address,
                last_seen: record.last_seen,
            })
            .collect()
    }

    pub fn remove(&self, node_id: &str) -> Option<NodeRecord> {
        self.nodes().remove(node_id)
    }

    /// Remove `node_id` only if no heartbeat arrived since `last_seen` was
    /// observed. Returns whether the record was removed.
    pub fn remove_if_unchanged(&self, node_id: &str, last_seen: Instant) -> bool {
        let mut nodes = self.nodes();
        match nodes.get(node_id) {
            Some(record) if record.last_seen == last_seen => {
                nodes.remove(node_id);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, node_id: &str) -> Option<NodeRecord> {
        self.nodes().get(node_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.nodes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes().is_empty()
    }
}
