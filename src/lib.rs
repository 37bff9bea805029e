//! Heartbeat failure detection and remote restart for a fleet of worker
//! nodes.
//!
//! Nodes announce themselves over UDP ([`announcer`]). The coordinator
//! records each announcement in a shared [`registry`] ([`receiver`]) while a
//! [`monitor`] sweeps it on a fixed interval and restarts any node whose
//! last heartbeat is older than the timeout ([`recovery`]).

pub mod announcer;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod monitor;
pub mod receiver;
pub mod recovery;
pub mod registry;
pub mod server_loop;
pub mod types;

pub use config::{AnnouncerConfig, CoordinatorConfig, FileConfig, RestartConfig};
pub use error::{ProtocolError, RecoveryError, VigilError};
pub use registry::{new_registry, Registry, SharedRegistry};
pub use types::{NodeRecord, StaleNode};
