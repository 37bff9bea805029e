use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Startup failures. Anything that happens after the loops are running is
/// logged where it occurs instead.
#[derive(Debug, Error)]
pub enum VigilError {
    #[error("failed to bind liveness endpoint {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to reach coordinator {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// A liveness payload that carries no usable node identifier.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty liveness payload")]
    Empty,

    #[error("liveness payload is not valid UTF-8")]
    NotUtf8,

    #[error("node id \"{0}\" contains characters outside [A-Za-z0-9_.-] or is too long")]
    InvalidNodeId(String),
}

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("no address known for node")]
    NoAddress,

    #[error("refusing to restart node with unsafe id \"{0}\"")]
    InvalidNodeId(String),

    #[error("failed to launch restart command: {0}")]
    Spawn(#[from] io::Error),

    #[error("restart command timed out after {0:?}")]
    TimedOut(Duration),

    #[error("restart command exited with {status}, output: {output}")]
    Failed { status: String, output: String },
}
