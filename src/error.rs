//! Error types for the coordination core.
//!
//! Recoverable conditions (chunk/log/buffer not found locally, unlock by a
//! non-holder) are reported as `bool`/`Option` results plus a log line and
//! never surface here; this module covers the failures a caller must react to.

use crate::types::{ChunkId, NodeId};
use std::io;
use thiserror::Error;

/// Result type alias for coordination core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the coordination core.
#[derive(Error, Debug)]
pub enum Error {
    /// Network communication errors.
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    /// Backup log layer errors.
    #[error("backup error: {0}")]
    Backup(#[from] BackupError),

    /// The authoritative resolver has no location for a chunk.
    #[error("no location known for chunk {0}")]
    LocationUnknown(ChunkId),

    /// Version table reached its fixed capacity; the insert was rejected.
    #[error("version table full: capacity {capacity}, rehashing prohibited")]
    VersionTableFull { capacity: usize },

    /// The operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),
}

/// Network communication errors.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Failed to send a message to a peer.
    #[error("send to node {target:#06x} failed: {reason}")]
    SendFailed { target: NodeId, reason: String },

    /// The target node is not reachable.
    #[error("node {0:#06x} unreachable")]
    Unreachable(NodeId),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

/// Backup log layer errors.
#[derive(Error, Debug)]
pub enum BackupError {
    /// Segment file I/O failed.
    #[error("segment io error: {0}")]
    Io(#[from] io::Error),

    /// A record failed its checksum on replay.
    #[error("segment record corrupt at offset {offset}")]
    Corrupt { offset: u64 },
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Network(NetworkError::Serialization(e.to_string()))
    }
}
