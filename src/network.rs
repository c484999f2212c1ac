//! Network collaborator interface and message types.
//!
//! Transport and wire framing live outside this core. The coordination layer
//! only needs point-to-point, at-most-once sends of the messages defined here;
//! retry policy belongs to the caller.

use crate::error::NetworkError;
use crate::types::{Chunk, ChunkId, NodeId};
use serde::{Deserialize, Serialize};

/// Messages exchanged by the coordination core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Chunks pushed to the target node during migration.
    MigrationPush {
        /// The chunks changing owner, payloads included.
        chunks: Vec<Chunk>,
    },

    /// Tell a backup peer to drop its replicas of the given chunks.
    ///
    /// Sent after a migration moved the chunks away from the node the peer
    /// was backing.
    BackupRemove {
        /// Ids whose replicas are stale.
        chunk_ids: Vec<ChunkId>,
    },
}

impl Message {
    /// Serialize the message to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize a message from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

/// Point-to-point message sender.
///
/// One call is one attempt; the core never retries internally.
pub trait NetworkSender: Send + Sync {
    /// Send a message to the target node.
    fn send(&self, target: NodeId, message: Message) -> Result<(), NetworkError>;
}
