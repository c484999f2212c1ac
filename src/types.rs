//! Core types used throughout the chunk-store coordination core.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Node identifier in the cluster.
///
/// The creator field of a [`ChunkId`] is a `NodeId`, so node ids are 16 bit.
pub type NodeId = u16;

/// Sentinel for "no node" (all bits set).
pub const INVALID_NODE_ID: NodeId = NodeId::MAX;

/// Number of backup peer slots per chunk / backup range.
pub const BACKUP_PEER_COUNT: usize = 3;

/// 64-bit chunk identifier.
///
/// The upper 16 bits name the creator (and, for non-migrated chunks, current
/// owner) node; the lower 48 bits are a per-node local id. Local id 0 is the
/// node's index chunk and is never removed or migrated implicitly.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId(pub u64);

impl ChunkId {
    /// Reserved invalid id (all bits set).
    pub const INVALID: ChunkId = ChunkId(u64::MAX);

    /// Bit mask of the local id field.
    pub const LOCAL_ID_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

    /// Number of bits in the local id field.
    pub const LOCAL_ID_BITS: u32 = 48;

    /// Build an id from a creator node and a local id.
    pub fn new(creator: NodeId, local_id: u64) -> Self {
        debug_assert!(local_id <= Self::LOCAL_ID_MASK);
        ChunkId((u64::from(creator) << Self::LOCAL_ID_BITS) | (local_id & Self::LOCAL_ID_MASK))
    }

    /// The creator node id (upper 16 bits).
    pub fn creator(self) -> NodeId {
        (self.0 >> Self::LOCAL_ID_BITS) as NodeId
    }

    /// The node-local id (lower 48 bits).
    pub fn local_id(self) -> u64 {
        self.0 & Self::LOCAL_ID_MASK
    }

    /// Whether this is the reserved invalid id.
    pub fn is_invalid(self) -> bool {
        self == Self::INVALID
    }

    /// Whether this id names a node's index chunk (local id 0).
    pub fn is_index_chunk(self) -> bool {
        !self.is_invalid() && self.local_id() == 0
    }

    /// Raw 64-bit value.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Debug for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ChunkId({:#018x})", self.0)
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

impl From<u64> for ChunkId {
    fn from(raw: u64) -> Self {
        ChunkId(raw)
    }
}

/// Primary peer and ordered backup peers for a chunk.
///
/// Packs into a single `u64` for cache storage: the primary occupies the low
/// 16 bits, each backup slot the next 16. Unassigned slots hold
/// [`INVALID_NODE_ID`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locations {
    /// Primary owner node.
    pub primary: NodeId,
    /// Backup peers, in replication order.
    pub backups: [NodeId; BACKUP_PEER_COUNT],
}

impl Locations {
    /// Locations with a primary and no backups assigned.
    pub fn primary_only(primary: NodeId) -> Self {
        Self {
            primary,
            backups: [INVALID_NODE_ID; BACKUP_PEER_COUNT],
        }
    }

    /// Locations with a primary and the given backup peers.
    pub fn new(primary: NodeId, backups: [NodeId; BACKUP_PEER_COUNT]) -> Self {
        Self { primary, backups }
    }

    /// Pack into the single-u64 cache representation.
    pub fn to_packed(self) -> u64 {
        let mut packed = u64::from(self.primary);
        for (slot, backup) in self.backups.iter().enumerate() {
            packed |= u64::from(*backup) << (16 * (slot + 1));
        }
        packed
    }

    /// Unpack from the single-u64 cache representation.
    pub fn from_packed(packed: u64) -> Self {
        let mut backups = [INVALID_NODE_ID; BACKUP_PEER_COUNT];
        for (slot, backup) in backups.iter_mut().enumerate() {
            *backup = (packed >> (16 * (slot + 1))) as NodeId;
        }
        Self {
            primary: packed as NodeId,
            backups,
        }
    }

    /// Backup peers that are actually assigned.
    pub fn assigned_backups(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.backups
            .iter()
            .copied()
            .filter(|&peer| peer != INVALID_NODE_ID)
    }

    /// Check whether a node is the primary or one of the backups.
    pub fn involves(&self, node_id: NodeId) -> bool {
        self.primary == node_id || self.backups.contains(&node_id)
    }
}

/// A chunk: id plus its exact payload bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Identifier of the chunk.
    pub id: ChunkId,
    /// Payload.
    pub data: Bytes,
}

impl Chunk {
    /// Create a chunk from an id and payload.
    pub fn new(id: ChunkId, data: impl Into<Bytes>) -> Self {
        Self {
            id,
            data: data.into(),
        }
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_fields() {
        let id = ChunkId::new(0x0002, 0x0000_0000_0005);
        assert_eq!(id.raw(), 0x0002_0000_0000_0005);
        assert_eq!(id.creator(), 0x0002);
        assert_eq!(id.local_id(), 5);
        assert!(!id.is_invalid());
        assert!(!id.is_index_chunk());
    }

    #[test]
    fn test_chunk_id_sentinels() {
        assert!(ChunkId::INVALID.is_invalid());
        assert!(!ChunkId::INVALID.is_index_chunk());
        assert!(ChunkId::new(7, 0).is_index_chunk());
    }

    #[test]
    fn test_locations_pack_roundtrip() {
        let locations = Locations::new(0x0001, [0x0002, 0x0003, INVALID_NODE_ID]);
        let unpacked = Locations::from_packed(locations.to_packed());
        assert_eq!(locations, unpacked);
        assert_eq!(unpacked.assigned_backups().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn test_locations_involves() {
        let locations = Locations::new(1, [2, 3, INVALID_NODE_ID]);
        assert!(locations.involves(1));
        assert!(locations.involves(3));
        assert!(!locations.involves(4));
    }

    #[test]
    fn test_chunk_size() {
        let chunk = Chunk::new(ChunkId::new(1, 1), vec![0u8; 64]);
        assert_eq!(chunk.size(), 64);
    }
}
