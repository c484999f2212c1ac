//! Chunk memory collaborator interface.
//!
//! The raw chunk heap lives outside this core; the coordination layer talks to
//! it through [`ChunkMemory`]. Readers that need a consistent multi-chunk view
//! (migration snapshots) bracket their reads with the explicit
//! `lock_access`/`unlock_access` pair, mirroring the heap's own access lock.

use crate::error::Result;
use crate::types::{Chunk, ChunkId, NodeId};
use bytes::Bytes;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};

/// Interface to the node's chunk memory manager.
pub trait ChunkMemory: Send + Sync {
    /// Acquire the memory access lock. Blocks until available.
    fn lock_access(&self);

    /// Release the memory access lock.
    fn unlock_access(&self);

    /// Whether a chunk is stored locally.
    fn exists(&self, id: ChunkId) -> bool;

    /// Exact payload size of a local chunk, if present.
    fn size_of(&self, id: ChunkId) -> Option<usize>;

    /// Read a local chunk's bytes, if present.
    fn read(&self, id: ChunkId) -> Option<Chunk>;

    /// Insert a chunk. Foreign-creator ids (migrated chunks) must be accepted.
    fn insert(&self, chunk: Chunk) -> Result<()>;

    /// Remove a local chunk. Returns whether it existed.
    fn remove(&self, id: ChunkId) -> bool;

    /// Contiguous id ranges of chunks created on this node, as inclusive
    /// `(first, last)` pairs.
    fn owned_ranges(&self) -> Vec<(ChunkId, ChunkId)>;

    /// Ids of chunks migrated onto this node from other creators.
    fn migrated_ids(&self) -> Vec<ChunkId>;
}

/// In-memory chunk store backed by a plain map.
///
/// Reference implementation used by tests and demos; a production node plugs
/// its real heap in behind [`ChunkMemory`] instead.
pub struct HeapChunkStore {
    node_id: NodeId,
    chunks: RwLock<BTreeMap<u64, Bytes>>,
    migrated: RwLock<HashSet<u64>>,
    access_locked: Mutex<bool>,
    access_released: Condvar,
}

impl HeapChunkStore {
    /// Create an empty store for the given node.
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            chunks: RwLock::new(BTreeMap::new()),
            migrated: RwLock::new(HashSet::new()),
            access_locked: Mutex::new(false),
            access_released: Condvar::new(),
        }
    }

    /// Number of chunks currently stored.
    pub fn len(&self) -> usize {
        self.chunks.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.chunks.read().is_empty()
    }
}

impl ChunkMemory for HeapChunkStore {
    fn lock_access(&self) {
        let mut locked = self.access_locked.lock();
        while *locked {
            self.access_released.wait(&mut locked);
        }
        *locked = true;
    }

    fn unlock_access(&self) {
        let mut locked = self.access_locked.lock();
        *locked = false;
        self.access_released.notify_one();
    }

    fn exists(&self, id: ChunkId) -> bool {
        self.chunks.read().contains_key(&id.raw())
    }

    fn size_of(&self, id: ChunkId) -> Option<usize> {
        self.chunks.read().get(&id.raw()).map(Bytes::len)
    }

    fn read(&self, id: ChunkId) -> Option<Chunk> {
        self.chunks
            .read()
            .get(&id.raw())
            .map(|data| Chunk::new(id, data.clone()))
    }

    fn insert(&self, chunk: Chunk) -> Result<()> {
        if chunk.id.creator() != self.node_id {
            self.migrated.write().insert(chunk.id.raw());
        }
        self.chunks.write().insert(chunk.id.raw(), chunk.data);
        Ok(())
    }

    fn remove(&self, id: ChunkId) -> bool {
        self.migrated.write().remove(&id.raw());
        self.chunks.write().remove(&id.raw()).is_some()
    }

    fn owned_ranges(&self) -> Vec<(ChunkId, ChunkId)> {
        let migrated = self.migrated.read();
        let mut ranges: Vec<(ChunkId, ChunkId)> = Vec::new();

        for &raw in self.chunks.read().keys() {
            if migrated.contains(&raw) {
                continue;
            }
            let id = ChunkId(raw);
            match ranges.last_mut() {
                Some((_, last)) if last.raw() + 1 == raw => *last = id,
                _ => ranges.push((id, id)),
            }
        }

        ranges
    }

    fn migrated_ids(&self) -> Vec<ChunkId> {
        let mut ids: Vec<ChunkId> = self.migrated.read().iter().map(|&raw| ChunkId(raw)).collect();
        ids.sort_unstable();
        ids
    }
}
