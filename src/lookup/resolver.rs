//! Authoritative location resolution backend.

use crate::error::{Error, Result};
use crate::types::{ChunkId, Locations, NodeId};
use parking_lot::RwLock;

/// Resolves chunk ids to their owning and backup peers.
///
/// Implemented by the superpeer overlay client in production and by
/// [`InMemoryResolver`] in tests. The caching decorator
/// ([`super::CachedResolver`]) implements this trait as well, so callers
/// compose the two rather than caring which one they hold.
pub trait LocationResolver: Send + Sync {
    /// Resolve a chunk id to its current locations.
    fn resolve(&self, chunk_id: ChunkId) -> Result<Locations>;

    /// Record that ownership of a single chunk moved to a new owner.
    fn migrate(&self, chunk_id: ChunkId, new_owner: NodeId) -> Result<()>;

    /// Record that ownership of an inclusive id range moved to a new owner.
    fn migrate_range(&self, start: ChunkId, end: ChunkId, new_owner: NodeId) -> Result<()>;

    /// Remove a chunk's location entirely.
    fn remove(&self, chunk_id: ChunkId) -> Result<()>;
}

/// Range-table resolver held entirely in local memory.
///
/// Stands in for the overlay in tests and single-process demos. Ranges are
/// kept sorted by start id; per-chunk overrides (migrated chunks) shadow the
/// range they fall into.
pub struct InMemoryResolver {
    inner: RwLock<ResolverState>,
}

#[derive(Default)]
struct ResolverState {
    /// (range start, locations), sorted ascending by start. A chunk maps to
    /// the last range whose start is <= its id.
    ranges: Vec<(u64, Locations)>,
    /// Per-chunk overrides installed by migrations, newest wins.
    overrides: std::collections::HashMap<u64, Locations>,
}

impl InMemoryResolver {
    /// Create an empty resolver.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(ResolverState::default()),
        }
    }

    /// Register locations for all ids from `first_chunk` upward, until the
    /// next registered range begins.
    pub fn init_range(&self, first_chunk: ChunkId, locations: Locations) {
        let mut state = self.inner.write();
        let start = first_chunk.raw();
        match state.ranges.binary_search_by_key(&start, |&(s, _)| s) {
            Ok(pos) => state.ranges[pos] = (start, locations),
            Err(pos) => state.ranges.insert(pos, (start, locations)),
        }
    }

    fn lookup(state: &ResolverState, chunk_id: ChunkId) -> Option<Locations> {
        if let Some(&locations) = state.overrides.get(&chunk_id.raw()) {
            return Some(locations);
        }
        state
            .ranges
            .iter()
            .rev()
            .find(|&&(start, _)| start <= chunk_id.raw())
            .map(|&(_, locations)| locations)
    }
}

impl Default for InMemoryResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl LocationResolver for InMemoryResolver {
    fn resolve(&self, chunk_id: ChunkId) -> Result<Locations> {
        let state = self.inner.read();
        Self::lookup(&state, chunk_id).ok_or(Error::LocationUnknown(chunk_id))
    }

    fn migrate(&self, chunk_id: ChunkId, new_owner: NodeId) -> Result<()> {
        let mut state = self.inner.write();
        let backups = Self::lookup(&state, chunk_id)
            .map(|locations| locations.backups)
            .unwrap_or([crate::types::INVALID_NODE_ID; crate::types::BACKUP_PEER_COUNT]);
        state
            .overrides
            .insert(chunk_id.raw(), Locations::new(new_owner, backups));
        Ok(())
    }

    fn migrate_range(&self, start: ChunkId, end: ChunkId, new_owner: NodeId) -> Result<()> {
        for raw in start.raw()..=end.raw() {
            self.migrate(ChunkId(raw), new_owner)?;
        }
        Ok(())
    }

    fn remove(&self, chunk_id: ChunkId) -> Result<()> {
        self.inner.write().overrides.remove(&chunk_id.raw());
        Ok(())
    }
}
