//! Caching decorator over the authoritative location resolver.

use crate::config::LookupConfig;
use crate::error::Result;
use crate::lookup::LocationResolver;
use crate::types::{ChunkId, Locations, NodeId};
use moka::sync::Cache;
use std::sync::Arc;

/// Location resolver with a local cache in front.
///
/// Cache entries are a pure performance optimization over the authoritative
/// resolver: losing one is always safe, just slower. Entries are stored in
/// their packed `u64` form and may expire after the configured TTL; expiry
/// never substitutes for an explicit forced refresh.
pub struct CachedResolver {
    inner: Arc<dyn LocationResolver>,
    cache: Cache<u64, u64>,
}

impl CachedResolver {
    /// Wrap a resolver with a cache sized per the given configuration.
    pub fn new(inner: Arc<dyn LocationResolver>, config: &LookupConfig) -> Self {
        let mut builder = Cache::builder().max_capacity(config.cache_entries);
        if let Some(ttl) = config.cache_ttl {
            builder = builder.time_to_live(ttl);
        }
        Self {
            inner,
            cache: builder.build(),
        }
    }

    /// Resolve a chunk id, consulting the cache first.
    ///
    /// With `force_refresh` the delegate is always asked and the cache entry
    /// rewritten. Resolving [`ChunkId::INVALID`] is a programming error.
    pub fn resolve_cached(&self, chunk_id: ChunkId, force_refresh: bool) -> Result<Locations> {
        assert!(!chunk_id.is_invalid(), "resolve of invalid chunk id");

        if !force_refresh {
            if let Some(packed) = self.cache.get(&chunk_id.raw()) {
                return Ok(Locations::from_packed(packed));
            }
            tracing::trace!(chunk_id = %chunk_id, "location not cached");
        }

        let locations = self.inner.resolve(chunk_id)?;
        self.cache.insert(chunk_id.raw(), locations.to_packed());
        Ok(locations)
    }

    /// Drop cached locations for the given ids.
    pub fn invalidate(&self, chunk_ids: &[ChunkId]) {
        for &chunk_id in chunk_ids {
            assert!(!chunk_id.is_invalid(), "invalidate of invalid chunk id");
            self.cache.invalidate(&chunk_id.raw());
        }
    }

    /// Drop cached locations for every id in the inclusive range.
    ///
    /// Linear sweep over the range, one id at a time.
    pub fn invalidate_range(&self, start: ChunkId, end: ChunkId) {
        assert!(!start.is_invalid() && !end.is_invalid());
        let mut iter = start.raw();
        while iter <= end.raw() {
            self.cache.invalidate(&iter);
            iter += 1;
        }
    }

    /// Drop every cached location.
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    /// Number of entries currently cached (approximate under concurrency).
    pub fn cached_entries(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }
}

impl LocationResolver for CachedResolver {
    fn resolve(&self, chunk_id: ChunkId) -> Result<Locations> {
        self.resolve_cached(chunk_id, false)
    }

    fn migrate(&self, chunk_id: ChunkId, new_owner: NodeId) -> Result<()> {
        assert!(!chunk_id.is_invalid());
        self.invalidate(&[chunk_id]);
        self.inner.migrate(chunk_id, new_owner)
    }

    fn migrate_range(&self, start: ChunkId, end: ChunkId, new_owner: NodeId) -> Result<()> {
        self.invalidate_range(start, end);
        self.inner.migrate_range(start, end, new_owner)
    }

    fn remove(&self, chunk_id: ChunkId) -> Result<()> {
        assert!(!chunk_id.is_invalid());
        self.invalidate(&[chunk_id]);
        self.inner.remove(chunk_id)
    }
}
