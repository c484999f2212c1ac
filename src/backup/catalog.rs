//! Catalog of backup log segments kept for one backed-up peer.

use crate::backup::segment::{LogSegment, SegmentBuffer};
use crate::types::{ChunkId, INVALID_NODE_ID};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Index of a migration backup range, monotonic per catalog.
pub type MigrationRangeId = u16;

/// Identifier of one backup range within a catalog.
///
/// Creator ranges are numbered in registration order; migration ranges carry
/// the catalog-assigned migration index. The display form doubles as the
/// segment file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeId {
    /// Range of chunks created by the backed-up peer itself.
    Creator(usize),
    /// Range of chunks migrated onto the backed-up peer.
    Migration(MigrationRangeId),
}

impl fmt::Display for RangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeId::Creator(index) => write!(f, "C{index}"),
            RangeId::Migration(index) => write!(f, "M{index}"),
        }
    }
}

#[derive(Default)]
struct CatalogInner {
    // parallel vectors, registration order; starts are ascending because
    // creator ranges split off the end of the previous one
    creator_starts: Vec<u64>,
    creator_segments: Vec<Arc<LogSegment>>,
    creator_buffers: Vec<Arc<SegmentBuffer>>,
    // indexed by MigrationRangeId
    migration_segments: Vec<Arc<LogSegment>>,
    migration_buffers: Vec<Arc<SegmentBuffer>>,
}

/// All log segments and write buffers this node keeps for one peer.
///
/// Creator ranges are resolved by scanning newest to oldest for the first
/// range whose starting local id is at or below the chunk's; migration ranges
/// are addressed directly by their index, since a migrated chunk's id says
/// nothing about where it landed.
#[derive(Default)]
pub struct BackupLogCatalog {
    inner: RwLock<CatalogInner>,
}

impl BackupLogCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Id the next range of the given kind will get.
    pub fn new_range_id(&self, migration: bool) -> RangeId {
        let inner = self.inner.read();
        if migration {
            RangeId::Migration(inner.migration_segments.len() as MigrationRangeId)
        } else {
            RangeId::Creator(inner.creator_segments.len())
        }
    }

    /// Register a new range with its segment and buffer.
    ///
    /// A key with a valid creator field registers a creator range starting at
    /// the key's local id; a key with the creator bits cleared to the invalid
    /// marker registers the next migration range.
    pub fn insert_range(
        &self,
        key: ChunkId,
        segment: Arc<LogSegment>,
        buffer: Arc<SegmentBuffer>,
    ) -> RangeId {
        let mut inner = self.inner.write();
        let id = if key.creator() != INVALID_NODE_ID {
            inner.creator_starts.push(key.local_id());
            inner.creator_segments.push(segment);
            inner.creator_buffers.push(buffer);
            RangeId::Creator(inner.creator_segments.len() - 1)
        } else {
            inner.migration_segments.push(segment);
            inner.migration_buffers.push(buffer);
            RangeId::Migration((inner.migration_segments.len() - 1) as MigrationRangeId)
        };
        tracing::debug!(range = %id, "Registered backup log range");
        id
    }

    /// Segment holding `chunk`, in the given migration range or, if none is
    /// given, in the creator range covering the chunk's local id.
    pub fn get_log(
        &self,
        chunk: ChunkId,
        migration_range: Option<MigrationRangeId>,
    ) -> Option<Arc<LogSegment>> {
        let inner = self.inner.read();
        let found = match migration_range {
            Some(index) => inner.migration_segments.get(usize::from(index)).cloned(),
            None => creator_index(&inner.creator_starts, chunk)
                .map(|index| inner.creator_segments[index].clone()),
        };
        if found.is_none() {
            tracing::error!(chunk = %chunk, ?migration_range, "There is no log for this chunk");
        }
        found
    }

    /// Write buffer for `chunk`, resolved the same way as [`get_log`].
    ///
    /// [`get_log`]: BackupLogCatalog::get_log
    pub fn get_buffer(
        &self,
        chunk: ChunkId,
        migration_range: Option<MigrationRangeId>,
    ) -> Option<Arc<SegmentBuffer>> {
        let inner = self.inner.read();
        let found = match migration_range {
            Some(index) => inner.migration_buffers.get(usize::from(index)).cloned(),
            None => creator_index(&inner.creator_starts, chunk)
                .map(|index| inner.creator_buffers[index].clone()),
        };
        if found.is_none() {
            tracing::error!(chunk = %chunk, ?migration_range, "There is no buffer for this chunk");
        }
        found
    }

    /// All segments in the catalog, creator ranges first.
    pub fn all_logs(&self) -> Vec<Arc<LogSegment>> {
        let inner = self.inner.read();
        inner
            .creator_segments
            .iter()
            .chain(inner.migration_segments.iter())
            .cloned()
            .collect()
    }

    /// Number of registered ranges of each kind: (creator, migration).
    pub fn range_counts(&self) -> (usize, usize) {
        let inner = self.inner.read();
        (inner.creator_segments.len(), inner.migration_segments.len())
    }

    /// Flush every buffer and sync every segment.
    pub fn close_all(&self) -> crate::error::Result<()> {
        let (buffers, segments) = {
            let inner = self.inner.read();
            let buffers: Vec<_> = inner
                .creator_buffers
                .iter()
                .chain(inner.migration_buffers.iter())
                .cloned()
                .collect();
            let segments: Vec<_> = inner
                .creator_segments
                .iter()
                .chain(inner.migration_segments.iter())
                .cloned()
                .collect();
            (buffers, segments)
        };

        for buffer in buffers {
            buffer.flush()?;
        }
        for segment in segments {
            segment.sync()?;
        }
        Ok(())
    }
}

// newest to oldest, first start at or below the local id wins
fn creator_index(starts: &[u64], chunk: ChunkId) -> Option<usize> {
    let local_id = chunk.local_id();
    starts.iter().rposition(|start| *start <= local_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeId;

    const CREATOR: NodeId = 0x0007;

    fn chunk(local_id: u64) -> ChunkId {
        ChunkId::new(CREATOR, local_id)
    }

    fn range(dir: &std::path::Path, id: RangeId) -> (Arc<LogSegment>, Arc<SegmentBuffer>) {
        let segment = Arc::new(LogSegment::create(dir, &id.to_string()).unwrap());
        let buffer = Arc::new(SegmentBuffer::new(segment.clone(), 1024));
        (segment, buffer)
    }

    #[test]
    fn test_range_id_display() {
        assert_eq!(RangeId::Creator(0).to_string(), "C0");
        assert_eq!(RangeId::Migration(3).to_string(), "M3");
    }

    #[test]
    fn test_creator_range_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = BackupLogCatalog::new();

        let (seg_a, buf_a) = range(dir.path(), RangeId::Creator(0));
        let (seg_b, buf_b) = range(dir.path(), RangeId::Creator(1));
        assert_eq!(
            catalog.insert_range(chunk(1), seg_a.clone(), buf_a),
            RangeId::Creator(0)
        );
        assert_eq!(
            catalog.insert_range(chunk(500), seg_b.clone(), buf_b),
            RangeId::Creator(1)
        );

        // newest matching range wins
        let log = catalog.get_log(chunk(600), None).unwrap();
        assert_eq!(log.path(), seg_b.path());
        let log = catalog.get_log(chunk(100), None).unwrap();
        assert_eq!(log.path(), seg_a.path());
    }

    #[test]
    fn test_migration_range_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = BackupLogCatalog::new();

        assert_eq!(catalog.new_range_id(true), RangeId::Migration(0));
        let (segment, buffer) = range(dir.path(), RangeId::Migration(0));
        let key = ChunkId::new(INVALID_NODE_ID, 0);
        assert_eq!(
            catalog.insert_range(key, segment.clone(), buffer),
            RangeId::Migration(0)
        );
        assert_eq!(catalog.new_range_id(true), RangeId::Migration(1));

        // migrated chunk ids carry a foreign creator, resolution is by index
        let foreign = ChunkId::new(0x0042, 12345);
        let log = catalog.get_log(foreign, Some(0)).unwrap();
        assert_eq!(log.path(), segment.path());
        assert!(catalog.get_buffer(foreign, Some(0)).is_some());
    }

    #[test]
    fn test_missing_range() {
        let catalog = BackupLogCatalog::new();
        assert!(catalog.get_log(chunk(9), None).is_none());
        assert!(catalog.get_buffer(chunk(9), Some(4)).is_none());
    }

    #[test]
    fn test_close_all_flushes_buffers() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = BackupLogCatalog::new();
        let (segment, buffer) = range(dir.path(), RangeId::Creator(0));
        catalog.insert_range(chunk(0), segment.clone(), buffer.clone());

        buffer.push(vec![1, 2, 3]).unwrap();
        assert!(segment.is_empty());
        catalog.close_all().unwrap();
        assert!(!segment.is_empty());
        assert_eq!(buffer.buffered_bytes(), 0);
    }
}
