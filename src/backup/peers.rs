//! Backup peer assignments for locally owned chunks.

use crate::types::{ChunkId, NodeId, BACKUP_PEER_COUNT, INVALID_NODE_ID};
use parking_lot::RwLock;

/// Which peers replicate which span of locally created chunks.
///
/// Ranges are registered in creation order, so their first local ids are
/// ascending. Resolution scans newest to oldest and takes the first range
/// whose start is at or below the chunk's local id.
pub struct BackupAssignments {
    active: bool,
    ranges: RwLock<Vec<(u64, [NodeId; BACKUP_PEER_COUNT])>>,
}

impl BackupAssignments {
    /// Create the assignment table; `active` mirrors the backup config flag.
    pub fn new(active: bool) -> Self {
        Self {
            active,
            ranges: RwLock::new(Vec::new()),
        }
    }

    /// Whether backup replication is enabled on this node.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Register the backup peers for the range starting at `first_chunk`.
    pub fn register(&self, first_chunk: ChunkId, peers: [NodeId; BACKUP_PEER_COUNT]) {
        tracing::debug!(range_start = %first_chunk, ?peers, "Registered backup range");
        self.ranges.write().push((first_chunk.local_id(), peers));
    }

    /// Backup peers responsible for `chunk`, if any range covers it.
    pub fn peers_for(&self, chunk: ChunkId) -> Option<[NodeId; BACKUP_PEER_COUNT]> {
        let local_id = chunk.local_id();
        let ranges = self.ranges.read();
        ranges
            .iter()
            .rev()
            .find(|(start, _)| *start <= local_id)
            .map(|(_, peers)| *peers)
    }

    /// Peers for `chunk` with unassigned slots filtered out.
    pub fn assigned_peers_for(&self, chunk: ChunkId) -> Vec<NodeId> {
        self.peers_for(chunk)
            .map(|peers| {
                peers
                    .into_iter()
                    .filter(|peer| *peer != INVALID_NODE_ID)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of registered ranges.
    pub fn range_count(&self) -> usize {
        self.ranges.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODE_A: NodeId = 0x0001;
    const NODE_B: NodeId = 0x0002;
    const NODE_C: NodeId = 0x0003;

    fn chunk(local_id: u64) -> ChunkId {
        ChunkId::new(NODE_A, local_id)
    }

    #[test]
    fn test_newest_range_wins() {
        let assignments = BackupAssignments::new(true);
        assignments.register(chunk(1), [NODE_B, NODE_C, INVALID_NODE_ID]);
        assignments.register(chunk(100), [NODE_C, INVALID_NODE_ID, INVALID_NODE_ID]);

        assert_eq!(
            assignments.peers_for(chunk(50)),
            Some([NODE_B, NODE_C, INVALID_NODE_ID])
        );
        assert_eq!(
            assignments.peers_for(chunk(100)),
            Some([NODE_C, INVALID_NODE_ID, INVALID_NODE_ID])
        );
        assert_eq!(
            assignments.peers_for(chunk(5000)),
            Some([NODE_C, INVALID_NODE_ID, INVALID_NODE_ID])
        );
    }

    #[test]
    fn test_uncovered_chunk() {
        let assignments = BackupAssignments::new(true);
        assignments.register(chunk(10), [NODE_B, NODE_C, INVALID_NODE_ID]);
        assert_eq!(assignments.peers_for(chunk(3)), None);
        assert!(assignments.assigned_peers_for(chunk(3)).is_empty());
    }

    #[test]
    fn test_assigned_peers_filter_invalid() {
        let assignments = BackupAssignments::new(true);
        assignments.register(chunk(0), [NODE_B, INVALID_NODE_ID, NODE_C]);
        assert_eq!(
            assignments.assigned_peers_for(chunk(7)),
            vec![NODE_B, NODE_C]
        );
    }

    #[test]
    fn test_inactive_flag() {
        assert!(!BackupAssignments::new(false).is_active());
        assert!(BackupAssignments::new(true).is_active());
    }
}
