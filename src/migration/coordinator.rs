//! The migration coordinator state machine.

use crate::backup::BackupAssignments;
use crate::config::MigrationConfig;
use crate::error::{Error, Result};
use crate::lock::LockTable;
use crate::lookup::LocationResolver;
use crate::memory::ChunkMemory;
use crate::network::{Message, NetworkSender};
use crate::types::{Chunk, ChunkId, NodeId, INVALID_NODE_ID};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Where the current (or last) migration operation stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPhase {
    /// No migration in flight.
    Idle,
    /// Migration mutex acquired, preflight checks running.
    Locked,
    /// Reading chunk payloads under the memory access lock.
    Snapshot,
    /// Pushing chunks to the target node.
    Transmit,
    /// Updating the lookup overlay with the new owner.
    UpdateLookup,
    /// Telling backup peers to drop stale replicas.
    InvalidateBackup,
    /// Freeing local copies and lock entries.
    FreeLocal,
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationPhase::Idle => "idle",
            MigrationPhase::Locked => "locked",
            MigrationPhase::Snapshot => "snapshot",
            MigrationPhase::Transmit => "transmit",
            MigrationPhase::UpdateLookup => "update_lookup",
            MigrationPhase::InvalidateBackup => "invalidate_backup",
            MigrationPhase::FreeLocal => "free_local",
        };
        write!(f, "{name}")
    }
}

/// Counters over the coordinator's lifetime.
#[derive(Debug, Default)]
pub struct MigrationStats {
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    chunks_moved: AtomicU64,
}

impl MigrationStats {
    /// Operations that entered the state machine.
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    /// Operations that ran to completion.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Operations aborted by a transmission failure.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Chunks that changed owner.
    pub fn chunks_moved(&self) -> u64 {
        self.chunks_moved.load(Ordering::Relaxed)
    }
}

/// Coordinates chunk ownership transfer away from this node.
///
/// All mutating entry points funnel through one migration mutex, so the
/// state machine runs one operation at a time. A transmission failure aborts
/// before any local or overlay state has been touched, which makes a failed
/// migration safe to retry as-is.
pub struct MigrationCoordinator {
    node_id: NodeId,
    config: MigrationConfig,
    migration_lock: Mutex<()>,
    phase: RwLock<MigrationPhase>,
    memory: Arc<dyn ChunkMemory>,
    lookup: Arc<dyn LocationResolver>,
    locks: Arc<LockTable>,
    network: Arc<dyn NetworkSender>,
    backup: Arc<BackupAssignments>,
    stats: MigrationStats,
}

impl MigrationCoordinator {
    /// Wire up a coordinator from its collaborators.
    pub fn new(
        node_id: NodeId,
        config: MigrationConfig,
        memory: Arc<dyn ChunkMemory>,
        lookup: Arc<dyn LocationResolver>,
        locks: Arc<LockTable>,
        network: Arc<dyn NetworkSender>,
        backup: Arc<BackupAssignments>,
    ) -> Self {
        Self {
            node_id,
            config,
            migration_lock: Mutex::new(()),
            phase: RwLock::new(MigrationPhase::Idle),
            memory,
            lookup,
            locks,
            network,
            backup,
            stats: MigrationStats::default(),
        }
    }

    /// Current phase of the state machine.
    pub fn phase(&self) -> MigrationPhase {
        *self.phase.read()
    }

    /// Lifetime counters.
    pub fn stats(&self) -> &MigrationStats {
        &self.stats
    }

    /// Migrate one chunk to `target`.
    ///
    /// Returns `Ok(false)` without touching anything when the chunk is not
    /// stored locally, the target is this node, or the chunk is this node's
    /// own index chunk. `Err` is only returned when transmission fails, in
    /// which case no state was mutated.
    pub fn migrate(&self, chunk_id: ChunkId, target: NodeId) -> Result<bool> {
        let _guard = self.migration_lock.lock();
        self.migrate_locked(chunk_id, target)
    }

    /// Migrate every existing chunk in the inclusive id range to `target`.
    ///
    /// Ids missing locally are skipped with a log line; the index chunk is
    /// never included. Chunks go out in batches bounded by
    /// `max_batch_bytes`, followed by one lookup update and one set of
    /// backup-remove notifications for the whole range.
    pub fn migrate_range(&self, start: ChunkId, end: ChunkId, target: NodeId) -> Result<bool> {
        let _guard = self.migration_lock.lock();
        let operation = Uuid::new_v4();

        if start.creator() != end.creator() || start.raw() > end.raw() {
            tracing::warn!(%start, %end, "Invalid migration range");
            return Ok(false);
        }
        if target == self.node_id {
            tracing::warn!(%start, %end, "Range migration to own node, ignored");
            return Ok(false);
        }

        self.set_phase(MigrationPhase::Locked);
        self.stats.started.fetch_add(1, Ordering::Relaxed);
        tracing::info!(%operation, %start, %end, target, "Migrating chunk range");

        // Snapshot all existing chunks in one pass under the access lock.
        self.set_phase(MigrationPhase::Snapshot);
        self.memory.lock_access();
        let mut chunks = Vec::new();
        for raw in start.raw()..=end.raw() {
            let id = ChunkId(raw);
            if id.is_index_chunk() {
                tracing::debug!(chunk = %id, "Index chunk excluded from range migration");
                continue;
            }
            match self.memory.read(id) {
                Some(chunk) => chunks.push(chunk),
                None => tracing::debug!(chunk = %id, "Chunk not stored locally, skipped"),
            }
        }
        self.memory.unlock_access();

        if chunks.is_empty() {
            tracing::info!(%operation, "No chunks in range, nothing to migrate");
            self.finish(MigrationOutcome::Completed);
            return Ok(false);
        }

        self.set_phase(MigrationPhase::Transmit);
        if let Err(cause) = self.transmit_batched(target, &chunks) {
            tracing::error!(%operation, target, %cause, "Range transmission failed, aborting");
            self.finish(MigrationOutcome::Failed);
            return Err(cause);
        }

        self.set_phase(MigrationPhase::UpdateLookup);
        if let Err(cause) = self.lookup.migrate_range(start, end, target) {
            tracing::error!(%operation, %cause, "Lookup update failed after transfer");
        }

        let moved: Vec<ChunkId> = chunks.iter().map(|chunk| chunk.id).collect();

        self.set_phase(MigrationPhase::InvalidateBackup);
        self.invalidate_backups(&moved);

        self.set_phase(MigrationPhase::FreeLocal);
        for id in &moved {
            self.memory.remove(*id);
            self.locks.force_release(id.local_id());
        }

        self.stats
            .chunks_moved
            .fetch_add(moved.len() as u64, Ordering::Relaxed);
        tracing::info!(%operation, moved = moved.len(), target, "Range migration complete");
        self.finish(MigrationOutcome::Completed);
        Ok(true)
    }

    /// Migrate everything this node stores to `target`.
    ///
    /// Drains the node's own creator ranges plus all chunks previously
    /// migrated onto it, skipping the index chunk. Per-chunk failures are
    /// logged and skipped, so the call can be re-run to drain what is left.
    pub fn migrate_all(&self, target: NodeId) -> Result<u64> {
        let mut moved = 0u64;

        for (first, last) in self.memory.owned_ranges() {
            for raw in first.raw()..=last.raw() {
                let id = ChunkId(raw);
                if id.is_index_chunk() {
                    continue;
                }
                moved += self.migrate_one_of_many(id, target);
            }
        }

        for id in self.memory.migrated_ids() {
            moved += self.migrate_one_of_many(id, target);
        }

        tracing::info!(moved, target, "Drained local chunks");
        Ok(moved)
    }

    /// Receive-side handler: store chunks pushed here by another node.
    pub fn on_incoming_migration(&self, chunks: Vec<Chunk>) -> Result<()> {
        let count = chunks.len();
        for chunk in chunks {
            tracing::trace!(chunk = %chunk.id, size = chunk.size(), "Storing migrated chunk");
            self.memory.insert(chunk)?;
        }
        tracing::debug!(count, "Stored incoming migrated chunks");
        Ok(())
    }

    /// Dispatch an incoming coordination message.
    pub fn handle_message(&self, message: Message) -> Result<()> {
        match message {
            Message::MigrationPush { chunks } => self.on_incoming_migration(chunks),
            Message::BackupRemove { chunk_ids } => {
                // replica invalidation happens in the backup log layer
                tracing::debug!(count = chunk_ids.len(), "Backup remove received");
                Ok(())
            }
        }
    }

    fn migrate_locked(&self, chunk_id: ChunkId, target: NodeId) -> Result<bool> {
        let operation = Uuid::new_v4();

        if target == self.node_id {
            tracing::warn!(chunk = %chunk_id, "Migration to own node, ignored");
            return Ok(false);
        }
        if chunk_id.is_index_chunk() && chunk_id.creator() == self.node_id {
            tracing::warn!(chunk = %chunk_id, "Index chunk is never migrated");
            return Ok(false);
        }

        self.set_phase(MigrationPhase::Locked);
        if !self.memory.exists(chunk_id) {
            tracing::warn!(chunk = %chunk_id, "Chunk not stored locally, cannot migrate");
            self.set_phase(MigrationPhase::Idle);
            return Ok(false);
        }

        self.stats.started.fetch_add(1, Ordering::Relaxed);
        tracing::info!(%operation, chunk = %chunk_id, target, "Migrating chunk");

        self.set_phase(MigrationPhase::Snapshot);
        self.memory.lock_access();
        let snapshot = self.memory.read(chunk_id);
        self.memory.unlock_access();

        let chunk = match snapshot {
            Some(chunk) => chunk,
            None => {
                // removed between the existence check and the snapshot
                tracing::warn!(%operation, chunk = %chunk_id, "Chunk vanished before snapshot");
                self.finish(MigrationOutcome::Completed);
                return Ok(false);
            }
        };

        self.set_phase(MigrationPhase::Transmit);
        if let Err(cause) = self
            .network
            .send(target, Message::MigrationPush { chunks: vec![chunk] })
        {
            tracing::error!(%operation, target, %cause, "Transmission failed, aborting migration");
            self.finish(MigrationOutcome::Failed);
            return Err(Error::Network(cause));
        }

        self.set_phase(MigrationPhase::UpdateLookup);
        if let Err(cause) = self.lookup.migrate(chunk_id, target) {
            tracing::error!(%operation, %cause, "Lookup update failed after transfer");
        }

        self.set_phase(MigrationPhase::InvalidateBackup);
        self.invalidate_backups(&[chunk_id]);

        self.set_phase(MigrationPhase::FreeLocal);
        self.memory.remove(chunk_id);
        self.locks.force_release(chunk_id.local_id());

        self.stats.chunks_moved.fetch_add(1, Ordering::Relaxed);
        tracing::info!(%operation, chunk = %chunk_id, target, "Migration complete");
        self.finish(MigrationOutcome::Completed);
        Ok(true)
    }

    fn migrate_one_of_many(&self, id: ChunkId, target: NodeId) -> u64 {
        match self.migrate(id, target) {
            Ok(true) => 1,
            Ok(false) => 0,
            Err(cause) => {
                tracing::warn!(chunk = %id, %cause, "Skipping chunk after failed migration");
                0
            }
        }
    }

    fn transmit_batched(&self, target: NodeId, chunks: &[Chunk]) -> Result<()> {
        let mut batch: Vec<Chunk> = Vec::new();
        let mut batch_bytes = 0usize;

        for chunk in chunks {
            if !batch.is_empty() && batch_bytes + chunk.size() > self.config.max_batch_bytes {
                self.network
                    .send(target, Message::MigrationPush { chunks: std::mem::take(&mut batch) })?;
                batch_bytes = 0;
            }
            batch_bytes += chunk.size();
            batch.push(chunk.clone());
        }
        if !batch.is_empty() {
            self.network
                .send(target, Message::MigrationPush { chunks: batch })?;
        }
        Ok(())
    }

    fn invalidate_backups(&self, moved: &[ChunkId]) {
        if !self.backup.is_active() {
            return;
        }

        let mut per_peer: HashMap<NodeId, Vec<ChunkId>> = HashMap::new();
        for id in moved {
            if let Some(peers) = self.backup.peers_for(*id) {
                for peer in peers {
                    if peer == INVALID_NODE_ID || peer == self.node_id {
                        continue;
                    }
                    per_peer.entry(peer).or_default().push(*id);
                }
            }
        }

        for (peer, chunk_ids) in per_peer {
            let count = chunk_ids.len();
            if let Err(cause) = self.network.send(peer, Message::BackupRemove { chunk_ids }) {
                tracing::error!(peer, %cause, "Failed to notify backup peer of removal");
            } else {
                tracing::debug!(peer, count, "Notified backup peer of removed replicas");
            }
        }
    }

    fn set_phase(&self, phase: MigrationPhase) {
        tracing::trace!(%phase, "Migration phase change");
        *self.phase.write() = phase;
    }

    fn finish(&self, outcome: MigrationOutcome) {
        match outcome {
            MigrationOutcome::Completed => {
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
            }
            MigrationOutcome::Failed => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.set_phase(MigrationPhase::Idle);
    }
}

enum MigrationOutcome {
    Completed,
    Failed,
}
