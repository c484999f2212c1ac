//! Coordination core for a distributed in-memory chunk store.
//!
//! Peers store chunks identified by 64-bit ids whose upper 16 bits name the
//! creating node; a superpeer overlay resolves ids to their current owner.
//! This crate provides the peer-side coordination pieces around that model:
//!
//! - **Lookup caching** via Moka, so resolved locations are served locally
//!   with TTL-bounded staleness
//! - **Peer-side locking** with lazily created, eagerly evicted lock entries
//! - **Migration** of chunk ownership between peers, as a serialized
//!   state machine that is retryable after transmission failures
//! - **Backup bookkeeping**: log segments per backup range and a fixed-size
//!   version table driving replay-based recovery
//!
//! # Example
//!
//! ```rust,no_run
//! use chunkmesh::{
//!     BackupAssignments, CachedResolver, ChunkId, CoreConfig, HeapChunkStore,
//!     InMemoryResolver, LockTable, MigrationCoordinator,
//! };
//! use chunkmesh::testing::RecordingSender;
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CoreConfig::new(0x0001);
//!
//!     let memory = Arc::new(HeapChunkStore::new(config.node_id));
//!     let resolver = Arc::new(InMemoryResolver::new());
//!     let cached = Arc::new(CachedResolver::new(resolver, &config.lookup));
//!     let locks = Arc::new(LockTable::new());
//!     let network = Arc::new(RecordingSender::new());
//!     let backup = Arc::new(BackupAssignments::new(config.backup.active));
//!
//!     let coordinator = MigrationCoordinator::new(
//!         config.node_id,
//!         config.migration,
//!         memory,
//!         cached,
//!         locks,
//!         network,
//!         backup,
//!     );
//!
//!     coordinator.migrate(ChunkId::new(0x0001, 42), 0x0002)?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              Peer Services                  │
//! └─────────────────────────────────────────────┘
//!          │              │              │
//!          ▼              ▼              ▼
//! ┌──────────────┐ ┌────────────┐ ┌───────────────────┐
//! │CachedResolver│ │ LockTable  │ │MigrationCoordinator│
//! │ (Moka + TTL) │ │ (per chunk)│ │  (state machine)  │
//! └──────────────┘ └────────────┘ └───────────────────┘
//!          │              │              │
//!          ▼              ▼              ▼
//! ┌─────────────────────────────────────────────┐
//! │   Collaborator traits: LocationResolver,    │
//! │   ChunkMemory, NetworkSender                │
//! └─────────────────────────────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────────┐
//! │  Backup: BackupLogCatalog, VersionTable,    │
//! │  BackupAssignments                          │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Consistency Model
//!
//! - **Lookup**: cached locations may be stale until TTL expiry or
//!   invalidation; the overlay is authoritative
//! - **Locks**: exclusive per chunk, force-released on holder failure
//! - **Migration**: serialized per node; a transmission failure aborts
//!   before any state was mutated, so the identical call can be retried

pub mod backup;
pub mod config;
pub mod error;
pub mod events;
pub mod lock;
pub mod lookup;
pub mod memory;
pub mod migration;
pub mod network;
pub mod testing;
pub mod types;

// Core API re-exports
pub use config::{BackupConfig, CoreConfig, LookupConfig, MigrationConfig};
pub use error::{BackupError, Error, NetworkError, Result};
pub use types::{Chunk, ChunkId, Locations, NodeId, BACKUP_PEER_COUNT, INVALID_NODE_ID};

pub use lookup::{CachedResolver, InMemoryResolver, LocationResolver};

pub use lock::{LockTable, UNLIMITED};

pub use migration::{MigrationCoordinator, MigrationPhase, MigrationStats};

pub use backup::{
    BackupAssignments, BackupLogCatalog, LogSegment, MigrationRangeId, RangeId, SegmentBuffer,
    Version, VersionTable,
};

pub use events::{FailureListener, NodeFailureEvent, NodeRole};
pub use memory::{ChunkMemory, HeapChunkStore};
pub use network::{Message, NetworkSender};
