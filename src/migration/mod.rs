//! Chunk migration between peers.
//!
//! One node-wide coordinator moves chunks to new owners: snapshot under the
//! memory access lock, push over the network, update the lookup overlay,
//! invalidate stale backups, free the local copy. Operations are serialized
//! by a single migration mutex, so at most one migration mutates state at a
//! time.

mod coordinator;

pub use coordinator::{MigrationCoordinator, MigrationPhase, MigrationStats};
