//! Peer-side distributed lock table.
//!
//! The peer owning a chunk keeps all state about its locks. Remote nodes
//! acquire and release through messages handled on this node's threads; a
//! failure notification from the overlay force-releases everything a dead
//! peer still held.

mod table;

pub use table::{LockTable, UNLIMITED};
