//! Backup log and versioning layer.
//!
//! Each node appends chunk updates to durable log segments, one per backup
//! range. Creator ranges cover contiguous spans of locally created ids;
//! migration ranges collect chunks migrated onto the node, in arrival order.
//! The [`VersionTable`] records, per chunk, which (epoch, version) is the
//! newest durable copy, which drives replay-based recovery.

mod catalog;
mod peers;
mod segment;
mod version_table;

pub use catalog::{BackupLogCatalog, MigrationRangeId, RangeId};
pub use peers::BackupAssignments;
pub use segment::{LogSegment, SegmentBuffer};
pub use version_table::{Version, VersionTable};
