//! Per-node version table: local chunk id -> (epoch, version).

use crate::error::{Error, Result};
use std::hash::Hasher;
use twox_hash::XxHash64;

/// Monotonic markers identifying the newest durable copy of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    /// Epoch, bumped when the backing segment rolls over.
    pub epoch: u16,
    /// Version within the epoch.
    pub version: u32,
}

impl Version {
    /// Create a version marker.
    pub fn new(epoch: u16, version: u32) -> Self {
        Self { epoch, version }
    }
}

/// Open-addressing map from local chunk id to [`Version`].
///
/// Linear probing over a flat table with a fixed stride of four cells per
/// logical slot: key-high, key-low, epoch, version. Keys are stored as
/// `local_id + 1` so an all-zero cell always means "empty". The table is
/// sized once at construction and never rehashed; the caller bounds the load
/// factor by choosing the capacity with a safety margin above the expected
/// number of distinct chunks.
pub struct VersionTable {
    table: Vec<u32>,
    count: usize,
    capacity: usize,
}

const STRIDE: usize = 4;
const DEFAULT_CAPACITY: usize = 100;

impl VersionTable {
    /// Create a table with room for `capacity` logical slots.
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_CAPACITY
        } else {
            capacity
        };
        Self {
            table: vec![0; capacity * STRIDE],
            count: 0,
            capacity,
        }
    }

    /// Number of live entries.
    pub fn size(&self) -> usize {
        self.count
    }

    /// Fixed slot capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remove all entries.
    pub fn clear(&mut self) {
        self.table.fill(0);
        self.count = 0;
    }

    /// Look up the version stored for a local id.
    pub fn get(&self, local_id: u64) -> Option<Version> {
        let key = local_id + 1;
        let mut index = self.initial_index(key);

        loop {
            let stored = self.key_at(index);
            if stored == 0 {
                return None;
            }
            if stored == key {
                return Some(Version::new(self.epoch_at(index), self.version_at(index)));
            }
            index = (index + 1) % self.capacity;
        }
    }

    /// Store a version for a local id.
    ///
    /// Overwrites in place on a key match; a true insert that would break the
    /// `count < capacity` invariant is rejected and leaves the table
    /// unchanged. There is no automatic remediation for a full table beyond
    /// resizing at the next construction.
    pub fn put(&mut self, local_id: u64, epoch: u16, version: u32) -> Result<()> {
        let key = local_id + 1;
        let mut index = self.initial_index(key);

        loop {
            let stored = self.key_at(index);
            if stored == key {
                self.set(index, key, epoch, version);
                return Ok(());
            }
            if stored == 0 {
                break;
            }
            index = (index + 1) % self.capacity;
        }

        if self.count + 1 >= self.capacity {
            tracing::error!(
                capacity = self.capacity,
                "Version table is too small, rehashing prohibited"
            );
            return Err(Error::VersionTableFull {
                capacity: self.capacity,
            });
        }

        self.set(index, key, epoch, version);
        self.count += 1;
        Ok(())
    }

    fn initial_index(&self, key: u64) -> usize {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write_u64(key);
        (hasher.finish() % self.capacity as u64) as usize
    }

    fn key_at(&self, index: usize) -> u64 {
        let cell = index * STRIDE;
        (u64::from(self.table[cell]) << 32) | u64::from(self.table[cell + 1])
    }

    fn epoch_at(&self, index: usize) -> u16 {
        self.table[index * STRIDE + 2] as u16
    }

    fn version_at(&self, index: usize) -> u32 {
        self.table[index * STRIDE + 3]
    }

    fn set(&mut self, index: usize, key: u64, epoch: u16, version: u32) {
        let cell = index * STRIDE;
        self.table[cell] = (key >> 32) as u32;
        self.table[cell + 1] = key as u32;
        self.table[cell + 2] = u32::from(epoch);
        self.table[cell + 3] = version;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_roundtrip() {
        let mut table = VersionTable::new(64);
        for key in 0..32u64 {
            table.put(key, 1, key as u32).unwrap();
        }
        for key in 0..32u64 {
            assert_eq!(table.get(key), Some(Version::new(1, key as u32)));
        }
        assert_eq!(table.size(), 32);
    }

    #[test]
    fn test_key_zero_distinct_from_empty() {
        let mut table = VersionTable::new(8);
        assert_eq!(table.get(0), None);
        table.put(0, 3, 9).unwrap();
        assert_eq!(table.get(0), Some(Version::new(3, 9)));
    }

    #[test]
    fn test_update_overwrites_in_place() {
        let mut table = VersionTable::new(100);
        for key in 1..100u64 {
            table.put(key, 1, 1).unwrap();
        }
        assert_eq!(table.size(), 99);

        table.put(50, 2, 7).unwrap();
        assert_eq!(table.get(50), Some(Version::new(2, 7)));
        assert_eq!(table.size(), 99);
    }

    #[test]
    fn test_full_table_rejects_insert() {
        let mut table = VersionTable::new(4);
        table.put(1, 1, 1).unwrap();
        table.put(2, 1, 1).unwrap();
        table.put(3, 1, 1).unwrap();

        let err = table.put(4, 1, 1).unwrap_err();
        assert!(matches!(err, Error::VersionTableFull { capacity: 4 }));
        // table unchanged: existing entries intact, rejected key absent
        assert_eq!(table.size(), 3);
        assert_eq!(table.get(4), None);
        assert_eq!(table.get(2), Some(Version::new(1, 1)));

        // updates still work at capacity
        table.put(3, 2, 2).unwrap();
        assert_eq!(table.get(3), Some(Version::new(2, 2)));
    }

    #[test]
    fn test_clear() {
        let mut table = VersionTable::new(16);
        table.put(1, 1, 1).unwrap();
        table.clear();
        assert_eq!(table.size(), 0);
        assert_eq!(table.get(1), None);
    }

    #[test]
    fn test_zero_capacity_uses_default() {
        let table = VersionTable::new(0);
        assert_eq!(table.capacity(), 100);
    }

    #[test]
    fn test_probe_wraps_around() {
        // small table forces collisions and wrap-around probing
        let mut table = VersionTable::new(5);
        for key in 10..14u64 {
            table.put(key, 1, key as u32).unwrap();
        }
        for key in 10..14u64 {
            assert_eq!(table.get(key), Some(Version::new(1, key as u32)));
        }
    }
}
