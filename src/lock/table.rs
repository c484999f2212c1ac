//! Lock table implementation.

use crate::events::{FailureListener, NodeFailureEvent};
use crate::types::{NodeId, INVALID_NODE_ID};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Timeout value that blocks indefinitely.
pub const UNLIMITED: Option<Duration> = None;

/// State guarded by a lock entry's mutex.
struct LockState {
    /// Node currently holding the lock, [`INVALID_NODE_ID`] when free.
    holder: NodeId,
}

/// One lazily created lock record per contended local id.
struct LockEntry {
    state: Mutex<LockState>,
    released: Condvar,
    /// Callers currently interacting with this entry. An entry is only
    /// evicted from the table while free and unpinned.
    pinned: AtomicUsize,
}

impl LockEntry {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(LockState {
                holder: INVALID_NODE_ID,
            }),
            released: Condvar::new(),
            pinned: AtomicUsize::new(0),
        })
    }
}

/// Per-node table serializing remote access to local chunks.
///
/// Entries are created on first contention for a local id, under a narrow
/// creation lock with a double-check so two racing first lockers share one
/// entry. Unlike the unbounded table this design descends from, entries are
/// evicted again once free and uncontended.
pub struct LockTable {
    entries: RwLock<HashMap<u64, Arc<LockEntry>>>,
    creation_lock: Mutex<()>,
}

impl LockTable {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            creation_lock: Mutex::new(()),
        }
    }

    /// Acquire the lock for a local id on behalf of `requester`.
    ///
    /// `timeout` of [`UNLIMITED`] blocks until the lock is granted; any other
    /// value bounds the wait and returns `false` on expiry with no side
    /// effects. The lock is exclusive; `write_lock` is carried for interface
    /// compatibility with callers that distinguish read and write intents.
    pub fn lock(
        &self,
        local_id: u64,
        requester: NodeId,
        write_lock: bool,
        timeout: Option<Duration>,
    ) -> bool {
        let _ = write_lock;
        let entry = self.pin_or_create(local_id);

        let acquired = {
            let mut state = entry.state.lock();
            match timeout {
                None => {
                    while state.holder != INVALID_NODE_ID {
                        entry.released.wait(&mut state);
                    }
                    state.holder = requester;
                    true
                }
                Some(timeout) => {
                    let deadline = Instant::now() + timeout;
                    let mut granted = true;
                    while state.holder != INVALID_NODE_ID {
                        if entry.released.wait_until(&mut state, deadline).timed_out()
                            && state.holder != INVALID_NODE_ID
                        {
                            granted = false;
                            break;
                        }
                    }
                    if granted {
                        state.holder = requester;
                    }
                    granted
                }
            }
        };

        entry.pinned.fetch_sub(1, Ordering::AcqRel);
        if !acquired {
            // timed out; the entry may have been left behind by a holder
            // that released concurrently
            self.try_evict(local_id);
        }
        acquired
    }

    /// Release the lock for a local id.
    ///
    /// Fails (returns `false`, logs) if no entry exists or the recorded
    /// holder is not `requester`; a node may only release a lock it holds.
    pub fn unlock(&self, local_id: u64, requester: NodeId, write_lock: bool) -> bool {
        let _ = write_lock;
        let Some(entry) = self.pin_existing(local_id) else {
            tracing::error!(
                local_id = format_args!("{:#x}", local_id),
                node_id = requester,
                "Unlock of a chunk that was never locked"
            );
            return false;
        };

        let released = {
            let mut state = entry.state.lock();
            if state.holder != requester {
                tracing::error!(
                    local_id = format_args!("{:#x}", local_id),
                    holder = state.holder,
                    node_id = requester,
                    "Unlock rejected, lock held by another node"
                );
                false
            } else {
                state.holder = INVALID_NODE_ID;
                entry.released.notify_one();
                true
            }
        };

        entry.pinned.fetch_sub(1, Ordering::AcqRel);
        if released {
            self.try_evict(local_id);
        }
        released
    }

    /// Force-release every lock currently held by `node_id`.
    ///
    /// Used in response to a peer failure; the failure detector guarantees no
    /// further lock requests from the dead node arrive.
    pub fn unlock_all_by_node(&self, node_id: NodeId) -> bool {
        let snapshot: Vec<(u64, Arc<LockEntry>)> = self
            .entries
            .read()
            .iter()
            .map(|(&local_id, entry)| (local_id, Arc::clone(entry)))
            .collect();

        let mut released = 0usize;
        for (local_id, entry) in &snapshot {
            let mut state = entry.state.lock();
            if state.holder == node_id {
                state.holder = INVALID_NODE_ID;
                entry.released.notify_one();
                released += 1;
                tracing::debug!(
                    local_id = format_args!("{:#x}", local_id),
                    node_id,
                    "Force-released lock of failed peer"
                );
            }
        }

        for (local_id, _) in snapshot {
            self.try_evict(local_id);
        }

        if released > 0 {
            tracing::info!(node_id, released, "Cleaned up locks of failed peer");
        }
        true
    }

    /// Force-release whatever holder a local id's entry records.
    ///
    /// Migration cleanup: after a chunk leaves this node, its lock entry must
    /// not keep a stale holder. Returns whether a holder was cleared.
    pub fn force_release(&self, local_id: u64) -> bool {
        let Some(entry) = self.pin_existing(local_id) else {
            return false;
        };

        let cleared = {
            let mut state = entry.state.lock();
            if state.holder != INVALID_NODE_ID {
                state.holder = INVALID_NODE_ID;
                entry.released.notify_one();
                true
            } else {
                false
            }
        };

        entry.pinned.fetch_sub(1, Ordering::AcqRel);
        self.try_evict(local_id);
        cleared
    }

    /// Holder of a local id's lock, if an entry exists and is held.
    pub fn holder(&self, local_id: u64) -> Option<NodeId> {
        let entries = self.entries.read();
        let entry = entries.get(&local_id)?;
        let state = entry.state.lock();
        (state.holder != INVALID_NODE_ID).then_some(state.holder)
    }

    /// Number of live lock entries.
    pub fn entry_count(&self) -> usize {
        self.entries.read().len()
    }

    /// Fetch an entry and pin it, creating it if absent.
    ///
    /// Creation runs under the creation lock with a re-check, so two racing
    /// first lockers end up sharing one entry. Pinning happens while the map
    /// guard is held, which orders it before any eviction check.
    fn pin_or_create(&self, local_id: u64) -> Arc<LockEntry> {
        {
            let entries = self.entries.read();
            if let Some(entry) = entries.get(&local_id) {
                entry.pinned.fetch_add(1, Ordering::AcqRel);
                return Arc::clone(entry);
            }
        }

        let _creation = self.creation_lock.lock();
        let mut entries = self.entries.write();
        // re-check: another caller may have created the entry meanwhile
        let entry = entries
            .entry(local_id)
            .or_insert_with(LockEntry::new);
        entry.pinned.fetch_add(1, Ordering::AcqRel);
        Arc::clone(entry)
    }

    /// Fetch an existing entry and pin it.
    fn pin_existing(&self, local_id: u64) -> Option<Arc<LockEntry>> {
        let entries = self.entries.read();
        let entry = entries.get(&local_id)?;
        entry.pinned.fetch_add(1, Ordering::AcqRel);
        Some(Arc::clone(entry))
    }

    /// Drop an entry that is free and uncontended.
    fn try_evict(&self, local_id: u64) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get(&local_id) {
            let free = entry.state.lock().holder == INVALID_NODE_ID;
            if free && entry.pinned.load(Ordering::Acquire) == 0 {
                entries.remove(&local_id);
            }
        }
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FailureListener for LockTable {
    fn on_node_failure(&self, event: NodeFailureEvent) {
        // superpeer failures do not imply chunk-lock cleanup
        if !event.is_peer() {
            return;
        }

        tracing::debug!(
            node_id = event.node_id,
            "Connection to peer lost, unlocking all chunks locked by lost instance"
        );
        if !self.unlock_all_by_node(event.node_id) {
            tracing::error!(
                node_id = event.node_id,
                "Unlocking all locked chunks of crashed peer failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NodeRole;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_lock_unlock_roundtrip() {
        let table = LockTable::new();

        assert!(table.lock(5, 2, true, UNLIMITED));
        assert_eq!(table.holder(5), Some(2));

        assert!(table.unlock(5, 2, true));
        assert_eq!(table.holder(5), None);
    }

    #[test]
    fn test_unlock_requires_holder() {
        let table = LockTable::new();

        assert!(table.lock(5, 2, true, UNLIMITED));
        assert!(!table.unlock(5, 3, true));
        assert_eq!(table.holder(5), Some(2));

        assert!(table.unlock(5, 2, true));
    }

    #[test]
    fn test_unlock_never_locked() {
        let table = LockTable::new();
        assert!(!table.unlock(5, 2, true));
    }

    #[test]
    fn test_bounded_wait_times_out() {
        let table = Arc::new(LockTable::new());
        assert!(table.lock(5, 2, true, UNLIMITED));

        let contender = {
            let table = table.clone();
            std::thread::spawn(move || table.lock(5, 3, true, Some(Duration::from_millis(50))))
        };

        assert!(!contender.join().unwrap());
        // the failed attempt had no side effects
        assert_eq!(table.holder(5), Some(2));
        assert!(table.unlock(5, 2, true));
    }

    #[test]
    fn test_mutual_exclusion() {
        let table = Arc::new(LockTable::new());
        let successes = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8u16)
            .map(|node| {
                let table = table.clone();
                let successes = successes.clone();
                std::thread::spawn(move || {
                    if table.lock(42, node, true, Some(Duration::from_millis(30))) {
                        successes.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(100));
                        assert!(table.unlock(42, node, true));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        // exactly one thread got the lock before any unlock happened
        assert_eq!(successes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unlock_wakes_waiter() {
        let table = Arc::new(LockTable::new());
        assert!(table.lock(7, 1, true, UNLIMITED));

        let waiter = {
            let table = table.clone();
            std::thread::spawn(move || table.lock(7, 2, true, UNLIMITED))
        };

        std::thread::sleep(Duration::from_millis(30));
        assert!(table.unlock(7, 1, true));
        assert!(waiter.join().unwrap());
        assert_eq!(table.holder(7), Some(2));
        assert!(table.unlock(7, 2, true));
    }

    #[test]
    fn test_failure_cleanup_releases_all() {
        let table = LockTable::new();

        assert!(table.lock(1, 9, true, UNLIMITED));
        assert!(table.lock(2, 9, true, UNLIMITED));
        assert!(table.lock(3, 4, true, UNLIMITED));

        assert!(table.unlock_all_by_node(9));

        // a new locker succeeds immediately on the cleaned-up ids
        assert!(table.lock(1, 5, true, Some(Duration::from_millis(10))));
        assert!(table.lock(2, 5, true, Some(Duration::from_millis(10))));
        // the unrelated lock survived
        assert_eq!(table.holder(3), Some(4));
    }

    #[test]
    fn test_failure_listener_ignores_superpeers() {
        let table = LockTable::new();
        assert!(table.lock(1, 9, true, UNLIMITED));

        table.on_node_failure(NodeFailureEvent::new(9, NodeRole::Superpeer));
        assert_eq!(table.holder(1), Some(9));

        table.on_node_failure(NodeFailureEvent::new(9, NodeRole::Peer));
        assert_eq!(table.holder(1), None);
    }

    #[test]
    fn test_entries_evicted_when_free() {
        let table = LockTable::new();

        assert!(table.lock(5, 2, true, UNLIMITED));
        assert_eq!(table.entry_count(), 1);

        assert!(table.unlock(5, 2, true));
        assert_eq!(table.entry_count(), 0);
    }

    #[test]
    fn test_force_release() {
        let table = LockTable::new();

        assert!(table.lock(5, 2, true, UNLIMITED));
        assert!(table.force_release(5));
        assert_eq!(table.holder(5), None);
        assert!(!table.force_release(5));
    }

    #[test]
    fn test_racing_creation_shares_entry() {
        let table = Arc::new(LockTable::new());

        let handles: Vec<_> = (0..16u16)
            .map(|node| {
                let table = table.clone();
                std::thread::spawn(move || {
                    assert!(table.lock(99, node, true, UNLIMITED));
                    assert!(table.unlock(99, node, true));
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(table.holder(99), None);
    }
}
