//! Lock table behavior under concurrent peers and node failures.

#[cfg(test)]
mod tests {
    use crate::events::{FailureListener, NodeFailureEvent, NodeRole};
    use crate::lock::{LockTable, UNLIMITED};
    use crate::types::NodeId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_failure_event_unblocks_waiters() {
        let table = Arc::new(LockTable::new());
        let dead_peer: NodeId = 9;

        assert!(table.lock(5, dead_peer, true, UNLIMITED));

        let waiter = {
            let table = table.clone();
            std::thread::spawn(move || table.lock(5, 2, true, UNLIMITED))
        };
        std::thread::sleep(Duration::from_millis(30));

        // the overlay reports the holder dead; its lock is force-released
        // and the blocked waiter acquires
        table.on_node_failure(NodeFailureEvent::new(dead_peer, NodeRole::Peer));
        assert!(waiter.join().unwrap());
        assert_eq!(table.holder(5), Some(2));
        assert!(table.unlock(5, 2, true));
    }

    #[test]
    fn test_contended_handover_chain() {
        let table = Arc::new(LockTable::new());
        let acquisitions = Arc::new(AtomicUsize::new(0));

        assert!(table.lock(7, 0, true, UNLIMITED));

        let handles: Vec<_> = (1..=4u16)
            .map(|node| {
                let table = table.clone();
                let acquisitions = acquisitions.clone();
                std::thread::spawn(move || {
                    assert!(table.lock(7, node, true, UNLIMITED));
                    acquisitions.fetch_add(1, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(10));
                    assert!(table.unlock(7, node, true));
                })
            })
            .collect();

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(acquisitions.load(Ordering::SeqCst), 0);
        assert!(table.unlock(7, 0, true));

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(acquisitions.load(Ordering::SeqCst), 4);

        // nothing held, nothing retained
        assert_eq!(table.holder(7), None);
        assert_eq!(table.entry_count(), 0);
    }

    #[test]
    fn test_failure_cleanup_spares_other_holders() {
        let table = LockTable::new();

        for local_id in 0..32u64 {
            let holder = if local_id % 2 == 0 { 8 } else { 9 };
            assert!(table.lock(local_id, holder, true, UNLIMITED));
        }

        table.on_node_failure(NodeFailureEvent::new(9, NodeRole::Peer));

        for local_id in 0..32u64 {
            if local_id % 2 == 0 {
                assert_eq!(table.holder(local_id), Some(8));
            } else {
                assert_eq!(table.holder(local_id), None);
            }
        }
        // only the dead peer's entries were evicted
        assert_eq!(table.entry_count(), 16);
    }

    #[test]
    fn test_churn_leaves_table_empty() {
        let table = Arc::new(LockTable::new());

        let handles: Vec<_> = (0..8u16)
            .map(|node| {
                let table = table.clone();
                std::thread::spawn(move || {
                    for round in 0..50u64 {
                        let local_id = round % 4;
                        if table.lock(local_id, node, true, Some(Duration::from_millis(200))) {
                            assert!(table.unlock(local_id, node, true));
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(table.entry_count(), 0);
    }
}
