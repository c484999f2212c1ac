//! Testing utilities for the coordination core.
//!
//! Provides in-process doubles for the collaborators a real node wires in
//! over the network:
//!
//! - [`RecordingSender`] records outbound messages and can fail on demand,
//!   for asserting what a component tried to send.
//! - [`InProcessNetwork`] routes messages between migration coordinators
//!   living in the same process, for end-to-end migration tests without a
//!   transport.
//!
//! Integration tests that span multiple components live in the submodules
//! here rather than next to any single component.

mod lock_integration_tests;

use crate::error::NetworkError;
use crate::migration::MigrationCoordinator;
use crate::network::{Message, NetworkSender};
use crate::types::NodeId;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Install a tracing subscriber for test output, once per process.
///
/// Controlled by `RUST_LOG`; output goes through the test writer so it is
/// captured per test.
#[cfg(test)]
pub(crate) fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Sender double that records every message instead of transmitting.
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(NodeId, Message)>>,
    fail_remaining: AtomicUsize,
}

impl RecordingSender {
    /// Create a sender that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` sends fail before recording anything.
    pub fn fail_next_sends(&self, count: usize) {
        self.fail_remaining.store(count, Ordering::SeqCst);
    }

    /// Everything sent so far, in order.
    pub fn sent(&self) -> Vec<(NodeId, Message)> {
        self.sent.lock().clone()
    }

    /// Drop the recorded history.
    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

impl NetworkSender for RecordingSender {
    fn send(&self, target: NodeId, message: Message) -> Result<(), NetworkError> {
        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
        {
            return Err(NetworkError::SendFailed {
                target,
                reason: "injected send failure".into(),
            });
        }
        self.sent.lock().push((target, message));
        Ok(())
    }
}

/// Routes messages directly to coordinators in the same process.
///
/// Nodes are registered after construction, so the network can be handed to
/// a coordinator before its peers exist. Sending to an unregistered node
/// fails with [`NetworkError::Unreachable`].
#[derive(Default)]
pub struct InProcessNetwork {
    handlers: RwLock<HashMap<NodeId, Arc<MigrationCoordinator>>>,
}

impl InProcessNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the coordinator handling messages addressed to `node_id`.
    pub fn register(&self, node_id: NodeId, coordinator: Arc<MigrationCoordinator>) {
        self.handlers.write().insert(node_id, coordinator);
    }

    /// Remove a node, making it unreachable.
    pub fn disconnect(&self, node_id: NodeId) {
        self.handlers.write().remove(&node_id);
    }
}

impl NetworkSender for InProcessNetwork {
    fn send(&self, target: NodeId, message: Message) -> Result<(), NetworkError> {
        let handler = self
            .handlers
            .read()
            .get(&target)
            .cloned()
            .ok_or(NetworkError::Unreachable(target))?;
        handler.handle_message(message).map_err(|cause| {
            NetworkError::SendFailed {
                target,
                reason: cause.to_string(),
            }
        })
    }
}
