//! Node failure notifications.
//!
//! The core does not run its own failure detector; it consumes a feed of
//! failure events from the overlay. The lock table subscribes and reacts to
//! peer failures only, since superpeers never hold chunk locks.

use crate::types::NodeId;

/// Role a node plays in the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// Holds chunk data.
    Peer,
    /// Runs location resolution.
    Superpeer,
}

/// A node has been confirmed as failed by the failure detector.
///
/// The detector guarantees that no further requests from the failed node
/// arrive after this event is delivered.
#[derive(Debug, Clone, Copy)]
pub struct NodeFailureEvent {
    /// The failed node's id.
    pub node_id: NodeId,
    /// The failed node's role.
    pub role: NodeRole,
}

impl NodeFailureEvent {
    /// Create a new failure event.
    pub fn new(node_id: NodeId, role: NodeRole) -> Self {
        Self { node_id, role }
    }

    /// Whether the failed node was a data-holding peer.
    pub fn is_peer(&self) -> bool {
        self.role == NodeRole::Peer
    }
}

/// Listener for node failure events.
pub trait FailureListener: Send + Sync {
    /// Called when a node failure is confirmed.
    fn on_node_failure(&self, event: NodeFailureEvent);
}

/// Event listener that only logs failures.
pub struct LoggingFailureListener;

impl FailureListener for LoggingFailureListener {
    fn on_node_failure(&self, event: NodeFailureEvent) {
        match event.role {
            NodeRole::Peer => {
                tracing::error!(node_id = event.node_id, "Peer confirmed failed");
            }
            NodeRole::Superpeer => {
                tracing::error!(node_id = event.node_id, "Superpeer confirmed failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_roles() {
        assert!(NodeFailureEvent::new(3, NodeRole::Peer).is_peer());
        assert!(!NodeFailureEvent::new(3, NodeRole::Superpeer).is_peer());
    }
}
