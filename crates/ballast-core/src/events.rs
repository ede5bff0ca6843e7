use crate::types::node_name;
use k8s_openapi::api::core::v1::Node;

/// A node state change delivered by the node watch stream
///
/// Delivery is at-least-once. Events for the same node arrive in order;
/// events for different nodes may interleave arbitrarily.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// The node was added or modified; carries the latest snapshot
    Applied(Node),
    /// The node was removed from the cluster
    Deleted(String),
}

impl NodeEvent {
    /// Name of the node the event is about
    pub fn node_name(&self) -> Option<&str> {
        match self {
            Self::Applied(node) => node_name(node),
            Self::Deleted(name) => Some(name.as_str()).filter(|n| !n.is_empty()),
        }
    }
}
