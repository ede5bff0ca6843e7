use crate::types::{FilterResult, SchedulingContext};
use ballast_core::{node_name, CapacityClass, Node, NodeClassifier, Readiness};
use tracing::debug;

/// Filter predicate trait
pub trait FilterPredicate: Send + Sync {
    /// Filter a node for the given pod
    fn filter(&self, context: &SchedulingContext<'_>, node: &Node) -> FilterResult;

    /// Name of the filter
    fn name(&self) -> &str;
}

/// Rejects nodes that are not affirmatively ready
pub struct NodeReady {
    classifier: NodeClassifier,
}

impl NodeReady {
    pub fn new(classifier: NodeClassifier) -> Self {
        Self { classifier }
    }
}

impl FilterPredicate for NodeReady {
    fn filter(&self, _context: &SchedulingContext<'_>, node: &Node) -> FilterResult {
        let name = node_name(node).unwrap_or_default().to_string();

        match self.classifier.readiness(node) {
            Readiness::Ready => FilterResult::pass(name),
            Readiness::NotReady => FilterResult::fail(name, "node is not ready".to_string()),
            Readiness::Terminating => {
                FilterResult::fail(name, "node has a termination notice".to_string())
            }
        }
    }

    fn name(&self) -> &str {
        "NodeReady"
    }
}

/// Keeps singly-replicated workloads on on-demand capacity
///
/// A pod whose workload has one replica loses all availability when its
/// node is reclaimed, so only on-demand nodes are eligible for it. Spot and
/// unknown nodes both fail. Multi-replica pods pass on any class.
pub struct CapacityClassMatch {
    classifier: NodeClassifier,
}

impl CapacityClassMatch {
    pub fn new(classifier: NodeClassifier) -> Self {
        Self { classifier }
    }
}

impl FilterPredicate for CapacityClassMatch {
    fn filter(&self, context: &SchedulingContext<'_>, node: &Node) -> FilterResult {
        let name = node_name(node).unwrap_or_default().to_string();

        if context.resolution.is_multi_replica() {
            return FilterResult::pass(name);
        }

        let class = self.classifier.class_of(node);
        if class == CapacityClass::OnDemand {
            return FilterResult::pass(name);
        }

        debug!(
            "Node {} ({}) rejected for singly-replicated workload",
            name, class
        );

        let reason = if context.resolution.is_degraded() {
            format!(
                "replica count unavailable, treating workload as singly-replicated; node capacity class is {}",
                class
            )
        } else {
            format!(
                "singly-replicated workload requires on-demand capacity; node capacity class is {}",
                class
            )
        };
        FilterResult::fail(name, reason)
    }

    fn name(&self) -> &str {
        "CapacityClassMatch"
    }
}

/// Get default filter predicates
pub fn default_filters(classifier: &NodeClassifier) -> Vec<Box<dyn FilterPredicate>> {
    vec![
        Box::new(NodeReady::new(classifier.clone())),
        Box::new(CapacityClassMatch::new(classifier.clone())),
    ]
}
