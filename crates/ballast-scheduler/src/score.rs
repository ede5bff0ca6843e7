use crate::types::{SchedulingContext, ScoreResult};
use ballast_core::{node_name, CapacityClass, Node, NodeClassifier};
use tracing::debug;

/// Base score of an on-demand node
pub const ON_DEMAND_BASE_SCORE: i64 = 10;

/// Base score of spot and unknown nodes
pub const BASELINE_SCORE: i64 = 0;

/// Scoring function trait
pub trait ScoreFunction: Send + Sync {
    /// Score a node for the given pod (higher is better)
    fn score(&self, context: &SchedulingContext<'_>, node: &Node) -> ScoreResult;

    /// Name of the scoring function
    fn name(&self) -> &str;
}

/// Prefers on-demand capacity over spot and unknown capacity
pub struct CapacityPreference {
    classifier: NodeClassifier,
}

impl CapacityPreference {
    pub fn new(classifier: NodeClassifier) -> Self {
        Self { classifier }
    }
}

impl ScoreFunction for CapacityPreference {
    fn score(&self, _context: &SchedulingContext<'_>, node: &Node) -> ScoreResult {
        let name = node_name(node).unwrap_or_default().to_string();

        let score = match self.classifier.class_of(node) {
            CapacityClass::OnDemand => ON_DEMAND_BASE_SCORE,
            CapacityClass::Spot | CapacityClass::Unknown => BASELINE_SCORE,
        };

        ScoreResult::new(name, score)
    }

    fn name(&self) -> &str {
        "CapacityPreference"
    }
}

/// Penalizes nodes already hosting pods of the same workload
///
/// Only applies to multi-replica workloads; a singly-replicated workload has
/// nothing to spread.
pub struct WorkloadSpread;

impl ScoreFunction for WorkloadSpread {
    fn score(&self, context: &SchedulingContext<'_>, node: &Node) -> ScoreResult {
        let name = node_name(node).unwrap_or_default().to_string();

        if !context.resolution.is_multi_replica() {
            return ScoreResult::new(name, 0);
        }

        let peers = context.peers_on(&name);
        if peers > 0 {
            debug!("Node {} already hosts {} pods of the workload", name, peers);
        }

        ScoreResult::new(name, -i64::from(peers))
    }

    fn name(&self) -> &str {
        "WorkloadSpread"
    }
}

/// Get default scoring functions
pub fn default_scores(classifier: &NodeClassifier) -> Vec<Box<dyn ScoreFunction>> {
    vec![
        Box::new(CapacityPreference::new(classifier.clone())),
        Box::new(WorkloadSpread),
    ]
}

/// Combine the results of all scoring functions for one node
pub fn calculate_total_score(scores: &[ScoreResult]) -> i64 {
    scores.iter().map(|s| s.score).sum()
}
