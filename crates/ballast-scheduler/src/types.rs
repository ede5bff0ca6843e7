use ballast_core::{Pod, ReplicaResolution};
use std::collections::{BTreeMap, HashMap};

/// Everything a predicate or scoring function may look at for one decision
#[derive(Debug)]
pub struct SchedulingContext<'a> {
    /// Pod being placed
    pub pod: &'a Pod,
    /// Replica count of the pod's workload, resolved once per decision
    pub resolution: &'a ReplicaResolution,
    /// Pods of the same workload already bound, per node name
    pub peers_per_node: HashMap<String, u32>,
}

impl<'a> SchedulingContext<'a> {
    /// Create a new scheduling context with no known peers
    pub fn new(pod: &'a Pod, resolution: &'a ReplicaResolution) -> Self {
        Self {
            pod,
            resolution,
            peers_per_node: HashMap::new(),
        }
    }

    /// Attach per-node peer counts
    pub fn with_peers(mut self, peers_per_node: HashMap<String, u32>) -> Self {
        self.peers_per_node = peers_per_node;
        self
    }

    /// Number of the workload's pods already on `node_name`
    pub fn peers_on(&self, node_name: &str) -> u32 {
        self.peers_per_node.get(node_name).copied().unwrap_or(0)
    }
}

/// Result of filtering a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterResult {
    /// Node name
    pub node_name: String,
    /// Whether the node passed the filter
    pub passed: bool,
    /// Reason for failure (if any)
    pub reason: Option<String>,
}

impl FilterResult {
    /// Create a passing filter result
    pub fn pass(node_name: String) -> Self {
        Self {
            node_name,
            passed: true,
            reason: None,
        }
    }

    /// Create a failing filter result
    pub fn fail(node_name: String, reason: String) -> Self {
        Self {
            node_name,
            passed: false,
            reason: Some(reason),
        }
    }
}

/// Per-candidate verdicts of one filter call, in candidate order
#[derive(Debug, Clone, Default)]
pub struct FilterOutcome {
    pub results: Vec<FilterResult>,
}

impl FilterOutcome {
    /// Names of the eligible candidates, in input order
    pub fn eligible(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|r| r.passed)
            .map(|r| r.node_name.clone())
            .collect()
    }

    /// Rejected candidates with the reason for each
    pub fn failed(&self) -> BTreeMap<String, String> {
        self.results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| {
                (
                    r.node_name.clone(),
                    r.reason.clone().unwrap_or_default(),
                )
            })
            .collect()
    }

    pub fn is_eligible(&self, node_name: &str) -> bool {
        self.results
            .iter()
            .any(|r| r.passed && r.node_name == node_name)
    }
}

/// Result of scoring a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreResult {
    /// Node name
    pub node_name: String,
    /// Score, higher is better. May be negative.
    pub score: i64,
}

impl ScoreResult {
    /// Create a new score result
    pub fn new(node_name: String, score: i64) -> Self {
        Self { node_name, score }
    }
}
