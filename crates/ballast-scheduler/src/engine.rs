use crate::error::{Result, SchedulerError};
use crate::filter::{default_filters, FilterPredicate};
use crate::score::{calculate_total_score, default_scores, ScoreFunction};
use crate::types::{FilterOutcome, FilterResult, SchedulingContext, ScoreResult};
use ballast_core::labels::contains_all;
use ballast_core::{
    bound_node, controller_owner, pod_key, pod_namespace, require_node_name, BallastError,
    ClassifierConfig, ClusterReader, Node, NodeClassifier, Pod, ReplicaResolution,
    ResolverConfig, WorkloadResolver,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Decision engine configuration
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub classifier: ClassifierConfig,
    pub resolver: ResolverConfig,
}

/// Nodes fetched by name, for hosts that send only candidate names
#[derive(Debug, Default)]
pub struct NodeLookup {
    /// Nodes that were found, in request order
    pub nodes: Vec<Node>,
    /// Names that could not be fetched, with the reason
    pub failed: BTreeMap<String, String>,
}

/// Answers filter and prioritize for a pending pod
///
/// Stateless between calls apart from the optional replica cache inside the
/// resolver, so one engine is shared by every request handler.
pub struct DecisionEngine {
    resolver: WorkloadResolver,
    classifier: NodeClassifier,
    filters: Vec<Box<dyn FilterPredicate>>,
    scorers: Vec<Box<dyn ScoreFunction>>,
}

impl DecisionEngine {
    /// Create a new decision engine
    pub fn new(reader: Arc<dyn ClusterReader>, config: EngineConfig) -> Self {
        let classifier = NodeClassifier::new(config.classifier);
        Self {
            resolver: WorkloadResolver::new(reader, config.resolver),
            filters: default_filters(&classifier),
            scorers: default_scores(&classifier),
            classifier,
        }
    }

    pub fn classifier(&self) -> &NodeClassifier {
        &self.classifier
    }

    pub fn resolver(&self) -> &WorkloadResolver {
        &self.resolver
    }

    /// Decide which candidate nodes are eligible for the pod
    pub async fn filter(&self, pod: &Pod, nodes: &[Node]) -> Result<FilterOutcome> {
        validate_pod(pod)?;
        validate_nodes(nodes)?;

        let resolution = self.resolver.resolve_replica_count(pod).await;
        let context = SchedulingContext::new(pod, &resolution);

        let results = nodes
            .iter()
            .map(|node| self.filter_node(&context, node))
            .collect();
        let outcome = FilterOutcome { results };

        info!(
            pod = %pod_key(pod),
            uid = pod.metadata.uid.as_deref().unwrap_or_default(),
            replicas = resolution.count,
            "Filter: {} of {} nodes eligible {:?}",
            outcome.eligible().len(),
            nodes.len(),
            outcome.eligible()
        );

        Ok(outcome)
    }

    /// Score candidate nodes, resolving the replica count first
    pub async fn prioritize(&self, pod: &Pod, nodes: &[Node]) -> Result<Vec<ScoreResult>> {
        validate_pod(pod)?;
        validate_nodes(nodes)?;

        let resolution = self.resolver.resolve_replica_count(pod).await;
        self.prioritize_with(pod, nodes, &resolution).await
    }

    /// Score candidate nodes with an already resolved replica count
    pub async fn prioritize_with(
        &self,
        pod: &Pod,
        nodes: &[Node],
        resolution: &ReplicaResolution,
    ) -> Result<Vec<ScoreResult>> {
        validate_pod(pod)?;
        validate_nodes(nodes)?;

        let peers = if resolution.is_multi_replica() {
            self.peers_per_node(pod).await
        } else {
            HashMap::new()
        };
        let context = SchedulingContext::new(pod, resolution).with_peers(peers);

        let mut results = Vec::with_capacity(nodes.len());
        for node in nodes {
            let name = require_node_name(node)?.to_string();
            let scores: Vec<ScoreResult> = self
                .scorers
                .iter()
                .map(|scorer| scorer.score(&context, node))
                .collect();
            results.push(ScoreResult::new(name, calculate_total_score(&scores)));
        }

        info!(
            pod = %pod_key(pod),
            uid = pod.metadata.uid.as_deref().unwrap_or_default(),
            replicas = resolution.count,
            "Prioritize: {:?}",
            results
                .iter()
                .map(|r| (r.node_name.as_str(), r.score))
                .collect::<Vec<_>>()
        );

        Ok(results)
    }

    /// Fetch candidate nodes by name, concurrently, each bounded by the
    /// lookup timeout
    pub async fn lookup_nodes(&self, names: &[String]) -> Result<NodeLookup> {
        if let Some(position) = names.iter().position(|n| n.is_empty()) {
            return Err(SchedulerError::invalid_request(
                format!("candidate node name at index {} is empty", position),
                "Every candidate must carry a node name",
            ));
        }

        let timeout = self.resolver.lookup_timeout();
        let mut tasks = JoinSet::new();
        for (index, name) in names.iter().enumerate() {
            let reader = self.resolver.reader().clone();
            let name = name.clone();
            tasks.spawn(async move {
                let result = match tokio::time::timeout(timeout, reader.get_node(&name)).await {
                    Ok(result) => result,
                    Err(_) => Err(BallastError::lookup_timeout(format!("Node/{}", name), timeout)),
                };
                (index, name, result)
            });
        }

        let mut slots: Vec<Option<(String, ballast_core::Result<Node>)>> =
            (0..names.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            let (index, name, result) = joined.map_err(|e| {
                SchedulerError::internal_error(format!("Node lookup task failed: {}", e))
            })?;
            slots[index] = Some((name, result));
        }

        let mut lookup = NodeLookup::default();
        for (name, result) in slots.into_iter().flatten() {
            match result {
                Ok(node) => lookup.nodes.push(node),
                Err(e) => {
                    warn!("Failed to fetch candidate node {}: {}", name, e);
                    lookup
                        .failed
                        .insert(name, format!("node lookup failed: {}", e));
                }
            }
        }

        Ok(lookup)
    }

    fn filter_node(&self, context: &SchedulingContext<'_>, node: &Node) -> FilterResult {
        let name = node
            .metadata
            .name
            .clone()
            .unwrap_or_default();

        for filter in &self.filters {
            let result = filter.filter(context, node);
            if !result.passed {
                debug!(
                    "Node {} filtered out by {}: {}",
                    name,
                    filter.name(),
                    result.reason.as_deref().unwrap_or_default()
                );
                return result;
            }
        }

        FilterResult::pass(name)
    }

    /// Count bound pods of the same workload per node. A failed listing
    /// degrades to no spread rather than failing the request.
    async fn peers_per_node(&self, pod: &Pod) -> HashMap<String, u32> {
        let namespace = pod_namespace(pod);
        let labels = pod.metadata.labels.clone().unwrap_or_default();
        let timeout = self.resolver.lookup_timeout();

        let listing = tokio::time::timeout(
            timeout,
            self.resolver.reader().list_pods(namespace, &labels),
        )
        .await
        .unwrap_or_else(|_| {
            Err(BallastError::lookup_timeout(
                format!("Pods/{}", namespace),
                timeout,
            ))
        });

        let pods = match listing {
            Ok(pods) => pods,
            Err(e) => {
                warn!(
                    pod = %pod_key(pod),
                    error = %e,
                    "Failed to list workload pods, scoring without spread"
                );
                return HashMap::new();
            }
        };

        let mut counts = HashMap::new();
        for other in pods.iter().filter(|other| same_workload(pod, other)) {
            if let Some(node) = bound_node(other) {
                *counts.entry(node.to_string()).or_insert(0) += 1;
            }
        }
        counts
    }
}

/// Whether `other` is a live sibling of `pod` in the same workload
fn same_workload(pod: &Pod, other: &Pod) -> bool {
    let is_self = match (&pod.metadata.uid, &other.metadata.uid) {
        (Some(a), Some(b)) => a == b,
        _ => pod_key(pod) == pod_key(other),
    };
    if is_self {
        return false;
    }

    let finished = other
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|phase| phase == "Succeeded" || phase == "Failed");
    if finished {
        return false;
    }

    match controller_owner(pod.metadata.owner_references.as_ref()) {
        Some(owner) => controller_owner(other.metadata.owner_references.as_ref())
            .is_some_and(|o| o.uid == owner.uid),
        None => {
            let wanted = pod.metadata.labels.clone().unwrap_or_default();
            other
                .metadata
                .labels
                .as_ref()
                .is_some_and(|labels| contains_all(labels, &wanted))
        }
    }
}

fn validate_pod(pod: &Pod) -> Result<()> {
    match pod.metadata.name.as_deref() {
        Some(name) if !name.is_empty() => Ok(()),
        _ => Err(SchedulerError::invalid_request(
            "pod has no name",
            "The request must carry the full pending pod object",
        )),
    }
}

fn validate_nodes(nodes: &[Node]) -> Result<()> {
    for node in nodes {
        require_node_name(node)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::{BASELINE_SCORE, ON_DEMAND_BASE_SCORE};
    use ballast_core::mock::{bound_to, make_node, pod_owned_by, FakeCluster};

    async fn setup() -> (Arc<FakeCluster>, DecisionEngine) {
        let cluster = Arc::new(FakeCluster::new());
        let engine = DecisionEngine::new(cluster.clone(), EngineConfig::default());
        (cluster, engine)
    }

    fn candidates() -> Vec<Node> {
        vec![
            make_node("spot-a", Some("spot"), true),
            make_node("od-a", Some("on-demand"), true),
            make_node("od-down", Some("on-demand"), false),
            make_node("bare", None, true),
        ]
    }

    #[tokio::test]
    async fn test_single_replica_only_on_demand() {
        let (cluster, engine) = setup().await;
        cluster.add_stateful_set("default", "db", 1).await;
        let pod = pod_owned_by("db-0", "default", "StatefulSet", "db");

        let outcome = engine.filter(&pod, &candidates()).await.unwrap();

        assert_eq!(outcome.eligible(), vec!["od-a"]);
        let failed = outcome.failed();
        assert!(failed.contains_key("spot-a"));
        assert!(failed.contains_key("bare"));
        assert_eq!(failed.get("od-down").map(String::as_str), Some("node is not ready"));
    }

    #[tokio::test]
    async fn test_multi_replica_accepts_all_ready_nodes() {
        let (cluster, engine) = setup().await;
        cluster.add_deployment("default", "web", 3).await;
        cluster
            .add_replica_set("default", "web-abc", 3, Some("web"))
            .await;
        let pod = pod_owned_by("web-abc-1", "default", "ReplicaSet", "web-abc");

        let outcome = engine.filter(&pod, &candidates()).await.unwrap();

        assert_eq!(outcome.eligible(), vec!["spot-a", "od-a", "bare"]);
    }

    #[tokio::test]
    async fn test_unresolvable_workload_is_isolated() {
        let (_cluster, engine) = setup().await;
        let pod = pod_owned_by("web-gone-1", "default", "ReplicaSet", "web-gone");

        let outcome = engine.filter(&pod, &candidates()).await.unwrap();

        assert_eq!(outcome.eligible(), vec!["od-a"]);
    }

    #[tokio::test]
    async fn test_empty_result_is_not_an_error() {
        let (cluster, engine) = setup().await;
        cluster.add_stateful_set("default", "db", 1).await;
        let pod = pod_owned_by("db-0", "default", "StatefulSet", "db");
        let nodes = vec![make_node("spot-a", Some("spot"), true)];

        let outcome = engine.filter(&pod, &nodes).await.unwrap();
        assert!(outcome.eligible().is_empty());

        let outcome = engine.filter(&pod, &[]).await.unwrap();
        assert!(outcome.results.is_empty());
    }

    #[tokio::test]
    async fn test_prioritize_prefers_on_demand_then_spread() {
        let (cluster, engine) = setup().await;
        cluster.add_deployment("default", "web", 3).await;
        cluster
            .add_replica_set("default", "web-abc", 3, Some("web"))
            .await;
        cluster
            .add_pod(bound_to(
                pod_owned_by("web-abc-1", "default", "ReplicaSet", "web-abc"),
                "od-a",
            ))
            .await;
        cluster
            .add_pod(bound_to(
                pod_owned_by("web-abc-2", "default", "ReplicaSet", "web-abc"),
                "od-a",
            ))
            .await;
        // Same labels, different controller
        cluster
            .add_pod(bound_to(
                pod_owned_by("other-1", "default", "StatefulSet", "web-abc"),
                "spot-a",
            ))
            .await;

        let pod = pod_owned_by("web-abc-3", "default", "ReplicaSet", "web-abc");
        let nodes = vec![
            make_node("spot-a", Some("spot"), true),
            make_node("od-a", Some("on-demand"), true),
            make_node("od-b", Some("on-demand"), true),
            make_node("bare", None, true),
        ];

        let scores = engine.prioritize(&pod, &nodes).await.unwrap();
        let by_name: Vec<(&str, i64)> = scores
            .iter()
            .map(|s| (s.node_name.as_str(), s.score))
            .collect();

        assert_eq!(
            by_name,
            vec![
                ("spot-a", BASELINE_SCORE),
                ("od-a", ON_DEMAND_BASE_SCORE - 2),
                ("od-b", ON_DEMAND_BASE_SCORE),
                ("bare", BASELINE_SCORE),
            ]
        );
    }

    #[tokio::test]
    async fn test_spread_is_monotonic() {
        let (cluster, engine) = setup().await;
        cluster.add_stateful_set("default", "web", 5).await;
        let pod = pod_owned_by("web-4", "default", "StatefulSet", "web");
        let nodes = vec![make_node("spot-a", Some("spot"), true)];

        let mut previous = engine.prioritize(&pod, &nodes).await.unwrap()[0].score;
        for i in 0..3 {
            cluster
                .add_pod(bound_to(
                    pod_owned_by(&format!("web-{}", i), "default", "StatefulSet", "web"),
                    "spot-a",
                ))
                .await;
            let current = engine.prioritize(&pod, &nodes).await.unwrap()[0].score;
            assert!(current < previous);
            previous = current;
        }
    }

    #[tokio::test]
    async fn test_spread_listing_failure_degrades_to_base_scores() {
        let (cluster, engine) = setup().await;
        cluster.add_stateful_set("default", "web", 3).await;
        cluster
            .add_pod(bound_to(
                pod_owned_by("web-0", "default", "StatefulSet", "web"),
                "od-a",
            ))
            .await;
        cluster.fail_pod_listing(1).await;

        let pod = pod_owned_by("web-1", "default", "StatefulSet", "web");
        let nodes = vec![make_node("od-a", Some("on-demand"), true)];

        let scores = engine.prioritize(&pod, &nodes).await.unwrap();
        assert_eq!(scores[0].score, ON_DEMAND_BASE_SCORE);
    }

    #[tokio::test]
    async fn test_decisions_are_deterministic() {
        let (cluster, engine) = setup().await;
        cluster.add_stateful_set("default", "web", 3).await;
        cluster
            .add_pod(bound_to(
                pod_owned_by("web-0", "default", "StatefulSet", "web"),
                "spot-a",
            ))
            .await;
        let pod = pod_owned_by("web-1", "default", "StatefulSet", "web");

        let first = engine.prioritize(&pod, &candidates()).await.unwrap();
        let second = engine.prioritize(&pod, &candidates()).await.unwrap();
        assert_eq!(first, second);

        let first = engine.filter(&pod, &candidates()).await.unwrap();
        let second = engine.filter(&pod, &candidates()).await.unwrap();
        assert_eq!(first.results, second.results);
    }

    #[tokio::test]
    async fn test_prioritize_with_uses_given_resolution() {
        let (cluster, engine) = setup().await;
        cluster.add_stateful_set("default", "web", 3).await;
        cluster
            .add_pod(bound_to(
                pod_owned_by("web-0", "default", "StatefulSet", "web"),
                "od-a",
            ))
            .await;
        let pod = pod_owned_by("web-1", "default", "StatefulSet", "web");
        let nodes = vec![make_node("od-a", Some("on-demand"), true)];

        let single = ReplicaResolution::single(None);
        let scores = engine.prioritize_with(&pod, &nodes, &single).await.unwrap();
        assert_eq!(scores[0].score, ON_DEMAND_BASE_SCORE);
    }

    #[tokio::test]
    async fn test_contract_errors() {
        let (_cluster, engine) = setup().await;
        let pod = pod_owned_by("web-1", "default", "StatefulSet", "web");

        let mut unnamed = make_node("x", Some("spot"), true);
        unnamed.metadata.name = None;
        assert!(engine.filter(&pod, &[unnamed.clone()]).await.is_err());
        assert!(engine.prioritize(&pod, &[unnamed]).await.is_err());

        let mut anonymous = pod.clone();
        anonymous.metadata.name = None;
        let result = engine.filter(&anonymous, &candidates()).await;
        assert!(matches!(result, Err(SchedulerError::InvalidRequest { .. })));
    }

    #[tokio::test]
    async fn test_lookup_nodes_reports_missing() {
        let (cluster, engine) = setup().await;
        cluster.add_node(make_node("od-a", Some("on-demand"), true)).await;
        cluster.add_node(make_node("spot-a", Some("spot"), true)).await;

        let names = vec![
            "spot-a".to_string(),
            "ghost".to_string(),
            "od-a".to_string(),
        ];
        let lookup = engine.lookup_nodes(&names).await.unwrap();

        let found: Vec<_> = lookup
            .nodes
            .iter()
            .filter_map(|n| n.metadata.name.clone())
            .collect();
        assert_eq!(found, vec!["spot-a", "od-a"]);
        assert!(lookup.failed.contains_key("ghost"));

        assert!(engine.lookup_nodes(&["".to_string()]).await.is_err());
    }
}
