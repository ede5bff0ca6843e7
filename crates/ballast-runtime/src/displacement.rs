use crate::backoff::BackoffPolicy;
use crate::budget::{eviction_concurrency, matching_budget};
use crate::error::{Result, RuntimeError};
use ballast_core::{
    controller_owner, pod_key, pod_namespace, ClusterReader, EvictionOutcome, Pod, PodEvictor,
    WorkloadResolver,
};
use futures_util::stream::{self, StreamExt};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Annotation the kubelet puts on mirror pods of static manifests
const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";

/// Final state of one pod's displacement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Evicted,
    /// The pod was gone before the eviction landed
    AlreadyGone,
    /// Retries were exhausted or the error was permanent
    Failed(String),
    Cancelled,
}

/// What happened to every pod on a node during one displacement
#[derive(Debug, Default)]
pub struct DisplacementReport {
    pub node: String,
    /// Outcome per pod, keyed by `namespace/name`
    pub outcomes: BTreeMap<String, UnitOutcome>,
    /// Pods left in place, with the reason
    pub skipped: BTreeMap<String, String>,
}

impl DisplacementReport {
    pub fn evicted(&self) -> usize {
        self.count(|o| *o == UnitOutcome::Evicted)
    }

    pub fn already_gone(&self) -> usize {
        self.count(|o| *o == UnitOutcome::AlreadyGone)
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::Failed(_)))
    }

    /// True if no pod is left failed or cancelled
    pub fn is_complete(&self) -> bool {
        self.outcomes
            .values()
            .all(|o| matches!(o, UnitOutcome::Evicted | UnitOutcome::AlreadyGone))
    }

    fn count(&self, predicate: impl Fn(&UnitOutcome) -> bool) -> usize {
        self.outcomes.values().filter(|o| predicate(o)).count()
    }
}

/// Pods of one workload found on the node
struct WorkloadGroup {
    replicas: u32,
    pods: Vec<Pod>,
}

/// Moves workload pods off a node by requesting their eviction
///
/// Each pod is an independent unit with its own retry budget, so one stuck
/// pod never holds up the others. Pods of the same workload are paced by the
/// workload's PodDisruptionBudget.
pub struct Displacer {
    reader: Arc<dyn ClusterReader>,
    evictor: Arc<dyn PodEvictor>,
    resolver: WorkloadResolver,
    backoff: BackoffPolicy,
}

impl Displacer {
    pub fn new(
        reader: Arc<dyn ClusterReader>,
        evictor: Arc<dyn PodEvictor>,
        resolver: WorkloadResolver,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            reader,
            evictor,
            resolver,
            backoff,
        }
    }

    /// Evict every displaceable pod bound to `node_name`
    ///
    /// Fails only if the pods on the node cannot be listed. Per-pod failures
    /// are recorded in the report.
    pub async fn displace_node(
        &self,
        node_name: &str,
        token: &CancellationToken,
    ) -> Result<DisplacementReport> {
        let pods = self
            .backoff
            .retry(&format!("List pods on node {}", node_name), token, || {
                self.reader.list_pods_on_node(node_name)
            })
            .await?;

        let mut report = DisplacementReport {
            node: node_name.to_string(),
            ..Default::default()
        };

        let mut candidates = Vec::with_capacity(pods.len());
        for pod in pods {
            match skip_reason(&pod) {
                Some(reason) => {
                    debug!("Leaving pod {} on node {}: {}", pod_key(&pod), node_name, reason);
                    report.skipped.insert(pod_key(&pod), reason.to_string());
                }
                None => candidates.push(pod),
            }
        }

        // Lookups run together so one slow workload cannot delay the node
        let resolutions = futures_util::future::join_all(
            candidates
                .iter()
                .map(|pod| self.resolver.resolve_replica_count(pod)),
        )
        .await;

        let mut groups: BTreeMap<String, WorkloadGroup> = BTreeMap::new();
        for (pod, resolution) in candidates.into_iter().zip(resolutions) {
            let group_key = match &resolution.workload {
                Some(workload) => workload.to_string(),
                None => format!("Pod/{}", pod_key(&pod)),
            };
            groups
                .entry(group_key)
                .or_insert_with(|| WorkloadGroup {
                    replicas: resolution.count,
                    pods: Vec::new(),
                })
                .pods
                .push(pod);
        }

        let limits = self.group_limits(&groups, token).await;

        info!(
            "Displacing {} pods in {} workloads from node {}",
            groups.values().map(|g| g.pods.len()).sum::<usize>(),
            groups.len(),
            node_name
        );

        let runs = groups.into_iter().map(|(workload, group)| {
            let limit = limits.get(&workload).copied().unwrap_or(1);
            async move {
                debug!(
                    "Evicting {} pods of {} with at most {} in flight",
                    group.pods.len(),
                    workload,
                    limit
                );
                stream::iter(group.pods)
                    .map(|pod| self.evict_unit(pod, token))
                    .buffer_unordered(limit)
                    .collect::<Vec<_>>()
                    .await
            }
        });

        for results in futures_util::future::join_all(runs).await {
            report.outcomes.extend(results);
        }

        Ok(report)
    }

    /// In-flight eviction limit per workload group
    async fn group_limits(
        &self,
        groups: &BTreeMap<String, WorkloadGroup>,
        token: &CancellationToken,
    ) -> HashMap<String, usize> {
        let mut budgets: HashMap<String, Option<Vec<PodDisruptionBudget>>> = HashMap::new();
        let mut limits = HashMap::new();

        for (workload, group) in groups {
            let Some(first) = group.pods.first() else {
                continue;
            };
            let namespace = pod_namespace(first).to_string();

            if !budgets.contains_key(&namespace) {
                let listed = self
                    .backoff
                    .retry(
                        &format!("List disruption budgets in {}", namespace),
                        token,
                        || self.reader.list_disruption_budgets(&namespace),
                    )
                    .await;
                let listed = match listed {
                    Ok(list) => Some(list),
                    Err(e) => {
                        warn!(
                            "Could not read disruption budgets in {}, evicting one pod at a time: {}",
                            namespace, e
                        );
                        None
                    }
                };
                budgets.insert(namespace.clone(), listed);
            }

            let limit = match budgets.get(&namespace).and_then(Option::as_ref) {
                Some(list) => match matching_budget(list, first) {
                    Some(budget) => eviction_concurrency(budget, group.replicas),
                    None => group.pods.len().max(1),
                },
                None => 1,
            };
            limits.insert(workload.clone(), limit);
        }

        limits
    }

    async fn evict_unit(&self, pod: Pod, token: &CancellationToken) -> (String, UnitOutcome) {
        let key = pod_key(&pod);
        let namespace = pod_namespace(&pod);
        let name = pod.metadata.name.as_deref().unwrap_or_default();

        let result = self
            .backoff
            .retry(&format!("Evict pod {}", key), token, || {
                self.evictor.evict_pod(namespace, name)
            })
            .await;

        let outcome = match result {
            Ok(EvictionOutcome::Evicted) => {
                info!("Evicted pod {}", key);
                UnitOutcome::Evicted
            }
            Ok(EvictionOutcome::AlreadyGone) => {
                debug!("Pod {} already gone", key);
                UnitOutcome::AlreadyGone
            }
            Err(RuntimeError::Cancelled { .. }) => UnitOutcome::Cancelled,
            Err(e) => {
                warn!(pod = %key, error = %e, "Pod displacement failed");
                UnitOutcome::Failed(e.to_string())
            }
        };

        (key, outcome)
    }
}

/// Why a pod bound to a lost node is left alone, if it is
fn skip_reason(pod: &Pod) -> Option<&'static str> {
    let mirrored = pod
        .metadata
        .annotations
        .as_ref()
        .is_some_and(|a| a.contains_key(MIRROR_POD_ANNOTATION));
    if mirrored {
        return Some("mirror pod");
    }

    let daemon = controller_owner(pod.metadata.owner_references.as_ref())
        .is_some_and(|owner| owner.kind == "DaemonSet");
    if daemon {
        return Some("daemonset pod");
    }

    if pod.metadata.deletion_timestamp.is_some() {
        return Some("already terminating");
    }

    let finished = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|phase| phase == "Succeeded" || phase == "Failed");
    if finished {
        return Some("finished");
    }

    None
}
