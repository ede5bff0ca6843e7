use crate::capacity::CAPACITY_LABEL;
use crate::cluster::{ClusterReader, EvictionOutcome, PodEvictor};
use crate::error::{BallastError, Result};
use crate::labels::contains_all;
use crate::types::{bound_node, pod_key, pod_namespace};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{
    DaemonSet, DaemonSetStatus, Deployment, DeploymentSpec, ReplicaSet, ReplicaSetSpec,
    StatefulSet, StatefulSetSpec,
};
use k8s_openapi::api::core::v1::{Node, NodeCondition, NodeStatus, Pod, PodSpec};
use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

#[derive(Default)]
struct Faults {
    fail_workload_lookups: bool,
    node_listing_failures: u32,
    pod_listing_failures: u32,
    eviction_failures: HashMap<String, u32>,
    budget_rejections: HashMap<String, u32>,
    lookup_delay: Option<Duration>,
    eviction_delay: Option<Duration>,
}

/// In-memory cluster for tests
///
/// Implements both [`ClusterReader`] and [`PodEvictor`] over plain maps, with
/// fault injection for lookups, listings and evictions, and a record of every
/// eviction attempt.
#[derive(Default)]
pub struct FakeCluster {
    deployments: RwLock<HashMap<Key, Deployment>>,
    replica_sets: RwLock<HashMap<Key, ReplicaSet>>,
    stateful_sets: RwLock<HashMap<Key, StatefulSet>>,
    daemon_sets: RwLock<HashMap<Key, DaemonSet>>,
    nodes: RwLock<HashMap<String, Node>>,
    pods: RwLock<HashMap<Key, Pod>>,
    budgets: RwLock<HashMap<String, Vec<PodDisruptionBudget>>>,
    faults: RwLock<Faults>,
    eviction_attempts: RwLock<HashMap<String, u32>>,
    evicted: RwLock<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Setup ---

    pub async fn add_deployment(&self, namespace: &str, name: &str, replicas: i32) {
        let deployment = Deployment {
            metadata: meta(namespace, name),
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.deployments
            .write()
            .await
            .insert(key(namespace, name), deployment);
    }

    pub async fn add_replica_set(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
        deployment: Option<&str>,
    ) {
        let mut metadata = meta(namespace, name);
        if let Some(d) = deployment {
            metadata.owner_references = Some(vec![owner_ref("Deployment", d)]);
        }
        let rs = ReplicaSet {
            metadata,
            spec: Some(ReplicaSetSpec {
                replicas: Some(replicas),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.replica_sets.write().await.insert(key(namespace, name), rs);
    }

    pub async fn add_stateful_set(&self, namespace: &str, name: &str, replicas: i32) {
        let sts = StatefulSet {
            metadata: meta(namespace, name),
            spec: Some(StatefulSetSpec {
                replicas: Some(replicas),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.stateful_sets
            .write()
            .await
            .insert(key(namespace, name), sts);
    }

    pub async fn add_daemon_set(&self, namespace: &str, name: &str, desired: i32) {
        let ds = DaemonSet {
            metadata: meta(namespace, name),
            status: Some(DaemonSetStatus {
                desired_number_scheduled: desired,
                ..Default::default()
            }),
            ..Default::default()
        };
        self.daemon_sets.write().await.insert(key(namespace, name), ds);
    }

    /// Add a disruption budget selecting pods with the given labels
    pub async fn add_disruption_budget(
        &self,
        namespace: &str,
        name: &str,
        match_labels: BTreeMap<String, String>,
        min_available: Option<IntOrString>,
        max_unavailable: Option<IntOrString>,
    ) {
        let pdb = PodDisruptionBudget {
            metadata: meta(namespace, name),
            spec: Some(PodDisruptionBudgetSpec {
                selector: Some(LabelSelector {
                    match_labels: Some(match_labels),
                    ..Default::default()
                }),
                min_available,
                max_unavailable,
                ..Default::default()
            }),
            ..Default::default()
        };
        self.budgets
            .write()
            .await
            .entry(namespace.to_string())
            .or_default()
            .push(pdb);
    }

    pub async fn add_node(&self, node: Node) {
        let name = node.metadata.name.clone().unwrap_or_default();
        self.nodes.write().await.insert(name, node);
    }

    pub async fn remove_node(&self, name: &str) {
        self.nodes.write().await.remove(name);
    }

    pub async fn add_pod(&self, pod: Pod) {
        let k = key(
            pod_namespace(&pod),
            pod.metadata.name.as_deref().unwrap_or_default(),
        );
        self.pods.write().await.insert(k, pod);
    }

    pub async fn has_pod(&self, namespace: &str, name: &str) -> bool {
        self.pods.read().await.contains_key(&key(namespace, name))
    }

    // --- Fault injection ---

    pub async fn fail_workload_lookups(&self, fail: bool) {
        self.faults.write().await.fail_workload_lookups = fail;
    }

    /// Fail the next `times` calls to `list_pods_on_node`
    pub async fn fail_node_listing(&self, times: u32) {
        self.faults.write().await.node_listing_failures = times;
    }

    /// Fail the next `times` calls to `list_pods`
    pub async fn fail_pod_listing(&self, times: u32) {
        self.faults.write().await.pod_listing_failures = times;
    }

    /// Fail the next `times` evictions of a pod with a transient error.
    /// `u32::MAX` fails forever.
    pub async fn fail_evictions(&self, namespace: &str, name: &str, times: u32) {
        self.faults
            .write()
            .await
            .eviction_failures
            .insert(format!("{}/{}", namespace, name), times);
    }

    /// Reject the next `times` evictions of a pod as budget violations
    pub async fn reject_evictions_by_budget(&self, namespace: &str, name: &str, times: u32) {
        self.faults
            .write()
            .await
            .budget_rejections
            .insert(format!("{}/{}", namespace, name), times);
    }

    pub async fn set_lookup_delay(&self, delay: Duration) {
        self.faults.write().await.lookup_delay = Some(delay);
    }

    pub async fn set_eviction_delay(&self, delay: Duration) {
        self.faults.write().await.eviction_delay = Some(delay);
    }

    // --- Inspection ---

    /// Pods that were actually evicted, in order
    pub async fn evicted(&self) -> Vec<String> {
        self.evicted.read().await.clone()
    }

    /// Number of eviction calls made for a pod, including failed ones
    pub async fn eviction_attempts(&self, namespace: &str, name: &str) -> u32 {
        self.eviction_attempts
            .read()
            .await
            .get(&format!("{}/{}", namespace, name))
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of evictions observed in flight at once
    pub fn max_concurrent_evictions(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    // --- Internals ---

    async fn delay_lookup(&self) {
        let delay = self.faults.read().await.lookup_delay;
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
    }

    async fn check_workload_fault(&self) -> Result<()> {
        self.delay_lookup().await;
        if self.faults.read().await.fail_workload_lookups {
            return Err(BallastError::cluster_unavailable("injected lookup failure"));
        }
        Ok(())
    }

    fn take_fault(counter: &mut u32) -> bool {
        if *counter == 0 {
            return false;
        }
        if *counter != u32::MAX {
            *counter -= 1;
        }
        true
    }
}

#[async_trait]
impl ClusterReader for FakeCluster {
    async fn get_replica_set(&self, namespace: &str, name: &str) -> Result<ReplicaSet> {
        self.check_workload_fault().await?;
        self.replica_sets
            .read()
            .await
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| {
                BallastError::resource_not_found(format!("ReplicaSet/{}/{}", namespace, name))
            })
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment> {
        self.check_workload_fault().await?;
        self.deployments
            .read()
            .await
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| {
                BallastError::resource_not_found(format!("Deployment/{}/{}", namespace, name))
            })
    }

    async fn get_stateful_set(&self, namespace: &str, name: &str) -> Result<StatefulSet> {
        self.check_workload_fault().await?;
        self.stateful_sets
            .read()
            .await
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| {
                BallastError::resource_not_found(format!("StatefulSet/{}/{}", namespace, name))
            })
    }

    async fn get_daemon_set(&self, namespace: &str, name: &str) -> Result<DaemonSet> {
        self.check_workload_fault().await?;
        self.daemon_sets
            .read()
            .await
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| {
                BallastError::resource_not_found(format!("DaemonSet/{}/{}", namespace, name))
            })
    }

    async fn get_node(&self, name: &str) -> Result<Node> {
        self.delay_lookup().await;
        self.nodes
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| BallastError::resource_not_found(format!("Node/{}", name)))
    }

    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>> {
        if Self::take_fault(&mut self.faults.write().await.node_listing_failures) {
            return Err(BallastError::cluster_unavailable("injected node listing failure"));
        }
        let mut pods: Vec<Pod> = self
            .pods
            .read()
            .await
            .values()
            .filter(|p| bound_node(p) == Some(node_name))
            .cloned()
            .collect();
        pods.sort_by_key(pod_key);
        Ok(pods)
    }

    async fn list_pods(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>> {
        if Self::take_fault(&mut self.faults.write().await.pod_listing_failures) {
            return Err(BallastError::cluster_unavailable("injected pod listing failure"));
        }
        let mut pods: Vec<Pod> = self
            .pods
            .read()
            .await
            .values()
            .filter(|p| pod_namespace(p) == namespace)
            .filter(|p| {
                p.metadata
                    .labels
                    .as_ref()
                    .is_some_and(|l| contains_all(l, labels))
                    || labels.is_empty()
            })
            .cloned()
            .collect();
        pods.sort_by_key(pod_key);
        Ok(pods)
    }

    async fn list_disruption_budgets(&self, namespace: &str) -> Result<Vec<PodDisruptionBudget>> {
        Ok(self
            .budgets
            .read()
            .await
            .get(namespace)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl PodEvictor for FakeCluster {
    async fn evict_pod(&self, namespace: &str, name: &str) -> Result<EvictionOutcome> {
        let pod = format!("{}/{}", namespace, name);
        *self
            .eviction_attempts
            .write()
            .await
            .entry(pod.clone())
            .or_default() += 1;

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = self.faults.read().await.eviction_delay;
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }

        let result = self.evict_inner(namespace, name, &pod).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl FakeCluster {
    async fn evict_inner(&self, namespace: &str, name: &str, pod: &str) -> Result<EvictionOutcome> {
        {
            let mut faults = self.faults.write().await;
            if let Some(remaining) = faults.eviction_failures.get_mut(pod) {
                if Self::take_fault(remaining) {
                    return Err(BallastError::cluster_unavailable(format!(
                        "injected eviction failure for {}",
                        pod
                    )));
                }
            }
            if let Some(remaining) = faults.budget_rejections.get_mut(pod) {
                if Self::take_fault(remaining) {
                    return Err(BallastError::disruption_budget_exceeded(pod));
                }
            }
        }

        match self.pods.write().await.remove(&key(namespace, name)) {
            Some(_) => {
                debug!("Fake: evicted pod {}", pod);
                self.evicted.write().await.push(pod.to_string());
                Ok(EvictionOutcome::Evicted)
            }
            None => Ok(EvictionOutcome::AlreadyGone),
        }
    }
}

fn meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        uid: Some(format!("uid-{}-{}", namespace, name)),
        ..Default::default()
    }
}

fn owner_ref(kind: &str, name: &str) -> OwnerReference {
    OwnerReference {
        api_version: "apps/v1".to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        uid: format!("uid-{}-{}", kind, name),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Build a node with an optional capacity label and a Ready condition
pub fn make_node(name: &str, capacity: Option<&str>, ready: bool) -> Node {
    let labels = capacity.map(|c| BTreeMap::from([(CAPACITY_LABEL.to_string(), c.to_string())]));
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels,
            ..Default::default()
        },
        status: Some(NodeStatus {
            conditions: Some(vec![NodeCondition {
                type_: "Ready".to_string(),
                status: (if ready { "True" } else { "False" }).to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build an unbound pod controlled by the given owner, labelled `app=<owner>`
pub fn pod_owned_by(name: &str, namespace: &str, owner_kind: &str, owner_name: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-pod-{}", name)),
            labels: Some(BTreeMap::from([(
                "app".to_string(),
                owner_name.to_string(),
            )])),
            owner_references: Some(vec![owner_ref(owner_kind, owner_name)]),
            ..Default::default()
        },
        spec: Some(PodSpec::default()),
        ..Default::default()
    }
}

/// Bind a pod to a node
pub fn bound_to(mut pod: Pod, node_name: &str) -> Pod {
    pod.spec.get_or_insert_with(Default::default).node_name = Some(node_name.to_string());
    pod
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_eviction_is_idempotent() {
        let cluster = FakeCluster::new();
        cluster
            .add_pod(bound_to(pod_owned_by("p1", "default", "StatefulSet", "db"), "n1"))
            .await;

        assert_eq!(
            cluster.evict_pod("default", "p1").await.unwrap(),
            EvictionOutcome::Evicted
        );
        assert_eq!(
            cluster.evict_pod("default", "p1").await.unwrap(),
            EvictionOutcome::AlreadyGone
        );
        assert_eq!(cluster.evicted().await, vec!["default/p1".to_string()]);
        assert_eq!(cluster.eviction_attempts("default", "p1").await, 2);
    }

    #[tokio::test]
    async fn test_injected_eviction_failures_count_down() {
        let cluster = FakeCluster::new();
        cluster
            .add_pod(bound_to(pod_owned_by("p1", "default", "StatefulSet", "db"), "n1"))
            .await;
        cluster.fail_evictions("default", "p1", 1).await;

        assert!(cluster.evict_pod("default", "p1").await.is_err());
        assert!(cluster.evict_pod("default", "p1").await.is_ok());
    }

    #[tokio::test]
    async fn test_list_pods_on_node() {
        let cluster = FakeCluster::new();
        cluster
            .add_pod(bound_to(pod_owned_by("a", "default", "StatefulSet", "db"), "n1"))
            .await;
        cluster
            .add_pod(bound_to(pod_owned_by("b", "default", "StatefulSet", "db"), "n2"))
            .await;
        cluster.add_pod(pod_owned_by("c", "default", "StatefulSet", "db")).await;

        let pods = cluster.list_pods_on_node("n1").await.unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].metadata.name.as_deref(), Some("a"));
    }
}
