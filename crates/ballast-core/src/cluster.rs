use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use std::collections::BTreeMap;

/// Read access to cluster state
///
/// Every call returns an eventually-consistent snapshot. Two calls made for
/// the same decision may observe different versions of the cluster.
/// Implementations return `BallastError::ResourceNotFound` for missing
/// objects and `BallastError::ClusterUnavailable` for transport failures.
#[async_trait]
pub trait ClusterReader: Send + Sync {
    // --- Workload records ---

    async fn get_replica_set(&self, namespace: &str, name: &str) -> Result<ReplicaSet>;

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment>;

    async fn get_stateful_set(&self, namespace: &str, name: &str) -> Result<StatefulSet>;

    async fn get_daemon_set(&self, namespace: &str, name: &str) -> Result<DaemonSet>;

    // --- Nodes and pods ---

    async fn get_node(&self, name: &str) -> Result<Node>;

    /// Pods bound to the given node, across all namespaces
    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>>;

    /// Pods in a namespace carrying all of the given labels
    async fn list_pods(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>>;

    // --- Disruption budgets ---

    async fn list_disruption_budgets(&self, namespace: &str) -> Result<Vec<PodDisruptionBudget>>;
}

/// Outcome of a successful displacement request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionOutcome {
    /// The eviction was accepted
    Evicted,
    /// The pod no longer exists
    AlreadyGone,
}

/// Requests removal of a pod's binding so the host scheduler places it again
#[async_trait]
pub trait PodEvictor: Send + Sync {
    /// Evict a pod. A pod that is already gone is reported as
    /// [`EvictionOutcome::AlreadyGone`], never as an error. A budget
    /// rejection is `BallastError::DisruptionBudgetExceeded`.
    async fn evict_pod(&self, namespace: &str, name: &str) -> Result<EvictionOutcome>;
}
