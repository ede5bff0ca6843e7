//! Ballast Core - Shared types for capacity-aware placement
//!
//! This crate provides:
//! - Node classification (capacity class, readiness)
//! - Workload resolution (pod → workload → replica count)
//! - Cluster read and eviction collaborator traits
//! - Error types with miette diagnostics
//! - An in-memory fake cluster for tests

pub mod capacity;
pub mod cluster;
pub mod error;
pub mod events;
pub mod labels;
pub mod mock;
pub mod resolver;
pub mod types;

// Re-export commonly used types
pub use capacity::{CapacityClass, ClassifierConfig, NodeClassifier, Readiness, CAPACITY_LABEL};
pub use cluster::{ClusterReader, EvictionOutcome, PodEvictor};
pub use error::{BallastError, Result};
pub use events::NodeEvent;
pub use resolver::{
    CacheConfig, ReplicaCache, ReplicaResolution, ResolverConfig, WorkloadResolver,
    DEFAULT_REPLICA_COUNT,
};
pub use types::{
    bound_node, controller_owner, node_name, pod_key, pod_namespace, require_node_name,
    WorkloadKind, WorkloadRef,
};

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::api::core::v1::{Node, Pod};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Deserialize a resource from a JSON value
pub fn from_value<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| {
        BallastError::serialization_error(
            format!("Failed to deserialize from JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}
