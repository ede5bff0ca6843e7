//! Workload resolution: pod → owning workload → declared replica count.
//!
//! Lookups never fail the caller. Anything that goes wrong while walking the
//! ownership chain resolves to a single replica, which steers the pod toward
//! on-demand capacity, and the cause is handed back as a diagnostic.

use crate::cluster::ClusterReader;
use crate::error::{BallastError, Result};
use crate::types::{controller_owner, pod_key, pod_namespace, WorkloadKind, WorkloadRef};
use k8s_openapi::api::core::v1::Pod;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Replica count assumed when no workload can be resolved
pub const DEFAULT_REPLICA_COUNT: u32 = 1;

/// Configuration for the workload resolver
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Deadline for each individual API lookup
    pub lookup_timeout: Duration,
    /// Optional replica count cache; `None` reads fresh on every call
    pub cache: Option<CacheConfig>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            lookup_timeout: Duration::from_secs(2),
            cache: None,
        }
    }
}

/// Bounds for the replica count cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long a resolved count stays valid
    pub ttl: Duration,
    /// Maximum number of cached workloads
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(10),
            max_entries: 1024,
        }
    }
}

/// Result of resolving a pod's replica count
#[derive(Debug)]
pub struct ReplicaResolution {
    /// Declared replica count, always at least 1
    pub count: u32,
    /// Workload the count was read from. On a degraded resolution this is the
    /// pod's direct owner.
    pub workload: Option<WorkloadRef>,
    /// Lookup failure that forced the safe default
    pub degraded: Option<BallastError>,
}

impl ReplicaResolution {
    /// Singly-replicated resolution without a diagnostic
    pub fn single(workload: Option<WorkloadRef>) -> Self {
        Self {
            count: DEFAULT_REPLICA_COUNT,
            workload,
            degraded: None,
        }
    }

    pub fn is_multi_replica(&self) -> bool {
        self.count > DEFAULT_REPLICA_COUNT
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    workload: WorkloadRef,
    count: u32,
    inserted: Instant,
}

/// Bounded, time-limited cache of resolved replica counts keyed by the pod's
/// direct owner
pub struct ReplicaCache {
    config: CacheConfig,
    entries: RwLock<HashMap<WorkloadRef, CacheEntry>>,
}

impl ReplicaCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    async fn get(&self, owner: &WorkloadRef) -> Option<(WorkloadRef, u32)> {
        let entries = self.entries.read().await;
        entries
            .get(owner)
            .filter(|e| e.inserted.elapsed() < self.config.ttl)
            .map(|e| (e.workload.clone(), e.count))
    }

    async fn insert(&self, owner: WorkloadRef, workload: WorkloadRef, count: u32) {
        if self.config.max_entries == 0 {
            return;
        }

        let mut entries = self.entries.write().await;

        if entries.len() >= self.config.max_entries && !entries.contains_key(&owner) {
            let ttl = self.config.ttl;
            entries.retain(|_, e| e.inserted.elapsed() < ttl);
        }

        if entries.len() >= self.config.max_entries && !entries.contains_key(&owner) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.inserted)
                .map(|(k, _)| k.clone());
            if let Some(key) = oldest {
                entries.remove(&key);
            }
        }

        entries.insert(
            owner,
            CacheEntry {
                workload,
                count,
                inserted: Instant::now(),
            },
        );
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Resolves the replica count of the workload a pod belongs to
pub struct WorkloadResolver {
    reader: Arc<dyn ClusterReader>,
    config: ResolverConfig,
    cache: Option<ReplicaCache>,
}

impl WorkloadResolver {
    pub fn new(reader: Arc<dyn ClusterReader>, config: ResolverConfig) -> Self {
        let cache = config.cache.clone().map(ReplicaCache::new);
        Self {
            reader,
            config,
            cache,
        }
    }

    /// The cluster reader lookups go through
    pub fn reader(&self) -> &Arc<dyn ClusterReader> {
        &self.reader
    }

    pub fn lookup_timeout(&self) -> Duration {
        self.config.lookup_timeout
    }

    /// Resolve the declared replica count for a pod's workload
    pub async fn resolve_replica_count(&self, pod: &Pod) -> ReplicaResolution {
        let namespace = pod_namespace(pod);

        let Some(owner) = controller_owner(pod.metadata.owner_references.as_ref()) else {
            debug!("Pod {} has no owner, treating as singly-replicated", pod_key(pod));
            return ReplicaResolution::single(None);
        };

        let Some(kind) = WorkloadKind::from_owner_kind(&owner.kind) else {
            debug!(
                "Pod {} is owned by unsupported kind {}, treating as singly-replicated",
                pod_key(pod),
                owner.kind
            );
            return ReplicaResolution::single(None);
        };

        let direct = WorkloadRef::new(kind, namespace, owner.name.clone());

        if let Some(cache) = &self.cache {
            if let Some((workload, count)) = cache.get(&direct).await {
                debug!("Replica count for {} served from cache: {}", workload, count);
                return ReplicaResolution {
                    count,
                    workload: Some(workload),
                    degraded: None,
                };
            }
        }

        match self.lookup_chain(&direct).await {
            Ok((workload, count)) => {
                debug!("Resolved pod {} to {} with {} replicas", pod_key(pod), workload, count);
                if let Some(cache) = &self.cache {
                    cache.insert(direct, workload.clone(), count).await;
                }
                ReplicaResolution {
                    count,
                    workload: Some(workload),
                    degraded: None,
                }
            }
            Err(e) => {
                warn!(
                    pod = %pod_key(pod),
                    owner = %direct,
                    error = %e,
                    "Workload resolution failed, treating as singly-replicated"
                );
                ReplicaResolution {
                    count: DEFAULT_REPLICA_COUNT,
                    workload: Some(direct),
                    degraded: Some(e),
                }
            }
        }
    }

    /// Follow the ownership chain from the pod's direct owner to the record
    /// that declares the replica count
    async fn lookup_chain(&self, direct: &WorkloadRef) -> Result<(WorkloadRef, u32)> {
        let ns = direct.namespace.as_str();
        let name = direct.name.as_str();

        match direct.kind {
            WorkloadKind::ReplicaSet => {
                let rs = self.bounded(direct, self.reader.get_replica_set(ns, name)).await?;

                let deployment_owner = controller_owner(rs.metadata.owner_references.as_ref())
                    .filter(|o| o.kind == "Deployment");

                if let Some(owner) = deployment_owner {
                    let deployment_ref =
                        WorkloadRef::new(WorkloadKind::Deployment, ns, owner.name.clone());
                    let deployment = self
                        .bounded(&deployment_ref, self.reader.get_deployment(ns, &owner.name))
                        .await?;
                    let count = replicas_from(deployment.spec.and_then(|s| s.replicas));
                    return Ok((deployment_ref, count));
                }

                Ok((direct.clone(), replicas_from(rs.spec.and_then(|s| s.replicas))))
            }
            WorkloadKind::Deployment => {
                let deployment = self.bounded(direct, self.reader.get_deployment(ns, name)).await?;
                Ok((
                    direct.clone(),
                    replicas_from(deployment.spec.and_then(|s| s.replicas)),
                ))
            }
            WorkloadKind::StatefulSet => {
                let sts = self.bounded(direct, self.reader.get_stateful_set(ns, name)).await?;
                Ok((direct.clone(), replicas_from(sts.spec.and_then(|s| s.replicas))))
            }
            WorkloadKind::DaemonSet => {
                let ds = self.bounded(direct, self.reader.get_daemon_set(ns, name)).await?;
                let desired = ds.status.map(|s| s.desired_number_scheduled);
                Ok((direct.clone(), replicas_from(desired)))
            }
        }
    }

    async fn bounded<T>(
        &self,
        what: &WorkloadRef,
        lookup: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.config.lookup_timeout, lookup).await {
            Ok(result) => result,
            Err(_) => Err(BallastError::lookup_timeout(
                what.to_string(),
                self.config.lookup_timeout,
            )),
        }
    }
}

/// Declared replicas, with the API default of 1 for an unset field.
/// Stored values below 1 resolve to 1.
fn replicas_from(value: Option<i32>) -> u32 {
    value.unwrap_or(1).max(1) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{pod_owned_by, FakeCluster};

    fn resolver(cluster: &Arc<FakeCluster>, config: ResolverConfig) -> WorkloadResolver {
        WorkloadResolver::new(cluster.clone(), config)
    }

    #[tokio::test]
    async fn test_pod_without_owner_is_single() {
        let cluster = Arc::new(FakeCluster::new());
        let mut pod = Pod::default();
        pod.metadata.name = Some("lonely".to_string());

        let res = resolver(&cluster, ResolverConfig::default())
            .resolve_replica_count(&pod)
            .await;

        assert_eq!(res.count, 1);
        assert!(res.workload.is_none());
        assert!(!res.is_degraded());
    }

    #[tokio::test]
    async fn test_replica_set_resolves_through_deployment() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_deployment("default", "web", 3).await;
        cluster
            .add_replica_set("default", "web-7d9f", 3, Some("web"))
            .await;

        let pod = pod_owned_by("web-7d9f-x1", "default", "ReplicaSet", "web-7d9f");
        let res = resolver(&cluster, ResolverConfig::default())
            .resolve_replica_count(&pod)
            .await;

        assert_eq!(res.count, 3);
        assert_eq!(
            res.workload,
            Some(WorkloadRef::new(WorkloadKind::Deployment, "default", "web"))
        );
    }

    #[tokio::test]
    async fn test_standalone_replica_set_uses_own_replicas() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_replica_set("default", "bare", 2, None).await;

        let pod = pod_owned_by("bare-x", "default", "ReplicaSet", "bare");
        let res = resolver(&cluster, ResolverConfig::default())
            .resolve_replica_count(&pod)
            .await;

        assert_eq!(res.count, 2);
        assert_eq!(
            res.workload,
            Some(WorkloadRef::new(WorkloadKind::ReplicaSet, "default", "bare"))
        );
    }

    #[tokio::test]
    async fn test_stateful_set() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_stateful_set("data", "db", 5).await;

        let pod = pod_owned_by("db-0", "data", "StatefulSet", "db");
        let res = resolver(&cluster, ResolverConfig::default())
            .resolve_replica_count(&pod)
            .await;

        assert_eq!(res.count, 5);
    }

    #[tokio::test]
    async fn test_deleted_intermediate_record_degrades_to_single() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_deployment("default", "web", 4).await;
        // The ReplicaSet the pod points at no longer exists

        let pod = pod_owned_by("web-old-x", "default", "ReplicaSet", "web-old");
        let res = resolver(&cluster, ResolverConfig::default())
            .resolve_replica_count(&pod)
            .await;

        assert_eq!(res.count, 1);
        assert!(res.is_degraded());
        assert!(res.degraded.as_ref().unwrap().is_not_found());
    }

    #[tokio::test]
    async fn test_transient_error_degrades_to_single() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_stateful_set("default", "db", 3).await;
        cluster.fail_workload_lookups(true).await;

        let pod = pod_owned_by("db-1", "default", "StatefulSet", "db");
        let res = resolver(&cluster, ResolverConfig::default())
            .resolve_replica_count(&pod)
            .await;

        assert_eq!(res.count, 1);
        assert!(res.degraded.as_ref().unwrap().is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_lookup_times_out_to_single() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_stateful_set("default", "db", 3).await;
        cluster.set_lookup_delay(Duration::from_secs(30)).await;

        let pod = pod_owned_by("db-1", "default", "StatefulSet", "db");
        let res = resolver(
            &cluster,
            ResolverConfig {
                lookup_timeout: Duration::from_millis(100),
                cache: None,
            },
        )
        .resolve_replica_count(&pod)
        .await;

        assert_eq!(res.count, 1);
        assert!(matches!(
            res.degraded,
            Some(BallastError::LookupTimeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_zero_replicas_clamps_to_single() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_stateful_set("default", "idle", 0).await;

        let pod = pod_owned_by("idle-0", "default", "StatefulSet", "idle");
        let res = resolver(&cluster, ResolverConfig::default())
            .resolve_replica_count(&pod)
            .await;

        assert_eq!(res.count, 1);
        assert!(!res.is_degraded());
    }

    #[tokio::test]
    async fn test_no_cache_reads_fresh_every_call() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_stateful_set("default", "db", 3).await;
        let resolver = resolver(&cluster, ResolverConfig::default());
        let pod = pod_owned_by("db-0", "default", "StatefulSet", "db");

        assert_eq!(resolver.resolve_replica_count(&pod).await.count, 3);
        cluster.add_stateful_set("default", "db", 6).await;
        assert_eq!(resolver.resolve_replica_count(&pod).await.count, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_serves_until_ttl_expires() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_stateful_set("default", "db", 3).await;
        let resolver = resolver(
            &cluster,
            ResolverConfig {
                cache: Some(CacheConfig {
                    ttl: Duration::from_secs(5),
                    max_entries: 8,
                }),
                ..Default::default()
            },
        );
        let pod = pod_owned_by("db-0", "default", "StatefulSet", "db");

        assert_eq!(resolver.resolve_replica_count(&pod).await.count, 3);
        cluster.add_stateful_set("default", "db", 6).await;
        assert_eq!(resolver.resolve_replica_count(&pod).await.count, 3);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(resolver.resolve_replica_count(&pod).await.count, 6);
    }

    #[tokio::test]
    async fn test_cache_does_not_store_failures() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_stateful_set("default", "db", 3).await;
        cluster.fail_workload_lookups(true).await;
        let resolver = resolver(
            &cluster,
            ResolverConfig {
                cache: Some(CacheConfig::default()),
                ..Default::default()
            },
        );
        let pod = pod_owned_by("db-0", "default", "StatefulSet", "db");

        assert_eq!(resolver.resolve_replica_count(&pod).await.count, 1);
        cluster.fail_workload_lookups(false).await;
        assert_eq!(resolver.resolve_replica_count(&pod).await.count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_evicts_oldest_when_full() {
        let cache = ReplicaCache::new(CacheConfig {
            ttl: Duration::from_secs(60),
            max_entries: 2,
        });
        let a = WorkloadRef::new(WorkloadKind::StatefulSet, "ns", "a");
        let b = WorkloadRef::new(WorkloadKind::StatefulSet, "ns", "b");
        let c = WorkloadRef::new(WorkloadKind::StatefulSet, "ns", "c");

        cache.insert(a.clone(), a.clone(), 2).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.insert(b.clone(), b.clone(), 3).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.insert(c.clone(), c.clone(), 4).await;

        assert_eq!(cache.len().await, 2);
        assert!(cache.get(&a).await.is_none());
        assert_eq!(cache.get(&c).await, Some((c.clone(), 4)));
    }
}
