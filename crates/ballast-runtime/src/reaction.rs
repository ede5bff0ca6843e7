use crate::backoff::BackoffPolicy;
use crate::displacement::{DisplacementReport, Displacer};
use crate::error::Result;
use ballast_core::{
    CapacityClass, ClassifierConfig, ClusterReader, Node, NodeClassifier, NodeEvent, PodEvictor,
    Readiness, ResolverConfig, WorkloadResolver,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Configuration for the reaction controller
#[derive(Debug, Clone, Default)]
pub struct ReactionControllerConfig {
    pub classifier: ClassifierConfig,
    /// Resolver used to group pods by workload. Reads fresh by default.
    pub resolver: ResolverConfig,
    /// Retry policy for each listing and each eviction
    pub backoff: BackoffPolicy,
}

/// Lifecycle of the tracking record for one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionState {
    Watching,
    TerminationDetected,
    DisplacementIssued,
}

impl fmt::Display for ReactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Watching => f.write_str("Watching"),
            Self::TerminationDetected => f.write_str("TerminationDetected"),
            Self::DisplacementIssued => f.write_str("DisplacementIssued"),
        }
    }
}

/// Whether a readiness change on a node of `class` means capacity loss
fn is_termination_signal(
    class: CapacityClass,
    previous: Option<Readiness>,
    current: Readiness,
) -> bool {
    if class != CapacityClass::Spot {
        return false;
    }

    match current {
        Readiness::NotReady => previous != Some(Readiness::NotReady),
        Readiness::Terminating => previous != Some(Readiness::Terminating),
        Readiness::Ready => false,
    }
}

/// Serialized reaction logic for a single node
pub struct NodeWorker {
    node: String,
    classifier: NodeClassifier,
    displacer: Arc<Displacer>,
    state: ReactionState,
    last_readiness: Option<Readiness>,
}

impl NodeWorker {
    pub fn new(node: impl Into<String>, classifier: NodeClassifier, displacer: Arc<Displacer>) -> Self {
        Self {
            node: node.into(),
            classifier,
            displacer,
            state: ReactionState::Watching,
            last_readiness: None,
        }
    }

    pub fn state(&self) -> ReactionState {
        self.state
    }

    fn transition(&mut self, next: ReactionState) {
        debug!("Node {}: {} -> {}", self.node, self.state, next);
        self.state = next;
    }

    /// Apply one node snapshot. Returns the displacement report if the
    /// snapshot signalled capacity loss.
    pub async fn handle(&mut self, node: &Node, token: &CancellationToken) -> Option<DisplacementReport> {
        let class = self.classifier.class_of(node);
        let readiness = self.classifier.readiness(node);
        let previous = self.last_readiness.replace(readiness);

        if !is_termination_signal(class, previous, readiness) {
            if previous.is_some_and(|p| p != readiness) {
                info!(
                    "Node {} ({}) changed from {:?} to {}",
                    self.node, class, previous, readiness
                );
            }
            return None;
        }

        self.transition(ReactionState::TerminationDetected);
        warn!(
            node = %self.node,
            readiness = %readiness,
            "Spot capacity lost, displacing workload pods"
        );

        let result = self.displacer.displace_node(&self.node, token).await;
        self.transition(ReactionState::DisplacementIssued);

        let report = match result {
            Ok(report) => {
                info!(
                    node = %self.node,
                    evicted = report.evicted(),
                    already_gone = report.already_gone(),
                    failed = report.failed(),
                    skipped = report.skipped.len(),
                    "Displacement finished"
                );
                Some(report)
            }
            Err(e) => {
                error!("Displacement from node {} failed: {}", self.node, e);
                // Forget the snapshot so the next one signals again
                self.last_readiness = None;
                None
            }
        };

        self.transition(ReactionState::Watching);
        report
    }

    /// Process events in order until the node is deleted, the channel
    /// closes or the token is cancelled. `previous` is a worker for an
    /// earlier incarnation of the same node name that must finish first.
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<NodeEvent>,
        previous: Option<JoinHandle<()>>,
        token: CancellationToken,
    ) {
        if let Some(handle) = previous {
            if let Err(e) = handle.await {
                error!("Previous worker for node {} failed: {}", self.node, e);
            }
        }

        loop {
            let event = tokio::select! {
                _ = token.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Some(NodeEvent::Applied(node)) => {
                    self.handle(&node, &token).await;
                }
                Some(NodeEvent::Deleted(_)) => {
                    info!("Node {} deleted, dropping its tracking record", self.node);
                    break;
                }
                None => break,
            }
        }
    }
}

struct WorkerHandle {
    tx: mpsc::UnboundedSender<NodeEvent>,
    join: JoinHandle<()>,
}

/// Watches node events and displaces pods from spot nodes that lose capacity
///
/// A dispatcher routes each event to a worker task owned by the event's node,
/// so events for one node are handled in order while a slow node never
/// delays any other node.
pub struct ReactionController {
    classifier: NodeClassifier,
    displacer: Arc<Displacer>,
}

impl ReactionController {
    pub fn new(
        reader: Arc<dyn ClusterReader>,
        evictor: Arc<dyn PodEvictor>,
        config: ReactionControllerConfig,
    ) -> Self {
        let resolver = WorkloadResolver::new(reader.clone(), config.resolver);
        Self {
            classifier: NodeClassifier::new(config.classifier),
            displacer: Arc::new(Displacer::new(reader, evictor, resolver, config.backoff)),
        }
    }

    /// Dispatch events until cancelled or the event stream ends, then wait
    /// for every worker to finish
    pub async fn run(&self, mut events: mpsc::Receiver<NodeEvent>, token: CancellationToken) -> Result<()> {
        info!("Starting reaction controller");

        let mut workers: HashMap<String, WorkerHandle> = HashMap::new();
        let mut retired: HashMap<String, JoinHandle<()>> = HashMap::new();

        loop {
            let event = tokio::select! {
                _ = token.cancelled() => {
                    info!("Reaction controller shutting down");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => event,
                    None => {
                        info!("Node event stream closed");
                        break;
                    }
                },
            };

            let Some(name) = event.node_name().map(str::to_string) else {
                warn!("Ignoring node event without a node name");
                continue;
            };

            retired.retain(|_, handle| !handle.is_finished());

            match event {
                NodeEvent::Deleted(_) => {
                    if let Some(worker) = workers.remove(&name) {
                        // The worker drains queued events, then exits on this one
                        let _ = worker.tx.send(event);
                        retired.insert(name, worker.join);
                    }
                }
                NodeEvent::Applied(_) => {
                    let worker = workers
                        .entry(name.clone())
                        .or_insert_with(|| self.spawn_worker(&name, retired.remove(&name), &token));

                    if let Err(mpsc::error::SendError(event)) = worker.tx.send(event) {
                        // Worker stopped on its own; start a fresh record
                        let previous = workers.remove(&name).map(|w| w.join);
                        let fresh = self.spawn_worker(&name, previous, &token);
                        let _ = fresh.tx.send(event);
                        workers.insert(name, fresh);
                    }
                }
            }
        }

        let handles = workers
            .into_values()
            .map(|worker| worker.join)
            .chain(retired.into_values());
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Node worker failed: {}", e);
            }
        }

        info!("Reaction controller stopped");
        Ok(())
    }

    fn spawn_worker(
        &self,
        name: &str,
        previous: Option<JoinHandle<()>>,
        token: &CancellationToken,
    ) -> WorkerHandle {
        debug!("Tracking node {}", name);
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = NodeWorker::new(name, self.classifier.clone(), self.displacer.clone());
        let join = tokio::spawn(worker.run(rx, previous, token.clone()));
        WorkerHandle { tx, join }
    }
}
