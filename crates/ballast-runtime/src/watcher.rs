use crate::api_client::ApiClient;
use crate::backoff::{sleep_or_cancel, BackoffPolicy};
use crate::error::{Result, RuntimeError};
use ballast_core::{from_value, Node, NodeEvent};
use bytes::{Buf, BytesMut};
use futures_util::StreamExt;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configuration for the node watcher
#[derive(Debug, Clone)]
pub struct NodeWatcherConfig {
    /// Delay between reconnect attempts; attempts are never exhausted
    pub reconnect: BackoffPolicy,
    /// Server-side timeout of one watch request
    pub watch_timeout: Duration,
}

impl Default for NodeWatcherConfig {
    fn default() -> Self {
        Self {
            reconnect: BackoffPolicy {
                max_attempts: u32::MAX,
                base: Duration::from_millis(500),
                max: Duration::from_secs(30),
            },
            watch_timeout: Duration::from_secs(300),
        }
    }
}

/// One event of a Kubernetes watch stream
#[derive(Debug, Clone, Deserialize)]
pub struct WatchEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub object: serde_json::Value,
}

/// Splits a chunked watch body into newline-delimited events
#[derive(Debug, Default)]
pub struct WatchDecoder {
    buffer: BytesMut,
}

impl WatchDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event completed by it
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<WatchEvent>> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line = self.buffer.split_to(pos);
            self.buffer.advance(1);

            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            events.push(serde_json::from_slice(&line).map_err(|e| {
                RuntimeError::watch_failed(format!("Malformed watch event: {}", e))
            }));
        }
        events
    }
}

/// What the watcher should do after applying a watch event
#[derive(Debug)]
enum Step {
    Emit(NodeEvent),
    Relist,
    Skip,
}

/// Resume point and the set of nodes the consumer has been told about
#[derive(Debug, Default)]
struct WatchState {
    resource_version: Option<String>,
    known: HashSet<String>,
}

impl WatchState {
    /// Replace the known set with a fresh listing. Nodes that disappeared
    /// while the watch was down are reported as deleted.
    fn reconcile_list(&mut self, nodes: Vec<Node>, resource_version: Option<String>) -> Vec<NodeEvent> {
        let listed: HashSet<String> = nodes
            .iter()
            .filter_map(|n| n.metadata.name.clone())
            .collect();

        let mut gone: Vec<String> = self.known.difference(&listed).cloned().collect();
        gone.sort();

        let mut events: Vec<NodeEvent> = gone.into_iter().map(NodeEvent::Deleted).collect();
        events.extend(nodes.into_iter().map(NodeEvent::Applied));

        self.known = listed;
        self.resource_version = resource_version;
        events
    }

    fn apply(&mut self, event: WatchEvent) -> Step {
        if let Some(rv) = event.object["metadata"]["resourceVersion"].as_str() {
            self.resource_version = Some(rv.to_string());
        }

        match event.event_type.as_str() {
            "ADDED" | "MODIFIED" => match from_value::<Node>(event.object) {
                Ok(node) => {
                    if let Some(name) = &node.metadata.name {
                        self.known.insert(name.clone());
                    }
                    Step::Emit(NodeEvent::Applied(node))
                }
                Err(e) => {
                    warn!("Failed to parse node from watch event: {}", e);
                    Step::Skip
                }
            },
            "DELETED" => match event.object["metadata"]["name"].as_str() {
                Some(name) => {
                    self.known.remove(name);
                    Step::Emit(NodeEvent::Deleted(name.to_string()))
                }
                None => Step::Skip,
            },
            "BOOKMARK" => Step::Skip,
            "ERROR" => {
                // 410 Gone: the resume point was compacted away
                let code = event.object["code"].as_u64();
                warn!(
                    "Watch error event (code {:?}): {}",
                    code,
                    event.object["message"].as_str().unwrap_or_default()
                );
                self.resource_version = None;
                Step::Relist
            }
            other => {
                debug!("Ignoring watch event of type {}", other);
                Step::Skip
            }
        }
    }
}

/// Streams node changes from the API server into a channel
///
/// Lists nodes first, then watches from the list's resourceVersion. Dropped
/// connections resume from the last seen resourceVersion; an expired one
/// triggers a fresh list.
pub struct NodeWatcher {
    client: Arc<ApiClient>,
    config: NodeWatcherConfig,
}

impl NodeWatcher {
    pub fn new(client: Arc<ApiClient>, config: NodeWatcherConfig) -> Self {
        Self { client, config }
    }

    /// Run until cancelled or until the receiver is dropped
    pub async fn run(&self, tx: mpsc::Sender<NodeEvent>, token: CancellationToken) -> Result<()> {
        info!(
            "Starting node watcher (watch timeout: {:?})",
            self.config.watch_timeout
        );

        let mut state = WatchState::default();
        let mut failures: u32 = 0;

        loop {
            let outcome = tokio::select! {
                _ = token.cancelled() => {
                    info!("Node watcher shutting down");
                    return Ok(());
                }
                outcome = self.session(&mut state, &tx) => outcome,
            };

            if tx.is_closed() {
                info!("Node event receiver closed, stopping watcher");
                return Ok(());
            }

            match outcome {
                Ok(()) => {
                    debug!("Node watch ended, reconnecting");
                    failures = 0;
                }
                Err(e) => {
                    let delay = self.config.reconnect.delay(failures);
                    failures = failures.saturating_add(1);
                    warn!("Node watch failed, reconnecting in {:?}: {}", delay, e);
                    if !sleep_or_cancel(delay, &token).await {
                        info!("Node watcher shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// One list-if-needed plus watch round trip
    async fn session(&self, state: &mut WatchState, tx: &mpsc::Sender<NodeEvent>) -> Result<()> {
        if state.resource_version.is_none() {
            let (nodes, resource_version) = self.client.list_nodes().await?;
            info!("Listed {} nodes", nodes.len());
            for event in state.reconcile_list(nodes, resource_version) {
                send(tx, event).await?;
            }
        }

        let resource_version = state.resource_version.clone().unwrap_or_default();
        let resp = self
            .client
            .watch_nodes(&resource_version, self.config.watch_timeout.as_secs())
            .await?;

        let mut stream = resp.bytes_stream();
        let mut decoder = WatchDecoder::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| RuntimeError::watch_failed(format!("Watch stream broke: {}", e)))?;

            for event in decoder.push(&chunk) {
                match state.apply(event?) {
                    Step::Emit(node_event) => send(tx, node_event).await?,
                    Step::Relist => return Ok(()),
                    Step::Skip => {}
                }
            }
        }

        Ok(())
    }
}

async fn send(tx: &mpsc::Sender<NodeEvent>, event: NodeEvent) -> Result<()> {
    tx.send(event)
        .await
        .map_err(|_| RuntimeError::watch_failed("node event receiver closed"))
}
