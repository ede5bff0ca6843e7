use crate::wire::{ExtenderArgs, ExtenderFilterResult, HostPriority, NodeList};
use crate::{ApiError, AppState, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use ballast_core::{pod_key, Node};
use ballast_scheduler::DecisionEngine;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Candidate nodes of one request, however the host sent them
struct Candidates {
    nodes: Vec<Node>,
    /// Names that could not be resolved to nodes
    failed: BTreeMap<String, String>,
    /// The host sent names only and expects names back
    by_name: bool,
}

async fn candidates(engine: &DecisionEngine, args: ExtenderArgs) -> Result<Candidates> {
    match (args.nodes, args.node_names) {
        (Some(list), _) => Ok(Candidates {
            nodes: list.items,
            failed: BTreeMap::new(),
            by_name: false,
        }),
        (None, Some(names)) => {
            let lookup = engine.lookup_nodes(&names).await?;
            Ok(Candidates {
                nodes: lookup.nodes,
                failed: lookup.failed,
                by_name: true,
            })
        }
        (None, None) => Err(ApiError::BadRequest(
            "request carries neither Nodes nor NodeNames".to_string(),
        )),
    }
}

fn parse_args(body: &Bytes) -> Result<ExtenderArgs> {
    Ok(serde_json::from_slice(body)?)
}

/// POST /filter
///
/// Malformed JSON is rejected with 400. Contract violations are reported in
/// the `Error` field with no nodes, as the host scheduler expects.
pub async fn filter(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<ExtenderFilterResult>> {
    let mut args = parse_args(&body)?;

    let Some(pod) = args.pod.take() else {
        warn!("Filter request without a pod");
        return Ok(Json(ExtenderFilterResult::error("request carries no Pod")));
    };

    let candidates = match candidates(&state.engine, args).await {
        Ok(c) => c,
        Err(e) => {
            warn!("Rejecting filter request for pod {}: {:?}", pod_key(&pod), e);
            return Ok(Json(ExtenderFilterResult::error(error_message(e))));
        }
    };

    let outcome = match state.engine.filter(&pod, &candidates.nodes).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("Filter failed for pod {}: {}", pod_key(&pod), e);
            return Ok(Json(ExtenderFilterResult::error(e.to_string())));
        }
    };

    let mut failed = candidates.failed;
    failed.extend(outcome.failed());

    let result = if candidates.by_name {
        ExtenderFilterResult {
            node_names: Some(outcome.eligible()),
            failed_nodes: failed,
            ..Default::default()
        }
    } else {
        let items = candidates
            .nodes
            .into_iter()
            .filter(|node| {
                node.metadata
                    .name
                    .as_deref()
                    .is_some_and(|name| outcome.is_eligible(name))
            })
            .collect();
        ExtenderFilterResult {
            nodes: Some(NodeList { items }),
            failed_nodes: failed,
            ..Default::default()
        }
    };

    Ok(Json(result))
}

/// POST /prioritize
pub async fn prioritize(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Vec<HostPriority>>> {
    let mut args = parse_args(&body)?;

    let pod = args
        .pod
        .take()
        .ok_or_else(|| ApiError::BadRequest("request carries no Pod".to_string()))?;

    let candidates = candidates(&state.engine, args).await?;
    for (name, reason) in &candidates.failed {
        debug!("Not scoring node {}: {}", name, reason);
    }

    let scores = state.engine.prioritize(&pod, &candidates.nodes).await?;

    Ok(Json(scores.into_iter().map(HostPriority::from).collect()))
}

fn error_message(err: ApiError) -> String {
    match err {
        ApiError::BadRequest(msg) | ApiError::Internal(msg) => msg,
    }
}
