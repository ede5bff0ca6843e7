//! Scheduler extender v1 wire types.
//!
//! Field names are the host scheduler's Go field names. They are written in
//! that form and also accepted in lower camel case.

use ballast_core::{Node, Pod};
use ballast_scheduler::ScoreResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Candidate nodes sent in full
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeList {
    #[serde(default)]
    pub items: Vec<Node>,
}

/// Body of `/filter` and `/prioritize`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtenderArgs {
    #[serde(rename = "Pod", alias = "pod", default)]
    pub pod: Option<Pod>,

    #[serde(
        rename = "Nodes",
        alias = "nodes",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub nodes: Option<NodeList>,

    /// Set instead of `nodes` when the host runs with nodeCacheCapable
    #[serde(
        rename = "NodeNames",
        alias = "nodeNames",
        alias = "nodenames",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub node_names: Option<Vec<String>>,
}

/// Response of `/filter`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtenderFilterResult {
    #[serde(
        rename = "Nodes",
        alias = "nodes",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub nodes: Option<NodeList>,

    #[serde(
        rename = "NodeNames",
        alias = "nodeNames",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub node_names: Option<Vec<String>>,

    /// Rejected node name to reason
    #[serde(rename = "FailedNodes", alias = "failedNodes", default)]
    pub failed_nodes: BTreeMap<String, String>,

    #[serde(
        rename = "FailedAndUnresolvableNodes",
        alias = "failedAndUnresolvableNodes",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub failed_and_unresolvable_nodes: BTreeMap<String, String>,

    /// Non-empty when the whole call failed
    #[serde(rename = "Error", alias = "error", default)]
    pub error: String,
}

impl ExtenderFilterResult {
    /// A failed call: no nodes, only the error
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            ..Default::default()
        }
    }
}

/// One entry of the `/prioritize` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPriority {
    #[serde(rename = "Host", alias = "host")]
    pub host: String,
    #[serde(rename = "Score", alias = "score")]
    pub score: i64,
}

impl From<ScoreResult> for HostPriority {
    fn from(result: ScoreResult) -> Self {
        Self {
            host: result.node_name,
            score: result.score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_args_accept_go_and_camel_case() {
        let go: ExtenderArgs = serde_json::from_value(json!({
            "Pod": { "metadata": { "name": "p" } },
            "Nodes": { "items": [ { "metadata": { "name": "n1" } } ] },
            "NodeNames": null
        }))
        .unwrap();
        assert_eq!(go.nodes.unwrap().items.len(), 1);
        assert!(go.node_names.is_none());

        let camel: ExtenderArgs = serde_json::from_value(json!({
            "pod": { "metadata": { "name": "p" } },
            "nodeNames": ["n1", "n2"]
        }))
        .unwrap();
        assert_eq!(camel.node_names.unwrap(), vec!["n1", "n2"]);
        assert!(camel.nodes.is_none());
    }

    #[test]
    fn test_filter_result_shape() {
        let mut result = ExtenderFilterResult {
            node_names: Some(vec!["n1".to_string()]),
            ..Default::default()
        };
        result
            .failed_nodes
            .insert("n2".to_string(), "node is not ready".to_string());

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["NodeNames"], json!(["n1"]));
        assert_eq!(value["FailedNodes"]["n2"], "node is not ready");
        assert_eq!(value["Error"], "");
        assert!(value.get("Nodes").is_none());
    }

    #[test]
    fn test_host_priority_shape() {
        let value = serde_json::to_value(HostPriority::from(ScoreResult::new(
            "n1".to_string(),
            -2,
        )))
        .unwrap();
        assert_eq!(value, json!({ "Host": "n1", "Score": -2 }));
    }
}
