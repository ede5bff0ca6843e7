//! Node classification by capacity class and readiness.
//!
//! Raw labels, conditions and taints are read here and nowhere else; the rest
//! of Ballast only branches on [`CapacityClass`] and [`Readiness`].

use k8s_openapi::api::core::v1::Node;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default label carrying the capacity class of a node
pub const CAPACITY_LABEL: &str = "node.kubernetes.io/capacity";

/// Capacity class of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapacityClass {
    /// Revocable capacity
    Spot,
    /// Stable capacity
    OnDemand,
    /// Missing or unrecognized capacity label
    Unknown,
}

impl fmt::Display for CapacityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spot => f.write_str("spot"),
            Self::OnDemand => f.write_str("on-demand"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

/// Readiness of a node as far as placement is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Readiness {
    Ready,
    NotReady,
    /// A termination notice was observed
    Terminating,
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => f.write_str("Ready"),
            Self::NotReady => f.write_str("NotReady"),
            Self::Terminating => f.write_str("Terminating"),
        }
    }
}

/// Configuration for the node classifier
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Label key holding `spot` / `on-demand`
    pub capacity_label: String,
    /// Taint key that signals an imminent spot interruption, if the
    /// deployment has a termination handler that sets one
    pub termination_taint: Option<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            capacity_label: CAPACITY_LABEL.to_string(),
            termination_taint: None,
        }
    }
}

/// Maps node attributes to a capacity class and readiness
#[derive(Debug, Clone, Default)]
pub struct NodeClassifier {
    config: ClassifierConfig,
}

impl NodeClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Capacity class from the node's capacity label
    pub fn class_of(&self, node: &Node) -> CapacityClass {
        let value = node
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(&self.config.capacity_label));

        match value.map(String::as_str) {
            Some("spot") => CapacityClass::Spot,
            Some("on-demand") => CapacityClass::OnDemand,
            _ => CapacityClass::Unknown,
        }
    }

    /// Readiness from the termination taint and the `Ready` condition
    pub fn readiness(&self, node: &Node) -> Readiness {
        if self.has_termination_notice(node) {
            return Readiness::Terminating;
        }

        let ready = node
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .and_then(|conditions| conditions.iter().rev().find(|c| c.type_ == "Ready"))
            .is_some_and(|c| c.status == "True");

        if ready {
            Readiness::Ready
        } else {
            Readiness::NotReady
        }
    }

    /// True iff the node is affirmatively ready
    pub fn is_ready(&self, node: &Node) -> bool {
        self.readiness(node) == Readiness::Ready
    }

    fn has_termination_notice(&self, node: &Node) -> bool {
        let Some(key) = self.config.termination_taint.as_deref() else {
            return false;
        };

        node.spec
            .as_ref()
            .and_then(|s| s.taints.as_ref())
            .is_some_and(|taints| taints.iter().any(|t| t.key == key))
    }
}
