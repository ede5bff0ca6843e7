//! Ballast Runtime - Cluster connectivity and capacity-loss reaction
//!
//! This crate provides:
//! - An API server client implementing the cluster reader and evictor traits
//! - A node watcher feeding node events into the controller
//! - The reaction controller that displaces pods from lost spot capacity

pub mod api_client;
pub mod backoff;
pub mod budget;
pub mod displacement;
pub mod error;
pub mod reaction;
pub mod watcher;

// Re-export primary types
pub use api_client::{ApiClient, ApiClientConfig};
pub use backoff::BackoffPolicy;
pub use displacement::{DisplacementReport, Displacer, UnitOutcome};
pub use error::{Result, RuntimeError};
pub use reaction::{NodeWorker, ReactionController, ReactionControllerConfig, ReactionState};
pub use watcher::{NodeWatcher, NodeWatcherConfig};
