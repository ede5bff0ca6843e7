//! Ballast Extender - Scheduler extender HTTP endpoint
//!
//! This crate provides:
//! - Axum-based HTTP server
//! - The extender `/filter` and `/prioritize` verbs
//! - Health and readiness probes

pub mod error;
pub mod handlers;
pub mod server;
pub mod state;
pub mod wire;

// Re-export commonly used types
pub use error::{ApiError, Result};
pub use server::{Config, ExtenderServer};
pub use state::AppState;
pub use wire::{ExtenderArgs, ExtenderFilterResult, HostPriority, NodeList};
