//! Ballast Scheduler - Capacity-aware placement decisions
//!
//! This crate provides:
//! - Filter predicates (node readiness, capacity class eligibility)
//! - Scoring functions (on-demand preference, workload spread)
//! - The decision engine answering filter/prioritize for a pending pod

pub mod engine;
pub mod error;
pub mod filter;
pub mod score;
pub mod types;

// Re-export commonly used types
pub use engine::{DecisionEngine, EngineConfig};
pub use error::{Result, SchedulerError};
pub use score::{BASELINE_SCORE, ON_DEMAND_BASE_SCORE};
pub use types::{FilterOutcome, FilterResult, SchedulingContext, ScoreResult};
