use ballast_scheduler::DecisionEngine;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Placement decision engine shared by every request
    pub engine: Arc<DecisionEngine>,
}

impl AppState {
    pub fn new(engine: Arc<DecisionEngine>) -> Self {
        Self { engine }
    }
}
