#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Errors returned by the decision engine for a single request
#[derive(Error, Debug, Diagnostic)]
pub enum SchedulerError {
    /// The host sent a request that violates the extender contract
    #[error("Invalid scheduling request: {message}")]
    #[diagnostic(code(ballast::scheduler::invalid_request), help("{suggestion}"))]
    InvalidRequest {
        #[allow(unused)]
        message: String,
        #[allow(unused)]
        suggestion: String,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    CoreError(#[from] ballast_core::BallastError),

    /// A decision could not be computed for reasons unrelated to the request
    #[error("Scheduling decision failed: {message}")]
    #[diagnostic(
        code(ballast::scheduler::decision_failed),
        help("The host scheduler will retry the pod. Check the extender logs for the failing lookup")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

impl SchedulerError {
    pub fn invalid_request(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}
