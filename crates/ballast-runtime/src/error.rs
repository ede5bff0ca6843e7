#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Runtime error type for cluster connectivity and displacement
#[derive(Error, Debug, Diagnostic)]
pub enum RuntimeError {
    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(ballast::runtime::invalid_config), help("{suggestion}"))]
    InvalidConfig {
        #[allow(unused)]
        message: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// The node watch stream failed
    #[error("Node watch failed: {message}")]
    #[diagnostic(
        code(ballast::runtime::watch_failed),
        help("The watcher reconnects with backoff. Check API server reachability and the token's list/watch permission on nodes")
    )]
    WatchFailed {
        #[allow(unused)]
        message: String,
    },

    /// A retried operation ran out of attempts
    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    #[diagnostic(
        code(ballast::runtime::retries_exhausted),
        help("The failure is recorded and the controller moves on. A failed pod listing is retried on the node's next snapshot; pods whose eviction failed stay until the node signals capacity loss again")
    )]
    RetriesExhausted {
        #[allow(unused)]
        operation: String,
        #[allow(unused)]
        attempts: u32,
        #[allow(unused)]
        last_error: String,
    },

    /// Shutdown was requested while the operation was pending
    #[error("{operation} cancelled by shutdown")]
    #[diagnostic(code(ballast::runtime::cancelled))]
    Cancelled {
        #[allow(unused)]
        operation: String,
    },

    /// Core error
    #[error(transparent)]
    #[diagnostic(transparent)]
    CoreError(#[from] ballast_core::BallastError),

    /// Internal error
    #[error("Internal runtime error: {message}")]
    #[diagnostic(
        code(ballast::runtime::internal_error),
        help("This is likely a bug in ballast. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

impl RuntimeError {
    pub fn invalid_config(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn watch_failed(message: impl Into<String>) -> Self {
        Self::WatchFailed {
            message: message.into(),
        }
    }

    pub fn retries_exhausted(
        operation: impl Into<String>,
        attempts: u32,
        last_error: impl Into<String>,
    ) -> Self {
        Self::RetriesExhausted {
            operation: operation.into(),
            attempts,
            last_error: last_error.into(),
        }
    }

    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}
