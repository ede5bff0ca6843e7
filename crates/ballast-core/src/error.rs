#![allow(unused_assignments)]

use miette::Diagnostic;
use std::time::Duration;
use thiserror::Error;

/// Core error type for Ballast operations
#[derive(Error, Debug, Diagnostic)]
pub enum BallastError {
    /// Resource not found
    #[error("Resource not found: {resource_key}")]
    #[diagnostic(
        code(ballast::resource_not_found),
        help("The object may have been deleted since it was referenced. Ownership chains are read as eventually-consistent snapshots")
    )]
    ResourceNotFound {
        #[allow(unused)]
        resource_key: String,
    },

    /// Cluster API call failed in a way that may succeed on retry
    #[error("Cluster API unavailable: {message}")]
    #[diagnostic(
        code(ballast::cluster_unavailable),
        help("Check connectivity to the Kubernetes API server and the service account permissions")
    )]
    ClusterUnavailable {
        #[allow(unused)]
        message: String,
    },

    /// Lookup exceeded its deadline
    #[error("Lookup of {resource_key} timed out after {timeout:?}")]
    #[diagnostic(
        code(ballast::lookup_timeout),
        help("The API server is slow to respond. Increase the lookup timeout or check API server load")
    )]
    LookupTimeout {
        #[allow(unused)]
        resource_key: String,
        #[allow(unused)]
        timeout: Duration,
    },

    /// Eviction rejected because it would violate a disruption budget
    #[error("Eviction of {pod} rejected by disruption budget")]
    #[diagnostic(
        code(ballast::disruption_budget_exceeded),
        help("A PodDisruptionBudget currently allows no further disruptions. The eviction will be retried with backoff")
    )]
    DisruptionBudgetExceeded {
        #[allow(unused)]
        pod: String,
    },

    /// Invalid resource
    #[error("Invalid resource: {reason}")]
    #[diagnostic(
        code(ballast::invalid_resource),
        help("{suggestion}")
    )]
    InvalidResource {
        #[allow(unused)]
        reason: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(ballast::serialization_error),
        help("Ensure the payload is a valid Kubernetes JSON object")
    )]
    SerializationError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(ballast::internal_error),
        help("This is likely a bug. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for Ballast operations
pub type Result<T> = std::result::Result<T, BallastError>;

impl BallastError {
    /// Create a ResourceNotFound error
    pub fn resource_not_found(resource_key: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            resource_key: resource_key.into(),
        }
    }

    /// Create a ClusterUnavailable error
    pub fn cluster_unavailable(message: impl Into<String>) -> Self {
        Self::ClusterUnavailable {
            message: message.into(),
        }
    }

    /// Create a LookupTimeout error
    pub fn lookup_timeout(resource_key: impl Into<String>, timeout: Duration) -> Self {
        Self::LookupTimeout {
            resource_key: resource_key.into(),
            timeout,
        }
    }

    /// Create a DisruptionBudgetExceeded error
    pub fn disruption_budget_exceeded(pod: impl Into<String>) -> Self {
        Self::DisruptionBudgetExceeded { pod: pod.into() }
    }

    /// Create an InvalidResource error
    pub fn invalid_resource(reason: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidResource {
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a SerializationError
    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// True for errors that may clear up on their own (network, timeouts, budgets)
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ClusterUnavailable { .. }
                | Self::LookupTimeout { .. }
                | Self::DisruptionBudgetExceeded { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ResourceNotFound { .. })
    }
}
