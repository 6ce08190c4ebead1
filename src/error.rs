//! Error types for the Volume Broker
//!
//! Provides structured error types for every control plane component:
//! topology loading, placement, ownership registries, backend dispatch
//! and the REST surface.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the broker
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Topology Errors
    // =========================================================================
    #[error("Failed to load cluster topology from {source_name}: {reason}")]
    TopologyLoad { source_name: String, reason: String },

    #[error("Failed to load resource definitions from {source_name}: {reason}")]
    ResourceDefinitionsLoad { source_name: String, reason: String },

    #[error("Cluster not found: {cluster_id}")]
    ClusterNotFound { cluster_id: String },

    #[error("Unsupported backend vendor: {vendor}")]
    UnsupportedVendor { vendor: String },

    // =========================================================================
    // Allocation Errors
    // =========================================================================
    #[error("No clusters available for placement")]
    NoClustersAvailable,

    #[error("Unknown placement policy: {0}")]
    UnknownPlacementPolicy(String),

    // =========================================================================
    // Registry Errors
    // =========================================================================
    #[error("Resource not found: {kind}/{id}")]
    ResourceNotFound { kind: String, id: String },

    #[error("Client not found: {client_id}")]
    ClientNotFound { client_id: String },

    #[error("Identifier collision in {registry} registry: {id}")]
    IdCollision { registry: String, id: String },

    // =========================================================================
    // Service Lifecycle Errors
    // =========================================================================
    #[error("Service is not serving (state: {state})")]
    NotServing { state: String },

    #[error("Invalid service state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    // =========================================================================
    // Backend Errors
    // =========================================================================
    #[error("Backend unavailable: {backend}")]
    BackendUnavailable { backend: String },

    #[error("Backend operation failed: {vendor} - {operation}: {reason}")]
    Backend {
        vendor: String,
        operation: String,
        reason: String,
    },

    #[error("Backend operation timed out: {operation} after {timeout:?}")]
    BackendTimeout { operation: String, timeout: Duration },

    #[error("Backend HTTP error: {0}")]
    BackendHttp(#[from] reqwest::Error),

    // =========================================================================
    // API Errors
    // =========================================================================
    #[error("Request validation failed: {0}")]
    Validation(String),

    #[error("API authentication failed")]
    ApiAuthentication,

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl Error {
    /// Shorthand for a missing volume
    pub fn volume_not_found(id: impl Into<String>) -> Self {
        Error::ResourceNotFound {
            kind: "volume".into(),
            id: id.into(),
        }
    }

    /// Shorthand for a missing snapshot
    pub fn snapshot_not_found(id: impl Into<String>) -> Self {
        Error::ResourceNotFound {
            kind: "snapshot".into(),
            id: id.into(),
        }
    }

    /// Check if this error is worth retrying by the caller
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::BackendUnavailable { .. }
                | Error::BackendTimeout { .. }
                | Error::BackendHttp(_)
                | Error::NoClustersAvailable
                | Error::NotServing { .. }
        )
    }

    /// Check if the error was caused by the request rather than the system
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::ResourceNotFound { .. }
                | Error::Validation(_)
                | Error::ApiAuthentication
                | Error::JsonParse(_)
        )
    }

    /// Check if this error must stop the process during startup
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_)
                | Error::TopologyLoad { .. }
                | Error::ResourceDefinitionsLoad { .. }
                | Error::UnsupportedVendor { .. }
                | Error::UnknownPlacementPolicy(_)
                | Error::YamlParse(_)
                | Error::IdCollision { .. }
        )
    }

    /// HTTP status code used by the REST surface
    pub fn status_code(&self) -> u16 {
        match self {
            Error::ResourceNotFound { .. } | Error::ClusterNotFound { .. } => 404,
            Error::Validation(_) | Error::JsonParse(_) => 400,
            Error::ApiAuthentication => 401,
            Error::NoClustersAvailable | Error::NotServing { .. } => 503,
            Error::BackendUnavailable { .. } | Error::Backend { .. } | Error::BackendHttp(_) => 502,
            Error::BackendTimeout { .. } => 504,
            _ => 500,
        }
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Error::ResourceNotFound { .. } | Error::ClusterNotFound { .. } => "not_found",
            Error::Validation(_) | Error::JsonParse(_) => "invalid_request",
            Error::ApiAuthentication => "unauthenticated",
            Error::NoClustersAvailable => "no_clusters_available",
            Error::NotServing { .. } => "not_serving",
            Error::BackendUnavailable { .. } | Error::Backend { .. } | Error::BackendHttp(_) => {
                "backend_error"
            }
            Error::BackendTimeout { .. } => "backend_timeout",
            _ => "internal_error",
        }
    }
}

/// Result type alias for the broker
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::volume_not_found("vol-1").status_code(), 404);
        assert_eq!(Error::NoClustersAvailable.status_code(), 503);
        assert_eq!(Error::Validation("bad".into()).status_code(), 400);
        assert_eq!(Error::ApiAuthentication.status_code(), 401);
        assert_eq!(
            Error::BackendTimeout {
                operation: "get_volume".into(),
                timeout: Duration::from_secs(1),
            }
            .status_code(),
            504
        );
        assert_eq!(Error::Internal("boom".into()).status_code(), 500);
    }

    #[test]
    fn test_error_classification() {
        let transient = Error::BackendUnavailable {
            backend: "ep1".into(),
        };
        assert!(transient.is_retryable());
        assert!(!transient.is_client_error());

        let missing = Error::snapshot_not_found("snap-1");
        assert!(!missing.is_retryable());
        assert!(missing.is_client_error());
        assert_eq!(missing.code(), "not_found");

        let config = Error::TopologyLoad {
            source_name: "clusters.yaml".into(),
            reason: "missing".into(),
        };
        assert!(config.is_fatal_at_startup());
        assert!(!Error::NoClustersAvailable.is_fatal_at_startup());
    }
}
