//! Storage Backend Clients
//!
//! Bundled implementations of the backend capability set:
//! - memory: In-process volume store
//! - http: JSON-over-HTTP volume API

pub mod http;
pub mod memory;

pub use http::*;
pub use memory::*;

use crate::domain::ports::{BackendClientRef, BackendConnector};
use crate::error::{Error, Result};
use crate::topology::Cluster;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Combined backend configuration
#[derive(Debug, Clone, Default)]
pub struct BackendConfig {
    pub memory: InMemoryConfig,
    pub http: HttpBackendConfig,
}

/// Connector that picks the bundled backend matching a cluster's vendor
#[derive(Debug, Clone, Default)]
pub struct VendorConnector {
    config: BackendConfig,
}

impl VendorConnector {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }

    /// Create a backend client by vendor name
    pub fn create(&self, vendor: &str, endpoint: &str) -> Result<BackendClientRef> {
        match vendor.to_lowercase().as_str() {
            "memory" | "in-memory" => Ok(Arc::new(InMemoryBackend::with_config(
                endpoint,
                self.config.memory.clone(),
            ))),
            "http" | "rest" => Ok(Arc::new(HttpBackend::new(
                endpoint,
                self.config.http.clone(),
            )?)),
            _ => Err(Error::UnsupportedVendor {
                vendor: vendor.to_string(),
            }),
        }
    }
}

#[async_trait]
impl BackendConnector for VendorConnector {
    async fn connect(&self, cluster: &Cluster) -> Result<BackendClientRef> {
        info!(
            "Creating {} client for endpoint {}",
            cluster.vendor, cluster.endpoint
        );
        self.create(&cluster.vendor, &cluster.endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_connect_known_vendors() {
        let connector = VendorConnector::default();

        let memory = connector
            .connect(&Cluster::new("Memory", "ep1"))
            .await
            .unwrap();
        assert_eq!(memory.vendor(), "memory");

        let http = connector
            .connect(&Cluster::new("http", "127.0.0.1:9000"))
            .await
            .unwrap();
        assert_eq!(http.vendor(), "http");
    }

    #[tokio::test]
    async fn test_unknown_vendor_is_rejected() {
        let connector = VendorConnector::default();
        let result = connector.connect(&Cluster::new("netapp", "ep1")).await;
        assert_matches!(result.err(), Some(Error::UnsupportedVendor { vendor }) if vendor == "netapp");
    }
}
