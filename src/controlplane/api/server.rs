//! API Server
//!
//! Runs the REST server for the control plane API and drains it on
//! shutdown.

use crate::error::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use super::rest::RestRouter;
use crate::controlplane::service::StorageService;

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for the API server
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// REST API bind address
    pub rest_addr: SocketAddr,
    /// Bearer token required on `/v1` routes
    pub auth_token: Option<String>,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            rest_addr: SocketAddr::from(([0, 0, 0, 0], 8090)),
            auth_token: None,
        }
    }
}

// =============================================================================
// API Server
// =============================================================================

/// Triggers graceful shutdown of an [`ApiServer`].
///
/// The request is latched: a server that starts serving after shutdown was
/// requested stops immediately.
#[derive(Debug, Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.0.send_replace(true);
    }
}

/// REST API server for the storage service
pub struct ApiServer {
    config: ApiServerConfig,
    service: Arc<StorageService>,
    shutdown_tx: ShutdownHandle,
    shutdown_rx: watch::Receiver<bool>,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(config: ApiServerConfig, service: Arc<StorageService>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            config,
            service,
            shutdown_tx: ShutdownHandle(Arc::new(shutdown_tx)),
            shutdown_rx,
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown_tx.clone()
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        self.shutdown_tx.shutdown();
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.rest_addr)
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind REST server: {}", e)))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown.
    ///
    /// In-flight requests are drained before this returns.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let app = RestRouter::new(self.service.clone())
            .with_auth_token(self.config.auth_token.clone())
            .build();
        let mut shutdown_rx = self.shutdown_rx.clone();

        info!("REST API listening on {}", listener.local_addr()?);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.wait_for(|stopped| *stopped).await;
                info!("REST server shutting down");
            })
            .await
            .map_err(|e| Error::Internal(format!("REST server error: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::backends::VendorConnector;
    use crate::controlplane::service::ServiceConfig;

    #[test]
    fn test_default_config() {
        let config = ApiServerConfig::default();
        assert_eq!(config.rest_addr.port(), 8090);
        assert!(config.auth_token.is_none());
    }

    #[tokio::test]
    async fn test_serve_until_shutdown() {
        let service = Arc::new(StorageService::new(
            ServiceConfig::default(),
            Arc::new(VendorConnector::default()),
        ));
        service.start().await.unwrap();

        let server = Arc::new(ApiServer::new(ApiServerConfig::default(), service));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let running = {
            let server = server.clone();
            tokio::spawn(async move { server.serve(listener).await })
        };

        let body = reqwest::get(format!("http://{}/health", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "ok");

        server.shutdown();
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_requested_before_serving_is_kept() {
        let service = Arc::new(StorageService::new(
            ServiceConfig::default(),
            Arc::new(VendorConnector::default()),
        ));
        let server = ApiServer::new(ApiServerConfig::default(), service);
        server.shutdown_handle().shutdown();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), server.serve(listener))
            .await
            .expect("server ignored an earlier shutdown")
            .unwrap();
    }
}
