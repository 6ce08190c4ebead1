//! HTTP Backend
//!
//! Talks to a storage cluster exposing a JSON volume API over HTTP. Reads
//! are retried with exponential backoff; mutations are sent once.

use crate::domain::ports::{
    AttachSpec, BackendClient, ResourceDescriptor, Snapshot, Volume, VolumeAttachment,
    VolumeSpec,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

const VENDOR: &str = "http";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for HTTP backends
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Give up retrying reads after this long
    pub retry_max_elapsed: Duration,
    /// Bearer token sent to the backend, if it requires one
    pub auth_token: Option<String>,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            retry_max_elapsed: Duration::from_secs(30),
            auth_token: None,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResizeBody {
    capacity_bytes: u64,
}

#[derive(Serialize)]
struct DetachBody<'a> {
    host: &'a str,
}

// =============================================================================
// HTTP Backend
// =============================================================================

/// Backend client for clusters with a JSON-over-HTTP volume API
pub struct HttpBackend {
    base_url: String,
    config: HttpBackendConfig,
    client: Client,
}

impl HttpBackend {
    /// Create a client for an endpoint (`host:port` or a full URL)
    pub fn new(endpoint: &str, config: HttpBackendConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;

        Ok(Self {
            base_url: normalize_endpoint(endpoint),
            config,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn volume_url(&self, volume_id: &str) -> String {
        format!("{}/v1/volumes/{}", self.base_url, urlencoding::encode(volume_id))
    }

    fn snapshot_url(&self, snapshot_id: &str) -> String {
        format!(
            "{}/v1/snapshots/{}",
            self.base_url,
            urlencoding::encode(snapshot_id)
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// GET with retries on transport errors and 5xx responses
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        operation: &str,
        not_found: impl Fn() -> Error,
    ) -> Result<T> {
        let policy = ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(self.config.retry_max_elapsed))
            .build();

        let response = backoff::future::retry(policy, || async {
            let response = self
                .authorize(self.client.get(url))
                .send()
                .await
                .map_err(|e| {
                    warn!("{} {} failed, retrying: {}", operation, url, e);
                    backoff::Error::transient(Error::from(e))
                })?;

            if response.status().is_server_error() {
                let err = failure_from(operation, response).await;
                warn!("{} {} failed, retrying: {}", operation, url, err);
                return Err(backoff::Error::transient(err));
            }
            Ok(response)
        })
        .await?;

        decode(operation, response, not_found).await
    }

    /// Single-shot request with an optional JSON body
    async fn send_json<B: Serialize + ?Sized>(
        &self,
        request: RequestBuilder,
        body: Option<&B>,
        operation: &str,
        not_found: impl Fn() -> Error,
    ) -> Result<Response> {
        let request = match body {
            Some(body) => request.json(body),
            None => request,
        };
        let response = self.authorize(request).send().await?;
        debug!("{} -> {}", operation, response.status());

        if response.status() == StatusCode::NOT_FOUND {
            return Err(not_found());
        }
        if !response.status().is_success() {
            return Err(failure_from(operation, response).await);
        }
        Ok(response)
    }
}

/// Add a scheme when the endpoint is a bare `host:port`
fn normalize_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

async fn failure_from(operation: &str, response: Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Error::Backend {
        vendor: VENDOR.to_string(),
        operation: operation.to_string(),
        reason: format!("HTTP {}: {}", status, body.trim()),
    }
}

async fn decode<T: DeserializeOwned>(
    operation: &str,
    response: Response,
    not_found: impl Fn() -> Error,
) -> Result<T> {
    if response.status() == StatusCode::NOT_FOUND {
        return Err(not_found());
    }
    if !response.status().is_success() {
        return Err(failure_from(operation, response).await);
    }
    Ok(response.json::<T>().await?)
}

fn no_such_resource() -> Error {
    Error::Backend {
        vendor: VENDOR.to_string(),
        operation: "list_resources".into(),
        reason: "resource listing endpoint not found".into(),
    }
}

#[async_trait]
impl BackendClient for HttpBackend {
    async fn create_volume(&self, spec: VolumeSpec) -> Result<Volume> {
        let url = format!("{}/v1/volumes", self.base_url);
        let response = self
            .send_json(self.client.post(&url), Some(&spec), "create_volume", || {
                Error::Backend {
                    vendor: VENDOR.to_string(),
                    operation: "create_volume".into(),
                    reason: "volume API not found".into(),
                }
            })
            .await?;
        Ok(response.json::<Volume>().await?)
    }

    async fn get_volume(&self, volume_id: &str) -> Result<Volume> {
        self.get_json(&self.volume_url(volume_id), "get_volume", || {
            Error::volume_not_found(volume_id)
        })
        .await
    }

    async fn resize_volume(&self, volume_id: &str, capacity_bytes: u64) -> Result<Volume> {
        let url = format!("{}/resize", self.volume_url(volume_id));
        let response = self
            .send_json(
                self.client.post(&url),
                Some(&ResizeBody { capacity_bytes }),
                "resize_volume",
                || Error::volume_not_found(volume_id),
            )
            .await?;
        Ok(response.json::<Volume>().await?)
    }

    async fn delete_volume(&self, volume_id: &str) -> Result<()> {
        self.send_json::<()>(
            self.client.delete(self.volume_url(volume_id)),
            None,
            "delete_volume",
            || Error::volume_not_found(volume_id),
        )
        .await?;
        Ok(())
    }

    async fn attach_volume(&self, volume_id: &str, spec: AttachSpec) -> Result<VolumeAttachment> {
        let url = format!("{}/attach", self.volume_url(volume_id));
        let response = self
            .send_json(self.client.post(&url), Some(&spec), "attach_volume", || {
                Error::volume_not_found(volume_id)
            })
            .await?;
        Ok(response.json::<VolumeAttachment>().await?)
    }

    async fn detach_volume(&self, volume_id: &str, host: &str) -> Result<()> {
        let url = format!("{}/detach", self.volume_url(volume_id));
        self.send_json(
            self.client.post(&url),
            Some(&DetachBody { host }),
            "detach_volume",
            || Error::volume_not_found(volume_id),
        )
        .await?;
        Ok(())
    }

    async fn get_snapshot(&self, snapshot_id: &str) -> Result<Snapshot> {
        self.get_json(&self.snapshot_url(snapshot_id), "get_snapshot", || {
            Error::snapshot_not_found(snapshot_id)
        })
        .await
    }

    async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>> {
        let url = format!("{}/v1/resources", self.base_url);
        self.get_json(&url, "list_resources", no_such_resource).await
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);
        match self.authorize(self.client.get(&url)).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                debug!("Health check against {} failed: {}", self.base_url, e);
                Ok(false)
            }
        }
    }

    fn vendor(&self) -> &str {
        VENDOR
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::VolumeStatus;
    use assert_matches::assert_matches;
    use axum::extract::Path;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::collections::BTreeMap;

    fn sample_volume(id: &str, capacity_bytes: u64) -> Volume {
        Volume {
            id: id.to_string(),
            name: "data".into(),
            capacity_bytes,
            status: VolumeStatus::Available,
            attachments: vec![],
            labels: BTreeMap::new(),
            created_at: chrono::Utc::now(),
        }
    }

    /// Serve a minimal volume API on an ephemeral port
    async fn spawn_stub() -> String {
        let app = Router::new()
            .route(
                "/v1/volumes",
                post(|Json(spec): Json<VolumeSpec>| async move {
                    Json(sample_volume("remote-1", spec.capacity_bytes))
                }),
            )
            .route(
                "/v1/volumes/:id",
                get(|Path(id): Path<String>| async move {
                    if id == "remote-1" {
                        Ok(Json(sample_volume("remote-1", 1024)))
                    } else {
                        Err(AxumStatus::NOT_FOUND)
                    }
                }),
            )
            .route(
                "/v1/resources",
                get(|| async { Json(vec![ResourceDescriptor::volume("remote-1")]) }),
            )
            .route("/health", get(|| async { "ok" }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("{}", addr)
    }

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(normalize_endpoint("10.0.0.1:9000"), "http://10.0.0.1:9000");
        assert_eq!(normalize_endpoint("https://store.local/"), "https://store.local");
    }

    #[test]
    fn test_ids_are_url_encoded() {
        let backend = HttpBackend::new("store:80", HttpBackendConfig::default()).unwrap();
        assert_eq!(
            backend.volume_url("a/b c"),
            "http://store:80/v1/volumes/a%2Fb%20c"
        );
    }

    #[tokio::test]
    async fn test_round_trip_against_stub() {
        let endpoint = spawn_stub().await;
        let backend = HttpBackend::new(&endpoint, HttpBackendConfig::default()).unwrap();

        let created = backend
            .create_volume(VolumeSpec {
                name: "data".into(),
                capacity_bytes: 4096,
                labels: BTreeMap::new(),
            })
            .await
            .unwrap();
        assert_eq!(created.id, "remote-1");
        assert_eq!(created.capacity_bytes, 4096);

        let fetched = backend.get_volume("remote-1").await.unwrap();
        assert_eq!(fetched.capacity_bytes, 1024);

        assert_matches!(
            backend.get_volume("missing").await,
            Err(Error::ResourceNotFound { .. })
        );

        let resources = backend.list_resources().await.unwrap();
        assert_eq!(resources, vec![ResourceDescriptor::volume("remote-1")]);

        assert!(backend.health_check().await.unwrap());
    }

    #[tokio::test]
    async fn test_unreachable_health_is_false() {
        let config = HttpBackendConfig {
            request_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let backend = HttpBackend::new("127.0.0.1:1", config).unwrap();
        assert!(!backend.health_check().await.unwrap());
    }
}
