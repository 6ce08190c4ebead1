//! REST API Handlers
//!
//! Implements the control plane volume and snapshot endpoints on top of
//! [`StorageService`], plus status, health and readiness probes.

use crate::controlplane::service::{ServiceState, ServiceStatus, StorageService};
use crate::domain::ports::{
    AttachVolumeRequest, CreateVolumeRequest, DetachVolumeRequest, ResizeVolumeRequest,
};
use crate::error::{Error, Result};
use axum::{
    extract::{Json, Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::debug;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Volume creation body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVolumeBody {
    pub name: String,
    /// Capacity in bytes
    #[serde(default)]
    pub capacity_bytes: Option<u64>,
    /// Capacity with a unit (e.g., "100Gi", "1Ti"); ignored when
    /// `capacityBytes` is set
    #[serde(default)]
    pub capacity: Option<String>,
    /// Named volume profile
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl CreateVolumeBody {
    fn into_request(self) -> Result<CreateVolumeRequest> {
        let capacity_bytes = match (self.capacity_bytes, &self.capacity) {
            (Some(bytes), _) => Some(bytes),
            (None, Some(capacity)) => Some(parse_capacity(capacity)?),
            (None, None) => None,
        };

        Ok(CreateVolumeRequest {
            name: self.name,
            capacity_bytes,
            profile: self.profile,
            labels: self.labels,
        })
    }
}

/// Volume resize body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResizeVolumeBody {
    #[serde(default)]
    pub capacity_bytes: Option<u64>,
    #[serde(default)]
    pub capacity: Option<String>,
}

/// Volume attach body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachVolumeBody {
    pub host: String,
    #[serde(default)]
    pub read_only: bool,
}

/// Volume detach body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetachVolumeBody {
    pub host: String,
}

/// Control plane status response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    #[serde(flatten)]
    pub service: ServiceStatus,
    /// Health of each cluster's client
    pub backends: BTreeMap<String, bool>,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ApiErrorResponse {
            error: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    service: Arc<StorageService>,
    auth_token: Option<String>,
}

impl RestRouter {
    /// Create a new REST router
    pub fn new(service: Arc<StorageService>) -> Self {
        Self {
            service,
            auth_token: None,
        }
    }

    /// Require `Authorization: Bearer <token>` on every `/v1` route
    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token.filter(|t| !t.is_empty());
        self
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            service: self.service,
            auth_token: self.auth_token.map(Arc::from),
        };

        let api = Router::new()
            // Volume endpoints
            .route("/v1/volumes", post(create_volume))
            .route("/v1/volumes/:id", get(get_volume).delete(delete_volume))
            .route("/v1/volumes/:id/resize", post(resize_volume))
            .route("/v1/volumes/:id/attach", post(attach_volume))
            .route("/v1/volumes/:id/detach", post(detach_volume))
            // Snapshot endpoints
            .route("/v1/snapshots/:id", get(get_snapshot))
            // Status endpoint
            .route("/v1/status", get(service_status))
            .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

        Router::new()
            .merge(api)
            // Health endpoints
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    service: Arc<StorageService>,
    auth_token: Option<Arc<str>>,
}

// =============================================================================
// Middleware
// =============================================================================

async fn require_token(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(expected) = &state.auth_token {
        let presented = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));

        if presented != Some(&**expected) {
            debug!("Rejected unauthenticated request to {}", request.uri().path());
            return Error::ApiAuthentication.into_response();
        }
    }
    next.run(request).await
}

// =============================================================================
// Handlers
// =============================================================================

/// Create a volume
async fn create_volume(
    State(state): State<AppState>,
    Json(body): Json<CreateVolumeBody>,
) -> Result<impl IntoResponse> {
    let volume = state.service.create_volume(body.into_request()?).await?;
    Ok((StatusCode::CREATED, Json(volume)))
}

/// Get a volume
async fn get_volume(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.service.get_volume(&id).await?))
}

/// Resize a volume
async fn resize_volume(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ResizeVolumeBody>,
) -> Result<impl IntoResponse> {
    let capacity_bytes = match (body.capacity_bytes, body.capacity) {
        (Some(bytes), _) => bytes,
        (None, Some(capacity)) => parse_capacity(&capacity)?,
        (None, None) => {
            return Err(Error::Validation("capacityBytes or capacity is required".into()))
        }
    };

    let volume = state
        .service
        .resize_volume(ResizeVolumeRequest {
            volume_id: id,
            capacity_bytes,
        })
        .await?;
    Ok(Json(volume))
}

/// Delete a volume
async fn delete_volume(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    state.service.delete_volume(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Attach a volume to a host
async fn attach_volume(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<AttachVolumeBody>,
) -> Result<impl IntoResponse> {
    let attachment = state
        .service
        .attach_volume(AttachVolumeRequest {
            volume_id: id,
            host: body.host,
            read_only: body.read_only,
        })
        .await?;
    Ok(Json(attachment))
}

/// Detach a volume from a host
async fn detach_volume(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<DetachVolumeBody>,
) -> Result<impl IntoResponse> {
    state
        .service
        .detach_volume(DetachVolumeRequest {
            volume_id: id,
            host: body.host,
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Get a snapshot
async fn get_snapshot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.service.get_snapshot(&id).await?))
}

/// Service status with per-cluster health
async fn service_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        service: state.service.status(),
        backends: state.service.health().await,
    })
}

/// Health check
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness check
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.service.state() {
        ServiceState::Serving => (StatusCode::OK, "ready".to_string()),
        other => (StatusCode::SERVICE_UNAVAILABLE, format!("service {}", other)),
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Parse capacity string (e.g., "100Gi", "1Ti") to bytes
pub fn parse_capacity(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::Validation("empty capacity string".into()));
    }

    let num_end = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit() && *c != '.')
        .map(|(i, _)| i)
        .unwrap_or(s.len());

    let num_str = &s[..num_end];
    let unit_str = s[num_end..].trim();

    let num: f64 = num_str
        .parse()
        .map_err(|_| Error::Validation(format!("invalid capacity number: {}", num_str)))?;

    let multiplier: u64 = match unit_str.to_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KI" | "KIB" => 1024,
        "M" | "MB" | "MI" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GI" | "GIB" => 1024 * 1024 * 1024,
        "T" | "TB" | "TI" | "TIB" => 1024 * 1024 * 1024 * 1024,
        "P" | "PB" | "PI" | "PIB" => 1024 * 1024 * 1024 * 1024 * 1024,
        _ => {
            return Err(Error::Validation(format!(
                "unknown capacity unit: {}",
                unit_str
            )))
        }
    };

    let bytes = num * multiplier as f64;
    if !bytes.is_finite() || bytes >= u64::MAX as f64 {
        return Err(Error::Validation(format!("capacity out of range: {}", s)));
    }
    if bytes.fract() != 0.0 {
        return Err(Error::Validation(format!(
            "capacity is not a whole number of bytes: {}",
            s
        )));
    }

    Ok(bytes as u64)
}
