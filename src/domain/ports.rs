//! Domain Ports - Core trait definitions for the volume broker
//!
//! These traits define the boundaries between the orchestration logic and
//! external systems. Vendor backends, placement strategies, topology
//! sources and identifier generators implement them; the service is written
//! against the traits only.

use crate::error::Result;
use crate::topology::{Cluster, ClusterId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Resource Types
// =============================================================================

/// Kind of resource tracked by the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Volume,
    Snapshot,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Volume => write!(f, "volume"),
            ResourceKind::Snapshot => write!(f, "snapshot"),
        }
    }
}

/// Lifecycle status reported by a backend for a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeStatus {
    Creating,
    Available,
    InUse,
    Error,
}

impl std::fmt::Display for VolumeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumeStatus::Creating => write!(f, "creating"),
            VolumeStatus::Available => write!(f, "available"),
            VolumeStatus::InUse => write!(f, "inuse"),
            VolumeStatus::Error => write!(f, "error"),
        }
    }
}

// =============================================================================
// Backend Payloads
// =============================================================================

/// Fully resolved parameters handed to a backend to create a volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    /// Human readable volume name
    pub name: String,
    /// Requested capacity in bytes
    pub capacity_bytes: u64,
    /// Labels attached to the volume
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// A volume as reported by a backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Volume identifier (backend-native inside a backend, external at the API)
    pub id: String,
    /// Volume name
    pub name: String,
    /// Provisioned capacity in bytes
    pub capacity_bytes: u64,
    /// Current status
    pub status: VolumeStatus,
    /// Hosts the volume is attached to
    #[serde(default)]
    pub attachments: Vec<VolumeAttachment>,
    /// Labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Parameters for attaching a volume to a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachSpec {
    /// Host (node, hypervisor, instance) to attach to
    pub host: String,
    /// Attach read-only
    #[serde(default)]
    pub read_only: bool,
}

/// An active attachment of a volume to a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeAttachment {
    pub host: String,
    /// Device path exposed on the host, when the backend reports one
    #[serde(default)]
    pub device_path: Option<String>,
    #[serde(default)]
    pub read_only: bool,
}

/// A point-in-time snapshot as reported by a backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: String,
    /// Volume the snapshot was taken from, if still known
    #[serde(default)]
    pub source_volume_id: Option<String>,
    pub size_bytes: u64,
    pub ready: bool,
    pub created_at: DateTime<Utc>,
}

/// A resource a backend already holds, reported during reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    /// Backend-native identifier
    pub backend_id: String,
    pub kind: ResourceKind,
}

impl ResourceDescriptor {
    pub fn volume(backend_id: impl Into<String>) -> Self {
        Self {
            backend_id: backend_id.into(),
            kind: ResourceKind::Volume,
        }
    }

    pub fn snapshot(backend_id: impl Into<String>) -> Self {
        Self {
            backend_id: backend_id.into(),
            kind: ResourceKind::Snapshot,
        }
    }
}

// =============================================================================
// Control Plane Requests
// =============================================================================

/// Request to create a volume somewhere in the fleet
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVolumeRequest {
    pub name: String,
    /// Explicit capacity; overrides the profile capacity when both are set
    #[serde(default)]
    pub capacity_bytes: Option<u64>,
    /// Named profile from the resource definitions document
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Request to resize an existing volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResizeVolumeRequest {
    pub volume_id: String,
    pub capacity_bytes: u64,
}

/// Request to attach an existing volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachVolumeRequest {
    pub volume_id: String,
    pub host: String,
    #[serde(default)]
    pub read_only: bool,
}

/// Request to detach an existing volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetachVolumeRequest {
    pub volume_id: String,
    pub host: String,
}

// =============================================================================
// Backend Client Port
// =============================================================================

/// Capability set every vendor backend client exposes.
///
/// Identifiers passed in and returned are backend-native. The orchestration
/// layer translates them to and from the external identifiers it hands out.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Create a new volume
    async fn create_volume(&self, spec: VolumeSpec) -> Result<Volume>;

    /// Fetch a volume
    async fn get_volume(&self, volume_id: &str) -> Result<Volume>;

    /// Change a volume's capacity
    async fn resize_volume(&self, volume_id: &str, capacity_bytes: u64) -> Result<Volume>;

    /// Delete a volume
    async fn delete_volume(&self, volume_id: &str) -> Result<()>;

    /// Attach a volume to a host
    async fn attach_volume(&self, volume_id: &str, spec: AttachSpec) -> Result<VolumeAttachment>;

    /// Detach a volume from a host
    async fn detach_volume(&self, volume_id: &str, host: &str) -> Result<()>;

    /// Fetch a snapshot
    async fn get_snapshot(&self, snapshot_id: &str) -> Result<Snapshot>;

    /// Enumerate every resource the backend already holds
    async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>>;

    /// Check if the backend is reachable
    async fn health_check(&self) -> Result<bool>;

    /// Release connections held by this client
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Vendor name of this backend
    fn vendor(&self) -> &str;
}

// =============================================================================
// Topology Ports
// =============================================================================

/// Source of the authoritative, ordered list of cluster identifiers
pub trait ClusterDirectory: Send + Sync {
    /// All known cluster identifiers, in topology order
    fn all_ids(&self) -> Vec<ClusterId>;

    /// Cluster identifiers with their placement weights
    fn weighted_ids(&self) -> Vec<(ClusterId, u32)> {
        self.all_ids().into_iter().map(|id| (id, 1)).collect()
    }
}

/// Materializes a live backend client for a cluster
#[async_trait]
pub trait BackendConnector: Send + Sync {
    async fn connect(&self, cluster: &Cluster) -> Result<BackendClientRef>;
}

// =============================================================================
// Placement Port
// =============================================================================

/// Strategy deciding which cluster receives a new resource
pub trait PlacementPolicy: Send + Sync {
    /// Pick the cluster for the next new resource
    fn select_cluster_for_new_resource(&self) -> Result<ClusterId>;

    /// Policy name, for logs and status
    fn name(&self) -> &str;
}

// =============================================================================
// Identifier Port
// =============================================================================

/// Generates opaque identifiers, unique for the lifetime of a registry
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type BackendClientRef = Arc<dyn BackendClient>;
pub type BackendConnectorRef = Arc<dyn BackendConnector>;
pub type ClusterDirectoryRef = Arc<dyn ClusterDirectory>;
pub type PlacementPolicyRef = Arc<dyn PlacementPolicy>;
pub type IdGeneratorRef = Arc<dyn IdGenerator>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_kind_display() {
        assert_eq!(format!("{}", ResourceKind::Volume), "volume");
        assert_eq!(format!("{}", ResourceKind::Snapshot), "snapshot");
    }

    #[test]
    fn test_create_request_defaults_from_json() {
        let request: CreateVolumeRequest =
            serde_json::from_str(r#"{"name": "data", "profile": "small"}"#).unwrap();
        assert_eq!(request.name, "data");
        assert_eq!(request.capacity_bytes, None);
        assert_eq!(request.profile.as_deref(), Some("small"));
        assert!(request.labels.is_empty());
    }

    #[test]
    fn test_volume_status_wire_format() {
        let json = serde_json::to_string(&VolumeStatus::InUse).unwrap();
        assert_eq!(json, "\"inuse\"");
    }
}
