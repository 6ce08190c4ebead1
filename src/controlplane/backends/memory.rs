//! In-Memory Backend
//!
//! A self-contained backend that keeps volumes and snapshots in process
//! memory. Used for standalone deployments, demos and tests.

use crate::domain::ports::{
    AttachSpec, BackendClient, ResourceDescriptor, Snapshot, Volume, VolumeAttachment,
    VolumeSpec, VolumeStatus,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

const VENDOR: &str = "memory";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the in-memory backend
#[derive(Debug, Clone, Default)]
pub struct InMemoryConfig {
    /// Total capacity the backend accepts; unlimited when unset
    pub capacity_bytes: Option<u64>,
}

// =============================================================================
// Volume State
// =============================================================================

/// Internal tracking of provisioned volumes
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VolumeState {
    id: String,
    name: String,
    capacity_bytes: u64,
    labels: BTreeMap<String, String>,
    attachments: Vec<VolumeAttachment>,
    created_at: DateTime<Utc>,
}

impl VolumeState {
    fn to_volume(&self) -> Volume {
        let status = if self.attachments.is_empty() {
            VolumeStatus::Available
        } else {
            VolumeStatus::InUse
        };

        Volume {
            id: self.id.clone(),
            name: self.name.clone(),
            capacity_bytes: self.capacity_bytes,
            status,
            attachments: self.attachments.clone(),
            labels: self.labels.clone(),
            created_at: self.created_at,
        }
    }
}

// =============================================================================
// In-Memory Backend
// =============================================================================

/// Backend holding all state in memory
pub struct InMemoryBackend {
    endpoint: String,
    config: InMemoryConfig,
    volumes: RwLock<BTreeMap<String, VolumeState>>,
    snapshots: RwLock<BTreeMap<String, Snapshot>>,
    /// Counter for generating backend-native IDs
    id_counter: AtomicU64,
    closed: AtomicBool,
}

impl InMemoryBackend {
    /// Create a new in-memory backend for an endpoint
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_config(endpoint, InMemoryConfig::default())
    }

    pub fn with_config(endpoint: impl Into<String>, config: InMemoryConfig) -> Self {
        Self {
            endpoint: endpoint.into(),
            config,
            volumes: RwLock::new(BTreeMap::new()),
            snapshots: RwLock::new(BTreeMap::new()),
            id_counter: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Number of volumes currently held
    pub async fn volume_count(&self) -> usize {
        self.volumes.read().await.len()
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Record a snapshot of an existing volume and return its ID
    pub async fn take_snapshot(&self, volume_id: &str) -> Result<String> {
        self.ensure_open()?;

        let size_bytes = self
            .volumes
            .read()
            .await
            .get(volume_id)
            .map(|v| v.capacity_bytes)
            .ok_or_else(|| Error::volume_not_found(volume_id))?;

        let snapshot_id = self.next_id("snap");
        let snapshot = Snapshot {
            id: snapshot_id.clone(),
            source_volume_id: Some(volume_id.to_string()),
            size_bytes,
            ready: true,
            created_at: Utc::now(),
        };
        self.snapshots
            .write()
            .await
            .insert(snapshot_id.clone(), snapshot);

        debug!("Snapshot {} taken of {} on {}", snapshot_id, volume_id, self.endpoint);
        Ok(snapshot_id)
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.id_counter.fetch_add(1, Ordering::SeqCst);
        format!("{}-{:016x}", prefix, n)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::BackendUnavailable {
                backend: format!("{}@{}", VENDOR, self.endpoint),
            });
        }
        Ok(())
    }

    fn failure(&self, operation: &str, reason: impl Into<String>) -> Error {
        Error::Backend {
            vendor: VENDOR.to_string(),
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }

    /// Capacity left, given a volume whose current size is not counted
    fn headroom(&self, volumes: &BTreeMap<String, VolumeState>, excluding: Option<&str>) -> u64 {
        match self.config.capacity_bytes {
            Some(total) => {
                let used: u64 = volumes
                    .values()
                    .filter(|v| Some(v.id.as_str()) != excluding)
                    .map(|v| v.capacity_bytes)
                    .sum();
                total.saturating_sub(used)
            }
            None => u64::MAX,
        }
    }
}

#[async_trait]
impl BackendClient for InMemoryBackend {
    async fn create_volume(&self, spec: VolumeSpec) -> Result<Volume> {
        self.ensure_open()?;

        if spec.capacity_bytes == 0 {
            return Err(self.failure("create_volume", "capacity must be greater than zero"));
        }

        let mut volumes = self.volumes.write().await;
        let available = self.headroom(&volumes, None);
        if spec.capacity_bytes > available {
            return Err(self.failure(
                "create_volume",
                format!(
                    "insufficient capacity: requested {} bytes, available {} bytes",
                    spec.capacity_bytes, available
                ),
            ));
        }

        let state = VolumeState {
            id: self.next_id("vol"),
            name: spec.name,
            capacity_bytes: spec.capacity_bytes,
            labels: spec.labels,
            attachments: Vec::new(),
            created_at: Utc::now(),
        };
        let volume = state.to_volume();
        volumes.insert(state.id.clone(), state);

        info!(
            "Created volume {} ({} bytes) on {}",
            volume.id, volume.capacity_bytes, self.endpoint
        );
        Ok(volume)
    }

    async fn get_volume(&self, volume_id: &str) -> Result<Volume> {
        self.ensure_open()?;
        self.volumes
            .read()
            .await
            .get(volume_id)
            .map(VolumeState::to_volume)
            .ok_or_else(|| Error::volume_not_found(volume_id))
    }

    async fn resize_volume(&self, volume_id: &str, capacity_bytes: u64) -> Result<Volume> {
        self.ensure_open()?;

        let mut volumes = self.volumes.write().await;
        let available = self.headroom(&volumes, Some(volume_id));
        let state = volumes
            .get_mut(volume_id)
            .ok_or_else(|| Error::volume_not_found(volume_id))?;

        if capacity_bytes < state.capacity_bytes {
            return Err(self.failure("resize_volume", "shrinking a volume is not supported"));
        }
        if capacity_bytes > available {
            return Err(self.failure(
                "resize_volume",
                format!(
                    "insufficient capacity: requested {} bytes, available {} bytes",
                    capacity_bytes, available
                ),
            ));
        }

        state.capacity_bytes = capacity_bytes;
        debug!("Resized volume {} to {} bytes", volume_id, capacity_bytes);
        Ok(state.to_volume())
    }

    async fn delete_volume(&self, volume_id: &str) -> Result<()> {
        self.ensure_open()?;

        let mut volumes = self.volumes.write().await;
        let state = volumes
            .get(volume_id)
            .ok_or_else(|| Error::volume_not_found(volume_id))?;

        if !state.attachments.is_empty() {
            return Err(self.failure(
                "delete_volume",
                format!("volume is attached to {} host(s)", state.attachments.len()),
            ));
        }

        volumes.remove(volume_id);
        info!("Deleted volume {} on {}", volume_id, self.endpoint);
        Ok(())
    }

    async fn attach_volume(&self, volume_id: &str, spec: AttachSpec) -> Result<VolumeAttachment> {
        self.ensure_open()?;

        if spec.host.trim().is_empty() {
            return Err(self.failure("attach_volume", "host must not be empty"));
        }

        let mut volumes = self.volumes.write().await;
        let state = volumes
            .get_mut(volume_id)
            .ok_or_else(|| Error::volume_not_found(volume_id))?;

        if let Some(existing) = state.attachments.iter().find(|a| a.host == spec.host) {
            return Ok(existing.clone());
        }

        let attachment = VolumeAttachment {
            host: spec.host,
            device_path: Some(format!("/dev/disk/by-id/{}", volume_id)),
            read_only: spec.read_only,
        };
        state.attachments.push(attachment.clone());

        debug!("Attached volume {} to {}", volume_id, attachment.host);
        Ok(attachment)
    }

    async fn detach_volume(&self, volume_id: &str, host: &str) -> Result<()> {
        self.ensure_open()?;

        let mut volumes = self.volumes.write().await;
        let state = volumes
            .get_mut(volume_id)
            .ok_or_else(|| Error::volume_not_found(volume_id))?;

        state.attachments.retain(|a| a.host != host);
        debug!("Detached volume {} from {}", volume_id, host);
        Ok(())
    }

    async fn get_snapshot(&self, snapshot_id: &str) -> Result<Snapshot> {
        self.ensure_open()?;
        self.snapshots
            .read()
            .await
            .get(snapshot_id)
            .cloned()
            .ok_or_else(|| Error::snapshot_not_found(snapshot_id))
    }

    async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>> {
        self.ensure_open()?;

        let mut resources: Vec<ResourceDescriptor> = self
            .volumes
            .read()
            .await
            .keys()
            .map(ResourceDescriptor::volume)
            .collect();
        resources.extend(
            self.snapshots
                .read()
                .await
                .keys()
                .map(ResourceDescriptor::snapshot),
        );

        Ok(resources)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.is_closed())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        debug!("Closed in-memory backend {}", self.endpoint);
        Ok(())
    }

    fn vendor(&self) -> &str {
        VENDOR
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn spec(name: &str, capacity_bytes: u64) -> VolumeSpec {
        VolumeSpec {
            name: name.into(),
            capacity_bytes,
            labels: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get_volume() {
        let backend = InMemoryBackend::new("ep1");

        let volume = backend.create_volume(spec("data", 10 * GIB)).await.unwrap();
        assert!(!volume.id.is_empty());
        assert_eq!(volume.status, VolumeStatus::Available);

        let fetched = backend.get_volume(&volume.id).await.unwrap();
        assert_eq!(fetched, volume);
    }

    #[tokio::test]
    async fn test_delete_volume() {
        let backend = InMemoryBackend::new("ep1");
        let volume = backend.create_volume(spec("data", GIB)).await.unwrap();

        backend.delete_volume(&volume.id).await.unwrap();

        assert_matches!(
            backend.get_volume(&volume.id).await,
            Err(Error::ResourceNotFound { .. })
        );
        assert_matches!(
            backend.delete_volume(&volume.id).await,
            Err(Error::ResourceNotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let backend = InMemoryBackend::with_config(
            "ep1",
            InMemoryConfig {
                capacity_bytes: Some(10 * GIB),
            },
        );

        let volume = backend.create_volume(spec("a", 6 * GIB)).await.unwrap();
        assert_matches!(
            backend.create_volume(spec("b", 6 * GIB)).await,
            Err(Error::Backend { .. })
        );
        assert_matches!(
            backend.resize_volume(&volume.id, 11 * GIB).await,
            Err(Error::Backend { .. })
        );
        let resized = backend.resize_volume(&volume.id, 10 * GIB).await.unwrap();
        assert_eq!(resized.capacity_bytes, 10 * GIB);
    }

    #[tokio::test]
    async fn test_resize_cannot_shrink() {
        let backend = InMemoryBackend::new("ep1");
        let volume = backend.create_volume(spec("a", 2 * GIB)).await.unwrap();

        assert_matches!(
            backend.resize_volume(&volume.id, GIB).await,
            Err(Error::Backend { .. })
        );
    }

    #[tokio::test]
    async fn test_attach_detach_cycle() {
        let backend = InMemoryBackend::new("ep1");
        let volume = backend.create_volume(spec("a", GIB)).await.unwrap();

        let attach = AttachSpec {
            host: "node-1".into(),
            read_only: false,
        };
        let first = backend.attach_volume(&volume.id, attach.clone()).await.unwrap();
        let second = backend.attach_volume(&volume.id, attach).await.unwrap();
        assert_eq!(first, second);

        let fetched = backend.get_volume(&volume.id).await.unwrap();
        assert_eq!(fetched.status, VolumeStatus::InUse);
        assert_eq!(fetched.attachments.len(), 1);

        // Attached volumes cannot be deleted
        assert_matches!(
            backend.delete_volume(&volume.id).await,
            Err(Error::Backend { .. })
        );

        backend.detach_volume(&volume.id, "node-1").await.unwrap();
        let fetched = backend.get_volume(&volume.id).await.unwrap();
        assert_eq!(fetched.status, VolumeStatus::Available);
        backend.delete_volume(&volume.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_snapshots_and_enumeration() {
        let backend = InMemoryBackend::new("ep1");
        let volume = backend.create_volume(spec("a", GIB)).await.unwrap();
        let snapshot_id = backend.take_snapshot(&volume.id).await.unwrap();

        let snapshot = backend.get_snapshot(&snapshot_id).await.unwrap();
        assert_eq!(snapshot.source_volume_id.as_deref(), Some(volume.id.as_str()));
        assert_eq!(snapshot.size_bytes, GIB);

        let resources = backend.list_resources().await.unwrap();
        assert_eq!(resources.len(), 2);
        assert!(resources.contains(&ResourceDescriptor::volume(volume.id.clone())));
        assert!(resources.contains(&ResourceDescriptor::snapshot(snapshot_id)));
    }

    #[tokio::test]
    async fn test_closed_backend_is_unavailable() {
        let backend = InMemoryBackend::new("ep1");
        backend.close().await.unwrap();

        assert!(!backend.health_check().await.unwrap());
        assert_matches!(
            backend.create_volume(spec("a", GIB)).await,
            Err(Error::BackendUnavailable { .. })
        );
    }
}
