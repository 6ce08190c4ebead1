//! Resource Registry
//!
//! Maps external [`ResourceId`]s to the client that owns each volume or
//! snapshot, plus the backend-native identifier used when forwarding calls.

use super::events::RegistryEvent;
use super::ids::{ClientId, ResourceId, UuidGenerator};
use super::store::{IdStore, RegistryStatsSnapshot};
use crate::domain::ports::{IdGeneratorRef, ResourceKind};
use crate::error::Result;
use crate::topology::ClusterId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

// =============================================================================
// Resource Entry
// =============================================================================

/// Ownership record for one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEntry {
    /// Client that owns the resource; never changes after registration
    pub owner: ClientId,
    /// Cluster the owning client talks to
    pub cluster: ClusterId,
    /// Identifier the backend knows the resource by
    pub backend_id: String,
    pub kind: ResourceKind,
    pub registered_at: DateTime<Utc>,
}

impl ResourceEntry {
    pub fn new(
        owner: ClientId,
        cluster: ClusterId,
        backend_id: impl Into<String>,
        kind: ResourceKind,
    ) -> Self {
        Self {
            owner,
            cluster,
            backend_id: backend_id.into(),
            kind,
            registered_at: Utc::now(),
        }
    }
}

// =============================================================================
// Resource Registry
// =============================================================================

/// Registry of known volumes and snapshots
pub struct ResourceRegistry {
    resources: IdStore<ResourceId, ResourceEntry>,
    event_sender: broadcast::Sender<RegistryEvent>,
}

impl std::fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("resources", &self.resources.len())
            .finish()
    }
}

impl ResourceRegistry {
    /// Create a registry minting random UUID identifiers
    pub fn new() -> Arc<Self> {
        Self::with_generator(Arc::new(UuidGenerator))
    }

    /// Create a registry with a specific identifier generator
    pub fn with_generator(generator: IdGeneratorRef) -> Arc<Self> {
        let (event_sender, _) = broadcast::channel(1024);
        Arc::new(Self {
            resources: IdStore::new("resource", generator),
            event_sender,
        })
    }

    /// Get an event receiver
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_sender.subscribe()
    }

    /// Register a resource under a fresh identifier.
    ///
    /// Fails with [`crate::Error::IdCollision`] rather than overwrite an
    /// existing entry.
    pub fn add_resource(&self, entry: ResourceEntry) -> Result<ResourceId> {
        let owner = entry.owner.to_string();
        let kind = entry.kind;
        let resource_id = self.resources.insert(entry)?;

        debug!("Registered {} {} (owner {})", kind, resource_id, owner);
        let _ = self.event_sender.send(RegistryEvent::ResourceRegistered {
            resource_id: resource_id.to_string(),
            owner,
            kind,
        });

        Ok(resource_id)
    }

    /// Look up a resource; absence is a normal result
    pub fn get_resource(&self, resource_id: &ResourceId) -> Option<ResourceEntry> {
        self.resources.get(resource_id)
    }

    pub fn contains(&self, resource_id: &ResourceId) -> bool {
        self.resources.contains(resource_id)
    }

    /// Remove a resource. Removing an unknown identifier is a no-op.
    pub fn remove_resource(&self, resource_id: &ResourceId) -> Option<ResourceEntry> {
        let removed = self.resources.remove(resource_id);

        if let Some(entry) = &removed {
            debug!("Removed {} {}", entry.kind, resource_id);
            let _ = self.event_sender.send(RegistryEvent::ResourceRemoved {
                resource_id: resource_id.to_string(),
                owner: entry.owner.to_string(),
                kind: entry.kind,
            });
        }

        removed
    }

    /// Snapshot of every registered resource, in no particular order
    pub fn all_resources(&self) -> Vec<(ResourceId, ResourceEntry)> {
        self.resources.snapshot()
    }

    /// Number of registered resources of each kind, zero counts included
    pub fn counts_by_kind(&self) -> Vec<(ResourceKind, usize)> {
        [ResourceKind::Volume, ResourceKind::Snapshot]
            .into_iter()
            .map(|kind| (kind, self.resources.count(|entry| entry.kind == kind)))
            .collect()
    }

    /// Translate a backend-native identifier back to the external one
    pub fn find_by_backend_id(&self, owner: &ClientId, backend_id: &str) -> Option<ResourceId> {
        self.resources
            .find(|entry| &entry.owner == owner && entry.backend_id == backend_id)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RegistryStatsSnapshot {
        self.resources.stats()
    }
}
