//! Registry Events
//!
//! Events emitted by the ownership registries so external consumers (metrics,
//! audit logging) can follow client and resource lifecycle changes.

use crate::domain::ports::ResourceKind;
use serde::{Deserialize, Serialize};

/// Events emitted by the client and resource registries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryEvent {
    /// A backend client was registered
    ClientRegistered { client_id: String, vendor: String },

    /// A resource was registered under its owning client
    ResourceRegistered {
        resource_id: String,
        owner: String,
        kind: ResourceKind,
    },

    /// A resource was removed after a successful delete
    ResourceRemoved {
        resource_id: String,
        owner: String,
        kind: ResourceKind,
    },
}

impl RegistryEvent {
    /// Check if this is a client-level event
    pub fn is_client_event(&self) -> bool {
        matches!(self, RegistryEvent::ClientRegistered { .. })
    }

    /// Get the resource ID if this is a resource event
    pub fn resource_id(&self) -> Option<&str> {
        match self {
            RegistryEvent::ResourceRegistered { resource_id, .. }
            | RegistryEvent::ResourceRemoved { resource_id, .. } => Some(resource_id),
            RegistryEvent::ClientRegistered { .. } => None,
        }
    }

    /// Resource kind affected, if any
    pub fn resource_kind(&self) -> Option<ResourceKind> {
        match self {
            RegistryEvent::ResourceRegistered { kind, .. }
            | RegistryEvent::ResourceRemoved { kind, .. } => Some(*kind),
            RegistryEvent::ClientRegistered { .. } => None,
        }
    }
}
