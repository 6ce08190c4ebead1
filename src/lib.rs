//! Volume Broker - Unified Volume Control Plane
//!
//! A single storage API in front of a fleet of heterogeneous backend
//! clusters. New volumes are placed on a cluster by a pluggable placement
//! policy; every later operation is routed to the backend client that owns
//! the resource.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                              REST API (axum)                                 │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                            Storage Service                                   │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │   Placement     │  │ Client Registry │  │     Resource Registry       │  │
//! │  │ (round-robin,   │  │  (ClientId ->   │  │  (ResourceId -> owner,      │  │
//! │  │   weighted)     │  │     client)     │  │   cluster, backend id)      │  │
//! │  └────────┬────────┘  └────────┬────────┘  └─────────────┬───────────────┘  │
//! │           │                    │                         │                   │
//! │           └────────────────────┼─────────────────────────┘                   │
//! │                    ┌───────────┴───────────┐                                │
//! │                    │   Cluster Manager     │                                │
//! │                    │  (vendor@endpoint)    │                                │
//! │                    └───────────────────────┘                                │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                          Backend Clients                                     │
//! │  ┌─────────────────────────────┐  ┌─────────────────────────────────────┐   │
//! │  │         In-Memory           │  │          HTTP / JSON                │   │
//! │  └─────────────────────────────┘  └─────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controlplane`]: Storage service, REST API, metrics and backends
//! - [`allocation`]: Placement policies
//! - [`registry`]: Client and resource ownership registries
//! - [`topology`]: Cluster topology and resource definitions
//! - [`domain`]: Core domain types and traits
//! - [`error`]: Error types and handling

pub mod allocation;
pub mod controlplane;
pub mod domain;
pub mod error;
pub mod registry;
pub mod topology;

// Re-export commonly used types
pub use controlplane::{
    ApiServer, ApiServerConfig, BackendConfig, BrokerMetrics, HttpBackend, HttpBackendConfig,
    InMemoryBackend, InMemoryConfig, RestRouter, ServiceConfig, ServiceState, ServiceStatus,
    StorageService, VendorConnector,
};

pub use allocation::{PlacementFactory, RoundRobinPolicy, WeightedRoundRobinPolicy};

pub use domain::ports::{
    AttachSpec, AttachVolumeRequest, BackendClient, BackendConnector, ClusterDirectory,
    CreateVolumeRequest, DetachVolumeRequest, IdGenerator, PlacementPolicy, ResizeVolumeRequest,
    ResourceDescriptor, ResourceKind, Snapshot, Volume, VolumeAttachment, VolumeSpec,
    VolumeStatus,
};

pub use error::{Error, Result};

pub use registry::{
    ClientId, ClientRegistry, RegistryEvent, ResourceEntry, ResourceId, ResourceRegistry,
    SequentialIdGenerator, UuidGenerator,
};

pub use topology::{
    Cluster, ClusterConfig, ClusterId, ClusterManager, ResourceDefinitions, VolumeProfile,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
