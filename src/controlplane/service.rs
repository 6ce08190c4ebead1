//! Storage Service - Orchestration Layer
//!
//! Owns the client and resource registries and the placement policy, and
//! routes every control plane operation:
//! - creates go through placement, then the chosen cluster's client
//! - everything else goes through the resource registry to the owning client
//!
//! Registry and allocator locks are never held while a backend call is in
//! flight.

use crate::allocation::PlacementFactory;
use crate::controlplane::metrics::{outcome_label, BrokerMetrics};
use crate::domain::ports::{
    AttachSpec, AttachVolumeRequest, BackendClientRef, BackendConnectorRef, ClusterDirectoryRef,
    CreateVolumeRequest, DetachVolumeRequest, PlacementPolicyRef, ResizeVolumeRequest,
    ResourceKind, Snapshot, Volume, VolumeAttachment,
};
use crate::error::{Error, Result};
use crate::registry::{ClientId, ClientRegistry, ResourceEntry, ResourceId, ResourceRegistry};
use crate::topology::{ClusterConfig, ClusterId, ClusterManager, ResourceDefinitions};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

// =============================================================================
// Service Configuration
// =============================================================================

/// Configuration for the storage service
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Cluster topology document; an absent path means an empty topology
    pub topology_path: Option<PathBuf>,
    /// Resource-definition document with volume profiles
    pub resources_path: Option<PathBuf>,
    /// Placement policy name
    pub placement: String,
    /// Upper bound on every backend call
    pub backend_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            topology_path: None,
            resources_path: None,
            placement: PlacementFactory::DEFAULT.to_string(),
            backend_timeout: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Service State
// =============================================================================

/// Lifecycle of the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Created,
    Initializing,
    Serving,
    Stopped,
    /// Startup aborted; completed startup steps are left in place
    Failed,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServiceState::Created => "created",
            ServiceState::Initializing => "initializing",
            ServiceState::Serving => "serving",
            ServiceState::Stopped => "stopped",
            ServiceState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Service status summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub state: ServiceState,
    pub placement: Option<String>,
    pub cluster_count: usize,
    pub client_count: usize,
    pub resource_count: usize,
    pub volume_count: usize,
    pub snapshot_count: usize,
}

// =============================================================================
// Storage Service
// =============================================================================

/// Control plane orchestration over a fleet of backend clusters
pub struct StorageService {
    config: ServiceConfig,
    state: RwLock<ServiceState>,
    connector: BackendConnectorRef,
    /// Topology; loaded on start unless injected
    clusters: RwLock<Option<Arc<ClusterManager>>>,
    placement: RwLock<Option<PlacementPolicyRef>>,
    definitions: RwLock<Option<Arc<ResourceDefinitions>>>,
    clients: Arc<ClientRegistry>,
    resources: Arc<ResourceRegistry>,
    /// Client materialized for each cluster
    cluster_clients: RwLock<HashMap<ClusterId, ClientId>>,
    /// Serializes lazy client creation for clusters added after startup
    connect_lock: tokio::sync::Mutex<()>,
    metrics: Option<Arc<BrokerMetrics>>,
}

impl std::fmt::Debug for StorageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageService")
            .field("state", &*self.state.read())
            .field("clients", &self.clients)
            .field("resources", &self.resources)
            .finish()
    }
}

impl StorageService {
    /// Create a service in the `Created` state
    pub fn new(config: ServiceConfig, connector: BackendConnectorRef) -> Self {
        Self {
            config,
            state: RwLock::new(ServiceState::Created),
            connector,
            clusters: RwLock::new(None),
            placement: RwLock::new(None),
            definitions: RwLock::new(None),
            clients: ClientRegistry::new(),
            resources: ResourceRegistry::new(),
            cluster_clients: RwLock::new(HashMap::new()),
            connect_lock: tokio::sync::Mutex::new(()),
            metrics: None,
        }
    }

    /// Use an existing topology instead of loading `topology_path`
    pub fn with_cluster_manager(self, manager: Arc<ClusterManager>) -> Self {
        *self.clusters.write() = Some(manager);
        self
    }

    /// Use existing resource definitions instead of loading `resources_path`
    pub fn with_definitions(self, definitions: ResourceDefinitions) -> Self {
        *self.definitions.write() = Some(Arc::new(definitions));
        self
    }

    /// Use specific registries (e.g. with deterministic id generators)
    pub fn with_registries(
        mut self,
        clients: Arc<ClientRegistry>,
        resources: Arc<ResourceRegistry>,
    ) -> Self {
        self.clients = clients;
        self.resources = resources;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<BrokerMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn state(&self) -> ServiceState {
        *self.state.read()
    }

    pub fn client_registry(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    pub fn resource_registry(&self) -> &Arc<ResourceRegistry> {
        &self.resources
    }

    pub fn cluster_manager(&self) -> Option<Arc<ClusterManager>> {
        self.clusters.read().clone()
    }

    /// Ownership record behind an external resource id
    pub fn locate(&self, resource_id: &str) -> Option<ResourceEntry> {
        self.resources.get_resource(&ResourceId::from(resource_id))
    }

    /// Client materialized for a cluster, if any
    pub fn client_for(&self, cluster: &ClusterId) -> Option<ClientId> {
        self.cluster_clients.read().get(cluster).cloned()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    fn transition(&self, from: ServiceState, to: ServiceState) -> Result<()> {
        let mut state = self.state.write();
        if *state != from {
            return Err(Error::InvalidStateTransition {
                from: state.to_string(),
                to: to.to_string(),
            });
        }
        *state = to;
        Ok(())
    }

    fn ensure_serving(&self) -> Result<()> {
        let state = self.state();
        if state != ServiceState::Serving {
            return Err(Error::NotServing {
                state: state.to_string(),
            });
        }
        Ok(())
    }

    /// Load topology, materialize clients and register their resources.
    ///
    /// Any failure leaves the service `Failed`. Clients and resources
    /// registered before the failure stay registered.
    pub async fn start(&self) -> Result<()> {
        self.transition(ServiceState::Created, ServiceState::Initializing)?;
        info!("Starting storage service");

        if let Some(metrics) = &self.metrics {
            for events in [self.clients.subscribe(), self.resources.subscribe()] {
                metrics.spawn_registry_sync(events, &self.clients, &self.resources);
            }
        }

        let outcome = self.initialize().await;
        if let Some(metrics) = &self.metrics {
            metrics.sync_clients(&self.clients);
            metrics.sync_resources(&self.resources);
        }

        match outcome {
            Ok(()) => {
                *self.state.write() = ServiceState::Serving;
                info!(
                    "Storage service serving ({} clients, {} resources)",
                    self.clients.len(),
                    self.resources.len()
                );
                Ok(())
            }
            Err(e) => {
                *self.state.write() = ServiceState::Failed;
                error!("Storage service startup failed: {}", e);
                Err(e)
            }
        }
    }

    async fn initialize(&self) -> Result<()> {
        let manager = self.load_topology()?;
        self.load_definitions()?;

        let directory: ClusterDirectoryRef = manager.clone();
        let policy = PlacementFactory::create(&self.config.placement, directory)?;
        info!("Using {} placement", policy.name());
        *self.placement.write() = Some(policy);

        let mut materialized = Vec::new();
        for cluster in manager.clusters() {
            let cluster_id = cluster.id();
            let client = self.connector.connect(&cluster).await?;
            let client_id = self.clients.add_client(client.clone())?;
            self.cluster_clients
                .write()
                .insert(cluster_id.clone(), client_id.clone());
            info!("Cluster {} served by client {}", cluster_id, client_id);
            materialized.push((cluster_id, client_id, client));
        }

        for (cluster_id, client_id, client) in materialized {
            let found = self
                .bounded("list_resources", client.list_resources())
                .await?;
            let count = found.len();

            for descriptor in found {
                self.resources.add_resource(ResourceEntry::new(
                    client_id.clone(),
                    cluster_id.clone(),
                    descriptor.backend_id,
                    descriptor.kind,
                ))?;
            }
            info!("Registered {} existing resources from {}", count, cluster_id);
        }

        Ok(())
    }

    fn load_topology(&self) -> Result<Arc<ClusterManager>> {
        if let Some(manager) = self.cluster_manager() {
            return Ok(manager);
        }

        let manager = match &self.config.topology_path {
            Some(path) => ClusterManager::load(path, self.connector.clone())?,
            None => {
                warn!("No cluster topology configured, starting with zero clusters");
                ClusterManager::new(ClusterConfig::default(), self.connector.clone())?
            }
        };
        *self.clusters.write() = Some(manager.clone());
        Ok(manager)
    }

    fn load_definitions(&self) -> Result<()> {
        if self.definitions.read().is_some() {
            return Ok(());
        }

        let definitions = match &self.config.resources_path {
            Some(path) => {
                let definitions = ResourceDefinitions::load(path)?;
                info!(
                    "Loaded {} volume profiles from {}",
                    definitions.profiles.len(),
                    path.display()
                );
                definitions
            }
            None => ResourceDefinitions::default(),
        };
        *self.definitions.write() = Some(Arc::new(definitions));
        Ok(())
    }

    /// Stop accepting requests and close every backend client.
    ///
    /// Backend calls already in flight are allowed to finish; requests
    /// arriving afterwards fail with [`Error::NotServing`].
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            if *state == ServiceState::Stopped {
                return Ok(());
            }
            *state = ServiceState::Stopped;
        }
        info!("Stopping storage service");

        let clients = self.clients.all_clients();
        let results = join_all(
            clients
                .iter()
                .map(|(_, client)| self.bounded("close", client.close())),
        )
        .await;

        for ((client_id, _), result) in clients.iter().zip(results) {
            if let Err(e) = result {
                warn!("Failed to close client {}: {}", client_id, e);
            }
        }

        info!("Storage service stopped");
        Ok(())
    }

    pub fn status(&self) -> ServiceStatus {
        let counts = self.resources.counts_by_kind();
        let count_of = |kind: ResourceKind| {
            counts
                .iter()
                .find(|(k, _)| *k == kind)
                .map(|(_, count)| *count)
                .unwrap_or(0)
        };

        ServiceStatus {
            state: self.state(),
            placement: self
                .placement
                .read()
                .as_ref()
                .map(|policy| policy.name().to_string()),
            cluster_count: self.cluster_manager().map(|m| m.len()).unwrap_or(0),
            client_count: self.clients.len(),
            resource_count: self.resources.len(),
            volume_count: count_of(ResourceKind::Volume),
            snapshot_count: count_of(ResourceKind::Snapshot),
        }
    }

    /// Health of each cluster's client, keyed by cluster id
    pub async fn health(&self) -> BTreeMap<String, bool> {
        let targets: Vec<(ClusterId, BackendClientRef)> = {
            let map = self.cluster_clients.read();
            map.iter()
                .map(|(cluster, client_id)| (cluster.clone(), client_id.clone()))
                .collect::<Vec<_>>()
        }
        .into_iter()
        .filter_map(|(cluster, client_id)| {
            self.clients
                .get_client(&client_id)
                .map(|client| (cluster, client))
        })
        .collect();

        let checks = join_all(
            targets
                .iter()
                .map(|(_, client)| self.bounded("health_check", client.health_check())),
        )
        .await;

        targets
            .into_iter()
            .zip(checks)
            .map(|((cluster, _), healthy)| (cluster.to_string(), healthy.unwrap_or(false)))
            .collect()
    }

    // =========================================================================
    // Dispatch Helpers
    // =========================================================================

    /// Run a backend call under the configured timeout
    async fn bounded<T>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.config.backend_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::BackendTimeout {
                operation: operation.to_string(),
                timeout: self.config.backend_timeout,
            }),
        }
    }

    /// Record outcome and latency of a public operation
    async fn instrumented<T>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let started = Instant::now();
        let result = call.await;

        if let Some(metrics) = &self.metrics {
            metrics.observe(operation, outcome_label(&result), started.elapsed());
        }
        if let Err(e) = &result {
            if e.is_client_error() {
                debug!("{} rejected: {}", operation, e);
            } else {
                warn!("{} failed: {}", operation, e);
            }
        }
        result
    }

    /// Resolve the owning client of an existing resource
    fn owner_of(
        &self,
        resource_id: &str,
        kind: ResourceKind,
    ) -> Result<(ResourceEntry, BackendClientRef)> {
        let not_found = || Error::ResourceNotFound {
            kind: kind.to_string(),
            id: resource_id.to_string(),
        };

        let entry = self
            .resources
            .get_resource(&ResourceId::from(resource_id))
            .ok_or_else(not_found)?;
        if entry.kind != kind {
            return Err(not_found());
        }

        let client = self
            .clients
            .get_client(&entry.owner)
            .ok_or_else(|| Error::ClientNotFound {
                client_id: entry.owner.to_string(),
            })?;
        Ok((entry, client))
    }

    fn lookup_cluster_client(&self, cluster: &ClusterId) -> Option<(ClientId, BackendClientRef)> {
        let client_id = self.client_for(cluster)?;
        let client = self.clients.get_client(&client_id)?;
        Some((client_id, client))
    }

    /// Client for a placement decision, connecting clusters added after startup
    async fn client_for_cluster(&self, cluster: &ClusterId) -> Result<(ClientId, BackendClientRef)> {
        if let Some(found) = self.lookup_cluster_client(cluster) {
            return Ok(found);
        }

        let _guard = self.connect_lock.lock().await;
        if let Some(found) = self.lookup_cluster_client(cluster) {
            return Ok(found);
        }

        let manager = self
            .cluster_manager()
            .ok_or_else(|| Error::Internal("cluster topology not loaded".into()))?;
        let client = manager.connect(cluster).await?;
        let client_id = self.clients.add_client(client.clone())?;
        self.cluster_clients
            .write()
            .insert(cluster.clone(), client_id.clone());
        info!("Cluster {} joined, served by client {}", cluster, client_id);

        Ok((client_id, client))
    }

    // =========================================================================
    // Volume Operations
    // =========================================================================

    /// Place and create a new volume; the returned id is the external one
    pub async fn create_volume(&self, request: CreateVolumeRequest) -> Result<Volume> {
        self.instrumented("create_volume", async {
            self.ensure_serving()?;

            let spec = self
                .definitions
                .read()
                .clone()
                .unwrap_or_default()
                .resolve(&request)?;

            let policy = self
                .placement
                .read()
                .clone()
                .ok_or_else(|| Error::Internal("placement policy not initialized".into()))?;
            let cluster = policy.select_cluster_for_new_resource()?;
            let (client_id, client) = self.client_for_cluster(&cluster).await?;

            debug!("Creating volume {} on {}", spec.name, cluster);
            let mut volume = self
                .bounded("create_volume", client.create_volume(spec))
                .await?;

            let resource_id = self.resources.add_resource(ResourceEntry::new(
                client_id,
                cluster.clone(),
                volume.id.clone(),
                ResourceKind::Volume,
            ))?;
            info!(
                "Created volume {} on {} (backend id {})",
                resource_id, cluster, volume.id
            );

            volume.id = resource_id.to_string();
            Ok(volume)
        })
        .await
    }

    pub async fn get_volume(&self, volume_id: &str) -> Result<Volume> {
        self.instrumented("get_volume", async {
            self.ensure_serving()?;
            let (entry, client) = self.owner_of(volume_id, ResourceKind::Volume)?;

            let mut volume = self
                .bounded("get_volume", client.get_volume(&entry.backend_id))
                .await?;
            volume.id = volume_id.to_string();
            Ok(volume)
        })
        .await
    }

    pub async fn resize_volume(&self, request: ResizeVolumeRequest) -> Result<Volume> {
        self.instrumented("resize_volume", async {
            self.ensure_serving()?;
            if request.capacity_bytes == 0 {
                return Err(Error::Validation("capacity must be greater than zero".into()));
            }
            let (entry, client) = self.owner_of(&request.volume_id, ResourceKind::Volume)?;

            let mut volume = self
                .bounded(
                    "resize_volume",
                    client.resize_volume(&entry.backend_id, request.capacity_bytes),
                )
                .await?;
            info!(
                "Resized volume {} to {} bytes",
                request.volume_id, volume.capacity_bytes
            );

            volume.id = request.volume_id.clone();
            Ok(volume)
        })
        .await
    }

    /// Delete a volume and forget it once the backend confirms.
    ///
    /// A backend that no longer knows the volume also drops the registry
    /// entry; the not-found error is still returned.
    pub async fn delete_volume(&self, volume_id: &str) -> Result<()> {
        self.instrumented("delete_volume", async {
            self.ensure_serving()?;
            let (entry, client) = self.owner_of(volume_id, ResourceKind::Volume)?;

            match self
                .bounded("delete_volume", client.delete_volume(&entry.backend_id))
                .await
            {
                Ok(()) => {
                    self.resources.remove_resource(&ResourceId::from(volume_id));
                    info!("Deleted volume {} from {}", volume_id, entry.cluster);
                    Ok(())
                }
                Err(e @ Error::ResourceNotFound { .. }) => {
                    self.resources.remove_resource(&ResourceId::from(volume_id));
                    warn!(
                        "Volume {} already gone from {}, dropping registry entry",
                        volume_id, entry.cluster
                    );
                    Err(e)
                }
                Err(e) => Err(e),
            }
        })
        .await
    }

    pub async fn attach_volume(&self, request: AttachVolumeRequest) -> Result<VolumeAttachment> {
        self.instrumented("attach_volume", async {
            self.ensure_serving()?;
            if request.host.trim().is_empty() {
                return Err(Error::Validation("host must not be empty".into()));
            }
            let (entry, client) = self.owner_of(&request.volume_id, ResourceKind::Volume)?;

            let spec = AttachSpec {
                host: request.host.clone(),
                read_only: request.read_only,
            };
            let attachment = self
                .bounded("attach_volume", client.attach_volume(&entry.backend_id, spec))
                .await?;
            info!("Attached volume {} to {}", request.volume_id, request.host);
            Ok(attachment)
        })
        .await
    }

    pub async fn detach_volume(&self, request: DetachVolumeRequest) -> Result<()> {
        self.instrumented("detach_volume", async {
            self.ensure_serving()?;
            if request.host.trim().is_empty() {
                return Err(Error::Validation("host must not be empty".into()));
            }
            let (entry, client) = self.owner_of(&request.volume_id, ResourceKind::Volume)?;

            self.bounded(
                "detach_volume",
                client.detach_volume(&entry.backend_id, &request.host),
            )
            .await?;
            info!("Detached volume {} from {}", request.volume_id, request.host);
            Ok(())
        })
        .await
    }

    // =========================================================================
    // Snapshot Operations
    // =========================================================================

    /// Fetch a snapshot; its source volume is reported by external id
    pub async fn get_snapshot(&self, snapshot_id: &str) -> Result<Snapshot> {
        self.instrumented("get_snapshot", async {
            self.ensure_serving()?;
            let (entry, client) = self.owner_of(snapshot_id, ResourceKind::Snapshot)?;

            let mut snapshot = self
                .bounded("get_snapshot", client.get_snapshot(&entry.backend_id))
                .await?;
            snapshot.id = snapshot_id.to_string();
            snapshot.source_volume_id = snapshot.source_volume_id.and_then(|backend_id| {
                self.resources
                    .find_by_backend_id(&entry.owner, &backend_id)
                    .map(|id| id.to_string())
            });
            Ok(snapshot)
        })
        .await
    }
}
