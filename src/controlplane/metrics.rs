//! Broker Metrics
//!
//! Prometheus collectors for request dispatch and registry sizes. Registry
//! gauges are refreshed when a [`RegistryEvent`] arrives rather than polled.

use crate::error::Result;
use crate::registry::{ClientRegistry, RegistryEvent, ResourceRegistry};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const NAMESPACE: &str = "volume_broker";

/// Outcome label for a dispatched request
pub fn outcome_label<T>(result: &Result<T>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => e.code(),
    }
}

/// Gauges that need re-reading from their registry
#[derive(Debug, Default)]
struct Stale {
    clients: bool,
    resources: bool,
}

impl Stale {
    fn all() -> Self {
        Self {
            clients: true,
            resources: true,
        }
    }

    fn mark(&mut self, event: &RegistryEvent) {
        if event.is_client_event() {
            self.clients = true;
        } else if let Some(kind) = event.resource_kind() {
            debug!("{} {} changed", kind, event.resource_id().unwrap_or("?"));
            self.resources = true;
        }
    }
}

/// Collectors exported on the metrics endpoint
pub struct BrokerMetrics {
    registry: Registry,
    requests: IntCounterVec,
    dispatch_seconds: HistogramVec,
    clients: IntGauge,
    resources: IntGaugeVec,
}

impl std::fmt::Debug for BrokerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerMetrics").finish_non_exhaustive()
    }
}

impl BrokerMetrics {
    /// Create collectors in a dedicated registry
    pub fn new() -> Result<Arc<Self>> {
        Self::with_registry(Registry::new())
    }

    /// Create collectors in the given registry
    pub fn with_registry(registry: Registry) -> Result<Arc<Self>> {
        let requests = IntCounterVec::new(
            Opts::new("requests_total", "Control plane requests by operation and outcome")
                .namespace(NAMESPACE),
            &["operation", "outcome"],
        )?;
        let dispatch_seconds = HistogramVec::new(
            HistogramOpts::new(
                "dispatch_duration_seconds",
                "Time spent dispatching a request to its backend",
            )
            .namespace(NAMESPACE),
            &["operation"],
        )?;
        let clients = IntGauge::with_opts(
            Opts::new("clients", "Registered backend clients").namespace(NAMESPACE),
        )?;
        let resources = IntGaugeVec::new(
            Opts::new("resources", "Registered resources by kind").namespace(NAMESPACE),
            &["kind"],
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(dispatch_seconds.clone()))?;
        registry.register(Box::new(clients.clone()))?;
        registry.register(Box::new(resources.clone()))?;

        Ok(Arc::new(Self {
            registry,
            requests,
            dispatch_seconds,
            clients,
            resources,
        }))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record one finished request
    pub fn observe(&self, operation: &str, outcome: &str, elapsed: Duration) {
        self.requests
            .with_label_values(&[operation, outcome])
            .inc();
        self.dispatch_seconds
            .with_label_values(&[operation])
            .observe(elapsed.as_secs_f64());
    }

    /// Count of requests seen for an operation/outcome pair
    pub fn request_count(&self, operation: &str, outcome: &str) -> u64 {
        self.requests.with_label_values(&[operation, outcome]).get()
    }

    pub fn client_count(&self) -> i64 {
        self.clients.get()
    }

    pub fn resource_count(&self, kind: &str) -> i64 {
        self.resources.with_label_values(&[kind]).get()
    }

    /// Set the client gauge from the registry's current size
    pub fn sync_clients(&self, clients: &ClientRegistry) {
        self.clients.set(clients.len() as i64);
    }

    /// Set the per-kind resource gauges from the registry's current contents
    pub fn sync_resources(&self, resources: &ResourceRegistry) {
        for (kind, count) in resources.counts_by_kind() {
            let kind = kind.to_string();
            self.resources
                .with_label_values(&[kind.as_str()])
                .set(count as i64);
        }
    }

    /// Follow registry events and keep the gauges equal to registry sizes.
    ///
    /// Events only mark a gauge stale; its value is always read back from
    /// the registry. Bursts are coalesced into one refresh. The task ends
    /// once the registries are gone or the stream closes.
    pub fn spawn_registry_sync(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<RegistryEvent>,
        clients: &Arc<ClientRegistry>,
        resources: &Arc<ResourceRegistry>,
    ) -> JoinHandle<()> {
        let metrics = self.clone();
        let clients = Arc::downgrade(clients);
        let resources = Arc::downgrade(resources);

        tokio::spawn(async move {
            loop {
                let mut stale = Stale::default();
                match events.recv().await {
                    Ok(event) => stale.mark(&event),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(
                            "Metrics consumer lagged, {} registry events dropped; resyncing",
                            missed
                        );
                        stale = Stale::all();
                    }
                    Err(RecvError::Closed) => {
                        debug!("Registry event stream closed");
                        break;
                    }
                }

                loop {
                    match events.try_recv() {
                        Ok(event) => stale.mark(&event),
                        Err(TryRecvError::Lagged(_)) => stale = Stale::all(),
                        Err(_) => break,
                    }
                }

                if stale.clients {
                    match clients.upgrade() {
                        Some(clients) => metrics.sync_clients(&clients),
                        None => break,
                    }
                }
                if stale.resources {
                    match resources.upgrade() {
                        Some(resources) => metrics.sync_resources(&resources),
                        None => break,
                    }
                }
            }
        })
    }

    /// Render every collector in the Prometheus text format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::backends::InMemoryBackend;
    use crate::domain::ports::ResourceKind;
    use crate::error::Error;
    use crate::registry::{ClientId, ResourceEntry};
    use crate::topology::ClusterId;

    #[test]
    fn test_observe_and_render() {
        let metrics = BrokerMetrics::new().unwrap();
        metrics.observe("create_volume", "ok", Duration::from_millis(5));
        metrics.observe("create_volume", "ok", Duration::from_millis(7));
        metrics.observe("get_volume", "not_found", Duration::from_millis(1));

        assert_eq!(metrics.request_count("create_volume", "ok"), 2);
        assert_eq!(metrics.request_count("get_volume", "not_found"), 1);

        let text = metrics.render().unwrap();
        assert!(text.contains("volume_broker_requests_total"));
        assert!(text.contains("volume_broker_dispatch_duration_seconds"));
    }

    #[test]
    fn test_outcome_label() {
        let ok: Result<()> = Ok(());
        let missing: Result<()> = Err(Error::volume_not_found("v"));
        assert_eq!(outcome_label(&ok), "ok");
        assert_eq!(outcome_label(&missing), "not_found");
    }

    async fn wait_for(check: impl Fn() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn volume(i: usize) -> ResourceEntry {
        ResourceEntry::new(
            ClientId::from("c-1"),
            ClusterId::from("memory@ep1"),
            format!("vol-{}", i),
            ResourceKind::Volume,
        )
    }

    #[test]
    fn test_sync_reads_registry_sizes() {
        let metrics = BrokerMetrics::new().unwrap();
        let clients = ClientRegistry::new();
        let resources = ResourceRegistry::new();

        clients
            .add_client(Arc::new(InMemoryBackend::new("ep1")))
            .unwrap();
        let first = resources.add_resource(volume(1)).unwrap();
        resources.add_resource(volume(2)).unwrap();
        resources.remove_resource(&first);

        metrics.sync_clients(&clients);
        metrics.sync_resources(&resources);

        assert_eq!(metrics.client_count(), 1);
        assert_eq!(metrics.resource_count("volume"), 1);
        assert_eq!(metrics.resource_count("snapshot"), 0);
    }

    #[tokio::test]
    async fn test_sync_follows_events() {
        let metrics = BrokerMetrics::new().unwrap();
        let clients = ClientRegistry::new();
        let resources = ResourceRegistry::new();
        metrics.spawn_registry_sync(clients.subscribe(), &clients, &resources);

        clients
            .add_client(Arc::new(InMemoryBackend::new("ep1")))
            .unwrap();

        wait_for(|| metrics.client_count() == 1).await;
        assert_eq!(metrics.client_count(), 1);
    }

    #[tokio::test]
    async fn test_lagged_stream_converges_to_registry() {
        let metrics = BrokerMetrics::new().unwrap();
        let clients = ClientRegistry::new();
        let resources = ResourceRegistry::new();

        // subscribed before the burst, consumed after it: the buffer overflows
        let receiver = resources.subscribe();
        for i in 0..3000 {
            resources.add_resource(volume(i)).unwrap();
        }
        metrics.spawn_registry_sync(receiver, &clients, &resources);

        wait_for(|| metrics.resource_count("volume") == 3000).await;
        assert_eq!(metrics.resource_count("volume"), 3000);
    }

    #[tokio::test]
    async fn test_sync_stops_when_registries_are_dropped() {
        let metrics = BrokerMetrics::new().unwrap();
        let clients = ClientRegistry::new();
        let resources = ResourceRegistry::new();
        let handle = metrics.spawn_registry_sync(clients.subscribe(), &clients, &resources);

        drop(clients);
        drop(resources);
        handle.await.unwrap();
    }
}
