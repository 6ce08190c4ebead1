//! Client Registry
//!
//! Live backend client handles addressed by generated [`ClientId`]s. Client
//! identity is deliberately independent of cluster identity.

use super::events::RegistryEvent;
use super::ids::{ClientId, UuidGenerator};
use super::store::{IdStore, RegistryStatsSnapshot};
use crate::domain::ports::{BackendClientRef, IdGeneratorRef};
use crate::error::Result;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Registry of live backend clients
pub struct ClientRegistry {
    clients: IdStore<ClientId, BackendClientRef>,
    event_sender: broadcast::Sender<RegistryEvent>,
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("clients", &self.clients.len())
            .finish()
    }
}

impl ClientRegistry {
    /// Create a registry minting random UUID identifiers
    pub fn new() -> Arc<Self> {
        Self::with_generator(Arc::new(UuidGenerator))
    }

    /// Create a registry with a specific identifier generator
    pub fn with_generator(generator: IdGeneratorRef) -> Arc<Self> {
        let (event_sender, _) = broadcast::channel(1024);
        Arc::new(Self {
            clients: IdStore::new("client", generator),
            event_sender,
        })
    }

    /// Get an event receiver
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_sender.subscribe()
    }

    /// Register a client under a fresh identifier
    pub fn add_client(&self, client: BackendClientRef) -> Result<ClientId> {
        let vendor = client.vendor().to_string();
        let client_id = self.clients.insert(client)?;

        debug!("Registered {} client {}", vendor, client_id);
        let _ = self.event_sender.send(RegistryEvent::ClientRegistered {
            client_id: client_id.to_string(),
            vendor,
        });

        Ok(client_id)
    }

    /// Look up a client; absence is a normal result
    pub fn get_client(&self, client_id: &ClientId) -> Option<BackendClientRef> {
        self.clients.get(client_id)
    }

    /// Snapshot of every registered client, in no particular order
    pub fn all_clients(&self) -> Vec<(ClientId, BackendClientRef)> {
        self.clients.snapshot()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RegistryStatsSnapshot {
        self.clients.stats()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        let (event_sender, _) = broadcast::channel(1024);
        Self {
            clients: IdStore::new("client", Arc::new(UuidGenerator)),
            event_sender,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::backends::InMemoryBackend;
    use crate::registry::ids::SequentialIdGenerator;
    use std::collections::HashSet;

    #[test]
    fn test_add_then_get_returns_same_client() {
        let registry = ClientRegistry::new();
        let client: BackendClientRef = Arc::new(InMemoryBackend::new("ep1"));

        let id = registry.add_client(client.clone()).unwrap();
        let fetched = registry.get_client(&id).unwrap();
        assert!(Arc::ptr_eq(&client, &fetched));
    }

    #[test]
    fn test_unknown_id_is_absent() {
        let registry = ClientRegistry::new();
        registry
            .add_client(Arc::new(InMemoryBackend::new("ep1")))
            .unwrap();
        assert!(registry.get_client(&ClientId::from("never-issued")).is_none());
    }

    #[test]
    fn test_ids_are_unique_and_enumerable() {
        let registry =
            ClientRegistry::with_generator(Arc::new(SequentialIdGenerator::new("client")));

        let ids: HashSet<ClientId> = (0..5)
            .map(|i| {
                registry
                    .add_client(Arc::new(InMemoryBackend::new(format!("ep{}", i))))
                    .unwrap()
            })
            .collect();
        assert_eq!(ids.len(), 5);
        assert_eq!(registry.len(), 5);

        let listed: HashSet<ClientId> = registry
            .all_clients()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(listed, ids);
        assert_eq!(registry.stats().registrations, 5);
    }

    #[tokio::test]
    async fn test_add_publishes_event() {
        let registry = ClientRegistry::new();
        let mut events = registry.subscribe();

        let id = registry
            .add_client(Arc::new(InMemoryBackend::new("ep1")))
            .unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            RegistryEvent::ClientRegistered {
                client_id: id.to_string(),
                vendor: "memory".into(),
            }
        );
    }

    #[test]
    fn test_concurrent_adds() {
        let registry = ClientRegistry::new();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        registry
                            .add_client(Arc::new(InMemoryBackend::new(format!("ep{}-{}", t, i))))
                            .unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.len(), 400);
        assert_eq!(registry.all_clients().len(), 400);
    }
}
