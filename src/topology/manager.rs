//! Cluster Manager
//!
//! Holds the live cluster topology, serves the authoritative cluster id list
//! to placement, and materializes backend clients for clusters.

use super::cluster::{Cluster, ClusterConfig, ClusterId};
use crate::domain::ports::{BackendClientRef, BackendConnectorRef, ClusterDirectory};
use crate::error::{Error, Result};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Live view of the cluster topology
pub struct ClusterManager {
    /// Clusters keyed by id, in topology order
    clusters: RwLock<IndexMap<ClusterId, Cluster>>,
    /// Turns a cluster into a live backend client
    connector: BackendConnectorRef,
}

impl std::fmt::Debug for ClusterManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterManager")
            .field("clusters", &self.clusters.read().len())
            .finish()
    }
}

impl ClusterManager {
    /// Create a manager from an already parsed topology
    pub fn new(config: ClusterConfig, connector: BackendConnectorRef) -> Result<Arc<Self>> {
        config.validate()?;

        let clusters = config
            .clusters
            .into_iter()
            .map(|cluster| (cluster.id(), cluster))
            .collect();

        Ok(Arc::new(Self {
            clusters: RwLock::new(clusters),
            connector,
        }))
    }

    /// Load the topology document and create a manager for it
    pub fn load(path: impl AsRef<Path>, connector: BackendConnectorRef) -> Result<Arc<Self>> {
        let path = path.as_ref();
        let config = ClusterConfig::load(path)?;
        info!(
            "Loaded cluster topology from {} ({} clusters)",
            path.display(),
            config.clusters.len()
        );
        Self::new(config, connector)
    }

    /// Snapshot of every cluster, in topology order
    pub fn clusters(&self) -> Vec<Cluster> {
        self.clusters.read().values().cloned().collect()
    }

    /// Get a cluster by id
    pub fn get(&self, id: &ClusterId) -> Option<Cluster> {
        self.clusters.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.clusters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.read().is_empty()
    }

    /// Add a cluster at the end of the topology
    pub fn add_cluster(&self, cluster: Cluster) -> Result<ClusterId> {
        let id = cluster.id();
        let mut clusters = self.clusters.write();
        if clusters.contains_key(&id) {
            return Err(Error::Configuration(format!("duplicate cluster: {}", id)));
        }
        clusters.insert(id.clone(), cluster);
        debug!("Added cluster {}", id);
        Ok(id)
    }

    /// Remove a cluster, keeping the order of the remaining ones
    pub fn remove_cluster(&self, id: &ClusterId) -> Option<Cluster> {
        let removed = self.clusters.write().shift_remove(id);
        if removed.is_some() {
            debug!("Removed cluster {}", id);
        }
        removed
    }

    /// Swap in a whole new topology
    pub fn replace(&self, config: ClusterConfig) -> Result<()> {
        config.validate()?;
        let clusters: IndexMap<ClusterId, Cluster> = config
            .clusters
            .into_iter()
            .map(|cluster| (cluster.id(), cluster))
            .collect();
        info!("Replacing cluster topology ({} clusters)", clusters.len());
        *self.clusters.write() = clusters;
        Ok(())
    }

    /// Materialize a backend client for a cluster
    pub async fn connect(&self, id: &ClusterId) -> Result<BackendClientRef> {
        let cluster = self.get(id).ok_or_else(|| Error::ClusterNotFound {
            cluster_id: id.to_string(),
        })?;

        debug!("Connecting to cluster {}", id);
        self.connector.connect(&cluster).await
    }
}

impl ClusterDirectory for ClusterManager {
    fn all_ids(&self) -> Vec<ClusterId> {
        self.clusters.read().keys().cloned().collect()
    }

    fn weighted_ids(&self) -> Vec<(ClusterId, u32)> {
        self.clusters
            .read()
            .iter()
            .map(|(id, cluster)| (id.clone(), cluster.weight))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::backends::VendorConnector;
    use assert_matches::assert_matches;

    fn manager(clusters: Vec<Cluster>) -> Arc<ClusterManager> {
        ClusterManager::new(ClusterConfig::new(clusters), Arc::new(VendorConnector::default()))
            .unwrap()
    }

    #[test]
    fn test_all_ids_in_topology_order() {
        let mgr = manager(vec![
            Cluster::new("memory", "ep1"),
            Cluster::new("memory", "ep2"),
            Cluster::new("memory", "ep3"),
        ]);

        let ids: Vec<String> = mgr.all_ids().into_iter().map(|id| id.0).collect();
        assert_eq!(ids, vec!["memory@ep1", "memory@ep2", "memory@ep3"]);
    }

    #[test]
    fn test_topology_changes_are_visible() {
        let mgr = manager(vec![Cluster::new("memory", "ep1")]);

        mgr.add_cluster(Cluster::new("memory", "ep2")).unwrap();
        assert_eq!(mgr.all_ids().len(), 2);

        let duplicate = mgr.add_cluster(Cluster::new("memory", "ep2"));
        assert_matches!(duplicate, Err(Error::Configuration(_)));

        assert!(mgr.remove_cluster(&ClusterId::from("memory@ep1")).is_some());
        assert!(mgr.remove_cluster(&ClusterId::from("memory@ep1")).is_none());
        assert_eq!(mgr.all_ids(), vec![ClusterId::from("memory@ep2")]);

        mgr.replace(ClusterConfig::default()).unwrap();
        assert!(mgr.is_empty());
    }

    #[test]
    fn test_weighted_ids() {
        let mgr = manager(vec![
            Cluster::new("memory", "ep1").with_weight(2),
            Cluster::new("memory", "ep2"),
        ]);
        assert_eq!(
            mgr.weighted_ids(),
            vec![
                (ClusterId::from("memory@ep1"), 2),
                (ClusterId::from("memory@ep2"), 1)
            ]
        );
    }

    #[tokio::test]
    async fn test_connect_unknown_cluster() {
        let mgr = manager(vec![]);
        let result = mgr.connect(&ClusterId::from("memory@nowhere")).await;
        assert_matches!(result.err(), Some(Error::ClusterNotFound { .. }));
    }

    #[tokio::test]
    async fn test_connect_memory_cluster() {
        let mgr = manager(vec![Cluster::new("memory", "ep1")]);
        let client = mgr.connect(&ClusterId::from("memory@ep1")).await.unwrap();
        assert_eq!(client.vendor(), "memory");
    }
}
