//! Weighted Placement
//!
//! Smooth weighted round-robin: each cluster receives new resources in
//! proportion to its topology weight, interleaved rather than in bursts.

use crate::domain::ports::{ClusterDirectoryRef, PlacementPolicy};
use crate::error::{Error, Result};
use crate::topology::ClusterId;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::trace;

pub struct WeightedRoundRobinPolicy {
    directory: ClusterDirectoryRef,
    /// Running score per cluster
    current: Mutex<HashMap<ClusterId, i64>>,
}

impl WeightedRoundRobinPolicy {
    pub fn new(directory: ClusterDirectoryRef) -> Self {
        Self {
            directory,
            current: Mutex::new(HashMap::new()),
        }
    }
}

impl PlacementPolicy for WeightedRoundRobinPolicy {
    fn select_cluster_for_new_resource(&self) -> Result<ClusterId> {
        let weighted: Vec<(ClusterId, i64)> = self
            .directory
            .weighted_ids()
            .into_iter()
            .filter(|(_, weight)| *weight > 0)
            .map(|(id, weight)| (id, i64::from(weight)))
            .collect();

        if weighted.is_empty() {
            return Err(Error::NoClustersAvailable);
        }

        let total: i64 = weighted.iter().map(|(_, w)| *w).sum();

        let mut current = self.current.lock();
        // Forget clusters that left the topology
        current.retain(|id, _| weighted.iter().any(|(live, _)| live == id));

        let mut best: Option<(&ClusterId, i64)> = None;
        for (id, weight) in &weighted {
            let score = current.entry(id.clone()).or_insert(0);
            *score += weight;
            if best.map_or(true, |(_, top)| *score > top) {
                best = Some((id, *score));
            }
        }

        let (picked, _) = best.ok_or(Error::NoClustersAvailable)?;
        let picked = picked.clone();
        if let Some(score) = current.get_mut(&picked) {
            *score -= total;
        }

        trace!("Weighted placement picked cluster {}", picked);
        Ok(picked)
    }

    fn name(&self) -> &str {
        "weighted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::backends::VendorConnector;
    use crate::topology::{Cluster, ClusterConfig, ClusterManager};
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn build(clusters: Vec<Cluster>) -> (Arc<ClusterManager>, WeightedRoundRobinPolicy) {
        let manager =
            ClusterManager::new(ClusterConfig::new(clusters), Arc::new(VendorConnector::default()))
                .unwrap();
        let policy = WeightedRoundRobinPolicy::new(manager.clone());
        (manager, policy)
    }

    #[test]
    fn test_weights_are_honoured_and_interleaved() {
        let (_mgr, policy) = build(vec![
            Cluster::new("memory", "ep1").with_weight(2),
            Cluster::new("memory", "ep2").with_weight(1),
        ]);

        let picks: Vec<String> = (0..6)
            .map(|_| policy.select_cluster_for_new_resource().unwrap().0)
            .collect();
        assert_eq!(
            picks,
            vec![
                "memory@ep1",
                "memory@ep2",
                "memory@ep1",
                "memory@ep1",
                "memory@ep2",
                "memory@ep1"
            ]
        );
    }

    #[test]
    fn test_equal_weights_match_round_robin() {
        let (_mgr, policy) = build(vec![
            Cluster::new("memory", "ep1"),
            Cluster::new("memory", "ep2"),
            Cluster::new("memory", "ep3"),
        ]);

        let picks: Vec<String> = (0..4)
            .map(|_| policy.select_cluster_for_new_resource().unwrap().0)
            .collect();
        assert_eq!(picks, vec!["memory@ep1", "memory@ep2", "memory@ep3", "memory@ep1"]);
    }

    #[test]
    fn test_zero_weight_excludes_cluster() {
        let (_mgr, policy) = build(vec![
            Cluster::new("memory", "ep1").with_weight(0),
            Cluster::new("memory", "ep2"),
        ]);
        for _ in 0..3 {
            assert_eq!(
                policy.select_cluster_for_new_resource().unwrap().as_str(),
                "memory@ep2"
            );
        }

        let (_mgr, policy) = build(vec![Cluster::new("memory", "ep1").with_weight(0)]);
        assert_matches!(
            policy.select_cluster_for_new_resource(),
            Err(Error::NoClustersAvailable)
        );
    }

    #[test]
    fn test_removed_cluster_is_forgotten() {
        let (mgr, policy) = build(vec![
            Cluster::new("memory", "ep1"),
            Cluster::new("memory", "ep2"),
        ]);
        policy.select_cluster_for_new_resource().unwrap();
        mgr.remove_cluster(&ClusterId::from("memory@ep1"));

        assert_eq!(
            policy.select_cluster_for_new_resource().unwrap().as_str(),
            "memory@ep2"
        );
    }
}
