//! Cluster Topology Model
//!
//! The static list of backend storage clusters the broker fronts, and the
//! YAML document it is loaded from.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

// =============================================================================
// Cluster ID
// =============================================================================

/// Identifier of a cluster within the topology, rendered `vendor@endpoint`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(pub String);

impl ClusterId {
    pub fn new(vendor: &str, endpoint: &str) -> Self {
        Self(format!("{}@{}", vendor, endpoint))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClusterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ClusterId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ClusterId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// =============================================================================
// Cluster
// =============================================================================

fn default_weight() -> u32 {
    1
}

/// A backend storage endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    /// Vendor identifier, selects the backend client implementation
    pub vendor: String,
    /// Network endpoint of the cluster
    pub endpoint: String,
    /// Optional display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Relative placement weight (used by weighted placement)
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Free-form labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl Cluster {
    pub fn new(vendor: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            vendor: vendor.into(),
            endpoint: endpoint.into(),
            name: None,
            weight: default_weight(),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Identifier of this cluster
    pub fn id(&self) -> ClusterId {
        ClusterId::new(&self.vendor, &self.endpoint)
    }

    fn validate(&self) -> Result<()> {
        if self.vendor.trim().is_empty() {
            return Err(Error::Configuration(format!(
                "cluster with endpoint '{}' has an empty vendor",
                self.endpoint
            )));
        }
        if self.endpoint.trim().is_empty() {
            return Err(Error::Configuration(format!(
                "cluster with vendor '{}' has an empty endpoint",
                self.vendor
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Cluster Config
// =============================================================================

/// The topology document: an ordered list of clusters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub clusters: Vec<Cluster>,
}

impl ClusterConfig {
    pub fn new(clusters: Vec<Cluster>) -> Self {
        Self { clusters }
    }

    /// Load and validate a topology document from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source_name = path.display().to_string();

        let raw = std::fs::read_to_string(path).map_err(|e| Error::TopologyLoad {
            source_name: source_name.clone(),
            reason: e.to_string(),
        })?;

        Self::parse(&raw, &source_name)
    }

    /// Parse and validate a topology document held in memory
    pub fn from_yaml(raw: &str) -> Result<Self> {
        Self::parse(raw, "<inline>")
    }

    fn parse(raw: &str, source_name: &str) -> Result<Self> {
        let config: ClusterConfig =
            serde_yaml::from_str(raw).map_err(|e| Error::TopologyLoad {
                source_name: source_name.to_string(),
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Check every cluster is well formed and uniquely identified
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for cluster in &self.clusters {
            cluster.validate()?;
            let id = cluster.id();
            if !seen.insert(id.clone()) {
                return Err(Error::Configuration(format!("duplicate cluster: {}", id)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn test_cluster_id_format() {
        let cluster = Cluster::new("vendorA", "ep1");
        assert_eq!(cluster.id().as_str(), "vendorA@ep1");
        assert_eq!(cluster.weight, 1);
    }

    #[test]
    fn test_parse_topology_preserves_order() {
        let config = ClusterConfig::from_yaml(
            r#"
clusters:
  - vendor: memory
    endpoint: ep1
  - vendor: http
    endpoint: http://10.0.0.2:9000
    name: rack-b
    weight: 3
    labels:
      zone: b
"#,
        )
        .unwrap();

        assert_eq!(
            config.clusters.iter().map(Cluster::id).collect::<Vec<_>>(),
            vec![
                ClusterId::from("memory@ep1"),
                ClusterId::from("http@http://10.0.0.2:9000")
            ]
        );
        assert_eq!(config.clusters[1].weight, 3);
        assert_eq!(config.clusters[1].name.as_deref(), Some("rack-b"));
        assert_eq!(config.clusters[1].labels.get("zone").map(String::as_str), Some("b"));
    }

    #[test]
    fn test_empty_document_is_empty_topology() {
        let config = ClusterConfig::from_yaml("clusters: []").unwrap();
        assert!(config.clusters.is_empty());
    }

    #[test]
    fn test_malformed_topology_fails() {
        let result = ClusterConfig::from_yaml("clusters: [ {vendor: memory");
        assert_matches!(result, Err(Error::TopologyLoad { .. }));

        let result = ClusterConfig::from_yaml("clusters:\n  - vendor: memory\n");
        assert_matches!(result, Err(Error::TopologyLoad { .. }));
    }

    #[test]
    fn test_invalid_clusters_rejected() {
        let result = ClusterConfig::from_yaml(
            "clusters:\n  - {vendor: memory, endpoint: ep1}\n  - {vendor: memory, endpoint: ep1}\n",
        );
        assert_matches!(result, Err(Error::Configuration(msg)) if msg.contains("duplicate"));

        let result = ClusterConfig::from_yaml("clusters:\n  - {vendor: '', endpoint: ep1}\n");
        assert_matches!(result, Err(Error::Configuration(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "clusters:\n  - vendor: memory\n    endpoint: ep1").unwrap();

        let config = ClusterConfig::load(file.path()).unwrap();
        assert_eq!(config.clusters.len(), 1);

        let missing = ClusterConfig::load("/nonexistent/clusters.yaml");
        assert_matches!(missing, Err(Error::TopologyLoad { .. }));
    }
}
