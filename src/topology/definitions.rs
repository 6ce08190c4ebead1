//! Resource Definitions
//!
//! Named volume profiles loaded from the resource-definition document. A
//! create request can name a profile instead of spelling out every field.

use crate::domain::ports::{CreateVolumeRequest, VolumeSpec};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// A named set of volume defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeProfile {
    pub name: String,
    pub capacity_bytes: u64,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// The resource-definition document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDefinitions {
    #[serde(default)]
    pub profiles: Vec<VolumeProfile>,
}

impl ResourceDefinitions {
    /// Load and validate the document from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source_name = path.display().to_string();

        let raw = std::fs::read_to_string(path).map_err(|e| Error::ResourceDefinitionsLoad {
            source_name: source_name.clone(),
            reason: e.to_string(),
        })?;

        Self::parse(&raw, &source_name)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        Self::parse(raw, "<inline>")
    }

    fn parse(raw: &str, source_name: &str) -> Result<Self> {
        let definitions: ResourceDefinitions =
            serde_yaml::from_str(raw).map_err(|e| Error::ResourceDefinitionsLoad {
                source_name: source_name.to_string(),
                reason: e.to_string(),
            })?;

        let mut seen = HashSet::new();
        for profile in &definitions.profiles {
            if profile.name.trim().is_empty() {
                return Err(Error::Configuration("volume profile with empty name".into()));
            }
            if !seen.insert(profile.name.as_str()) {
                return Err(Error::Configuration(format!(
                    "duplicate volume profile: {}",
                    profile.name
                )));
            }
        }

        Ok(definitions)
    }

    /// Get a profile by name
    pub fn profile(&self, name: &str) -> Option<&VolumeProfile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// Turn a create request into the [`VolumeSpec`] handed to a backend.
    ///
    /// Explicit request fields win over profile defaults; labels are merged.
    pub fn resolve(&self, request: &CreateVolumeRequest) -> Result<VolumeSpec> {
        if request.name.trim().is_empty() {
            return Err(Error::Validation("volume name must not be empty".into()));
        }

        let profile = match &request.profile {
            Some(name) => Some(
                self.profile(name)
                    .ok_or_else(|| Error::Validation(format!("unknown volume profile: {}", name)))?,
            ),
            None => None,
        };

        let capacity_bytes = request
            .capacity_bytes
            .or_else(|| profile.map(|p| p.capacity_bytes))
            .ok_or_else(|| {
                Error::Validation("capacityBytes or a profile is required".into())
            })?;

        if capacity_bytes == 0 {
            return Err(Error::Validation("capacity must be greater than zero".into()));
        }

        let mut labels = profile.map(|p| p.labels.clone()).unwrap_or_default();
        labels.extend(request.labels.clone());

        Ok(VolumeSpec {
            name: request.name.clone(),
            capacity_bytes,
            labels,
        })
    }
}
