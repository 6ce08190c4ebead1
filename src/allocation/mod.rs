//! Allocation Module
//!
//! Placement policies deciding which cluster receives a newly created
//! resource. Policies only see cluster identifiers; they know nothing about
//! resources or clients.

pub mod round_robin;
pub mod weighted;

pub use round_robin::*;
pub use weighted::*;

use crate::domain::ports::{ClusterDirectoryRef, PlacementPolicyRef};
use crate::error::{Error, Result};
use std::sync::Arc;

/// Factory for creating placement policies by name
pub struct PlacementFactory;

impl PlacementFactory {
    /// Default policy name
    pub const DEFAULT: &'static str = "round-robin";

    /// Create a placement policy reading from the given directory
    pub fn create(name: &str, directory: ClusterDirectoryRef) -> Result<PlacementPolicyRef> {
        match name.to_lowercase().as_str() {
            "round-robin" | "roundrobin" | "rr" => Ok(Arc::new(RoundRobinPolicy::new(directory))),
            "weighted" | "weighted-round-robin" => {
                Ok(Arc::new(WeightedRoundRobinPolicy::new(directory)))
            }
            _ => Err(Error::UnknownPlacementPolicy(name.to_string())),
        }
    }
}
