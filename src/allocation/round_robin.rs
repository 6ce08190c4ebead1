//! Round-Robin Placement
//!
//! Hands new resources to clusters in topology order, wrapping around.

use crate::domain::ports::{ClusterDirectoryRef, PlacementPolicy};
use crate::error::{Error, Result};
use crate::topology::ClusterId;
use parking_lot::Mutex;
use tracing::trace;

/// Round-robin over the live cluster list.
///
/// The cursor is not anchored to a cluster: when the topology shrinks it is
/// wrapped back into range, so fairness across topology changes is not
/// guaranteed, only that every pick is a valid position.
pub struct RoundRobinPolicy {
    directory: ClusterDirectoryRef,
    /// Index of the next cluster to receive a resource
    cursor: Mutex<usize>,
}

impl RoundRobinPolicy {
    pub fn new(directory: ClusterDirectoryRef) -> Self {
        Self {
            directory,
            cursor: Mutex::new(0),
        }
    }

    /// Current cursor position
    pub fn cursor(&self) -> usize {
        *self.cursor.lock()
    }

    /// Advance the cursor over a list of `len` entries, returning the pick
    fn advance(&self, len: usize) -> usize {
        let mut cursor = self.cursor.lock();
        if *cursor >= len {
            *cursor %= len;
        }
        let picked = *cursor;
        *cursor = (picked + 1) % len;
        picked
    }
}

impl PlacementPolicy for RoundRobinPolicy {
    fn select_cluster_for_new_resource(&self) -> Result<ClusterId> {
        // Read the directory before taking the cursor lock
        let ids = self.directory.all_ids();
        if ids.is_empty() {
            return Err(Error::NoClustersAvailable);
        }

        let picked = self.advance(ids.len());
        let id = ids
            .into_iter()
            .nth(picked)
            .ok_or_else(|| Error::Internal(format!("placement cursor {} out of range", picked)))?;

        trace!("Round-robin picked cluster {} (slot {})", id, picked);
        Ok(id)
    }

    fn name(&self) -> &str {
        "round-robin"
    }
}
