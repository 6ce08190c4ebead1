//! Identifier-keyed store shared by the client and resource registries.
//!
//! One `parking_lot::RwLock` guards the whole map so a snapshot never sees a
//! half-applied insert. Lock guards never escape a method.

use crate::domain::ports::IdGeneratorRef;
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Statistics
// =============================================================================

/// Lifetime counters for a registry
#[derive(Debug, Default)]
pub struct RegistryStats {
    /// Successful inserts
    pub registrations: AtomicU64,
    /// Successful removals
    pub removals: AtomicU64,
}

/// Snapshot of registry statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStatsSnapshot {
    /// Entries currently held
    pub entries: u64,
    pub registrations: u64,
    pub removals: u64,
}

// =============================================================================
// Store
// =============================================================================

pub(crate) struct IdStore<K, V> {
    /// Registry name used in errors
    name: &'static str,
    entries: RwLock<HashMap<K, V>>,
    generator: IdGeneratorRef,
    stats: RegistryStats,
}

impl<K, V> IdStore<K, V>
where
    K: Clone + Eq + Hash + From<String> + std::fmt::Display,
    V: Clone,
{
    pub(crate) fn new(name: &'static str, generator: IdGeneratorRef) -> Self {
        Self {
            name,
            entries: RwLock::new(HashMap::new()),
            generator,
            stats: RegistryStats::default(),
        }
    }

    /// Store a value under a freshly generated identifier.
    ///
    /// An existing entry is never overwritten: a generated identifier that is
    /// already present is reported as a collision.
    pub(crate) fn insert(&self, value: V) -> Result<K> {
        let id = K::from(self.generator.next_id());

        {
            let mut entries = self.entries.write();
            if entries.contains_key(&id) {
                return Err(Error::IdCollision {
                    registry: self.name.to_string(),
                    id: id.to_string(),
                });
            }
            entries.insert(id.clone(), value);
        }

        self.stats.registrations.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    pub(crate) fn get(&self, id: &K) -> Option<V> {
        self.entries.read().get(id).cloned()
    }

    pub(crate) fn contains(&self, id: &K) -> bool {
        self.entries.read().contains_key(id)
    }

    /// Remove an entry; absent identifiers are a no-op
    pub(crate) fn remove(&self, id: &K) -> Option<V> {
        let removed = self.entries.write().remove(id);
        if removed.is_some() {
            self.stats.removals.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Consistent copy of every entry; order is unspecified
    pub(crate) fn snapshot(&self) -> Vec<(K, V)> {
        self.entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// First identifier whose value matches the predicate
    pub(crate) fn find<F>(&self, predicate: F) -> Option<K>
    where
        F: Fn(&V) -> bool,
    {
        self.entries
            .read()
            .iter()
            .find(|(_, v)| predicate(v))
            .map(|(k, _)| k.clone())
    }

    /// Number of values matching the predicate
    pub(crate) fn count<F>(&self, predicate: F) -> usize
    where
        F: Fn(&V) -> bool,
    {
        self.entries.read().values().filter(|v| predicate(v)).count()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub(crate) fn stats(&self) -> RegistryStatsSnapshot {
        RegistryStatsSnapshot {
            entries: self.len() as u64,
            registrations: self.stats.registrations.load(Ordering::Relaxed),
            removals: self.stats.removals.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::IdGenerator;
    use crate::registry::ids::SequentialIdGenerator;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    /// Always returns the same identifier
    struct StuckGenerator;

    impl IdGenerator for StuckGenerator {
        fn next_id(&self) -> String {
            "same".to_string()
        }
    }

    #[test]
    fn test_insert_get_remove() {
        let store: IdStore<String, u32> =
            IdStore::new("test", Arc::new(SequentialIdGenerator::new("t")));

        let id = store.insert(7).unwrap();
        assert_eq!(store.get(&id), Some(7));
        assert!(store.contains(&id));

        assert_eq!(store.remove(&id), Some(7));
        assert_eq!(store.remove(&id), None);

        let stats = store.stats();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.registrations, 1);
        assert_eq!(stats.removals, 1);
    }

    #[test]
    fn test_collision_never_overwrites() {
        let store: IdStore<String, u32> = IdStore::new("test", Arc::new(StuckGenerator));

        let id = store.insert(1).unwrap();
        let second = store.insert(2);
        assert_matches!(second, Err(Error::IdCollision { .. }));
        assert_eq!(store.get(&id), Some(1));
        assert_eq!(store.len(), 1);
    }
}
