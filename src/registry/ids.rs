//! Registry Identifiers
//!
//! Opaque identifiers handed out by the registries and the generators that
//! mint them.

use crate::domain::ports::IdGenerator;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

opaque_id!(
    /// Identifier of a registered backend client
    ClientId
);

opaque_id!(
    /// External identifier of a volume or snapshot
    ResourceId
);

// =============================================================================
// Generators
// =============================================================================

/// Random v4 UUIDs
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Monotonic counter scoped to one generator, `{prefix}-{counter:016x}`
#[derive(Debug)]
pub struct SequentialIdGenerator {
    prefix: String,
    counter: AtomicU64,
}

impl SequentialIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{}-{:016x}", self.prefix, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_uuid_generator_format() {
        let id = UuidGenerator.next_id();
        assert_eq!(id.len(), 36);
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_sequential_generator_is_unique() {
        let generator = SequentialIdGenerator::new("vol");
        assert_eq!(generator.next_id(), "vol-0000000000000000");
        assert_eq!(generator.next_id(), "vol-0000000000000001");

        let ids: HashSet<String> = (0..1000).map(|_| generator.next_id()).collect();
        assert_eq!(ids.len(), 1000);
    }
}
