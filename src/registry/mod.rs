//! Ownership Registries
//!
//! In-memory, lock-protected maps from generated identifiers to live backend
//! clients and to the resources those clients own. Each registry takes its
//! identifier generator at construction.

pub mod client_registry;
pub mod events;
pub mod ids;
pub mod resource_registry;
pub mod store;

pub use client_registry::*;
pub use events::*;
pub use ids::*;
pub use resource_registry::*;
pub use store::{RegistryStats, RegistryStatsSnapshot};
