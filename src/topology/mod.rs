//! Topology Module
//!
//! Static description of the backend clusters the broker fronts, the
//! manager that serves it to placement and client materialization, and the
//! resource definitions used to fill in create requests.

pub mod cluster;
pub mod definitions;
pub mod manager;

pub use cluster::*;
pub use definitions::*;
pub use manager::*;
