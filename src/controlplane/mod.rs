//! Control Plane Module
//!
//! The orchestration service routing volume and snapshot operations to
//! backend clusters, its REST surface, metrics and the bundled backends.

pub mod api;
pub mod backends;
pub mod metrics;
pub mod service;

pub use api::*;
pub use backends::*;
pub use metrics::*;
pub use service::*;
