//! API Module
//!
//! REST surface of the control plane: volume and snapshot operations,
//! status and probes.

pub mod rest;
pub mod server;

pub use rest::*;
pub use server::*;
