//! fabric-director library
//!
//! Node-local failover agent for a full-mesh L3 tunnel fabric. Exposes the
//! core modules for the binary and the integration tests.

pub mod addressing;
pub mod api;
pub mod config;
pub mod control;
pub mod daemon;
pub mod error;
pub mod health;
pub mod mesh;
pub mod metrics;
pub mod net;
pub mod peer;
pub mod policy;
pub mod probe;
pub mod probe_loop;
pub mod reroute;

pub use config::FabricConfig;
pub use error::{FabricError, Result};
