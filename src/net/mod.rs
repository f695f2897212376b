//! Kernel networking capability
//!
//! The only surface through which the agent mutates the host: tunnel
//! interfaces, static routes and the external local-handling toggle.
//!
//! - [`iproute::IpRouteNetwork`] - drives iproute2 and the configured commands
//! - [`memory::MemoryNetwork`] - in-process model with an operation log

pub mod iproute;
pub mod memory;

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use async_trait::async_trait;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};

use crate::error::SetupError;

pub use iproute::IpRouteNetwork;
pub use memory::{MemoryNetwork, NetOp};

/// Route metric for the static reroute routes
pub const ROUTE_METRIC: u32 = 1;

/// A point-to-point tunnel to one peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSpec {
    pub name: String,
    /// This node's external address
    pub local: Ipv4Addr,
    /// The peer's external address
    pub remote: Ipv4Addr,
    pub addr4: Ipv4Net,
    pub addr6: Ipv6Net,
    pub mtu: u32,
}

/// A static route for one rerouted prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteSpec {
    pub prefix: IpNet,
    pub nexthop: IpAddr,
    pub metric: u32,
}

impl fmt::Display for RouteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} via {} metric {}", self.prefix, self.nexthop, self.metric)
    }
}

/// Outcome of deleting tunnels by name prefix
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub deleted: Vec<String>,
    pub failed: Vec<(String, SetupError)>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[async_trait]
pub trait NetworkOps: Send + Sync {
    /// Create, address and bring up a tunnel interface
    async fn create_tunnel(&self, spec: &TunnelSpec) -> Result<(), SetupError>;

    /// Delete every interface whose name starts with `prefix`.
    ///
    /// Only a failure to enumerate interfaces is an error; individual delete
    /// failures are collected in the report.
    async fn delete_tunnels_by_prefix(&self, prefix: &str) -> Result<TeardownReport, SetupError>;

    /// Install or replace the route for `route.prefix`
    async fn add_route(&self, route: &RouteSpec) -> Result<(), SetupError>;

    /// Remove the route for `prefix`; absence is not an error
    async fn delete_route(&self, prefix: &IpNet) -> Result<(), SetupError>;

    async fn set_local_handling(&self, enabled: bool) -> Result<(), SetupError>;
}
