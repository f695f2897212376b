//! Fabric node identities

use std::fmt;
use std::net::Ipv4Addr;

use serde::Serialize;

use crate::addressing::{AddressPlan, InternalAddrs};

/// Interface-name prefix shared by every tunnel this agent owns
pub const TUNNEL_PREFIX: &str = "fd-";

/// Kernel limit on interface names (IFNAMSIZ - 1)
pub const MAX_INTERFACE_NAME: usize = 15;

/// Small, stable node identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct PeerId(pub u8);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A node of the fabric. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Peer {
    pub id: PeerId,
    pub name: String,
    pub external: Ipv4Addr,
    pub internal: InternalAddrs,
}

impl Peer {
    /// Name of the tunnel interface pointing at this peer
    pub fn tunnel_name(&self) -> String {
        tunnel_name(&self.name)
    }
}

pub fn tunnel_name(peer_name: &str) -> String {
    format!("{TUNNEL_PREFIX}{peer_name}")
}

/// Resolved view of the fabric from this node's perspective
#[derive(Debug, Clone)]
pub struct Topology {
    pub local: Peer,
    /// Every other node, ordered by ID
    pub peers: Vec<Peer>,
    pub plan: AddressPlan,
}

impl Topology {
    pub fn peer_by_name(&self, name: &str) -> Option<&Peer> {
        self.peers.iter().find(|p| p.name == name)
    }

    pub fn peer_by_id(&self, id: PeerId) -> Option<&Peer> {
        self.peers.iter().find(|p| p.id == id)
    }
}
