//! Internal address derivation
//!
//! Every node owns one IPv4 and one IPv6 tunnel-scoped address, built by
//! appending the decimal node ID to the configured prefix strings
//! (`"10.254.0." ‖ 7 = 10.254.0.7`, `"fd00:254::" ‖ 7 = fd00:254::7`).
//! Distinct IDs always give distinct addresses, and the mapping is used by
//! the mesh (interface addresses), the prober (source/destination) and the
//! reroute controller (next hops).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use serde::Serialize;

use crate::error::ConfigError;

/// Prefix length assigned to the IPv4 address on each tunnel interface
pub const TUNNEL_PREFIX_LEN_V4: u8 = 24;

/// Prefix length assigned to the IPv6 address on each tunnel interface
pub const TUNNEL_PREFIX_LEN_V6: u8 = 112;

/// The internal addresses of one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct InternalAddrs {
    pub v4: Ipv4Addr,
    pub v6: Ipv6Addr,
}

impl InternalAddrs {
    /// Next hop matching the address family of `prefix`
    pub fn nexthop_for(&self, prefix: &IpNet) -> IpAddr {
        match prefix {
            IpNet::V4(_) => IpAddr::V4(self.v4),
            IpNet::V6(_) => IpAddr::V6(self.v6),
        }
    }
}

/// Maps node IDs to internal addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressPlan {
    prefix4: String,
    prefix6: String,
}

impl AddressPlan {
    pub fn new(prefix4: impl Into<String>, prefix6: impl Into<String>) -> Self {
        Self {
            prefix4: prefix4.into(),
            prefix6: prefix6.into(),
        }
    }

    pub fn ipv4(&self, id: u8) -> Result<Ipv4Addr, ConfigError> {
        let raw = format!("{}{}", self.prefix4, id);
        raw.parse().map_err(|_| ConfigError::InternalAddress(raw))
    }

    pub fn ipv6(&self, id: u8) -> Result<Ipv6Addr, ConfigError> {
        let raw = format!("{}{}", self.prefix6, id);
        raw.parse().map_err(|_| ConfigError::InternalAddress(raw))
    }

    pub fn internal(&self, id: u8) -> Result<InternalAddrs, ConfigError> {
        Ok(InternalAddrs {
            v4: self.ipv4(id)?,
            v6: self.ipv6(id)?,
        })
    }

    /// Addresses to assign on a tunnel interface owned by node `id`
    pub fn interface_nets(&self, id: u8) -> Result<(Ipv4Net, Ipv6Net), ConfigError> {
        let addrs = self.internal(id)?;
        let v4 = Ipv4Net::new(addrs.v4, TUNNEL_PREFIX_LEN_V4)
            .map_err(|e| ConfigError::InternalAddress(e.to_string()))?;
        let v6 = Ipv6Net::new(addrs.v6, TUNNEL_PREFIX_LEN_V6)
            .map_err(|e| ConfigError::InternalAddress(e.to_string()))?;
        Ok((v4, v6))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn plan() -> AddressPlan {
        AddressPlan::new("10.254.0.", "fd00:254::")
    }

    #[test]
    fn test_derives_addresses_from_id() {
        let addrs = plan().internal(7).unwrap();
        assert_eq!(addrs.v4, Ipv4Addr::new(10, 254, 0, 7));
        assert_eq!(addrs.v6, "fd00:254::7".parse::<Ipv6Addr>().unwrap());
    }

    #[test]
    fn test_mapping_is_injective_over_id_range() {
        let plan = plan();
        let mut v4 = HashSet::new();
        let mut v6 = HashSet::new();
        for id in 1..=254u8 {
            let addrs = plan.internal(id).unwrap();
            assert!(v4.insert(addrs.v4), "duplicate v4 for {}", id);
            assert!(v6.insert(addrs.v6), "duplicate v6 for {}", id);
        }
    }

    #[test]
    fn test_rejects_prefix_that_cannot_form_address() {
        let plan = AddressPlan::new("10.254.", "fd00:254::");
        assert!(matches!(
            plan.ipv4(3),
            Err(ConfigError::InternalAddress(raw)) if raw == "10.254.3"
        ));
    }

    #[test]
    fn test_interface_nets_carry_tunnel_prefix_len() {
        let (v4, v6) = plan().interface_nets(2).unwrap();
        assert_eq!(v4.to_string(), "10.254.0.2/24");
        assert_eq!(v6.to_string(), "fd00:254::2/112");
    }

    #[test]
    fn test_nexthop_matches_prefix_family() {
        let addrs = plan().internal(3).unwrap();
        let v4: IpNet = "192.0.2.0/24".parse().unwrap();
        let v6: IpNet = "2001:db8::/48".parse().unwrap();
        assert_eq!(addrs.nexthop_for(&v4), IpAddr::V4(addrs.v4));
        assert_eq!(addrs.nexthop_for(&v6), IpAddr::V6(addrs.v6));
    }
}
