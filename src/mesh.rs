//! Tunnel mesh manager
//!
//! One GRE tunnel per peer, named `fd-<peer>`, carrying this node's internal
//! addresses. Construction is best-effort: a peer whose tunnel fails is
//! logged and skipped. Teardown removes every `fd-` interface, including ones
//! left behind by an earlier run.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::error::SetupError;
use crate::net::{NetworkOps, TeardownReport, TunnelSpec};
use crate::peer::{Topology, TUNNEL_PREFIX};

/// 1500 minus GRE-over-IPv4 encapsulation and headroom
pub const TUNNEL_MTU: u32 = 1436;

/// Outcome of [`TunnelMesh::establish`]
#[derive(Debug, Default)]
pub struct MeshReport {
    pub created: Vec<String>,
    pub failed: Vec<(String, SetupError)>,
}

impl MeshReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct TunnelMesh {
    net: Arc<dyn NetworkOps>,
}

impl TunnelMesh {
    pub fn new(net: Arc<dyn NetworkOps>) -> Self {
        Self { net }
    }

    /// Tunnel definitions for every peer, in ID order
    pub fn plan(topology: &Topology) -> Result<Vec<TunnelSpec>, SetupError> {
        let (addr4, addr6) = topology
            .plan
            .interface_nets(topology.local.id.0)
            .map_err(|e| SetupError::Tunnel {
                name: topology.local.name.clone(),
                reason: e.to_string(),
            })?;

        Ok(topology
            .peers
            .iter()
            .map(|peer| TunnelSpec {
                name: peer.tunnel_name(),
                local: topology.local.external,
                remote: peer.external,
                addr4,
                addr6,
                mtu: TUNNEL_MTU,
            })
            .collect())
    }

    /// Create a tunnel to every peer, continuing past failures
    pub async fn establish(&self, topology: &Topology) -> Result<MeshReport, SetupError> {
        let mut report = MeshReport::default();
        for spec in Self::plan(topology)? {
            match self.net.create_tunnel(&spec).await {
                Ok(()) => {
                    info!(tunnel = %spec.name, remote = %spec.remote, "Tunnel up");
                    report.created.push(spec.name);
                }
                Err(e) => {
                    error!(tunnel = %spec.name, remote = %spec.remote, error = %e, "Tunnel setup failed");
                    report.failed.push((spec.name, e));
                }
            }
        }
        info!(
            created = report.created.len(),
            failed = report.failed.len(),
            "Mesh established"
        );
        Ok(report)
    }

    /// Delete every fabric tunnel. Nothing to delete is success.
    pub async fn teardown(&self) -> Result<TeardownReport, SetupError> {
        let report = self.net.delete_tunnels_by_prefix(TUNNEL_PREFIX).await?;
        for (name, e) in &report.failed {
            warn!(tunnel = %name, error = %e, "Tunnel teardown failed");
        }
        info!(deleted = report.deleted.len(), "Mesh torn down");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::AddressPlan;
    use crate::net::{MemoryNetwork, NetOp};
    use crate::peer::{Peer, PeerId};
    use std::net::Ipv4Addr;

    fn topology() -> Topology {
        let plan = AddressPlan::new("10.254.0.", "fd00:254::");
        let node = |id: u8, name: &str| Peer {
            id: PeerId(id),
            name: name.into(),
            external: Ipv4Addr::new(198, 51, 100, id),
            internal: plan.internal(id).unwrap(),
        };
        Topology {
            local: node(1, "a"),
            peers: vec![node(2, "b"), node(3, "c")],
            plan: plan.clone(),
        }
    }

    #[test]
    fn test_plan_uses_local_addresses_and_mtu() {
        let specs = TunnelMesh::plan(&topology()).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].name, "fd-b");
        assert_eq!(specs[0].local, Ipv4Addr::new(198, 51, 100, 1));
        assert_eq!(specs[0].remote, Ipv4Addr::new(198, 51, 100, 2));
        assert_eq!(specs[0].addr4.to_string(), "10.254.0.1/24");
        assert_eq!(specs[0].addr6.to_string(), "fd00:254::1/112");
        assert!(specs.iter().all(|s| s.mtu == TUNNEL_MTU));
    }

    #[tokio::test]
    async fn test_one_failed_tunnel_does_not_abort_mesh() {
        let net = Arc::new(MemoryNetwork::new());
        net.fail_on(|op| matches!(op, NetOp::CreateTunnel(name) if name == "fd-b"));
        let mesh = TunnelMesh::new(net.clone());

        let report = mesh.establish(&topology()).await.unwrap();
        assert_eq!(report.created, vec!["fd-c"]);
        assert_eq!(report.failed.len(), 1);
        assert!(!report.is_complete());
        assert_eq!(net.links(), vec!["fd-c"]);
        assert_eq!(net.tunnel("fd-c").unwrap().mtu, TUNNEL_MTU);
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let net = Arc::new(MemoryNetwork::new().with_link("eth0"));
        let mesh = TunnelMesh::new(net.clone());
        mesh.establish(&topology()).await.unwrap();

        let first = mesh.teardown().await.unwrap();
        assert_eq!(first.deleted.len(), 2);
        let second = mesh.teardown().await.unwrap();
        assert!(second.deleted.is_empty());
        assert!(second.is_clean());
        assert_eq!(net.links(), vec!["eth0"]);
    }

    #[tokio::test]
    async fn test_teardown_removes_leftovers_from_previous_run() {
        let net = Arc::new(MemoryNetwork::new().with_link("fd-gone"));
        let mesh = TunnelMesh::new(net.clone());
        let report = mesh.teardown().await.unwrap();
        assert_eq!(report.deleted, vec!["fd-gone"]);
    }
}
