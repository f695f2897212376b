//! In-memory [`NetworkOps`]
//!
//! Models the host as a set of links, a route table keyed by prefix and the
//! local-handling flag, and logs every operation it is asked to perform.
//! Operations can be made to fail with [`MemoryNetwork::fail_on`]. Each call
//! yields to the scheduler before touching state so concurrent callers
//! interleave.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use ipnet::IpNet;
use parking_lot::Mutex;

use super::{NetworkOps, RouteSpec, TeardownReport, TunnelSpec};
use crate::error::SetupError;

/// One attempted operation
#[derive(Debug, Clone, PartialEq)]
pub enum NetOp {
    CreateTunnel(String),
    DeleteTunnel(String),
    AddRoute {
        route: RouteSpec,
        /// Local handling state when the route was installed
        local_handling: bool,
    },
    DeleteRoute(IpNet),
    SetLocalHandling(bool),
}

type FailRule = Arc<dyn Fn(&NetOp) -> bool + Send + Sync>;

#[derive(Debug)]
struct HostState {
    links: BTreeMap<String, Option<TunnelSpec>>,
    routes: BTreeMap<IpNet, RouteSpec>,
    local_handling: bool,
    ops: Vec<NetOp>,
}

pub struct MemoryNetwork {
    state: Mutex<HostState>,
    fail_rule: Mutex<Option<FailRule>>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    /// A host with local handling enabled and no fabric routes
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HostState {
                links: BTreeMap::new(),
                routes: BTreeMap::new(),
                local_handling: true,
                ops: Vec::new(),
            }),
            fail_rule: Mutex::new(None),
        }
    }

    /// Add a pre-existing interface, e.g. one left over by a previous run
    pub fn with_link(self, name: &str) -> Self {
        self.state.lock().links.insert(name.to_string(), None);
        self
    }

    /// Fail every operation matching `rule` (replaces any previous rule)
    pub fn fail_on<F>(&self, rule: F)
    where
        F: Fn(&NetOp) -> bool + Send + Sync + 'static,
    {
        *self.fail_rule.lock() = Some(Arc::new(rule));
    }

    pub fn clear_failures(&self) {
        *self.fail_rule.lock() = None;
    }

    pub fn links(&self) -> Vec<String> {
        self.state.lock().links.keys().cloned().collect()
    }

    pub fn tunnel(&self, name: &str) -> Option<TunnelSpec> {
        self.state.lock().links.get(name).cloned().flatten()
    }

    pub fn routes(&self) -> Vec<RouteSpec> {
        self.state.lock().routes.values().copied().collect()
    }

    pub fn local_handling(&self) -> bool {
        self.state.lock().local_handling
    }

    /// Every attempted operation, failed ones included, in call order
    pub fn ops(&self) -> Vec<NetOp> {
        self.state.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state.lock().ops.clear();
    }

    fn check(&self, op: &NetOp) -> Result<(), SetupError> {
        let rule = self.fail_rule.lock().clone();
        match rule {
            Some(rule) if rule(op) => Err(injected(op)),
            _ => Ok(()),
        }
    }
}

fn injected(op: &NetOp) -> SetupError {
    match op {
        NetOp::CreateTunnel(name) | NetOp::DeleteTunnel(name) => SetupError::Tunnel {
            name: name.clone(),
            reason: "injected failure".into(),
        },
        NetOp::AddRoute { route, .. } => SetupError::Route {
            prefix: route.prefix,
            nexthop: route.nexthop,
            reason: "injected failure".into(),
        },
        NetOp::DeleteRoute(prefix) => SetupError::RouteDelete {
            prefix: *prefix,
            reason: "injected failure".into(),
        },
        NetOp::SetLocalHandling(enabled) => {
            SetupError::LocalHandling(format!("injected failure setting {}", enabled))
        }
    }
}

#[async_trait]
impl NetworkOps for MemoryNetwork {
    async fn create_tunnel(&self, spec: &TunnelSpec) -> Result<(), SetupError> {
        tokio::task::yield_now().await;
        let op = NetOp::CreateTunnel(spec.name.clone());
        let result = self.check(&op);
        let mut state = self.state.lock();
        state.ops.push(op);
        result?;

        if state.links.contains_key(&spec.name) {
            return Err(SetupError::Tunnel {
                name: spec.name.clone(),
                reason: "File exists".into(),
            });
        }
        state.links.insert(spec.name.clone(), Some(spec.clone()));
        Ok(())
    }

    async fn delete_tunnels_by_prefix(&self, prefix: &str) -> Result<TeardownReport, SetupError> {
        tokio::task::yield_now().await;
        let names: Vec<String> = self
            .state
            .lock()
            .links
            .keys()
            .filter(|n| n.starts_with(prefix))
            .cloned()
            .collect();

        let mut report = TeardownReport::default();
        for name in names {
            let op = NetOp::DeleteTunnel(name.clone());
            let result = self.check(&op);
            let mut state = self.state.lock();
            state.ops.push(op);
            match result {
                Ok(()) => {
                    state.links.remove(&name);
                    report.deleted.push(name);
                }
                Err(e) => report.failed.push((name, e)),
            }
        }
        Ok(report)
    }

    async fn add_route(&self, route: &RouteSpec) -> Result<(), SetupError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        let op = NetOp::AddRoute {
            route: *route,
            local_handling: state.local_handling,
        };
        let result = self.check(&op);
        state.ops.push(op);
        result?;

        state.routes.insert(route.prefix, *route);
        Ok(())
    }

    async fn delete_route(&self, prefix: &IpNet) -> Result<(), SetupError> {
        tokio::task::yield_now().await;
        let op = NetOp::DeleteRoute(*prefix);
        let result = self.check(&op);
        let mut state = self.state.lock();
        state.ops.push(op);
        result?;

        state.routes.remove(prefix);
        Ok(())
    }

    async fn set_local_handling(&self, enabled: bool) -> Result<(), SetupError> {
        tokio::task::yield_now().await;
        let op = NetOp::SetLocalHandling(enabled);
        let result = self.check(&op);
        let mut state = self.state.lock();
        state.ops.push(op);
        result?;

        state.local_handling = enabled;
        Ok(())
    }
}
