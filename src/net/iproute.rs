//! iproute2-backed [`NetworkOps`]
//!
//! Shells out to `ip` (needs `CAP_NET_ADMIN`). Tunnels are GRE; routes are
//! installed with `replace` so re-applying converges instead of failing.

use std::process::Stdio;

use async_trait::async_trait;
use ipnet::IpNet;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{NetworkOps, RouteSpec, TeardownReport, TunnelSpec};
use crate::config::LocalHandlingCommands;
use crate::error::SetupError;

/// Stderr fragments meaning "already in the requested state"
const ABSENT_MARKERS: [&str; 3] = ["Cannot find device", "No such process", "No such device"];

#[derive(Debug, Clone)]
pub struct IpRouteNetwork {
    binary: String,
    local_handling: LocalHandlingCommands,
}

impl IpRouteNetwork {
    pub fn new(local_handling: LocalHandlingCommands) -> Self {
        Self {
            binary: "ip".into(),
            local_handling,
        }
    }

    async fn ip(&self, args: &[&str]) -> Result<String, SetupError> {
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(self.binary.as_str());
        argv.extend_from_slice(args);
        run(&argv).await
    }

    async fn ip_tolerant(&self, args: &[&str]) -> Result<(), SetupError> {
        match self.ip(args).await {
            Err(SetupError::CommandFailed { ref stderr, .. }) if is_absent(stderr) => Ok(()),
            other => other.map(|_| ()),
        }
    }

    async fn configure_tunnel(&self, spec: &TunnelSpec) -> Result<(), SetupError> {
        let addr4 = spec.addr4.to_string();
        let addr6 = spec.addr6.to_string();
        self.ip(&["-4", "addr", "add", &addr4, "dev", &spec.name]).await?;
        self.ip(&["-6", "addr", "add", &addr6, "dev", &spec.name]).await?;
        self.ip(&["link", "set", &spec.name, "up"]).await?;
        Ok(())
    }
}

#[async_trait]
impl NetworkOps for IpRouteNetwork {
    async fn create_tunnel(&self, spec: &TunnelSpec) -> Result<(), SetupError> {
        debug!(
            tunnel = %spec.name,
            local = %spec.local,
            remote = %spec.remote,
            addr4 = %spec.addr4,
            addr6 = %spec.addr6,
            "Adding GRE tunnel"
        );
        let mtu = spec.mtu.to_string();
        let local = spec.local.to_string();
        let remote = spec.remote.to_string();
        self.ip(&[
            "link", "add", "name", &spec.name, "mtu", &mtu, "type", "gre", "local", &local,
            "remote", &remote,
        ])
        .await
        .map_err(|e| SetupError::Tunnel {
            name: spec.name.clone(),
            reason: e.to_string(),
        })?;

        if let Err(e) = self.configure_tunnel(spec).await {
            // Don't leave a half-configured interface behind
            if let Err(cleanup) = self.ip_tolerant(&["link", "del", &spec.name]).await {
                warn!(tunnel = %spec.name, error = %cleanup, "Cleanup of partial tunnel failed");
            }
            return Err(SetupError::Tunnel {
                name: spec.name.clone(),
                reason: e.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_tunnels_by_prefix(&self, prefix: &str) -> Result<TeardownReport, SetupError> {
        let listing = self.ip(&["-o", "link", "show"]).await?;
        let mut report = TeardownReport::default();

        for name in parse_link_names(&listing)
            .into_iter()
            .filter(|n| n.starts_with(prefix))
        {
            debug!(interface = %name, "Deleting interface");
            match self.ip_tolerant(&["link", "del", &name]).await {
                Ok(()) => report.deleted.push(name),
                Err(e) => report.failed.push((name, e)),
            }
        }
        Ok(report)
    }

    async fn add_route(&self, route: &RouteSpec) -> Result<(), SetupError> {
        debug!(%route, "Adding route");
        let prefix = route.prefix.to_string();
        let nexthop = route.nexthop.to_string();
        let metric = route.metric.to_string();
        self.ip(&[
            family_flag(&route.prefix),
            "route",
            "replace",
            &prefix,
            "via",
            &nexthop,
            "metric",
            &metric,
        ])
        .await
        .map(|_| ())
        .map_err(|e| SetupError::Route {
            prefix: route.prefix,
            nexthop: route.nexthop,
            reason: e.to_string(),
        })
    }

    async fn delete_route(&self, prefix: &IpNet) -> Result<(), SetupError> {
        debug!(%prefix, "Deleting route");
        let dst = prefix.to_string();
        let metric = super::ROUTE_METRIC.to_string();
        self.ip_tolerant(&[family_flag(prefix), "route", "del", &dst, "metric", &metric])
            .await
            .map_err(|e| SetupError::RouteDelete {
                prefix: *prefix,
                reason: e.to_string(),
            })
    }

    async fn set_local_handling(&self, enabled: bool) -> Result<(), SetupError> {
        let argv = if enabled {
            &self.local_handling.enable
        } else {
            &self.local_handling.disable
        };
        if argv.is_empty() {
            return Err(SetupError::LocalHandling(format!(
                "no command configured to {} local handling",
                if enabled { "enable" } else { "disable" }
            )));
        }
        debug!(enabled, command = ?argv, "Setting local handling");

        let argv: Vec<&str> = argv.iter().map(String::as_str).collect();
        match run(&argv).await {
            Ok(_) => Ok(()),
            Err(SetupError::CommandFailed { ref stderr, .. }) if !enabled && is_absent(stderr) => {
                Ok(())
            }
            Err(e) => Err(SetupError::LocalHandling(e.to_string())),
        }
    }
}

async fn run(argv: &[&str]) -> Result<String, SetupError> {
    let command = argv.join(" ");
    let (program, args) = argv.split_first().ok_or_else(|| SetupError::CommandFailed {
        command: command.clone(),
        status: "not run".into(),
        stderr: "empty command".into(),
    })?;

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| SetupError::Spawn {
            command: command.clone(),
            source,
        })?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(SetupError::CommandFailed {
            command,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

fn family_flag(prefix: &IpNet) -> &'static str {
    match prefix {
        IpNet::V4(_) => "-4",
        IpNet::V6(_) => "-6",
    }
}

fn is_absent(stderr: &str) -> bool {
    ABSENT_MARKERS.iter().any(|m| stderr.contains(m))
}

/// Interface names from `ip -o link show`:
///
/// ```text
/// 7: fd-lon@NONE: <POINTOPOINT,NOARP,UP,LOWER_UP> mtu 1436 ...
/// ```
fn parse_link_names(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter_map(|line| {
            let name = line.split(':').nth(1)?.trim();
            let name = name.split('@').next()?;
            (!name.is_empty()).then(|| name.to_string())
        })
        .collect()
}
