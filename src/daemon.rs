//! Process wiring
//!
//! Startup: clear leftover tunnels, build the mesh, then run the probe loop
//! and the control server side by side. Either task exiting, or a shutdown
//! signal, ends the run; the mesh is torn down on the way out in every case.

use std::future::Future;
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::api::{create_router, AppState};
use crate::config::FabricConfig;
use crate::control::ControlSurface;
use crate::error::{FabricError, Result};
use crate::health::PeerHealthTable;
use crate::mesh::TunnelMesh;
use crate::metrics::FabricMetrics;
use crate::net::{NetworkOps, TeardownReport};
use crate::probe::Prober;
use crate::probe_loop::ProbeLoop;
use crate::reroute::RerouteController;

/// Collaborators injected into a run
pub struct Runtime {
    pub net: Arc<dyn NetworkOps>,
    pub prober: Arc<dyn Prober>,
    pub metrics: PrometheusHandle,
}

/// Run until Ctrl-C or SIGTERM
pub async fn run(config: FabricConfig, runtime: Runtime) -> Result<()> {
    run_until(config, runtime, shutdown_signal()).await
}

/// Run until `shutdown` resolves or a background task stops
pub async fn run_until<F>(config: FabricConfig, runtime: Runtime, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let topology = Arc::new(config.topology()?);
    info!(
        node = %topology.local.name,
        id = %topology.local.id,
        peers = topology.peers.len(),
        prefixes = config.prefixes.len(),
        "Starting fabric agent"
    );

    let mesh = TunnelMesh::new(runtime.net.clone());
    if let Err(e) = mesh.teardown().await {
        warn!(error = %e, "Startup cleanup of stale tunnels failed");
    }
    let report = mesh.establish(&topology).await?;
    if !report.is_complete() {
        warn!(failed = report.failed.len(), "Mesh is partial; continuing");
    }

    let metrics = FabricMetrics::new(topology.local.name.clone());
    let table = Arc::new(PeerHealthTable::new(&topology.peers, config.thresholds()));
    let controller = Arc::new(RerouteController::new(
        runtime.net.clone(),
        config.prefixes.clone(),
        metrics.clone(),
    ));
    let probe_loop = Arc::new(ProbeLoop::new(
        &topology,
        runtime.prober.clone(),
        table.clone(),
        metrics,
        config.ping_interval,
    ));
    let control = Arc::new(ControlSurface::new(topology.clone(), table, controller));

    let outcome = serve(&config, control, probe_loop, runtime.metrics, shutdown).await;

    match mesh.teardown().await {
        Ok(report) if !report.is_clean() => {
            warn!(failed = report.failed.len(), "Mesh teardown incomplete")
        }
        Ok(_) => {}
        Err(e) => error!(error = %e, "Mesh teardown failed"),
    }
    outcome
}

async fn serve<F>(
    config: &FabricConfig,
    control: Arc<ControlSurface>,
    probe_loop: Arc<ProbeLoop>,
    metrics: PrometheusHandle,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    let listener = TcpListener::bind(config.listen)
        .await
        .map_err(|e| FabricError::Serve {
            addr: config.listen.to_string(),
            reason: e.to_string(),
        })?;
    let addr = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| config.listen.to_string());
    info!(%addr, "Control surface listening");

    let app = create_router(AppState { control, metrics });
    let mut server = tokio::spawn(async move { axum::serve(listener, app).await });
    let mut probes = tokio::spawn(async move { probe_loop.run().await });

    let outcome = tokio::select! {
        _ = shutdown => {
            info!("Shutdown requested");
            Ok(())
        }
        res = &mut server => {
            let reason = match res {
                Ok(Ok(())) => "server exited".to_string(),
                Ok(Err(e)) => e.to_string(),
                Err(e) => e.to_string(),
            };
            error!(%addr, %reason, "Control surface stopped");
            Err(FabricError::Serve { addr, reason })
        }
        res = &mut probes => {
            let reason = match res {
                Ok(()) => "loop returned".to_string(),
                Err(e) => e.to_string(),
            };
            error!(%reason, "Probe loop stopped");
            Err(FabricError::TaskExited { task: "probe loop", reason })
        }
    };

    server.abort();
    probes.abort();
    outcome
}

/// Teardown-only mode: delete every fabric tunnel and return
pub async fn teardown(net: Arc<dyn NetworkOps>) -> Result<TeardownReport> {
    let report = TunnelMesh::new(net).teardown().await?;
    Ok(report)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LocalHandlingCommands, NodeConfig, ProbeSettings};
    use crate::error::ProbeError;
    use crate::metrics::detached_handle;
    use crate::net::MemoryNetwork;
    use crate::probe::Measurement;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    struct Flat;

    #[async_trait]
    impl Prober for Flat {
        async fn probe(&self, _src: IpAddr, _dst: IpAddr) -> Result<Measurement, ProbeError> {
            Ok(Measurement {
                latency: Duration::from_millis(5),
                loss: 0.0,
            })
        }
    }

    fn config() -> FabricConfig {
        let mut nodes = BTreeMap::new();
        for (name, id) in [("a", 1u8), ("b", 2), ("c", 3)] {
            nodes.insert(
                name.to_string(),
                NodeConfig {
                    id,
                    ip: Ipv4Addr::new(198, 51, 100, id),
                },
            );
        }
        FabricConfig {
            local_id: 1,
            prefix4: "10.254.0.".into(),
            prefix6: "fd00:254::".into(),
            ping_interval: Duration::from_millis(10),
            latency_threshold: Duration::from_millis(100),
            loss_threshold: 0.1,
            listen: "127.0.0.1:0".parse().unwrap(),
            prefixes: vec!["192.0.2.0/24".parse().unwrap()],
            probe: ProbeSettings::default(),
            local_handling: LocalHandlingCommands::default(),
            nodes,
        }
    }

    fn runtime(net: &Arc<MemoryNetwork>) -> Runtime {
        Runtime {
            net: net.clone(),
            prober: Arc::new(Flat),
            metrics: detached_handle(),
        }
    }

    #[tokio::test]
    async fn test_run_builds_mesh_and_tears_down_on_shutdown() {
        let net = Arc::new(MemoryNetwork::new().with_link("fd-stale").with_link("eth0"));
        let probe_net = net.clone();
        let shutdown = async move {
            // Wait until the mesh is up, then stop
            for _ in 0..200 {
                if probe_net.links().contains(&"fd-b".to_string()) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            tokio::time::sleep(Duration::from_millis(30)).await;
        };

        run_until(config(), runtime(&net), shutdown).await.unwrap();

        let created = net
            .ops()
            .iter()
            .filter(|op| matches!(op, crate::net::NetOp::CreateTunnel(_)))
            .count();
        assert_eq!(created, 2);
        assert_eq!(net.links(), vec!["eth0"]);
    }

    #[tokio::test]
    async fn test_config_error_is_fatal_before_touching_host() {
        let net = Arc::new(MemoryNetwork::new());
        let mut config = config();
        config.local_id = 9;

        let err = run_until(config, runtime(&net), async {}).await.unwrap_err();
        assert!(matches!(err, FabricError::Config(_)));
        assert!(net.ops().is_empty());
    }

    #[tokio::test]
    async fn test_bind_failure_is_serve_error_and_still_tears_down() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = config();
        config.listen = taken.local_addr().unwrap();
        let net = Arc::new(MemoryNetwork::new());

        let err = run_until(config, runtime(&net), std::future::pending())
            .await
            .unwrap_err();
        assert!(matches!(err, FabricError::Serve { .. }));
        assert!(net.links().is_empty());
    }

    #[tokio::test]
    async fn test_teardown_mode() {
        let net = Arc::new(MemoryNetwork::new().with_link("fd-b").with_link("fd-c"));
        let report = teardown(net.clone()).await.unwrap();
        assert_eq!(report.deleted.len(), 2);
        assert!(net.links().is_empty());
    }
}
