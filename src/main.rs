//! fabric-director
//!
//! Builds the tunnel mesh, probes every peer and serves the reroute control
//! surface until interrupted. `--down` only removes the mesh.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fabric_director::config::FabricConfig;
use fabric_director::daemon::{self, Runtime};
use fabric_director::metrics;
use fabric_director::net::IpRouteNetwork;
use fabric_director::probe::PingProber;

#[derive(Parser, Debug)]
#[command(name = "fabric-director", version)]
#[command(about = "Failover agent for a full-mesh L3 tunnel fabric")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "FABRIC_DIRECTOR_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    /// Tear down the tunnel mesh and exit
    #[arg(short, long)]
    down: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);
    info!(version = env!("CARGO_PKG_VERSION"), "fabric-director starting");

    if args.down {
        // Node table is not validated for teardown
        let config = FabricConfig::read(&args.config)
            .with_context(|| format!("Reading config from {}", args.config.display()))?;
        let net = Arc::new(IpRouteNetwork::new(config.local_handling));
        let report = daemon::teardown(net).await.context("Tearing down mesh")?;
        info!(deleted = report.deleted.len(), "Mesh removed");
        for (name, e) in &report.failed {
            warn!(tunnel = %name, error = %e, "Could not remove tunnel");
        }
        return Ok(());
    }

    let config = FabricConfig::load(&args.config)
        .with_context(|| format!("Loading config from {}", args.config.display()))?;
    let net = Arc::new(IpRouteNetwork::new(config.local_handling.clone()));
    let handle = metrics::install().context("Installing Prometheus recorder")?;
    let runtime = Runtime {
        net,
        prober: Arc::new(PingProber::new(&config.probe)),
        metrics: handle,
    };
    daemon::run(config, runtime).await?;
    info!("fabric-director stopped");
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "fabric_director=debug,tower_http=debug"
    } else {
        "fabric_director=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
