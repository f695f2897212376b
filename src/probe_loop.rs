//! Periodic probe driver
//!
//! Each tick probes every peer concurrently from this node's internal IPv4
//! address, waits for the whole round, then publishes the results to the
//! health table in one write. Ticks are serialized, so a slow round can
//! delay the next one but never land after it.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::addressing::InternalAddrs;
use crate::health::{HealthSnapshot, PeerHealthTable};
use crate::metrics::FabricMetrics;
use crate::peer::{Peer, Topology};
use crate::probe::Prober;

pub struct ProbeLoop {
    source: InternalAddrs,
    peers: Vec<Peer>,
    prober: Arc<dyn Prober>,
    table: Arc<PeerHealthTable>,
    metrics: FabricMetrics,
    period: Duration,
    /// Last completed tick; held for the duration of a tick
    tick: Mutex<u64>,
}

impl ProbeLoop {
    pub fn new(
        topology: &Topology,
        prober: Arc<dyn Prober>,
        table: Arc<PeerHealthTable>,
        metrics: FabricMetrics,
        period: Duration,
    ) -> Self {
        Self {
            source: topology.local.internal,
            peers: topology.peers.clone(),
            prober,
            table,
            metrics,
            period,
            tick: Mutex::new(0),
        }
    }

    pub fn table(&self) -> &Arc<PeerHealthTable> {
        &self.table
    }

    /// Run one probe round and publish it
    pub async fn tick(&self) -> Arc<HealthSnapshot> {
        let mut last = self.tick.lock().await;
        let tick = *last + 1;
        let src = IpAddr::V4(self.source.v4);

        let rounds = self.peers.iter().map(|peer| async move {
            let result = self.prober.probe(src, IpAddr::V4(peer.internal.v4)).await;
            (peer, result)
        });

        let mut measurements = Vec::with_capacity(self.peers.len());
        for (peer, result) in join_all(rounds).await {
            match result {
                Ok(m) => {
                    debug!(
                        peer = %peer.name,
                        latency_ms = m.latency.as_secs_f64() * 1000.0,
                        loss = m.loss,
                        "Probe round complete"
                    );
                    self.metrics.record_sample(&peer.name, &m);
                    measurements.push((peer.id, m));
                }
                Err(e) => {
                    warn!(peer = %peer.name, error = %e, "Probe failed, keeping previous sample");
                    self.metrics.probe_error(&peer.name);
                }
            }
        }

        let snapshot = self.table.apply_tick(tick, measurements);
        *last = tick;
        self.metrics.set_candidate_count(snapshot.candidates().len());
        debug!(tick, candidates = snapshot.candidates().len(), "Health table updated");
        snapshot
    }

    /// Probe forever at the configured period
    pub async fn run(&self) {
        info!(
            peers = self.peers.len(),
            period_ms = self.period.as_millis() as u64,
            "Starting probe loop"
        );
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }
}
