//! Prometheus metrics for the failover agent
//!
//! Values are recorded through the `metrics` facade; `/metrics` renders the
//! exporter handle returned by [`install`]. Without an installed recorder
//! every update is a no-op, which is what tests rely on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use metrics::{counter, describe_counter, describe_gauge, gauge, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::probe::Measurement;

pub const IS_REROUTING: &str = "fabric_director_is_rerouting";
pub const CANDIDATE_NODES: &str = "fabric_director_candidate_nodes";
pub const NODE_LATENCY: &str = "fabric_director_node_latency";
pub const NODE_LOSS: &str = "fabric_director_node_loss";
pub const PROBE_ERRORS: &str = "fabric_director_probe_errors_total";
pub const REROUTE_TOTAL: &str = "fabric_director_reroute_total";

/// Install the global Prometheus recorder and describe every metric
pub fn install() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe();
    Ok(handle)
}

/// A handle whose recorder is not installed globally; renders nothing
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

fn describe() {
    describe_gauge!(IS_REROUTING, "1 while prefixes are routed to a peer, else 0");
    describe_gauge!(CANDIDATE_NODES, "Peers currently meeting the latency and loss thresholds");
    describe_gauge!(NODE_LATENCY, Unit::Seconds, "Mean RTT of the last probe round");
    describe_gauge!(NODE_LOSS, "Unanswered fraction of the last probe round");
    describe_counter!(PROBE_ERRORS, "Probe rounds that failed to produce a measurement");
    describe_counter!(REROUTE_TOTAL, "Reroute transitions by outcome");
}

/// Recorder front-end labelled with this node's name
///
/// Clones share the last published rerouting flag.
#[derive(Debug, Clone)]
pub struct FabricMetrics {
    src: String,
    rerouting: Arc<AtomicBool>,
}

impl FabricMetrics {
    pub fn new(local_name: impl Into<String>) -> Self {
        Self {
            src: local_name.into(),
            rerouting: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_rerouting(&self, rerouting: bool) {
        self.rerouting.store(rerouting, Ordering::SeqCst);
        gauge!(IS_REROUTING, if rerouting { 1.0 } else { 0.0 });
    }

    /// Value last written to the rerouting gauge
    pub fn is_rerouting(&self) -> bool {
        self.rerouting.load(Ordering::SeqCst)
    }

    pub fn set_candidate_count(&self, count: usize) {
        gauge!(CANDIDATE_NODES, count as f64);
    }

    pub fn record_sample(&self, dst: &str, m: &Measurement) {
        gauge!(
            NODE_LATENCY,
            m.latency.as_secs_f64(),
            "src" => self.src.clone(),
            "dst" => dst.to_string()
        );
        gauge!(NODE_LOSS, m.loss, "src" => self.src.clone(), "dst" => dst.to_string());
    }

    pub fn probe_error(&self, dst: &str) {
        counter!(PROBE_ERRORS, 1, "dst" => dst.to_string());
    }

    /// `outcome` is one of `direct`, `rerouted`, `indeterminate`
    pub fn reroute(&self, outcome: &'static str) {
        counter!(REROUTE_TOTAL, 1, "outcome" => outcome);
    }
}
