//! Control surface
//!
//! Transport-independent bodies of the operator actions. Every call reads
//! one [`HealthSnapshot`](crate::health::HealthSnapshot) and, where it
//! mutates, hands the decision to the [`RerouteController`] synchronously.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::RerouteError;
use crate::health::PeerHealthTable;
use crate::peer::{PeerId, Topology};
use crate::policy::Candidate;
use crate::reroute::{RerouteController, RerouteState, RouteTarget};

/// Result of a successful reroute or noreroute request
#[derive(Debug, Clone, Serialize)]
pub struct RerouteOutcome {
    pub rerouted: bool,
    /// Chosen peer, absent when back to direct
    pub target: Option<TargetView>,
    /// Candidate-set tick the choice was made from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tick: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetView {
    pub id: PeerId,
    pub name: String,
}

impl From<&RouteTarget> for TargetView {
    fn from(t: &RouteTarget) -> Self {
        Self {
            id: t.id,
            name: t.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateView {
    pub id: PeerId,
    pub name: String,
    pub latency_ms: f64,
    pub loss: f64,
    pub measured_at: DateTime<Utc>,
}

impl From<&Candidate> for CandidateView {
    fn from(c: &Candidate) -> Self {
        Self {
            id: c.id,
            name: c.name.clone(),
            latency_ms: c.sample.latency.as_secs_f64() * 1000.0,
            loss: c.sample.loss,
            measured_at: c.sample.measured_at,
        }
    }
}

/// Candidate set of one tick, best first
#[derive(Debug, Clone, Serialize)]
pub struct CandidatesView {
    pub tick: u64,
    pub candidates: Vec<CandidateView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub node: String,
    pub state: String,
    pub target: Option<TargetView>,
    /// Last transition completed every step
    pub consistent: bool,
    pub indeterminate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub changed_at: Option<DateTime<Utc>>,
    pub candidates: usize,
    pub tick: u64,
}

pub struct ControlSurface {
    topology: Arc<Topology>,
    table: Arc<PeerHealthTable>,
    controller: Arc<RerouteController>,
}

impl ControlSurface {
    pub fn new(
        topology: Arc<Topology>,
        table: Arc<PeerHealthTable>,
        controller: Arc<RerouteController>,
    ) -> Self {
        Self {
            topology,
            table,
            controller,
        }
    }

    /// Reroute to the named peer, or to the closest candidate.
    ///
    /// A named peer is used whether or not it is a candidate. With no
    /// candidate the current state is left as is.
    pub async fn reroute(&self, to: Option<&str>) -> Result<RerouteOutcome, RerouteError> {
        let (target, tick) = match to {
            Some(name) => {
                if name == self.topology.local.name {
                    return Err(RerouteError::SelfTarget(name.to_string()));
                }
                let peer = self
                    .topology
                    .peer_by_name(name)
                    .ok_or_else(|| RerouteError::UnknownPeer(name.to_string()))?;
                (RouteTarget::from(peer), None)
            }
            None => {
                let snapshot = self.table.snapshot();
                let best = snapshot.closest().ok_or_else(|| {
                    warn!(tick = snapshot.tick(), "Reroute requested with no candidate");
                    RerouteError::NoCandidate
                })?;
                let peer = self
                    .topology
                    .peer_by_id(best.id)
                    .ok_or_else(|| RerouteError::UnknownPeer(best.name.clone()))?;
                (RouteTarget::from(peer), Some(snapshot.tick()))
            }
        };

        info!(peer = %target.name, "Rerouting");
        let state = self.controller.set_reroute(Some(target)).await?;
        Ok(RerouteOutcome {
            rerouted: true,
            target: state.target().map(TargetView::from),
            tick,
        })
    }

    pub async fn noreroute(&self) -> Result<RerouteOutcome, RerouteError> {
        info!("Cancelling reroute");
        self.controller.set_reroute(None).await?;
        Ok(RerouteOutcome {
            rerouted: false,
            target: None,
            tick: None,
        })
    }

    pub fn candidates(&self) -> CandidatesView {
        let snapshot = self.table.snapshot();
        CandidatesView {
            tick: snapshot.tick(),
            candidates: snapshot.candidates().iter().map(CandidateView::from).collect(),
        }
    }

    pub fn status(&self) -> StatusView {
        let status = self.controller.status();
        let snapshot = self.table.snapshot();
        StatusView {
            node: self.topology.local.name.clone(),
            state: match status.state {
                RerouteState::Direct => "direct".into(),
                RerouteState::ReroutedTo(_) => "rerouted".into(),
            },
            target: status.state.target().map(TargetView::from),
            consistent: status.verified,
            indeterminate: status.is_indeterminate(),
            last_error: status.last_error.clone(),
            changed_at: status.changed_at,
            candidates: snapshot.candidates().len(),
            tick: snapshot.tick(),
        }
    }
}
