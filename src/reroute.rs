//! Reroute controller
//!
//! Two states: [`RerouteState::Direct`] (prefixes handled locally, no fabric
//! routes) and [`RerouteState::ReroutedTo`] (local handling off, one static
//! route per prefix toward the target's internal address).
//!
//! Step order is fixed in both directions:
//! - entering: disable local handling, then install routes
//! - leaving: remove routes, then enable local handling
//!
//! Transitions are serialized by an async mutex held for the whole sequence,
//! and the sequence runs to completion even if the requester goes away.
//! A step failure stops the sequence and leaves the controller flagged
//! indeterminate; the next request re-applies every step instead of
//! short-circuiting.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::addressing::InternalAddrs;
use crate::error::{RerouteError, SetupError};
use crate::metrics::FabricMetrics;
use crate::net::{NetworkOps, RouteSpec, ROUTE_METRIC};
use crate::peer::{Peer, PeerId};

/// The peer prefixes are routed toward
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteTarget {
    pub id: PeerId,
    pub name: String,
    pub internal: InternalAddrs,
}

impl From<&Peer> for RouteTarget {
    fn from(peer: &Peer) -> Self {
        Self {
            id: peer.id,
            name: peer.name.clone(),
            internal: peer.internal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RerouteState {
    #[default]
    Direct,
    ReroutedTo(RouteTarget),
}

impl RerouteState {
    pub fn target(&self) -> Option<&RouteTarget> {
        match self {
            Self::Direct => None,
            Self::ReroutedTo(t) => Some(t),
        }
    }

    pub fn is_rerouted(&self) -> bool {
        matches!(self, Self::ReroutedTo(_))
    }
}

impl fmt::Display for RerouteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::ReroutedTo(t) => write!(f, "rerouted to {} ({})", t.name, t.id),
        }
    }
}

/// Published controller state
#[derive(Debug, Clone, Default)]
pub struct RerouteStatus {
    /// Last requested state; only authoritative when `verified`
    pub state: RerouteState,
    /// Every step of the last transition succeeded
    pub verified: bool,
    /// Failure of the last transition, if it left the host indeterminate
    pub last_error: Option<String>,
    pub changed_at: Option<DateTime<Utc>>,
}

impl RerouteStatus {
    pub fn is_indeterminate(&self) -> bool {
        self.last_error.is_some()
    }
}

pub struct RerouteController {
    steps: Steps,
    transition: Arc<Mutex<()>>,
    status: Arc<RwLock<RerouteStatus>>,
    metrics: FabricMetrics,
}

impl RerouteController {
    /// Starts in `Direct`, unverified: the first request always applies
    /// its steps, so a host left rerouted by an earlier run is reconciled.
    pub fn new(net: Arc<dyn NetworkOps>, prefixes: Vec<IpNet>, metrics: FabricMetrics) -> Self {
        metrics.set_rerouting(false);
        Self {
            steps: Steps {
                net,
                prefixes: prefixes.into(),
            },
            transition: Arc::new(Mutex::new(())),
            status: Arc::new(RwLock::new(RerouteStatus::default())),
            metrics,
        }
    }

    /// Current published status. Never waits on an in-flight transition.
    pub fn status(&self) -> RerouteStatus {
        self.status.read().clone()
    }

    pub fn state(&self) -> RerouteState {
        self.status.read().state.clone()
    }

    /// Route every prefix to `target`, or back to local handling for `None`.
    ///
    /// The steps run on their own task, which owns the transition lock, so
    /// dropping this future does not cut a sequence short.
    pub async fn set_reroute(
        &self,
        target: Option<RouteTarget>,
    ) -> Result<RerouteState, RerouteError> {
        let transition = self.transition.clone().lock_owned().await;
        let desired = match target {
            Some(t) => RerouteState::ReroutedTo(t),
            None => RerouteState::Direct,
        };

        {
            let mut status = self.status.write();
            if status.verified && status.state == desired {
                debug!(state = %desired, "Already in requested state");
                return Ok(desired);
            }
            // Unverified until the last step succeeds
            *status = RerouteStatus {
                state: desired.clone(),
                verified: false,
                last_error: Some(format!("transition to {} in progress", desired)),
                changed_at: Some(Utc::now()),
            };
        }

        let task = {
            let steps = self.steps.clone();
            let status = self.status.clone();
            let metrics = self.metrics.clone();
            let desired = desired.clone();
            tokio::spawn(async move {
                let _transition = transition;
                steps.apply(desired, &status, &metrics).await
            })
        };

        match task.await {
            Ok(result) => result,
            Err(e) => {
                let source = SetupError::Interrupted(e.to_string());
                error!(state = %desired, error = %source, "Reroute task did not finish");
                {
                    let mut status = self.status.write();
                    status.verified = false;
                    status.last_error = Some(source.to_string());
                }
                self.metrics.reroute("indeterminate");
                Err(RerouteError::Indeterminate {
                    target: desired,
                    step: "transition task".into(),
                    source,
                })
            }
        }
    }
}

/// Host mutations for one transition
#[derive(Clone)]
struct Steps {
    net: Arc<dyn NetworkOps>,
    prefixes: Arc<[IpNet]>,
}

impl Steps {
    async fn apply(
        &self,
        desired: RerouteState,
        status: &RwLock<RerouteStatus>,
        metrics: &FabricMetrics,
    ) -> Result<RerouteState, RerouteError> {
        // Rerouting from the first step on; direct only once fully withdrawn
        if desired.is_rerouted() {
            metrics.set_rerouting(true);
        }
        let applied = match &desired {
            RerouteState::Direct => self.withdraw().await,
            RerouteState::ReroutedTo(t) => self.install(t).await,
        };

        match applied {
            Ok(()) => {
                if !desired.is_rerouted() {
                    metrics.set_rerouting(false);
                }
                *status.write() = RerouteStatus {
                    state: desired.clone(),
                    verified: true,
                    last_error: None,
                    changed_at: Some(Utc::now()),
                };
                metrics.reroute(if desired.is_rerouted() { "rerouted" } else { "direct" });
                info!(state = %desired, prefixes = self.prefixes.len(), "Reroute state changed");
                Ok(desired)
            }
            Err((step, source)) => {
                error!(
                    state = %desired,
                    step = %step,
                    error = %source,
                    "Reroute transition failed; host state is indeterminate"
                );
                *status.write() = RerouteStatus {
                    state: desired.clone(),
                    verified: false,
                    last_error: Some(format!("{}: {}", step, source)),
                    changed_at: Some(Utc::now()),
                };
                metrics.reroute("indeterminate");
                Err(RerouteError::Indeterminate {
                    target: desired,
                    step,
                    source,
                })
            }
        }
    }

    async fn install(&self, target: &RouteTarget) -> Result<(), (String, SetupError)> {
        self.net
            .set_local_handling(false)
            .await
            .map_err(|e| ("disable local handling".to_string(), e))?;

        for prefix in self.prefixes.iter() {
            let route = RouteSpec {
                prefix: *prefix,
                nexthop: target.internal.nexthop_for(prefix),
                metric: ROUTE_METRIC,
            };
            self.net
                .add_route(&route)
                .await
                .map_err(|e| (format!("install route {}", route), e))?;
        }
        Ok(())
    }

    async fn withdraw(&self) -> Result<(), (String, SetupError)> {
        for prefix in self.prefixes.iter() {
            self.net
                .delete_route(prefix)
                .await
                .map_err(|e| (format!("remove route {}", prefix), e))?;
        }

        self.net
            .set_local_handling(true)
            .await
            .map_err(|e| ("enable local handling".to_string(), e))
    }
}
