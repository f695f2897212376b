//! HTTP control surface
//!
//! Thin axum layer over [`ControlSurface`]; reroute errors map to status
//! codes in [`ApiError`].

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::control::{CandidatesView, ControlSurface, RerouteOutcome, StatusView};
use crate::error::RerouteError;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub control: Arc<ControlSurface>,
    pub metrics: PrometheusHandle,
}

/// Create the control router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/reroute", get(reroute))
        .route("/noreroute", get(noreroute))
        .route("/candidates", get(candidates))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ===== Route Handlers =====

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Reroute to `?to=<peer>` or to the closest candidate
async fn reroute(
    State(state): State<AppState>,
    Query(params): Query<RerouteQuery>,
) -> Result<Json<RerouteOutcome>, ApiError> {
    let to = params.to.as_deref().filter(|s| !s.is_empty());
    Ok(Json(state.control.reroute(to).await?))
}

async fn noreroute(State(state): State<AppState>) -> Result<Json<RerouteOutcome>, ApiError> {
    Ok(Json(state.control.noreroute().await?))
}

async fn candidates(State(state): State<AppState>) -> Json<CandidatesView> {
    Json(state.control.candidates())
}

async fn status(State(state): State<AppState>) -> Json<StatusView> {
    Json(state.control.status())
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

// ===== Request/Response Types =====

#[derive(Deserialize)]
struct RerouteQuery {
    /// Peer name; empty or absent means "closest candidate"
    to: Option<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

// ===== Error Handling =====

#[derive(Debug)]
struct ApiError(RerouteError);

impl From<RerouteError> for ApiError {
    fn from(err: RerouteError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RerouteError::NoCandidate => StatusCode::CONFLICT,
            RerouteError::UnknownPeer(_) => StatusCode::NOT_FOUND,
            RerouteError::SelfTarget(_) => StatusCode::BAD_REQUEST,
            RerouteError::Indeterminate { .. } => {
                tracing::error!("Reroute left host indeterminate: {}", self.0);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.0.to_string(),
            "indeterminate": self.0.is_indeterminate(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::AddressPlan;
    use crate::health::PeerHealthTable;
    use crate::metrics::{detached_handle, FabricMetrics};
    use crate::net::{MemoryNetwork, NetOp};
    use crate::peer::{Peer, PeerId, Topology};
    use crate::policy::Thresholds;
    use crate::probe::Measurement;
    use crate::reroute::RerouteController;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use tower::ServiceExt;

    struct Fixture {
        router: Router,
        table: Arc<PeerHealthTable>,
        net: Arc<MemoryNetwork>,
    }

    fn fixture() -> Fixture {
        let plan = AddressPlan::new("10.254.0.", "fd00:254::");
        let node = |id: u8, name: &str| Peer {
            id: PeerId(id),
            name: name.into(),
            external: Ipv4Addr::new(198, 51, 100, id),
            internal: plan.internal(id).unwrap(),
        };
        let topology = Arc::new(Topology {
            local: node(1, "a"),
            peers: vec![node(2, "b"), node(3, "c")],
            plan: plan.clone(),
        });
        let table = Arc::new(PeerHealthTable::new(
            &topology.peers,
            Thresholds {
                latency: Duration::from_millis(100),
                loss: 0.1,
            },
        ));
        let net = Arc::new(MemoryNetwork::new());
        let controller = Arc::new(RerouteController::new(
            net.clone(),
            vec!["192.0.2.0/24".parse().unwrap(), "2001:db8::/48".parse().unwrap()],
            FabricMetrics::new("a"),
        ));
        let control = Arc::new(ControlSurface::new(topology, table.clone(), controller));
        Fixture {
            router: create_router(AppState {
                control,
                metrics: detached_handle(),
            }),
            table,
            net,
        }
    }

    async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn sample(latency_ms: u64) -> Measurement {
        Measurement {
            latency: Duration::from_millis(latency_ms),
            loss: 0.0,
        }
    }

    #[tokio::test]
    async fn test_health_check() {
        let f = fixture();
        let (status, body) = get(&f.router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_reroute_without_candidates_is_conflict() {
        let f = fixture();
        let (status, body) = get(&f.router, "/reroute").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "no candidate available");
        assert_eq!(body["indeterminate"], false);
    }

    #[tokio::test]
    async fn test_reroute_to_closest_then_cancel() {
        let f = fixture();
        f.table.apply_tick(1, [(PeerId(2), sample(40)), (PeerId(3), sample(150))]);

        let (status, body) = get(&f.router, "/reroute").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["target"]["name"], "b");
        assert_eq!(f.net.routes().len(), 2);

        let (status, body) = get(&f.router, "/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "rerouted");
        assert_eq!(body["consistent"], true);

        let (status, body) = get(&f.router, "/noreroute").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rerouted"], false);
        assert!(f.net.routes().is_empty());
        assert!(f.net.local_handling());
    }

    #[tokio::test]
    async fn test_reroute_to_named_peer() {
        let f = fixture();
        let (status, body) = get(&f.router, "/reroute?to=c").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["target"]["id"], 3);

        let (status, _) = get(&f.router, "/reroute?to=nowhere").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = get(&f.router, "/reroute?to=a").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_indeterminate_failure_is_500() {
        let f = fixture();
        f.net.fail_on(|op| matches!(op, NetOp::AddRoute { .. }));
        let (status, body) = get(&f.router, "/reroute?to=b").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["indeterminate"], true);

        let (_, body) = get(&f.router, "/status").await;
        assert_eq!(body["indeterminate"], true);
        assert_eq!(body["consistent"], false);
    }

    #[tokio::test]
    async fn test_candidates_listing() {
        let f = fixture();
        f.table.apply_tick(2, [(PeerId(2), sample(40)), (PeerId(3), sample(30))]);
        let (status, body) = get(&f.router, "/candidates").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tick"], 2);
        let names: Vec<_> = body["candidates"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn test_metrics_is_plain_text() {
        let f = fixture();
        let response = f
            .router
            .clone()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
    }
}
