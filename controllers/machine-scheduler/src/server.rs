//! Probe, metrics and availability HTTP server.
//!
//! - `GET /healthz` - process liveness
//! - `GET /readyz` - readiness, with the current leadership
//! - `GET /metrics` - Prometheus text exposition
//! - `GET /v1/availability` - vacant machines per class

use crate::error::ControllerError;
use crate::leader::Leadership;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crate::reconciler::availability::AvailabilityReport;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared state of the HTTP handlers
#[derive(Debug, Clone)]
pub struct ServerState {
    pub reconciler: Arc<Reconciler>,
    pub leadership: Leadership,
    pub metrics: Arc<Metrics>,
}

#[derive(Debug, Serialize)]
struct ProbeResponse {
    status: &'static str,
    holder: String,
    leader: bool,
}

/// Build the router
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/v1/availability", get(availability))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until the listener fails
pub async fn serve(addr: SocketAddr, state: ServerState) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Followers are ready too: they hold no work but take over on lease expiry
async fn readyz(State(state): State<ServerState>) -> impl IntoResponse {
    Json(ProbeResponse {
        status: "ok",
        holder: state.leadership.holder().to_string(),
        leader: state.leadership.is_leader(),
    })
}

async fn metrics(State(state): State<ServerState>) -> Response {
    match state.metrics.render() {
        Ok(body) => ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response(),
        Err(e) => {
            error!("Failed to render metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn availability(State(state): State<ServerState>) -> Result<Json<AvailabilityReport>, (StatusCode, String)> {
    state.reconciler.availability().await.map(Json).map_err(|e| {
        error!("Failed to compute availability: {}", e);
        (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
    })
}
