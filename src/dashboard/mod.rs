use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::node::InvocationQueue;
use crate::worker::InMemoryTracker;

#[derive(Clone)]
pub struct DashboardState {
    pub tracker: Arc<InMemoryTracker>,
    pub queue: InvocationQueue,
}

#[derive(Serialize)]
struct StatusResponse {
    outstanding_invocations: usize,
    pending: usize,
    committed_pending: u64,
    running: usize,
}

/// Read-only status routes over the node's tracker and queue.
pub fn router(state: DashboardState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/status", get(status_handler))
        .route("/api/types", get(types_handler))
        .route("/api/jobs", get(jobs_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_dashboard(addr: SocketAddr, state: DashboardState) {
    let app = router(state);

    tracing::info!(addr = %addr, "Starting dashboard server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind dashboard server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "Dashboard server failed");
    }
}

async fn status_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    let snapshot = state.tracker.snapshot().await;
    Json(StatusResponse {
        outstanding_invocations: state.queue.outstanding(),
        pending: snapshot.pending,
        committed_pending: snapshot.committed_pending,
        running: snapshot.types.iter().map(|t| t.counters.running).sum(),
    })
}

async fn types_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(state.tracker.snapshot().await.types)
}

async fn jobs_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(state.tracker.snapshot().await.jobs)
}
