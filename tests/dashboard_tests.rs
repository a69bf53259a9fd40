use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use geoetl_relay::dashboard::{router, DashboardState};
use geoetl_relay::node::InvocationQueue;
use geoetl_relay::scheduler::{JobPacket, SyncTracker};
use geoetl_relay::worker::InMemoryTracker;

/// Helper to create test state
fn create_test_state() -> (
    DashboardState,
    tokio::sync::mpsc::Receiver<geoetl_relay::node::Invocation>,
) {
    let (queue, rx) = InvocationQueue::channel(16);
    let state = DashboardState {
        tracker: Arc::new(InMemoryTracker::new()),
        queue,
    };
    (state, rx)
}

async fn get_json(app: Router, uri: &str) -> Value {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_status_endpoint_when_idle() {
    let (state, _rx) = create_test_state();

    let json = get_json(router(state), "/api/status").await;

    assert_eq!(json["outstanding_invocations"], 0);
    assert_eq!(json["pending"], 0);
    assert_eq!(json["committed_pending"], 0);
    assert_eq!(json["running"], 0);
}

#[tokio::test]
async fn test_status_endpoint_reflects_activity() {
    let (state, _rx) = create_test_state();
    state
        .queue
        .submit(JobPacket::new("ingest", 5, Default::default()), "ingest")
        .await
        .unwrap();
    state.tracker.register_start("scan", 3).await.unwrap();
    state.tracker.register_start("tile", 2).await.unwrap();
    state.tracker.add_pending(4).await.unwrap();

    let json = get_json(router(state), "/api/status").await;

    assert_eq!(json["outstanding_invocations"], 1);
    assert_eq!(json["pending"], 4);
    assert_eq!(json["running"], 5);
}

#[tokio::test]
async fn test_types_endpoint() {
    let (state, _rx) = create_test_state();
    state.tracker.register_start("tile", 2).await.unwrap();
    state.tracker.register_start("scan", 1).await.unwrap();
    state.tracker.register_stop("scan", 1).await.unwrap();

    let json = get_json(router(state), "/api/types").await;
    let types = json.as_array().unwrap();

    assert_eq!(types.len(), 2);
    // Sorted by type name
    assert_eq!(types[0]["job_type"], "scan");
    assert_eq!(types[0]["running"], 0);
    assert_eq!(types[0]["stopped"], 1);
    assert_eq!(types[1]["job_type"], "tile");
    assert_eq!(types[1]["running"], 2);
}

#[tokio::test]
async fn test_jobs_endpoint_empty() {
    let (state, _rx) = create_test_state();

    let json = get_json(router(state), "/api/jobs").await;

    assert!(json.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_jobs_endpoint_shows_partition_progress() {
    let (state, _rx) = create_test_state();
    state
        .tracker
        .register_partition_finished("ingest-1", 0)
        .await
        .unwrap();

    let json = get_json(router(state), "/api/jobs").await;
    let jobs = json.as_array().unwrap();

    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["job_id"], "ingest-1");
    assert_eq!(jobs[0]["cleared"], 1);
    assert_eq!(jobs[0]["finished"], serde_json::json!([0]));
    assert!(jobs[0]["completed_ms"].is_null());
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let (state, _rx) = create_test_state();

    let response = router(state)
        .oneshot(
            Request::builder()
                .uri("/api/nonexistent")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
