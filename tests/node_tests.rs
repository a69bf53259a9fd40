//! End-to-end tests of the in-process node: packets run through the shell
//! executor, follow-on jobs and the shared tracker.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use geoetl_relay::config::{NodeConfig, SchedulerConfig};
use geoetl_relay::node::{InvocationQueue, Node};
use geoetl_relay::scheduler::JobPacket;
use geoetl_relay::SchedulerError;

fn test_node_config() -> NodeConfig {
    NodeConfig::new(Duration::from_secs(30))
        .with_exit_when_idle(true)
        .with_scheduler(SchedulerConfig::default().with_safety_margin(Duration::from_millis(100)))
}

fn packet_doc(jobs: Vec<Value>, max_next: usize) -> Value {
    json!({
        "jobs": jobs,
        "job": {"id": "ingest-1", "part": 0, "last": 0, "startTime": "2024-05-01T10:00:00Z"},
        "next": "ingest",
        "maxNext": max_next,
    })
}

fn shell_job(kind: &str, command: &str) -> Value {
    json!({"type": kind, "timeout_secs": 5, "command": command})
}

#[tokio::test]
async fn test_node_runs_packet_until_idle() {
    let (node, rx) = Node::new(test_node_config());
    let tracker = node.tracker();
    let queue = node.queue();

    let jobs = (0..6).map(|_| shell_job("scan", "true")).collect();
    let packet = JobPacket::<Value>::from_document(&packet_doc(jobs, 4), node.introspector().as_ref()).unwrap();
    node.submit(packet, "ingest").await.unwrap();

    timeout(Duration::from_secs(20), node.run(rx, CancellationToken::new()))
        .await
        .expect("node should stop once idle");

    assert_eq!(queue.outstanding(), 0);
    assert!(tracker.completed("ingest-1").await.is_some());
    let scan = tracker.type_counters("scan").await;
    assert_eq!(scan.started, 6);
    assert_eq!(scan.stopped, 6);
    assert_eq!(scan.running, 0);
}

#[tokio::test]
async fn test_follow_on_jobs_run_in_the_same_packet() {
    let (node, rx) = Node::new(test_node_config());
    let tracker = node.tracker();

    let follow_on = r#"echo '{"type": "tile", "timeout_secs": 5, "command": "true"}'"#;
    let jobs = vec![shell_job("scan", follow_on), shell_job("scan", "true")];
    let packet = JobPacket::<Value>::from_document(&packet_doc(jobs, 5), node.introspector().as_ref()).unwrap();
    node.submit(packet, "ingest").await.unwrap();

    timeout(Duration::from_secs(20), node.run(rx, CancellationToken::new()))
        .await
        .expect("node should stop once idle");

    assert_eq!(tracker.type_counters("scan").await.started, 2);
    assert_eq!(tracker.type_counters("tile").await.started, 1);
    assert_eq!(tracker.committed_pending().await, 1);
    assert_eq!(tracker.pending().await, 0);
    assert!(tracker.completed("ingest-1").await.is_some());
}

#[tokio::test]
async fn test_failing_job_is_dropped() {
    let (node, rx) = Node::new(test_node_config());
    let tracker = node.tracker();

    let jobs = vec![shell_job("scan", "exit 1"), shell_job("scan", "true")];
    let packet = JobPacket::<Value>::from_document(&packet_doc(jobs, 5), node.introspector().as_ref()).unwrap();
    node.submit(packet, "ingest").await.unwrap();

    timeout(Duration::from_secs(20), node.run(rx, CancellationToken::new()))
        .await
        .expect("node should stop once idle");

    assert_eq!(tracker.type_counters("scan").await.started, 2);
    assert!(tracker.completed("ingest-1").await.is_some());
}

#[tokio::test]
async fn test_node_stops_on_shutdown() {
    let (node, rx) = Node::new(NodeConfig::new(Duration::from_secs(30)));
    let shutdown = CancellationToken::new();

    let handle = tokio::spawn(node.run(rx, shutdown.clone()));
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.cancel();

    timeout(Duration::from_secs(5), handle)
        .await
        .expect("node should stop on shutdown")
        .unwrap();
}

#[tokio::test]
async fn test_submit_to_closed_queue_fails() {
    let (queue, rx) = InvocationQueue::channel(4);
    drop(rx);

    let packet = JobPacket::<Value>::new("ingest", 5, Default::default());
    let result = queue.submit(packet, "ingest").await;

    assert!(matches!(result, Err(SchedulerError::QueueClosed)));
    assert_eq!(queue.outstanding(), 0);
}

#[tokio::test]
async fn test_queue_counts_outstanding_invocations() {
    let (queue, _rx) = InvocationQueue::channel(4);
    queue
        .submit(JobPacket::<Value>::new("ingest", 5, Default::default()), "ingest")
        .await
        .unwrap();
    queue
        .submit(JobPacket::<Value>::new("ingest", 5, Default::default()), "ingest")
        .await
        .unwrap();

    assert_eq!(queue.outstanding(), 2);
    assert_eq!(*queue.subscribe().borrow(), 2);
}
