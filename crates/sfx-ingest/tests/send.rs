use std::time::Duration;

use sfx_ingest::{IngestClient, IngestConfig, Observation};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(endpoint: &str) -> IngestConfig {
    IngestConfig {
        endpoint: endpoint.to_string(),
        timeout: Duration::from_secs(2),
        batch_size: 10,
        queue_capacity: 16,
        compress: true,
        user_agent_extra: Vec::new(),
    }
}

#[tokio::test]
async fn sends_gauges_to_the_datapoint_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/datapoint"))
        .and(header("X-SF-Token", "test-token"))
        .and(header("Content-Encoding", "gzip"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = IngestClient::new("test-token", config_for(&server.uri()));
    let gauge = Observation::new("cpu.load", 1.5_f64).unwrap();
    client.send(&[gauge], &[], &[]).await.unwrap();

    // Give the background worker a moment to drain the queue.
    client.stop().await;
    assert_eq!(client.sent_batch_count(), 1);
}

#[tokio::test]
async fn empty_send_is_a_no_op() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/datapoint"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = IngestClient::new("test-token", config_for(&server.uri()));
    client.send(&[], &[], &[]).await.unwrap();
    client.stop().await;
}

#[tokio::test]
async fn lost_batch_is_counted_and_does_not_stop_the_worker() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/datapoint"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = IngestClient::new("test-token", config_for(&server.uri()));
    let gauge = Observation::new("cpu.load", 1_i64).unwrap();
    client.send(&[gauge], &[], &[]).await.unwrap();
    client.stop().await;

    let counters = client.reset_error_counters().await;
    assert_eq!(counters.get("HttpStatusError"), Some(&1));
    assert_eq!(client.sent_batch_count(), 0);
}

#[tokio::test]
async fn queue_full_returns_back_pressure_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/datapoint"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let mut config = config_for(&server.uri());
    config.queue_capacity = 1;
    config.batch_size = 1;
    let client = IngestClient::new("test-token", config);

    // Both observations are enqueued within a single `send` call, with no
    // await point in between that could let the background worker drain the
    // first one, so the second `try_send` against the capacity-1 queue is
    // guaranteed to observe it still full.
    let a = Observation::new("m", 1_i64).unwrap();
    let b = Observation::new("m", 2_i64).unwrap();
    let result = client.send(&[a, b], &[], &[]).await;
    assert!(matches!(result, Err(sfx_ingest::IngestError::QueueFull)));
    client.stop().await;
}

#[tokio::test]
async fn stop_is_idempotent_and_rejects_later_sends() {
    let server = MockServer::start().await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

    let client = IngestClient::new("test-token", config_for(&server.uri()));
    client.stop().await;
    client.stop().await;

    let gauge = Observation::new("m", 1_i64).unwrap();
    let result = client.send(&[gauge], &[], &[]).await;
    assert!(matches!(result, Err(sfx_ingest::IngestError::AlreadyStopped)));
}
