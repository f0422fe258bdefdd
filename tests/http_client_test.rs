// Outbound call client tests against a local mock server.

use music_adapter::circuit_breaker::CircuitBreakerConfig;
use music_adapter::client::CallClient;
use music_adapter::error::AppError;
use music_adapter::metrics::Metrics;
use music_adapter::retry::BackoffPolicy;
use serde_json::json;
use std::time::Duration;

fn client(endpoint: String, retries: u32, threshold: u32, reset: Duration) -> CallClient {
    CallClient::with_policies(
        "test-service",
        endpoint,
        Duration::from_secs(2),
        Metrics::new().unwrap(),
        BackoffPolicy::new(retries, Duration::from_millis(5)),
        CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_timeout: reset,
        },
    )
    .unwrap()
}

#[tokio::test]
async fn test_successful_call_returns_parsed_body() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/preprocess")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"clean_text": "HELLO"}"#)
        .expect(1)
        .create_async()
        .await;

    let client = client(
        format!("{}/preprocess", server.url()),
        3,
        5,
        Duration::from_secs(60),
    );
    let response = client.call(&json!({"text": "hello"})).await.unwrap();

    assert_eq!(response["clean_text"], "HELLO");
    assert_eq!(client.breaker().consecutive_failures(), 0);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_server_errors_are_retried_then_reported() {
    let mut server = mockito::Server::new_async().await;
    // 2 retries means 3 attempts in total
    let mock = server
        .mock("POST", "/generate")
        .with_status(500)
        .expect(3)
        .create_async()
        .await;

    let client = client(
        format!("{}/generate", server.url()),
        2,
        5,
        Duration::from_secs(60),
    );
    let err = client.call(&json!({"clean_text": "x"})).await.unwrap_err();

    assert!(matches!(err, AppError::Status { status: 500, .. }));
    // Retries are internal; the breaker sees one terminal failure
    assert_eq!(client.breaker().consecutive_failures(), 1);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_non_json_body_is_a_call_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/preprocess")
        .with_status(200)
        .with_body("not json")
        .create_async()
        .await;

    let client = client(
        format!("{}/preprocess", server.url()),
        0,
        5,
        Duration::from_secs(60),
    );
    let err = client.call(&json!({"text": "x"})).await.unwrap_err();

    match err {
        AppError::Call { service, message } => {
            assert_eq!(service, "test-service");
            assert!(message.contains("invalid JSON response"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_open_circuit_fails_fast_without_network_attempt() {
    let mut server = mockito::Server::new_async().await;
    // Exactly two requests hit the wire; the third call is rejected locally
    let mock = server
        .mock("POST", "/generate")
        .with_status(503)
        .expect(2)
        .create_async()
        .await;

    let client = client(
        format!("{}/generate", server.url()),
        0,
        2,
        Duration::from_secs(60),
    );

    for _ in 0..2 {
        let err = client.call(&json!({})).await.unwrap_err();
        assert!(matches!(err, AppError::Status { status: 503, .. }));
    }
    assert!(client.breaker().is_open());

    let err = client.call(&json!({})).await.unwrap_err();
    assert!(matches!(err, AppError::CircuitOpen(_)));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_fail_fast_rejection_skips_latency_observation() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/generate")
        .with_status(500)
        .create_async()
        .await;

    let metrics = Metrics::new().unwrap();
    let client = CallClient::with_policies(
        "generate",
        format!("{}/generate", server.url()),
        Duration::from_secs(2),
        metrics.clone(),
        BackoffPolicy::new(0, Duration::from_millis(5)),
        CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_secs(60),
        },
    )
    .unwrap();

    // One real attempt opens the breaker and records one latency sample
    client.call(&json!({})).await.unwrap_err();
    // The rejection is counted but leaves the histogram untouched
    assert!(matches!(
        client.call(&json!({})).await.unwrap_err(),
        AppError::CircuitOpen(_)
    ));

    let exported = metrics.export();
    assert!(exported.contains("outcome=\"circuit_open\""));
    assert!(exported
        .contains("music_adapter_request_latency_seconds_count{service=\"generate\"} 1"));
}

#[tokio::test]
async fn test_success_closes_circuit_after_failures() {
    let mut server = mockito::Server::new_async().await;
    let failing = server
        .mock("POST", "/preprocess")
        .with_status(500)
        .expect(1)
        .create_async()
        .await;

    let client = client(
        format!("{}/preprocess", server.url()),
        0,
        5,
        Duration::from_secs(60),
    );
    client.call(&json!({})).await.unwrap_err();
    assert_eq!(client.breaker().consecutive_failures(), 1);
    failing.assert_async().await;

    // Newer mocks take precedence over satisfied ones
    server
        .mock("POST", "/preprocess")
        .with_status(200)
        .with_body(r#"{"clean_text": "ok"}"#)
        .create_async()
        .await;

    client.call(&json!({})).await.unwrap();
    assert_eq!(client.breaker().consecutive_failures(), 0);
}

#[tokio::test]
async fn test_reset_window_allows_probe_call() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/generate")
        .with_status(500)
        .create_async()
        .await;

    let client = client(
        format!("{}/generate", server.url()),
        0,
        1,
        Duration::from_millis(50),
    );

    client.call(&json!({})).await.unwrap_err();
    assert!(client.breaker().is_open());
    assert!(matches!(
        client.call(&json!({})).await.unwrap_err(),
        AppError::CircuitOpen(_)
    ));

    tokio::time::sleep(Duration::from_millis(80)).await;

    // Past the reset window the call reaches the server again
    let err = client.call(&json!({})).await.unwrap_err();
    assert!(matches!(err, AppError::Status { status: 500, .. }));
}
