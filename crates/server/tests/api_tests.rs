//! Integration tests for HTTP API endpoints.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{FakeResolver, TestServer};
use serde_json::{Value, json};
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

/// Helper to make JSON requests.
async fn json_request(
    router: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);

    let body = match body {
        Some(v) => {
            builder = builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => Body::empty(),
    };

    let request = builder.body(body).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let json: Value = if body_bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
    };

    (status, json)
}

/// Poll the status endpoint until the operation leaves PROCESSING.
async fn poll_operation(server: &TestServer, operation_id: &str) -> Value {
    let uri = format!("/v1/operations/{operation_id}");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let (status, body) = json_request(&server.router, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        if body["status"] != "PROCESSING" {
            return body;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("operation {operation_id} did not settle: {body}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_health_check() {
    let server = TestServer::new().await;
    let (status, body) = json_request(&server.router, "GET", "/v1/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_submit_and_poll_operation() {
    let server =
        TestServer::with_resolver(FakeResolver::new().failing(&["Nonexistent Card"])).await;

    let (status, body) = json_request(
        &server.router,
        "POST",
        "/v1/operations",
        Some(json!({ "keys": ["Lightning Bolt", "lightning bolt ", "Nonexistent Card"] })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let operation_id = body["operation_id"].as_str().unwrap().to_string();
    Uuid::parse_str(&operation_id).unwrap();

    let body = poll_operation(&server, &operation_id).await;
    assert_eq!(body["operation_id"], operation_id.as_str());
    assert_eq!(body["status"], "PARTIAL_SUCCESS");

    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["key"], "Lightning Bolt");
    assert_eq!(results[1]["key"], "lightning bolt ");
    assert_eq!(results[0]["url"], FakeResolver::url_for("lightning bolt"));

    let failures = body["failures"].as_array().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0]["key"], "Nonexistent Card");
    assert!(body.get("error").is_none());

    assert_eq!(server.resolver.calls(), 2);
}

#[tokio::test]
async fn test_submit_rejects_empty_batch() {
    let server = TestServer::new().await;
    let (status, body) = json_request(
        &server.router,
        "POST",
        "/v1/operations",
        Some(json!({ "keys": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");
}

#[tokio::test]
async fn test_submit_rejects_oversized_batch() {
    let server = TestServer::new().await;
    let keys: Vec<String> = (0..101).map(|i| format!("card {i}")).collect();
    let (status, _) = json_request(
        &server.router,
        "POST",
        "/v1/operations",
        Some(json!({ "keys": keys })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_submit_honors_configured_batch_limit() {
    let server = TestServer::with_config(|config| {
        config.server.max_batch_keys = 2;
    })
    .await;
    let (status, _) = json_request(
        &server.router,
        "POST",
        "/v1/operations",
        Some(json!({ "keys": ["a", "b", "c"] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_submit_rejects_blank_and_overlong_keys_without_side_effects() {
    let server = TestServer::new().await;

    let (status, body) = json_request(
        &server.router,
        "POST",
        "/v1/operations",
        Some(json!({ "keys": ["Shock", "   "] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("keys[1]"));

    let (status, _) = json_request(
        &server.router,
        "POST",
        "/v1/operations",
        Some(json!({ "keys": ["x".repeat(257)] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Nothing was tracked
    let (status, _) = json_request(&server.router, "GET", "/v1/artifacts/shock", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(server.resolver.calls(), 0);
}

#[tokio::test]
async fn test_submit_rejects_malformed_body() {
    let server = TestServer::new().await;
    let (status, _) = json_request(
        &server.router,
        "POST",
        "/v1/operations",
        Some(json!({ "names": ["Shock"] })),
    )
    .await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_get_unknown_operation() {
    let server = TestServer::new().await;
    let uri = format!("/v1/operations/{}", Uuid::new_v4());
    let (status, body) = json_request(&server.router, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn test_get_operation_with_malformed_id() {
    let server = TestServer::new().await;
    let (status, body) =
        json_request(&server.router, "GET", "/v1/operations/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");
}

#[tokio::test]
async fn test_get_artifact() {
    let server = TestServer::new().await;

    let (status, _) =
        json_request(&server.router, "GET", "/v1/artifacts/Lightning%20Bolt", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = json_request(
        &server.router,
        "POST",
        "/v1/operations",
        Some(json!({ "keys": ["Lightning Bolt"] })),
    )
    .await;
    poll_operation(&server, body["operation_id"].as_str().unwrap()).await;

    let (status, body) =
        json_request(&server.router, "GET", "/v1/artifacts/LIGHTNING%20BOLT", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["key"], "lightning bolt");
    assert_eq!(body["requested_key"], "Lightning Bolt");
    assert_eq!(body["status"], "SUCCESS");
    assert_eq!(body["url"], FakeResolver::url_for("Lightning Bolt"));
    assert!(body["fetched_at"].is_string());
    assert!(body.get("failure_reason").is_none());

    // Reading an artifact never triggers a fetch
    assert_eq!(server.resolver.calls(), 1);
}

#[tokio::test]
async fn test_prometheus_metrics_endpoint_enabled_by_default() {
    easel_server::metrics::register_metrics();
    let server = TestServer::new().await;

    let request = Request::builder()
        .method("GET")
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();
    let response = server.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("easel_"));
}

#[tokio::test]
async fn test_prometheus_metrics_endpoint_disabled_via_config() {
    let server = TestServer::with_config(|config| {
        config.server.metrics_enabled = false;
    })
    .await;

    let request = Request::builder()
        .method("GET")
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();
    let response = server.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
