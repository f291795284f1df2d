//! HTTP query and admission surface

mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use common::*;
use serde_json::{json, Value};
use tower::ServiceExt;

use tnf_recovery::presentation::routes::api_router;

fn app(cluster: &TestCluster) -> Router {
    api_router().with_state(cluster.state.clone())
}

async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health_checker() {
    let cluster = TestCluster::converged();
    let (status, body) = send(app(&cluster), Method::GET, "/api/healthchecker", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
}

#[tokio::test]
async fn test_snapshot_and_decision() {
    let cluster = TestCluster::converged();
    cluster.refresh().await;

    let (status, snapshot) = send(app(&cluster), Method::GET, "/api/cluster/snapshot", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["healthy"], true);
    assert_eq!(snapshot["available_nodes"], 2);

    let (status, decision) = send(app(&cluster), Method::GET, "/api/cluster/decision", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decision["allow_rebooting_rollout"], true);
}

#[tokio::test]
async fn test_reconciler_status() {
    let cluster = TestCluster::converged();
    cluster.reconcile().await.unwrap();

    let (status, body) = send(app(&cluster), Method::GET, "/api/cluster/reconciler", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["local_node"], MASTER_0);
    assert_eq!(body["passes"], 1);
    assert_eq!(body["last_outcome"]["result"]["result"], "converged");
    assert!(body["outstanding_violation"].is_null());
}

#[tokio::test]
async fn test_disruption_budget_over_http() {
    let cluster = TestCluster::converged();
    cluster.fail_node(MASTER_1).await;

    let (status, granted) = send(
        app(&cluster),
        Method::POST,
        "/api/disruptions",
        Some(json!({"kind": "eviction"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(granted["counted"], true);
    let permit_id = granted["permit_id"].as_str().unwrap().to_string();

    let (status, refused) = send(
        app(&cluster),
        Method::POST,
        "/api/disruptions",
        Some(json!({"kind": "eviction"})),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(refused["retryable"], true);

    let (status, _) = send(
        app(&cluster),
        Method::DELETE,
        &format!("/api/disruptions/{}", permit_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(
        app(&cluster),
        Method::POST,
        "/api/disruptions",
        Some(json!({"kind": "eviction"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_rebooting_rollout_on_survivor_is_429() {
    let cluster = TestCluster::converged();
    cluster.fail_node(MASTER_1).await;

    let (status, _) = send(
        app(&cluster),
        Method::POST,
        "/api/disruptions",
        Some(json!({"kind": "rebooting_rollout", "target_node": MASTER_0})),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    let (status, read) = send(
        app(&cluster),
        Method::POST,
        "/api/disruptions",
        Some(json!({"kind": "read"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(read["counted"], false);
}

#[tokio::test]
async fn test_invalid_requests() {
    let cluster = TestCluster::converged();

    // Rejected by the JSON extractor, so the body is plain text
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/disruptions")
        .header("content-type", "application/json")
        .body(Body::from(json!({"kind": "drain-everything"}).to_string()))
        .unwrap();
    let response = app(&cluster).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(cluster.state.guard.outstanding(), 0);

    let (status, _) = send(app(&cluster), Method::DELETE, "/api/disruptions/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        app(&cluster),
        Method::DELETE,
        "/api/disruptions/6f1c1d6e-5a34-4c1b-9f0e-2b7d8c9a0e11",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
