//! Scenario: preconfigured rule listing, backend attachment, health checks,
//! and request cancellation.
//!
//! A request that outlives its deadline, or is in flight when the process
//! begins shutting down, ends with 503 and does not run any later step.

use std::sync::Arc;
use std::time::Duration;

use armor_daemon::{routes, state};
use armor_reconcile::ProtectedRuleSet;
use armor_schemas::Policy;
use armor_store::{MemoryPolicyStore, StoreOp};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt; // oneshot

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn call(router: axum::Router, req: Request<Body>) -> (StatusCode, bytes::Bytes) {
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    (status, body)
}

fn parse_json(b: bytes::Bytes) -> serde_json::Value {
    serde_json::from_slice(&b).expect("body is not valid JSON")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn app(
    store: &Arc<MemoryPolicyStore>,
    timeout: Duration,
    shutdown: CancellationToken,
) -> axum::Router {
    let st = Arc::new(state::AppState::with_shutdown(
        store.clone(),
        ProtectedRuleSet::default(),
        timeout,
        shutdown,
    ));
    routes::build_router(st)
}

fn router(store: &Arc<MemoryPolicyStore>) -> axum::Router {
    app(store, Duration::from_secs(5), CancellationToken::new())
}

fn seeded() -> Arc<MemoryPolicyStore> {
    Arc::new(
        MemoryPolicyStore::new()
            .with_policy(
                "p1",
                Policy {
                    name: Some("pol-a".into()),
                    ..Policy::default()
                },
            )
            .with_backend("p1", "be-1")
            .with_backend("p1", "be-2")
            .with_backend("p2", "be-other"),
    )
}

fn ids(v: &serde_json::Value) -> Vec<String> {
    let mut out: Vec<String> = v
        .as_array()
        .expect("array body")
        .iter()
        .map(|s| s["id"].as_str().unwrap().to_string())
        .collect();
    out.sort();
    out
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_checks_answer_without_provider() {
    let store = Arc::new(MemoryPolicyStore::new());
    let shutdown = CancellationToken::new();
    let router = app(&store, Duration::from_secs(5), shutdown.clone());

    let (status, body) = call(router.clone(), get("/internal/isalive")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"alive");

    let (status, body) = call(router.clone(), get("/internal/isready")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"ready");

    shutdown.cancel();
    let (status, _) = call(router.clone(), get("/internal/isready")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let (status, _) = call(router, get("/internal/isalive")).await;
    assert_eq!(status, StatusCode::OK);

    assert!(store.calls().is_empty());
}

// ---------------------------------------------------------------------------
// Preconfigured rules
// ---------------------------------------------------------------------------

#[tokio::test]
async fn preconfigured_filters_by_type_and_version() {
    let store = seeded();

    let (status, body) = call(
        router(&store),
        get("/projects/p1/preConfiguredRules?rule-type=xss&version=v33"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&parse_json(body)), vec!["xss-v33-canary", "xss-v33-stable"]);

    let (status, body) = call(
        router(&store),
        get("/projects/p1/preConfiguredRules?rule-type=sqli"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        ids(&parse_json(body)),
        vec!["sqli-canary", "sqli-stable", "sqli-v33-canary", "sqli-v33-stable"]
    );
}

#[tokio::test]
async fn preconfigured_without_type_returns_everything() {
    let store = seeded();
    let (status, body) = call(router(&store), get("/projects/p1/preConfiguredRules")).await;

    assert_eq!(status, StatusCode::OK);
    let all = parse_json(body);
    assert_eq!(all.as_array().map(Vec::len), Some(28));
    assert!(all[0]["aliases"].is_array());
}

#[tokio::test]
async fn preconfigured_rejects_malformed_query_tokens() {
    let store = seeded();
    let (status, body) = call(
        router(&store),
        get("/projects/p1/preConfiguredRules?rule-type=xss&version=v33_stable"),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        parse_json(body)["error-message"],
        "unknown parameter: v33_stable"
    );
    assert!(store.calls().is_empty());
}

// ---------------------------------------------------------------------------
// Backend services
// ---------------------------------------------------------------------------

#[tokio::test]
async fn list_backend_services_is_project_scoped() {
    let store = seeded();
    let (status, body) = call(router(&store), get("/projects/p1/backendServices")).await;

    assert_eq!(status, StatusCode::OK);
    let mut names: Vec<String> = parse_json(body)
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["name"].as_str().unwrap().to_string())
        .collect();
    names.sort();
    assert_eq!(names, vec!["be-1", "be-2"]);
}

#[tokio::test]
async fn attach_points_backend_at_policy_self_link() {
    let store = seeded();
    let link = store
        .snapshot("p1", "pol-a")
        .and_then(|p| p.self_link)
        .expect("seeded policy has a self link");

    let (status, body) = call(
        router(&store),
        post("/projects/p1/policies/pol-a/backendServices/be-1"),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(
        parse_json(body),
        json!({"backendService": "be-1", "securityPolicy": link})
    );
    assert_eq!(
        store.calls(),
        vec![StoreOp::GetPolicy, StoreOp::SetBackendSecurityPolicy]
    );
    assert_eq!(
        store.backend("p1", "be-1").and_then(|b| b.security_policy),
        Some(link)
    );
    assert!(store
        .backend("p1", "be-2")
        .and_then(|b| b.security_policy)
        .is_none());
}

#[tokio::test]
async fn attach_unknown_policy_is_404_without_attach_call() {
    let store = seeded();
    let (status, body) = call(
        router(&store),
        post("/projects/p1/policies/ghost/backendServices/be-1"),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.is_empty());
    assert_eq!(store.call_count(StoreOp::SetBackendSecurityPolicy), 0);
}

#[tokio::test]
async fn policy_in_use_cannot_be_deleted() {
    let store = seeded();
    let (status, _) = call(
        router(&store),
        post("/projects/p1/policies/pol-a/backendServices/be-2"),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let req = Request::builder()
        .method("DELETE")
        .uri("/projects/p1/policies/pol-a")
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(router(&store), req).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let msg = parse_json(body)["error-message"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(msg.starts_with("policy resource p1: "), "{msg}");
    assert!(store.snapshot("p1", "pol-a").is_some());
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn slow_provider_hits_request_deadline() {
    let store = Arc::new(
        MemoryPolicyStore::new()
            .with_policy(
                "p1",
                Policy {
                    name: Some("pol-a".into()),
                    ..Policy::default()
                },
            )
            .with_latency(Duration::from_millis(500)),
    );
    let router = app(&store, Duration::from_millis(50), CancellationToken::new());

    let (status, body) = call(router, get("/projects/p1/policies/pol-a")).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let json = parse_json(body);
    assert_eq!(json["status"], 503);
    assert_eq!(
        json["error-message"],
        "policy request for p1 cancelled: deadline exceeded"
    );
}

#[tokio::test]
async fn shutdown_abandons_requests_before_provider_call() {
    let store = seeded();
    let shutdown = CancellationToken::new();
    let router = app(&store, Duration::from_secs(5), shutdown.clone());
    shutdown.cancel();

    let req = Request::builder()
        .method("PATCH")
        .uri("/projects/p1/policies/pol-a")
        .header("content-type", "application/json")
        .body(Body::from(json!({"policy": {"description": "x"}}).to_string()))
        .unwrap();
    let (status, body) = call(router, req).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        parse_json(body)["error-message"],
        "policy request for p1 cancelled: service shutting down"
    );
    assert!(store.calls().is_empty(), "no provider call may start");
}
