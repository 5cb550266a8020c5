//! REST dispatcher integration tests
//!
//! Each test serves a small axum app that scripts rate-limit headers and
//! failures, then drives the real dispatcher against it.
//!
//! Run with: cargo test -p integration-tests --test rest_tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chat_rest::{Method, RequestOptions, RestError};
use integration_tests::{dispatcher, TestServer};
use serde_json::{json, Value};

type Hits = Arc<AtomicUsize>;

fn ok_headers(remaining: &'static str) -> [(&'static str, &'static str); 3] {
    [
        ("x-ratelimit-limit", "5"),
        ("x-ratelimit-remaining", remaining),
        ("x-ratelimit-reset-after", "1"),
    ]
}

// ============================================================================
// Rate limits
// ============================================================================

async fn limited_once(State(hits): State<Hits>) -> Response {
    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [
                ("x-ratelimit-limit", "5"),
                ("x-ratelimit-remaining", "0"),
                ("x-ratelimit-reset-after", "0.5"),
                ("x-ratelimit-scope", "user"),
            ],
            Json(json!({
                "message": "You are being rate limited.",
                "retry_after": 0.5,
                "global": false
            })),
        )
            .into_response();
    }
    (ok_headers("4"), Json(json!({"id": "10"}))).into_response()
}

#[tokio::test]
async fn test_rate_limited_request_retried_after_reset() {
    let hits = Hits::default();
    let app = Router::new()
        .route("/channels/1/messages", get(limited_once))
        .with_state(hits.clone());
    let server = TestServer::start(app).await.unwrap();
    let rest = dispatcher(&server.base_url()).unwrap();

    let started = Instant::now();
    let request = {
        let rest = rest.clone();
        tokio::spawn(async move { rest.get("/channels/1/messages").await })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    let snapshot = rest
        .bucket_snapshot("GET /channels/1/messages")
        .expect("bucket created by the first attempt");
    assert_eq!(snapshot.limit, 5);
    assert_eq!(snapshot.remaining, 0);
    assert!(snapshot.in_flight);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let body = request.await.unwrap().unwrap();
    assert_eq!(body["id"], "10");
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    let snapshot = rest.bucket_snapshot("GET /channels/1/messages").unwrap();
    assert_eq!(snapshot.remaining, 4);
    assert!(!snapshot.in_flight);
}

async fn globally_limited_once(State(hits): State<Hits>) -> Response {
    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [("x-ratelimit-global", "true"), ("retry-after", "0.3")],
            Json(json!({"message": "global", "retry_after": 0.3, "global": true})),
        )
            .into_response();
    }
    (ok_headers("4"), Json(json!({}))).into_response()
}

#[tokio::test]
async fn test_global_rate_limit_blocks_dispatcher() {
    let hits = Hits::default();
    let app = Router::new()
        .route("/users/@me", get(globally_limited_once))
        .with_state(hits.clone());
    let server = TestServer::start(app).await.unwrap();
    let rest = dispatcher(&server.base_url()).unwrap();

    let request = {
        let rest = rest.clone();
        tokio::spawn(async move { rest.get("/users/@me").await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rest.is_globally_blocked());

    request.await.unwrap().unwrap();
    assert!(!rest.is_globally_blocked());
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

async fn exhausted(State(hits): State<Hits>) -> Response {
    hits.fetch_add(1, Ordering::SeqCst);
    (
        [
            ("x-ratelimit-limit", "1"),
            ("x-ratelimit-remaining", "0"),
            ("x-ratelimit-reset-after", "0.4"),
        ],
        Json(json!({})),
    )
        .into_response()
}

#[tokio::test]
async fn test_exhausted_bucket_waits_for_reset() {
    let hits = Hits::default();
    let app = Router::new()
        .route("/channels/7/typing", post(exhausted))
        .with_state(hits.clone());
    let server = TestServer::start(app).await.unwrap();
    let rest = dispatcher(&server.base_url()).unwrap();

    rest.request(Method::POST, "/channels/7/typing", RequestOptions::new())
        .await
        .unwrap();

    let started = Instant::now();
    rest.request(Method::POST, "/channels/7/typing", RequestOptions::new())
        .await
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(350));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[derive(Default)]
struct Concurrency {
    active: AtomicUsize,
    peak: AtomicUsize,
}

async fn slow(State(counter): State<Arc<Concurrency>>) -> Response {
    let active = counter.active.fetch_add(1, Ordering::SeqCst) + 1;
    counter.peak.fetch_max(active, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(50)).await;
    counter.active.fetch_sub(1, Ordering::SeqCst);
    (ok_headers("4"), Json(json!({}))).into_response()
}

#[tokio::test]
async fn test_one_request_in_flight_per_route() {
    let counter = Arc::new(Concurrency::default());
    let app = Router::new()
        .route("/guilds/1/roles", get(slow))
        .with_state(counter.clone());
    let server = TestServer::start(app).await.unwrap();
    let rest = dispatcher(&server.base_url()).unwrap();

    let requests: Vec<_> = (0..4)
        .map(|_| {
            let rest = rest.clone();
            tokio::spawn(async move { rest.get("/guilds/1/roles").await })
        })
        .collect();
    for request in requests {
        request.await.unwrap().unwrap();
    }

    assert_eq!(counter.peak.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Failures
// ============================================================================

async fn forbidden(State(hits): State<Hits>) -> Response {
    hits.fetch_add(1, Ordering::SeqCst);
    (
        StatusCode::FORBIDDEN,
        ok_headers("4"),
        Json(json!({"code": 50013, "message": "Missing Permissions"})),
    )
        .into_response()
}

#[tokio::test]
async fn test_client_error_not_retried() {
    let hits = Hits::default();
    let app = Router::new()
        .route("/channels/1/messages", post(forbidden))
        .with_state(hits.clone());
    let server = TestServer::start(app).await.unwrap();
    let rest = dispatcher(&server.base_url()).unwrap();

    let err = rest
        .request(
            Method::POST,
            "/channels/1/messages",
            RequestOptions::new().body(json!({"content": "hi"})),
        )
        .await
        .unwrap_err();

    match &err {
        RestError::Rest {
            status,
            code,
            message,
            request,
            ..
        } => {
            assert_eq!(*status, 403);
            assert_eq!(*code, 50013);
            assert_eq!(message, "Missing Permissions");
            assert_eq!(request.attempts, 1);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!err.is_retryable());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

async fn bad_gateway_once(State(hits): State<Hits>) -> Response {
    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
        return (StatusCode::BAD_GATEWAY, "upstream unavailable").into_response();
    }
    (ok_headers("4"), Json(json!({"ok": true}))).into_response()
}

#[tokio::test]
async fn test_bad_gateway_retried() {
    let hits = Hits::default();
    let app = Router::new()
        .route("/gateway/bot", get(bad_gateway_once))
        .with_state(hits.clone());
    let server = TestServer::start(app).await.unwrap();
    let rest = dispatcher(&server.base_url()).unwrap();

    let body = rest.get("/gateway/bot").await.unwrap();
    assert_eq!(body["ok"], true);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

async fn always_unavailable(State(hits): State<Hits>) -> Response {
    hits.fetch_add(1, Ordering::SeqCst);
    (StatusCode::SERVICE_UNAVAILABLE, "maintenance").into_response()
}

#[tokio::test]
async fn test_server_errors_give_up_after_max_retries() {
    let hits = Hits::default();
    let app = Router::new()
        .route("/applications/@me", get(always_unavailable))
        .with_state(hits.clone());
    let server = TestServer::start(app).await.unwrap();

    let mut config = integration_tests::rest_config(&server.base_url());
    config.max_retries = 1;
    let rest = chat_rest::RequestDispatcher::new(config, Some("Bot t".to_string())).unwrap();

    let err = rest.get("/applications/@me").await.unwrap_err();
    assert_eq!(err.status(), Some(503));
    assert!(matches!(err, RestError::Http { .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

// ============================================================================
// Request shaping
// ============================================================================

async fn echo(Query(query): Query<HashMap<String, String>>, headers: HeaderMap) -> Json<Value> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    Json(json!({
        "limit": query.get("limit"),
        "reason": header("x-audit-log-reason"),
        "authorization": header("authorization"),
    }))
}

#[tokio::test]
async fn test_query_reason_and_auth_headers() {
    let app = Router::new().route("/guilds/1/audit-logs", get(echo));
    let server = TestServer::start(app).await.unwrap();
    let rest = dispatcher(&server.base_url()).unwrap();

    let body = rest
        .request(
            Method::GET,
            "/guilds/1/audit-logs",
            RequestOptions::new()
                .body(json!({"limit": 5}))
                .reason("spring cleaning"),
        )
        .await
        .unwrap();

    assert_eq!(body["limit"], "5");
    assert_eq!(body["reason"], "spring%20cleaning");
    assert_eq!(body["authorization"], "Bot test-token");
}

#[tokio::test]
async fn test_global_limit_spans_routes() {
    let hits = Hits::default();
    let app = Router::new()
        .route("/channels/:id/messages", get(exhausted))
        .with_state(hits.clone());
    let server = TestServer::start(app).await.unwrap();

    let mut config = integration_tests::rest_config(&server.base_url());
    config.global_limit = 2;
    config.global_interval = Duration::from_millis(400);
    let rest = chat_rest::RequestDispatcher::new(config, Some("Bot t".to_string())).unwrap();

    // Different channels are different route buckets; only the shared limit applies
    let started = Instant::now();
    let requests: Vec<_> = (1..=3)
        .map(|channel| {
            let rest = rest.clone();
            tokio::spawn(async move { rest.get(&format!("/channels/{channel}/messages")).await })
        })
        .collect();
    for request in requests {
        request.await.unwrap().unwrap();
    }

    assert!(started.elapsed() >= Duration::from_millis(400));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert_eq!(rest.limiter().token_limit(), 2);
}
