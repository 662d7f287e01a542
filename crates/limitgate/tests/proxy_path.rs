//! Request-path middleware behavior: headers, delays, body replay.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::connect_info::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::middleware;
use axum::routing::any;
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use limitgate::app::AppState;
use limitgate::telemetry::metrics::Metrics;
use ratelimit_core::cache::RuleCache;
use ratelimit_core::counter::CounterEngine;
use ratelimit_core::events::AnalyticsHub;
use ratelimit_core::queue::QueueManager;
use ratelimit_core::store::{MemoryStore, RuleStore};
use ratelimit_core::{Engine, RateLimitRule};

async fn state_with(rules: Vec<RateLimitRule>) -> AppState {
    let store = Arc::new(MemoryStore::new());
    for rule in &rules {
        store.put_rule(rule).await.unwrap();
    }
    let cache = Arc::new(RuleCache::new(store.clone()));
    cache.refresh().await.unwrap();
    let engine = Arc::new(Engine::new(
        cache.clone(),
        CounterEngine::new(store.clone()),
        QueueManager::new(),
        Arc::new(AnalyticsHub::new(16, 100)),
    ));
    AppState {
        engine,
        rules: cache,
        rule_store: store.clone(),
        config_store: store,
        metrics: Arc::new(Metrics::new()),
        upstream: reqwest::Client::new(),
        upstream_url: "http://127.0.0.1:0".to_string(),
    }
}

/// The middleware wrapped around a local echo handler instead of the
/// upstream forwarder.
fn gateway(state: AppState) -> Router {
    Router::new()
        .route("/", any(echo))
        .route("/*rest", any(echo))
        .layer(middleware::from_fn_with_state(
            state,
            limitgate::proxy::rate_limit,
        ))
}

async fn echo(body: Bytes) -> Bytes {
    body
}

fn request(method: &str, path: &str, body: Option<(&str, &str)>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(path);
    let body = match body {
        Some((content_type, payload)) => {
            builder = builder.header("content-type", content_type);
            Body::from(payload.to_string())
        }
        None => Body::empty(),
    };
    let mut request = builder.body(body).unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([1, 2, 3, 4], 55000))));
    request
}

#[tokio::test]
async fn admits_then_rejects_with_429() {
    let state = state_with(vec![RateLimitRule {
        id: "r1".into(),
        path_pattern: "/**".into(),
        allowed_requests: 1,
        window_seconds: 60,
        ..Default::default()
    }])
    .await;
    let app = gateway(state);

    let first = app.clone().oneshot(request("GET", "/data", None)).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app.clone().oneshot(request("GET", "/data", None)).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(second.headers().get("x-ratelimit-queued").is_none());
    let bytes = second.into_body().collect().await.unwrap().to_bytes();
    assert!(bytes.is_empty(), "429 body is empty");
}

#[tokio::test]
async fn queued_requests_carry_headers_and_delay() {
    let state = state_with(vec![RateLimitRule {
        id: "r1".into(),
        path_pattern: "/**".into(),
        allowed_requests: 1,
        window_seconds: 60,
        queue_enabled: true,
        max_queue_size: 1,
        delay_per_request_ms: 60,
        ..Default::default()
    }])
    .await;
    let app = gateway(state);

    let first = app.clone().oneshot(request("GET", "/", None)).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert!(first.headers().get("x-ratelimit-queued").is_none());

    let started = Instant::now();
    let second = app.clone().oneshot(request("GET", "/", None)).await.unwrap();
    let elapsed = started.elapsed();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(
        second.headers().get("x-ratelimit-queued").unwrap(),
        "true"
    );
    assert_eq!(
        second.headers().get("x-ratelimit-delay-ms").unwrap(),
        "60"
    );
    assert!(
        elapsed.as_millis() >= 60,
        "the delay applies before dispatch, took {elapsed:?}"
    );
}

#[tokio::test]
async fn full_queue_rejects_with_marker_header() {
    let state = state_with(vec![RateLimitRule {
        id: "r1".into(),
        path_pattern: "/**".into(),
        allowed_requests: 1,
        window_seconds: 60,
        queue_enabled: true,
        max_queue_size: 1,
        delay_per_request_ms: 10_000,
        ..Default::default()
    }])
    .await;
    let app = gateway(state.clone());

    assert_eq!(
        app.clone()
            .oneshot(request("GET", "/", None))
            .await
            .unwrap()
            .status(),
        StatusCode::OK
    );

    // occupy the single queue slot without waiting for its delay
    let queued_app = app.clone();
    let queued = tokio::spawn(async move {
        queued_app.oneshot(request("GET", "/", None)).await.unwrap()
    });
    // wait until the slot is actually taken
    while state.engine.queue().depth("r1", "1.2.3.4") == 0 {
        tokio::task::yield_now().await;
    }

    let rejected = app.clone().oneshot(request("GET", "/", None)).await.unwrap();
    assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        rejected.headers().get("x-ratelimit-queued").unwrap(),
        "true",
        "full-queue rejections are marked"
    );
    queued.abort();
}

#[tokio::test]
async fn buffered_bodies_are_replayed_upstream() {
    let state = state_with(vec![RateLimitRule {
        id: "r1".into(),
        path_pattern: "/**".into(),
        allowed_requests: 1,
        window_seconds: 60,
        body_limit_enabled: true,
        body_field_path: "user_id".into(),
        ..Default::default()
    }])
    .await;
    let app = gateway(state);

    let payload = r#"{"user_id":"u1","data":[1,2,3]}"#;
    let response = app
        .clone()
        .oneshot(request("POST", "/submit", Some(("application/json", payload))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(bytes, payload.as_bytes(), "the inner handler sees the buffered bytes");

    // the body-derived identifier was counted: same user is now over quota,
    // a different user is not
    let again = app
        .clone()
        .oneshot(request("POST", "/submit", Some(("application/json", payload))))
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::TOO_MANY_REQUESTS);

    let other = app
        .clone()
        .oneshot(request(
            "POST",
            "/submit",
            Some(("application/json", r#"{"user_id":"u2"}"#)),
        ))
        .await
        .unwrap();
    assert_eq!(other.status(), StatusCode::OK);
}

#[tokio::test]
async fn malformed_body_falls_back_without_failing() {
    let state = state_with(vec![RateLimitRule {
        id: "r1".into(),
        path_pattern: "/**".into(),
        allowed_requests: 5,
        window_seconds: 60,
        body_limit_enabled: true,
        body_field_path: "user_id".into(),
        ..Default::default()
    }])
    .await;
    let app = gateway(state);

    // not JSON at all: the resolver falls back to the client IP, 200 not 5xx
    let response = app
        .clone()
        .oneshot(request("POST", "/submit", Some(("application/json", "{oops"))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
