//! Admin API round trips against the in-memory store.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use limitgate::app::AppState;
use limitgate::telemetry::metrics::Metrics;
use ratelimit_core::cache::RuleCache;
use ratelimit_core::counter::CounterEngine;
use ratelimit_core::events::AnalyticsHub;
use ratelimit_core::queue::QueueManager;
use ratelimit_core::store::MemoryStore;
use ratelimit_core::Engine;

fn state() -> AppState {
    let store = Arc::new(MemoryStore::new());
    let rules = Arc::new(RuleCache::new(store.clone()));
    let engine = Arc::new(Engine::new(
        rules.clone(),
        CounterEngine::new(store.clone()),
        QueueManager::new(),
        Arc::new(AnalyticsHub::new(16, 100)),
    ));
    AppState {
        engine,
        rules,
        rule_store: store.clone(),
        config_store: store,
        metrics: Arc::new(Metrics::new()),
        upstream: reqwest::Client::new(),
        upstream_url: "http://127.0.0.1:0".to_string(),
    }
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn rule_crud_round_trip() {
    let state = state();
    let router: Router = limitgate::admin::router(state);

    let created = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/rules",
            serde_json::json!({
                "pathPattern": "/api/**",
                "allowedRequests": 5,
                "windowSeconds": 60
            }),
        ))
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    let created = body_json(created).await;
    let id = created["id"].as_str().unwrap().to_string();
    assert!(!id.is_empty(), "server assigns an id");

    // list and get return the stored shape bit-exactly
    let listed = body_json(router.clone().oneshot(get("/rules")).await.unwrap()).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0], created);
    let fetched = body_json(
        router
            .clone()
            .oneshot(get(&format!("/rules/{id}")))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(fetched, created);

    // replace
    let updated = router
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/rules/{id}"),
            serde_json::json!({
                "pathPattern": "/api/**",
                "allowedRequests": 10,
                "windowSeconds": 30
            }),
        ))
        .await
        .unwrap();
    assert_eq!(updated.status(), StatusCode::OK);
    let updated = body_json(updated).await;
    assert_eq!(updated["allowedRequests"], 10);
    assert_eq!(updated["id"].as_str().unwrap(), id);

    // delete, then the id is gone
    let deleted = router
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/rules/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
    let missing = router
        .clone()
        .oneshot(get(&format!("/rules/{id}")))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_rules_are_rejected() {
    let router = limitgate::admin::router(state());

    // queue enabled without a usable queue size
    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/rules",
            serde_json::json!({
                "pathPattern": "/api/**",
                "queueEnabled": true,
                "maxQueueSize": 0,
                "delayPerRequestMs": 100
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // jwt enabled without claims
    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/rules",
            serde_json::json!({ "pathPattern": "/x", "jwtEnabled": true }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn mutations_refresh_the_matcher() {
    let state = state();
    let router = limitgate::admin::router(state.clone());

    assert!(state.engine.match_rule("/api/x").is_none());

    let created = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/rules",
            serde_json::json!({ "pathPattern": "/api/**", "allowedRequests": 1, "windowSeconds": 60 }),
        ))
        .await
        .unwrap();
    let id = body_json(created).await["id"].as_str().unwrap().to_string();
    assert!(
        state.engine.match_rule("/api/x").is_some(),
        "create triggers a refresh"
    );

    // deactivate via PUT; the matcher must drop it after the refresh
    let response = router
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/rules/{id}"),
            serde_json::json!({
                "pathPattern": "/api/**",
                "allowedRequests": 1,
                "windowSeconds": 60,
                "active": false
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(state.engine.match_rule("/api/x").is_none());
}

#[tokio::test]
async fn queue_patch_updates_only_queue_fields() {
    let router = limitgate::admin::router(state());
    let created = body_json(
        router
            .clone()
            .oneshot(json_request(
                "POST",
                "/rules",
                serde_json::json!({ "pathPattern": "/api/**", "allowedRequests": 7, "windowSeconds": 60 }),
            ))
            .await
            .unwrap(),
    )
    .await;
    let id = created["id"].as_str().unwrap();

    let patched = router
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/rules/{id}/queue"),
            serde_json::json!({ "queueEnabled": true, "maxQueueSize": 3, "delayPerRequestMs": 250 }),
        ))
        .await
        .unwrap();
    assert_eq!(patched.status(), StatusCode::OK);
    let patched = body_json(patched).await;
    assert_eq!(patched["queueEnabled"], true);
    assert_eq!(patched["maxQueueSize"], 3);
    assert_eq!(patched["delayPerRequestMs"], 250);
    assert_eq!(patched["allowedRequests"], 7, "quota untouched");
}

#[tokio::test]
async fn body_limit_patch_validates() {
    let router = limitgate::admin::router(state());
    let created = body_json(
        router
            .clone()
            .oneshot(json_request(
                "POST",
                "/rules",
                serde_json::json!({ "pathPattern": "/api/**" }),
            ))
            .await
            .unwrap(),
    )
    .await;
    let id = created["id"].as_str().unwrap();

    let patched = router
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/rules/{id}/body-limit"),
            serde_json::json!({
                "bodyLimitEnabled": true,
                "bodyFieldPath": "user.id",
                "bodyLimitType": "combine_with_ip"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(patched.status(), StatusCode::OK);

    // enabling body limiting without a field path is invalid
    let rejected = router
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/rules/{id}/body-limit"),
            serde_json::json!({
                "bodyLimitEnabled": true,
                "bodyFieldPath": "",
                "bodyLimitType": "replace_ip"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn config_round_trip_applies_forwarded_trust() {
    let state = state();
    let router = limitgate::admin::router(state.clone());

    assert!(!state.engine.trust_forwarded());
    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/config/trust-x-forwarded-for",
            serde_json::json!({ "value": "true" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(state.engine.trust_forwarded(), "takes effect immediately");

    let config = body_json(router.clone().oneshot(get("/config")).await.unwrap()).await;
    assert_eq!(config["trust-x-forwarded-for"], "true");
}

#[tokio::test]
async fn summary_and_metrics_endpoints_respond() {
    let router = limitgate::admin::router(state());

    let summary = router.clone().oneshot(get("/analytics/summary")).await.unwrap();
    assert_eq!(summary.status(), StatusCode::OK);
    let summary = body_json(summary).await;
    assert_eq!(summary["allowed"], 0);

    let metrics = router.clone().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(metrics.status(), StatusCode::OK);
}
