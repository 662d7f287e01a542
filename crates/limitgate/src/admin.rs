//! Admin API: rule CRUD, system config, analytics summary, metrics.
//!
//! Served on its own listener so these routes simply do not exist on the
//! public gateway port. Every rule mutation triggers a cache refresh; the
//! matcher never polls the store.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use ratelimit_core::identifier::TRUST_FORWARDED_CONFIG_KEY;
use ratelimit_core::rule::{LimitMode, RateLimitRule};

use crate::app::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/rules", get(list_rules).post(create_rule))
        .route("/rules/active", get(list_active_rules))
        .route("/rules/refresh", post(refresh_rules))
        .route(
            "/rules/:id",
            get(get_rule).put(update_rule).delete(delete_rule),
        )
        .route("/rules/:id/queue", patch(patch_queue))
        .route("/rules/:id/body-limit", patch(patch_body_limit))
        .route("/config", get(all_config))
        .route("/config/:key", post(set_config))
        .route("/analytics/summary", get(summary))
        .route("/metrics", get(metrics))
        .route("/ws/analytics", get(crate::analytics::ws_handler))
        .with_state(state)
}

type AdminError = (StatusCode, String);

fn internal(e: impl std::fmt::Display) -> AdminError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn invalid(e: impl std::fmt::Display) -> AdminError {
    (StatusCode::BAD_REQUEST, e.to_string())
}

fn not_found(id: &str) -> AdminError {
    (StatusCode::NOT_FOUND, format!("no rule with id {id}"))
}

async fn list_rules(State(state): State<AppState>) -> Result<Json<Vec<RateLimitRule>>, AdminError> {
    Ok(Json(state.rule_store.list_rules().await.map_err(internal)?))
}

async fn list_active_rules(
    State(state): State<AppState>,
) -> Result<Json<Vec<RateLimitRule>>, AdminError> {
    Ok(Json(
        state.rule_store.list_active_rules().await.map_err(internal)?,
    ))
}

async fn get_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RateLimitRule>, AdminError> {
    state
        .rule_store
        .get_rule(&id)
        .await
        .map_err(internal)?
        .map(Json)
        .ok_or_else(|| not_found(&id))
}

async fn create_rule(
    State(state): State<AppState>,
    Json(mut rule): Json<RateLimitRule>,
) -> Result<impl IntoResponse, AdminError> {
    if rule.id.is_empty() {
        rule.id = Uuid::new_v4().to_string();
    }
    rule.validate().map_err(invalid)?;
    state.rule_store.put_rule(&rule).await.map_err(internal)?;
    info!(id = %rule.id, pattern = %rule.path_pattern, "created rate limit rule");
    let _ = state.rules.refresh().await;
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn update_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut rule): Json<RateLimitRule>,
) -> Result<Json<RateLimitRule>, AdminError> {
    if state
        .rule_store
        .get_rule(&id)
        .await
        .map_err(internal)?
        .is_none()
    {
        return Err(not_found(&id));
    }
    rule.id = id;
    rule.validate().map_err(invalid)?;
    state.rule_store.put_rule(&rule).await.map_err(internal)?;
    info!(id = %rule.id, "updated rate limit rule");
    let _ = state.rules.refresh().await;
    Ok(Json(rule))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueuePatch {
    queue_enabled: bool,
    max_queue_size: u32,
    delay_per_request_ms: u64,
}

async fn patch_queue(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<QueuePatch>,
) -> Result<Json<RateLimitRule>, AdminError> {
    let mut rule = state
        .rule_store
        .get_rule(&id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(&id))?;
    rule.queue_enabled = patch.queue_enabled;
    rule.max_queue_size = patch.max_queue_size;
    rule.delay_per_request_ms = patch.delay_per_request_ms;
    rule.validate().map_err(invalid)?;
    state.rule_store.put_rule(&rule).await.map_err(internal)?;
    info!(
        id = %rule.id,
        enabled = patch.queue_enabled,
        max = patch.max_queue_size,
        delay_ms = patch.delay_per_request_ms,
        "updated queue settings"
    );
    let _ = state.rules.refresh().await;
    Ok(Json(rule))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BodyLimitPatch {
    body_limit_enabled: bool,
    body_field_path: String,
    body_limit_type: LimitMode,
}

async fn patch_body_limit(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<BodyLimitPatch>,
) -> Result<Json<RateLimitRule>, AdminError> {
    let mut rule = state
        .rule_store
        .get_rule(&id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(&id))?;
    rule.body_limit_enabled = patch.body_limit_enabled;
    rule.body_field_path = patch.body_field_path;
    rule.body_limit_type = patch.body_limit_type;
    rule.validate().map_err(invalid)?;
    state.rule_store.put_rule(&rule).await.map_err(internal)?;
    info!(id = %rule.id, "updated body limit settings");
    let _ = state.rules.refresh().await;
    Ok(Json(rule))
}

async fn delete_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AdminError> {
    if !state.rule_store.delete_rule(&id).await.map_err(internal)? {
        return Err(not_found(&id));
    }
    info!(%id, "deleted rate limit rule");
    let _ = state.rules.refresh().await;
    Ok(StatusCode::NO_CONTENT)
}

async fn refresh_rules(State(state): State<AppState>) -> Result<StatusCode, AdminError> {
    state.rules.refresh().await.map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn all_config(
    State(state): State<AppState>,
) -> Result<Json<std::collections::BTreeMap<String, String>>, AdminError> {
    let pairs = state.config_store.all_config().await.map_err(internal)?;
    Ok(Json(pairs.into_iter().collect()))
}

#[derive(Debug, Deserialize)]
struct ConfigValue {
    value: String,
}

async fn set_config(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<ConfigValue>,
) -> Result<Json<serde_json::Value>, AdminError> {
    state
        .config_store
        .set_config(&key, &body.value)
        .await
        .map_err(internal)?;
    if key == TRUST_FORWARDED_CONFIG_KEY {
        state
            .engine
            .set_trust_forwarded(body.value.trim().eq_ignore_ascii_case("true"));
    }
    info!(%key, "updated system config");
    Ok(Json(json!({ "key": key, "value": body.value })))
}

async fn summary(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.hub().summary())
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        state.metrics.render(),
    )
}
