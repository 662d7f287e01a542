//! Request path: decision middleware and upstream forwarding.
//!
//! The middleware matches a rule, buffers the body only when that rule
//! limits on it, asks the engine for a decision, and applies it: 429 on
//! rejection, a pre-dispatch delay plus queue headers on queued admissions.
//! Buffered bodies are replayed so the upstream sees identical bytes.

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use bytes::Bytes;
use tracing::{debug, warn};

use ratelimit_core::body::{self, CachedBody};
use ratelimit_core::{Reason, RequestContext};

use crate::app::AppState;

/// Cap on buffered request bodies.
const MAX_BUFFERED_BODY: usize = 2_097_152;

pub fn router(state: AppState) -> Router {
    Router::new()
        .fallback(forward)
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .with_state(state)
}

/// The decision middleware. Public so tests can wrap their own inner router.
pub async fn rate_limit(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let (parts, incoming) = request.into_parts();
    let path = parts.uri.path().to_string();
    let host = parts
        .headers
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let remote = peer.ip().to_string();

    // Buffer the body once, only when the matched rule limits on it. Read
    // errors degrade to an empty buffer; the resolver falls back from there.
    let rule = state
        .engine
        .match_rule(&path)
        .filter(|r| body::needs_buffering(r, &parts.method, &parts.headers));
    let (cached, replay_body) = match rule {
        Some(rule) => {
            let bytes = match axum::body::to_bytes(incoming, MAX_BUFFERED_BODY).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!(error = %e, "failed to buffer request body");
                    Bytes::new()
                }
            };
            let content_type = parts
                .headers
                .get(http::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let cached = body::effective_family(&rule, &parts.headers).map(|family| CachedBody {
                bytes: bytes.clone(),
                family,
                content_type,
            });
            (cached, Body::from(bytes))
        }
        None => (None, incoming),
    };

    let decision = state
        .engine
        .check(RequestContext {
            method: &parts.method,
            path: &path,
            host: &host,
            headers: &parts.headers,
            remote_addr: &remote,
            body: cached.as_ref(),
        })
        .await;
    state.metrics.record(&decision);

    if !decision.allowed {
        let mut response = StatusCode::TOO_MANY_REQUESTS.into_response();
        if decision.reason == Reason::QueueFull {
            response
                .headers_mut()
                .insert("x-ratelimit-queued", HeaderValue::from_static("true"));
        }
        return response;
    }

    if decision.queued {
        debug!(%path, delay_ms = decision.delay_ms, "delaying queued request");
        tokio::time::sleep(Duration::from_millis(decision.delay_ms)).await;
    }

    let mut response = next.run(Request::from_parts(parts, replay_body)).await;
    if decision.queued {
        let headers = response.headers_mut();
        headers.insert("x-ratelimit-queued", HeaderValue::from_static("true"));
        headers.insert("x-ratelimit-delay-ms", HeaderValue::from(decision.delay_ms));
    }
    response
}

/// Forward an admitted request to the upstream target.
async fn forward(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("{}{}", state.upstream_url, path_and_query);

    let bytes = match axum::body::to_bytes(body, MAX_BUFFERED_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "failed to read request body for forwarding");
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    let mut forward_headers = parts.headers.clone();
    forward_headers.remove(http::header::HOST);
    let upstream_request = state
        .upstream
        .request(parts.method, &url)
        .headers(forward_headers);

    let upstream_response = match upstream_request.body(bytes).send().await {
        Ok(response) => response,
        Err(e) => {
            warn!(%url, error = %e, "upstream request failed");
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    let status = upstream_response.status();
    let headers = upstream_response.headers().clone();
    let payload = upstream_response.bytes().await.unwrap_or_default();

    let mut response = Response::new(Body::from(payload));
    *response.status_mut() = status;
    for (name, value) in headers.iter() {
        if name == http::header::TRANSFER_ENCODING || name == http::header::CONTENT_LENGTH {
            continue;
        }
        response.headers_mut().insert(name, value.clone());
    }
    response
}
