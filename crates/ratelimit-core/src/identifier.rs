//! Identifier resolution.
//!
//! Walks the rule's source chain in precedence order (header, cookie, body
//! field, JWT claims, client IP) and returns the first non-empty value. An
//! enabled source that yields nothing falls through silently; failures are
//! visible only at debug level. The client IP always terminates the chain.
//!
//! JWT claims are read **without signature verification**; see the crate
//! docs for the trust model.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use http::HeaderMap;
use tracing::debug;

use crate::body::{self, CachedBody};
use crate::rule::{IdentifierSource, LimitMode, RateLimitRule};

/// System-config key switching `X-Forwarded-For` trust.
pub const TRUST_FORWARDED_CONFIG_KEY: &str = "trust-x-forwarded-for";

/// Resolve the rate-limit identifier for a matched rule.
pub async fn resolve(
    rule: &RateLimitRule,
    headers: &HeaderMap,
    remote_addr: &str,
    cached_body: Option<&CachedBody>,
    trust_forwarded: bool,
) -> String {
    let ip = client_ip(headers, remote_addr, trust_forwarded);
    for source in rule.identifier_sources() {
        match source {
            IdentifierSource::Header { name, mode } => {
                if let Some(value) = header_value(headers, &name) {
                    return apply_mode(mode, &ip, value);
                }
                debug!(rule = %rule.id, header = %name, "header source empty, falling back");
            }
            IdentifierSource::Cookie { name, mode } => {
                if let Some(value) = cookie_value(headers, &name) {
                    return apply_mode(mode, &ip, value);
                }
                debug!(rule = %rule.id, cookie = %name, "cookie source empty, falling back");
            }
            IdentifierSource::Body { path, mode, .. } => {
                if let Some(cached) = cached_body {
                    if let Some(value) = body::extract(cached, &path).await {
                        return apply_mode(mode, &ip, value);
                    }
                }
                debug!(rule = %rule.id, field = %path, "body source empty, falling back");
            }
            IdentifierSource::Jwt { claims, separator } => {
                if let Some(value) = jwt_claims(headers, &claims, &separator) {
                    return value;
                }
                debug!(rule = %rule.id, "jwt source empty, falling back");
            }
            IdentifierSource::ClientIp => return ip,
        }
    }
    ip
}

fn apply_mode(mode: LimitMode, ip: &str, value: String) -> String {
    match mode {
        LimitMode::ReplaceIp => value,
        LimitMode::CombineWithIp => format!("{ip}:{value}"),
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let value = headers.get(name)?.to_str().ok()?.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(http::header::COOKIE) {
        let Ok(raw) = header.to_str() else { continue };
        for pair in raw.split(';') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            if key.trim() == name {
                let value = value.trim();
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

/// Concatenate the named claims from the bearer token's payload segment.
/// Structural decode only; a missing claim invalidates the whole source.
fn jwt_claims(headers: &HeaderMap, claims: &[String], separator: &str) -> Option<String> {
    let auth = headers
        .get(http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .trim();
    let token = auth
        .strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))?;
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return None;
    }
    let payload = URL_SAFE_NO_PAD.decode(parts[1]).ok()?;
    let json: serde_json::Value = serde_json::from_slice(&payload).ok()?;
    let object = json.as_object()?;

    let mut values = Vec::with_capacity(claims.len());
    for claim in claims {
        values.push(body::json_value_string(object.get(claim)?)?);
    }
    (!values.is_empty()).then(|| values.join(separator))
}

/// The address the request is counted under when no other source wins:
/// first `X-Forwarded-For` value when trusted, else the transport address.
pub fn client_ip(headers: &HeaderMap, remote_addr: &str, trust_forwarded: bool) -> String {
    if trust_forwarded {
        if let Some(raw) = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
        {
            if let Some(first) = raw.split(',').next() {
                let first = first.trim();
                if !first.is_empty() {
                    return first.to_string();
                }
            }
        }
    }
    remote_addr.to_string()
}
