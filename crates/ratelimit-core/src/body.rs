//! Request-body support for body-based limiting.
//!
//! The HTTP layer buffers the body once per request, only when the matched
//! rule asks for it, and replays the same bytes to the upstream. This module
//! owns the content-type gating and the field extraction over the cached
//! buffer. Every extraction failure means "source not found", never an
//! error: malformed payloads must not reject the request.

use bytes::Bytes;
use http::{HeaderMap, Method};

use crate::rule::RateLimitRule;

/// Recognized body families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Json,
    Form,
    Xml,
    Multipart,
}

impl Family {
    /// Map a content-type string to a recognized family.
    pub fn detect(content_type: &str) -> Option<Family> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "application/json" => Some(Family::Json),
            "application/x-www-form-urlencoded" => Some(Family::Form),
            "application/xml" | "text/xml" => Some(Family::Xml),
            "multipart/form-data" => Some(Family::Multipart),
            other if other.ends_with("+json") => Some(Family::Json),
            other if other.ends_with("+xml") => Some(Family::Xml),
            _ => None,
        }
    }
}

/// Body bytes captured once per request, shared between the resolver and the
/// upstream replay.
#[derive(Debug, Clone)]
pub struct CachedBody {
    pub bytes: Bytes,
    pub family: Family,
    /// The raw request Content-Type; the multipart boundary lives here.
    pub content_type: String,
}

/// Whether the gateway should buffer the body for this rule: body limiting
/// on, a method that carries a body, and a content type the rule recognizes.
pub fn needs_buffering(rule: &RateLimitRule, method: &Method, headers: &HeaderMap) -> bool {
    if !rule.body_limit_enabled {
        return false;
    }
    if !matches!(*method, Method::POST | Method::PUT | Method::PATCH) {
        return false;
    }
    effective_family(rule, headers).is_some()
}

/// The family extraction runs under: the rule's `bodyContentType` override
/// when present, otherwise the request's own Content-Type.
pub fn effective_family(rule: &RateLimitRule, headers: &HeaderMap) -> Option<Family> {
    if let Some(ct) = rule.body_content_type.as_deref() {
        return Family::detect(ct);
    }
    headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(Family::detect)
}

/// Extract the value at `path` from a cached body. `None` on any failure:
/// malformed payload, missing field, unsupported node.
pub async fn extract(body: &CachedBody, path: &str) -> Option<String> {
    match body.family {
        Family::Json => extract_json(&body.bytes, path),
        Family::Form => extract_form(&body.bytes, path),
        Family::Xml => extract_xml(&body.bytes, path),
        Family::Multipart => extract_multipart(body, path).await,
    }
}

fn extract_json(bytes: &[u8], path: &str) -> Option<String> {
    let root: serde_json::Value = serde_json::from_slice(bytes).ok()?;
    let mut node = &root;
    for part in path.split('.') {
        node = node.get(part)?;
    }
    json_value_string(node)
}

/// Stringify a JSON leaf: strings as-is, numbers and booleans via Display,
/// objects and arrays as their JSON text. Null is "not found".
pub(crate) fn json_value_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) if s.is_empty() => None,
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        other => serde_json::to_string(other).ok(),
    }
}

fn extract_form(bytes: &[u8], key: &str) -> Option<String> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(bytes).ok()?;
    pairs
        .into_iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v)
        .filter(|v| !v.is_empty())
}

/// Element-path lookup, namespace-unaware, first match's text. Accepts both
/// `/order/customer/id` and `order.customer.id`; the path is rooted at the
/// document element.
fn extract_xml(bytes: &[u8], path: &str) -> Option<String> {
    let text = std::str::from_utf8(bytes).ok()?;
    let doc = roxmltree::Document::parse(text).ok()?;
    let parts: Vec<&str> = path
        .split(['/', '.'])
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        return None;
    }
    let node = find_element(doc.root(), &parts)?;
    let value = node.text()?.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn find_element<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    parts: &[&str],
) -> Option<roxmltree::Node<'a, 'input>> {
    let (first, rest) = parts.split_first()?;
    for child in node.children().filter(|c| c.is_element()) {
        if child.tag_name().name() == *first {
            if rest.is_empty() {
                return Some(child);
            }
            if let Some(found) = find_element(child, rest) {
                return Some(found);
            }
        }
    }
    None
}

/// Named text part of a multipart form. File parts are not supported.
async fn extract_multipart(body: &CachedBody, name: &str) -> Option<String> {
    let boundary = multer::parse_boundary(&body.content_type).ok()?;
    let bytes = body.bytes.clone();
    let stream = futures_util::stream::once(async move {
        Ok::<Bytes, std::convert::Infallible>(bytes)
    });
    let mut multipart = multer::Multipart::new(stream, boundary);
    while let Some(field) = multipart.next_field().await.ok().flatten() {
        if field.name() == Some(name) && field.file_name().is_none() {
            return field
                .text()
                .await
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty());
        }
    }
    None
}
