//! Rate-limit rule model.
//!
//! A rule names a path pattern, a fixed-window quota, and the sources the
//! identifier is resolved from. The wire shape is camelCase JSON with every
//! knob defaulted, so partial admin payloads round-trip cleanly.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// How a resolved source value combines with the client IP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitMode {
    /// The source value replaces the client IP as the identifier.
    #[default]
    ReplaceIp,
    /// The identifier becomes `<clientIp>:<value>`.
    CombineWithIp,
}

/// One step of the identifier precedence chain, compiled from a rule's
/// enabled sources. The resolver walks the list and takes the first value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentifierSource {
    Header {
        name: String,
        mode: LimitMode,
    },
    Cookie {
        name: String,
        mode: LimitMode,
    },
    Body {
        path: String,
        mode: LimitMode,
        content_type: Option<String>,
    },
    Jwt {
        claims: Vec<String>,
        separator: String,
    },
    /// Always present as the final fallback.
    ClientIp,
}

/// A rate-limit policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitRule {
    /// Opaque unique id. Assigned by the admin API when left empty.
    pub id: String,
    /// Glob-like path pattern: `*` one segment, `**` any segments.
    pub path_pattern: String,
    pub allowed_requests: u32,
    pub window_seconds: u64,
    /// Only active rules participate in matching.
    pub active: bool,
    /// Higher priority wins overlapping patterns.
    pub priority: i32,

    pub queue_enabled: bool,
    pub max_queue_size: u32,
    pub delay_per_request_ms: u64,

    pub jwt_enabled: bool,
    /// Claim names, concatenated in order with the separator.
    pub jwt_claims: Vec<String>,
    pub jwt_claim_separator: String,

    pub body_limit_enabled: bool,
    /// Dot-path (JSON), key (form), element path (XML) or part name (multipart).
    pub body_field_path: String,
    pub body_limit_type: LimitMode,
    /// Overrides the request Content-Type when set.
    pub body_content_type: Option<String>,

    pub header_limit_enabled: bool,
    pub header_name: String,
    pub header_limit_type: LimitMode,

    pub cookie_limit_enabled: bool,
    pub cookie_name: String,
    pub cookie_limit_type: LimitMode,
}

impl Default for RateLimitRule {
    fn default() -> Self {
        Self {
            id: String::new(),
            path_pattern: "/**".to_string(),
            allowed_requests: 100,
            window_seconds: 60,
            active: true,
            priority: 0,

            queue_enabled: false,
            max_queue_size: 0,
            delay_per_request_ms: 0,

            jwt_enabled: false,
            jwt_claims: Vec::new(),
            jwt_claim_separator: ":".to_string(),

            body_limit_enabled: false,
            body_field_path: String::new(),
            body_limit_type: LimitMode::ReplaceIp,
            body_content_type: None,

            header_limit_enabled: false,
            header_name: String::new(),
            header_limit_type: LimitMode::ReplaceIp,

            cookie_limit_enabled: false,
            cookie_name: String::new(),
            cookie_limit_type: LimitMode::ReplaceIp,
        }
    }
}

impl RateLimitRule {
    /// Check the model invariants. Called at the admin boundary; rules read
    /// back from the store are trusted.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.path_pattern.is_empty() {
            return Err(CoreError::InvalidRule("pathPattern must not be empty".into()));
        }
        if self.allowed_requests < 1 {
            return Err(CoreError::InvalidRule("allowedRequests must be >= 1".into()));
        }
        if self.window_seconds < 1 {
            return Err(CoreError::InvalidRule("windowSeconds must be >= 1".into()));
        }
        if self.queue_enabled {
            if self.max_queue_size < 1 {
                return Err(CoreError::InvalidRule(
                    "maxQueueSize must be >= 1 when queueing is enabled".into(),
                ));
            }
            if self.delay_per_request_ms < 1 {
                return Err(CoreError::InvalidRule(
                    "delayPerRequestMs must be >= 1 when queueing is enabled".into(),
                ));
            }
        }
        if self.jwt_enabled && self.jwt_claims.iter().all(|c| c.is_empty()) {
            return Err(CoreError::InvalidRule(
                "jwtClaims must not be empty when JWT limiting is enabled".into(),
            ));
        }
        if self.body_limit_enabled && self.body_field_path.is_empty() {
            return Err(CoreError::InvalidRule(
                "bodyFieldPath must not be empty when body limiting is enabled".into(),
            ));
        }
        if self.header_limit_enabled && self.header_name.is_empty() {
            return Err(CoreError::InvalidRule(
                "headerName must not be empty when header limiting is enabled".into(),
            ));
        }
        if self.cookie_limit_enabled && self.cookie_name.is_empty() {
            return Err(CoreError::InvalidRule(
                "cookieName must not be empty when cookie limiting is enabled".into(),
            ));
        }
        Ok(())
    }

    /// Enabled identifier sources in precedence order:
    /// header, cookie, body field, JWT claims, then always the client IP.
    pub fn identifier_sources(&self) -> Vec<IdentifierSource> {
        let mut sources = Vec::with_capacity(5);
        if self.header_limit_enabled {
            sources.push(IdentifierSource::Header {
                name: self.header_name.clone(),
                mode: self.header_limit_type,
            });
        }
        if self.cookie_limit_enabled {
            sources.push(IdentifierSource::Cookie {
                name: self.cookie_name.clone(),
                mode: self.cookie_limit_type,
            });
        }
        if self.body_limit_enabled {
            sources.push(IdentifierSource::Body {
                path: self.body_field_path.clone(),
                mode: self.body_limit_type,
                content_type: self.body_content_type.clone(),
            });
        }
        if self.jwt_enabled {
            sources.push(IdentifierSource::Jwt {
                claims: self.jwt_claims.clone(),
                separator: self.jwt_claim_separator.clone(),
            });
        }
        sources.push(IdentifierSource::ClientIp);
        sources
    }
}
