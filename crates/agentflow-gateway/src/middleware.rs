use crate::error::ApiError;
use crate::rate_limit::{Admission, ClientId, RateLimit, RateLimiter};
use axum::{
    extract::{ConnectInfo, Query, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::warn;

/// API keys and request rate limits for the HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Allowed API keys. Empty = no auth required.
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(default = "default_max_requests_per_second")]
    pub max_requests_per_second: u32,
    #[serde(default = "default_max_burst")]
    pub max_burst: u32,
}

fn default_max_requests_per_second() -> u32 {
    10
}
fn default_max_burst() -> u32 {
    50
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            max_requests_per_second: default_max_requests_per_second(),
            max_burst: default_max_burst(),
        }
    }
}

impl SecurityConfig {
    /// Returns true if authentication is enabled (at least one key configured).
    pub fn auth_enabled(&self) -> bool {
        !self.api_keys.is_empty()
    }

    pub fn rate_limit(&self) -> RateLimit {
        RateLimit {
            burst: self.max_burst,
            per_second: self.max_requests_per_second,
        }
    }

    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(self.rate_limit())
    }
}

/// Shared middleware state.
#[derive(Clone)]
pub struct MiddlewareState {
    pub rate_limiter: Arc<RateLimiter>,
    pub api_keys: Vec<String>,
}

#[derive(Deserialize, Default)]
pub struct AuthQuery {
    pub api_key: Option<String>,
}

/// Key presented by the caller: `Authorization: Bearer <key>` first, then `?api_key=<key>`.
fn presented_key(headers: &HeaderMap, query: &AuthQuery) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
        .or_else(|| query.api_key.clone())
}

/// Auth middleware: validates the API key from header or query param.
///
/// If no API keys are configured, all requests are allowed.
pub async fn auth_middleware(
    State(state): State<Arc<MiddlewareState>>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    request: Request,
    next: Next,
) -> Response {
    if state.api_keys.is_empty() {
        return next.run(request).await;
    }

    match presented_key(&headers, &query) {
        Some(key) if state.api_keys.contains(&key) => next.run(request).await,
        Some(_) => {
            warn!(path = %request.uri().path(), "Rejected request: invalid API key");
            ApiError::Unauthorized("Invalid API key".to_string()).into_response()
        }
        None => {
            warn!(path = %request.uri().path(), "Rejected request: missing API key");
            ApiError::Unauthorized("API key required".to_string()).into_response()
        }
    }
}

/// Who a request is charged to.
///
/// Only a configured key earns its own bucket. Missing or unknown keys are
/// charged to the peer address, so guessing keys spends the caller's budget.
fn client_identity(
    presented: Option<&str>,
    api_keys: &[String],
    peer: Option<IpAddr>,
) -> ClientId {
    match (presented, peer) {
        (Some(key), _) if api_keys.iter().any(|k| k == key) => {
            ClientId::ApiKey(key.to_string())
        }
        (_, Some(ip)) => ClientId::Peer(ip),
        (_, None) => ClientId::Unknown,
    }
}

/// Rate limiting middleware. Runs before auth, so rejected requests are charged too.
pub async fn rate_limit_middleware(
    State(state): State<Arc<MiddlewareState>>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let presented = presented_key(&headers, &query);
    let client = client_identity(presented.as_deref(), &state.api_keys, peer);

    match state.rate_limiter.admit(&client).await {
        Admission::Allowed => next.run(request).await,
        Admission::Limited { retry_after } => {
            warn!(client = %client, path = %request.uri().path(), "Rate limited request");
            ApiError::RateLimited { retry_after }.into_response()
        }
    }
}
