//! Security middleware for the bridge API
//!
//! Layers, outermost first as wired in `main`:
//! - request logging with request ids (query strings are never logged)
//! - security headers
//! - per-IP rate limiting
//! - API key authentication, skipped for the OAuth callback and health check
//! - request body size limit

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{BridgeConfig, sanitize_for_logging};

const RATE_WINDOW: Duration = Duration::from_secs(60);

const SECURITY_HEADERS: [(&str, &str); 6] = [
    ("x-frame-options", "DENY"),
    ("x-content-type-options", "nosniff"),
    ("strict-transport-security", "max-age=31536000; includeSubDomains"),
    ("content-security-policy", "default-src 'none'; frame-ancestors 'none'"),
    // The callback URL carries the single-use state token
    ("referrer-policy", "no-referrer"),
    ("cache-control", "no-store"),
];

#[derive(Debug, Clone)]
pub struct SecurityMiddlewareConfig {
    pub enable_auth: bool,
    pub api_keys: Vec<String>,
    pub rate_limit_per_minute: u32,
    /// Bytes
    pub max_request_size: usize,
    pub log_requests: bool,
    pub sanitize_logs: bool,
    /// Path prefixes reachable without an API key
    pub public_paths: Vec<String>,
}

impl SecurityMiddlewareConfig {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            enable_auth: config.security.enable_auth,
            api_keys: config.security.api_keys.clone(),
            rate_limit_per_minute: config.security.rate_limit_per_minute,
            max_request_size: config.security.max_request_size,
            log_requests: config.logging.log_requests,
            sanitize_logs: config.logging.sanitize_logs,
            ..Self::default()
        }
    }
}

impl Default for SecurityMiddlewareConfig {
    fn default() -> Self {
        Self {
            enable_auth: true,
            api_keys: Vec::new(),
            rate_limit_per_minute: 120,
            max_request_size: 64 * 1024,
            log_requests: true,
            sanitize_logs: true,
            // The OAuth provider redirects the member's browser to the callback
            public_paths: vec!["/health".to_string(), "/verify/callback".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    started: Instant,
    used: u32,
}

/// Outcome of one rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_after_secs: u64,
}

/// Fixed one-minute windows per client IP
#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<String, RateWindow>,
    limit: u32,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            windows: DashMap::new(),
            limit: requests_per_minute,
        }
    }

    pub fn check(&self, client: &str) -> RateDecision {
        let now = Instant::now();
        let mut window = self.windows.entry(client.to_string()).or_insert(RateWindow {
            started: now,
            used: 0,
        });

        if now.duration_since(window.started) >= RATE_WINDOW {
            *window = RateWindow { started: now, used: 0 };
        }

        let reset_after_secs = RATE_WINDOW
            .saturating_sub(now.duration_since(window.started))
            .as_secs();

        if window.used >= self.limit {
            return RateDecision {
                allowed: false,
                remaining: 0,
                reset_after_secs,
            };
        }

        window.used += 1;
        RateDecision {
            allowed: true,
            remaining: self.limit - window.used,
            reset_after_secs,
        }
    }

    /// Forget clients whose window ended at least a full window ago
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.windows
            .retain(|_, w| now.duration_since(w.started) < RATE_WINDOW * 2);
    }

    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}

#[derive(Clone)]
pub struct SecurityState {
    pub config: SecurityMiddlewareConfig,
    pub rate_limiter: Arc<RateLimiter>,
    /// SHA-256 digests of the accepted keys
    key_digests: Arc<HashSet<[u8; 32]>>,
}

impl SecurityState {
    pub fn new(config: SecurityMiddlewareConfig) -> Self {
        let key_digests = config.api_keys.iter().map(|k| key_digest(k)).collect();
        Self {
            rate_limiter: Arc::new(RateLimiter::new(config.rate_limit_per_minute)),
            key_digests: Arc::new(key_digests),
            config,
        }
    }

    fn accepts(&self, key: &str) -> bool {
        self.key_digests.contains(&key_digest(key))
    }
}

fn key_digest(key: &str) -> [u8; 32] {
    Sha256::digest(key.as_bytes()).into()
}

/// Client IP, preferring what a reverse proxy reports
fn client_ip(headers: &HeaderMap, addr: Option<&SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    match (forwarded, addr) {
        (Some(ip), _) => ip.to_string(),
        (None, Some(addr)) => addr.ip().to_string(),
        (None, None) => "unknown".to_string(),
    }
}

fn is_public_path(path: &str, public_paths: &[String]) -> bool {
    public_paths.iter().any(|prefix| path.starts_with(prefix.as_str()))
}

/// `x-api-key`, or a bearer token in `authorization`
fn presented_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(key.trim());
    }
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

pub async fn auth_middleware(
    State(state): State<SecurityState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if !state.config.enable_auth || is_public_path(request.uri().path(), &state.config.public_paths) {
        return Ok(next.run(request).await);
    }

    match presented_key(&headers) {
        Some(key) if state.accepts(key) => {
            debug!(path = %request.uri().path(), "API key accepted");
            Ok(next.run(request).await)
        }
        Some(_) => {
            warn!(path = %request.uri().path(), "Rejected invalid API key");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            warn!(path = %request.uri().path(), "Rejected request without API key");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

fn rate_headers(headers: &mut HeaderMap, limit: u32, decision: RateDecision) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(decision.reset_after_secs));
}

pub async fn rate_limit_middleware(
    State(state): State<SecurityState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&headers, Some(&addr));
    let decision = state.rate_limiter.check(&ip);
    let limit = state.config.rate_limit_per_minute;

    if !decision.allowed {
        warn!(
            client_ip = %sanitize_for_logging(&ip),
            path = %request.uri().path(),
            "Rate limit exceeded"
        );
        let mut response = StatusCode::TOO_MANY_REQUESTS.into_response();
        rate_headers(response.headers_mut(), limit, decision);
        response
            .headers_mut()
            .insert("retry-after", HeaderValue::from(decision.reset_after_secs));
        return response;
    }

    let mut response = next.run(request).await;
    rate_headers(response.headers_mut(), limit, decision);
    response
}

pub async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    for (name, value) in SECURITY_HEADERS {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
    headers.remove("server");
    response
}

pub async fn logging_middleware(
    State(state): State<SecurityState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let request_id = Uuid::new_v4().to_string();
    if !state.config.log_requests {
        let mut response = next.run(request).await;
        set_request_id(&mut response, &request_id);
        return response;
    }

    let started = Instant::now();
    let method = request.method().clone();
    // Path only: the callback's query carries the OAuth code and state
    let path = request.uri().path().to_string();
    let ip = client_ip(&headers, Some(&addr));
    let ip = if state.config.sanitize_logs {
        sanitize_for_logging(&ip)
    } else {
        ip
    };

    let mut response = next.run(request).await;
    set_request_id(&mut response, &request_id);

    let status = response.status().as_u16();
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match status {
        500.. => error!(%request_id, %method, %path, status, elapsed_ms, client_ip = %ip, "Request failed"),
        400..=499 => warn!(%request_id, %method, %path, status, elapsed_ms, client_ip = %ip, "Request rejected"),
        _ => info!(%request_id, %method, %path, status, elapsed_ms, client_ip = %ip, "Request served"),
    }

    response
}

fn set_request_id(response: &mut Response, request_id: &str) {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
}

pub async fn body_size_middleware(
    State(state): State<SecurityState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let declared = headers
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());

    if let Some(length) = declared
        && length > state.config.max_request_size
    {
        warn!(length, max = state.config.max_request_size, "Request body too large");
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_per_client() {
        let limiter = RateLimiter::new(3);

        let first = limiter.check("127.0.0.1");
        assert!(first.allowed);
        assert_eq!(first.remaining, 2);
        assert!(limiter.check("127.0.0.1").allowed);
        assert_eq!(limiter.check("127.0.0.1").remaining, 0);

        let blocked = limiter.check("127.0.0.1");
        assert!(!blocked.allowed);
        assert!(blocked.reset_after_secs <= 60);

        assert!(limiter.check("10.1.1.1").allowed);
        assert_eq!(limiter.tracked(), 2);
    }

    #[test]
    fn test_public_paths() {
        let public = SecurityMiddlewareConfig::default().public_paths;

        assert!(is_public_path("/health", &public));
        assert!(is_public_path("/verify/callback", &public));
        assert!(!is_public_path("/verify/start", &public));
        assert!(!is_public_path("/points/1/2/add", &public));
    }

    #[test]
    fn test_client_ip_sources() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let mut proxied = HeaderMap::new();
        proxied.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1, 10.0.0.2"));

        assert_eq!(client_ip(&proxied, Some(&addr)), "10.0.0.1");
        assert_eq!(client_ip(&HeaderMap::new(), Some(&addr)), "127.0.0.1");
        assert_eq!(client_ip(&HeaderMap::new(), None), "unknown");
    }

    #[test]
    fn test_presented_key_and_digest_match() {
        let state = SecurityState::new(SecurityMiddlewareConfig {
            api_keys: vec!["bot-key-0123456789".to_string()],
            ..SecurityMiddlewareConfig::default()
        });

        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer bot-key-0123456789"));
        let key = presented_key(&headers).unwrap();
        assert!(state.accepts(key));
        assert!(!state.accepts("bot-key-wrong"));

        let mut basic = HeaderMap::new();
        basic.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert_eq!(presented_key(&basic), None);
    }
}
