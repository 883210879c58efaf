// SPDX-License-Identifier: Apache-2.0

use crate::http::{error_response, json_response};
use crate::AppState;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{HeaderMap, HeaderValue};
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures::FutureExt;
use loopcast_api::ApiError;
use regex::Regex;
use std::net::SocketAddr;
use std::sync::LazyLock;
use std::time::Instant;
use tracing::{error, info};

/// Resolved client IP, installed into request extensions by
/// `real_ip_middleware` and consumed by the rate limiters and click handler.
#[derive(Debug, Clone)]
pub struct ClientIp(pub String);

#[derive(Debug, Clone)]
pub struct RequestId(pub String);

static LOCALHOST_ORIGIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://localhost(:\d+)?$|^https?://127\.0\.0\.1(:\d+)?$|^https?://\[::1\](:\d+)?$")
        .expect("localhost origin regex")
});

fn normalized_header_value(headers: &HeaderMap, key: &str, max_len: usize) -> Option<String> {
    let raw = headers.get(key)?.to_str().ok()?.trim();
    if raw.is_empty() || raw.len() > max_len {
        return None;
    }
    Some(raw.to_string())
}

fn normalized_forwarded_for(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get("x-forwarded-for")?.to_str().ok()?;
    let first = raw.split(',').next()?.trim();
    if first.is_empty() || first.len() > 64 {
        return None;
    }
    if first
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b':' || b == b'-')
    {
        Some(first.to_string())
    } else {
        None
    }
}

fn peer_ip(req: &Request) -> Option<std::net::IpAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip())
}

/// Forwarded headers are only believed when the immediate peer is inside the
/// configured proxy allow-list; otherwise they are stripped before anything
/// downstream can read them. The proto header is included since it steers the
/// base URL baked into rewritten links.
pub async fn proxy_trust_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let trusted = peer_ip(&req).is_some_and(|ip| {
        state
            .config
            .trusted_proxy_cidrs
            .iter()
            .any(|cidr| cidr.contains(ip))
    });
    if !trusted {
        let headers = req.headers_mut();
        headers.remove("x-forwarded-for");
        headers.remove("x-real-ip");
        headers.remove("x-forwarded-proto");
    }
    next.run(req).await
}

pub async fn real_ip_middleware(mut req: Request, next: Next) -> Response {
    let ip = normalized_forwarded_for(req.headers())
        .or_else(|| normalized_header_value(req.headers(), "x-real-ip", 64))
        .or_else(|| peer_ip(&req).map(|ip| ip.to_string()))
        .unwrap_or_else(|| "unknown".to_string());
    req.extensions_mut().insert(ClientIp(ip));
    next.run(req).await
}

pub async fn request_id_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let request_id = normalized_header_value(req.headers(), "x-request-id", 128)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    req.extensions_mut().insert(RequestId(request_id.clone()));

    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let client_ip = req
        .extensions()
        .get::<ClientIp>()
        .map_or_else(|| "unknown".to_string(), |ip| ip.0.clone());

    let mut resp = next.run(req).await;
    if state.config.enable_access_log {
        info!(
            target: "loopcast_access",
            method = %method,
            path = %path,
            status = resp.status().as_u16(),
            request_id = %request_id,
            client_ip = %client_ip,
            latency_ms = started.elapsed().as_millis() as u64,
            "request"
        );
    }
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        resp.headers_mut().insert("x-request-id", value);
    }
    resp
}

/// A handler panic becomes a plain 500 with no detail leaked to the client.
pub async fn recover_middleware(req: Request, next: Next) -> Response {
    match std::panic::AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(resp) => resp,
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("handler panicked: {detail}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, ApiError::internal())
        }
    }
}

pub async fn heartbeat_middleware(req: Request, next: Next) -> Response {
    if req.method() == Method::GET && req.uri().path() == "/healthz" {
        return (StatusCode::OK, "ok").into_response();
    }
    next.run(req).await
}

pub async fn timeout_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    match tokio::time::timeout(state.config.request_timeout, next.run(req)).await {
        Ok(resp) => resp,
        Err(_) => {
            error!("request deadline exceeded");
            error_response(StatusCode::GATEWAY_TIMEOUT, ApiError::upstream_timeout())
        }
    }
}

fn origin_allowed(origin: &str, allowed: &[String]) -> bool {
    LOCALHOST_ORIGIN_RE.is_match(origin)
        || allowed.iter().any(|entry| entry == origin || entry == "*")
}

fn apply_cors_headers(headers: &mut HeaderMap, origin: &str) {
    if let Ok(value) = HeaderValue::from_str(origin) {
        headers.insert("access-control-allow-origin", value);
    }
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET, OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("Content-Type"),
    );
    headers.insert(
        "access-control-allow-credentials",
        HeaderValue::from_static("true"),
    );
    headers.insert("access-control-max-age", HeaderValue::from_static("86400"));
}

/// CORS for the read surface: any localhost origin plus the configured
/// allow-list. Preflights are answered here, never routed.
pub async fn cors_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let origin = normalized_header_value(req.headers(), "origin", 256);
    let allowed = origin
        .as_deref()
        .is_some_and(|o| origin_allowed(o, &state.config.cors_allowed_origins));

    if req.method() == Method::OPTIONS {
        let mut resp = StatusCode::NO_CONTENT.into_response();
        if allowed {
            if let Some(origin) = &origin {
                apply_cors_headers(resp.headers_mut(), origin);
            }
        }
        return resp;
    }

    let mut resp = next.run(req).await;
    if allowed {
        if let Some(origin) = &origin {
            apply_cors_headers(resp.headers_mut(), origin);
            resp.headers_mut()
                .insert("vary", HeaderValue::from_static("Origin"));
        }
    }
    resp
}

pub async fn security_headers_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert("referrer-policy", HeaderValue::from_static("no-referrer"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static(
            "default-src 'none'; base-uri 'none'; form-action 'none'; frame-ancestors 'none';",
        ),
    );
    if state.config.enable_hsts {
        headers.insert(
            "strict-transport-security",
            HeaderValue::from_static("max-age=31536000; includeSubDomains; preload"),
        );
    }
    resp
}

fn client_ip_key(req: &Request) -> String {
    req.extensions()
        .get::<ClientIp>()
        .map_or_else(|| "unknown".to_string(), |ip| ip.0.clone())
}

fn too_many_requests() -> Response {
    json_response(
        StatusCode::TOO_MANY_REQUESTS,
        &ApiError::new("too many requests"),
    )
}

pub async fn read_rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let key = client_ip_key(&req);
    if !state.read_limiter.allow(&key) {
        return too_many_requests();
    }
    next.run(req).await
}

pub async fn stream_rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let key = client_ip_key(&req);
    if !state.stream_limiter.allow(&key) {
        return too_many_requests();
    }
    next.run(req).await
}
