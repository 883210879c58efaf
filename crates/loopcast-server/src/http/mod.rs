// SPDX-License-Identifier: Apache-2.0

use crate::store::StoreError;
use crate::AppState;
use axum::body::Body;
use axum::http::header::{HeaderMap, HeaderValue, CONTENT_TYPE, ETAG, HOST, IF_NONE_MATCH};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use loopcast_api::ApiError;
use serde::Serialize;
use std::future::Future;
use tracing::error;

pub mod docs;
pub mod reads;
pub mod stream;
pub mod track;

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const READ_CACHE_CONTROL: &str = "public, max-age=30, stale-while-revalidate=60";

pub(crate) fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response {
    match serde_json::to_vec_pretty(value) {
        Ok(body) => {
            let mut resp = Response::new(Body::from(body));
            *resp.status_mut() = status;
            resp.headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
            resp
        }
        Err(err) => {
            error!("serialize response body: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub(crate) fn error_response(status: StatusCode, err: ApiError) -> Response {
    json_response(status, &err)
}

pub(crate) fn bad_request(message: &str) -> Response {
    error_response(StatusCode::BAD_REQUEST, ApiError::new(message))
}

/// Map a store failure onto the public taxonomy: timeouts become 504, the
/// rest a detail-free 500. The cause only reaches the log.
pub(crate) fn http_error(err: &StoreError) -> Response {
    match err {
        StoreError::Timeout(_) => {
            error!("store timeout: {err}");
            error_response(StatusCode::GATEWAY_TIMEOUT, ApiError::upstream_timeout())
        }
        StoreError::Database(_) => {
            error!("store failure: {err}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, ApiError::internal())
        }
    }
}

/// Scheme of the outward-facing request. Untrusted `X-Forwarded-Proto` has
/// already been stripped by the proxy-trust middleware, so whatever survives
/// here is believable.
pub(crate) fn request_scheme(headers: &HeaderMap) -> &'static str {
    match headers.get("x-forwarded-proto").and_then(|v| v.to_str().ok()) {
        Some(proto) if proto.eq_ignore_ascii_case("https") => "https",
        _ => "http",
    }
}

pub(crate) fn request_is_secure(headers: &HeaderMap) -> bool {
    request_scheme(headers) == "https"
}

pub(crate) fn request_base_url(headers: &HeaderMap) -> String {
    let host = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("{}://{}", request_scheme(headers), host)
}

pub(crate) fn cache_key(method: &Method, uri: &Uri) -> String {
    format!("{} {}?{}", method, uri.path(), uri.query().unwrap_or(""))
}

fn conditional_cached_response(headers: &HeaderMap, body: Vec<u8>, etag: &str) -> Response {
    let if_none_match = headers.get(IF_NONE_MATCH).and_then(|v| v.to_str().ok());
    if if_none_match == Some(etag) {
        return StatusCode::NOT_MODIFIED.into_response();
    }
    let mut resp = Response::new(Body::from(body));
    let resp_headers = resp.headers_mut();
    resp_headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    resp_headers.insert(
        "cache-control",
        HeaderValue::from_static(READ_CACHE_CONTROL),
    );
    if let Ok(value) = HeaderValue::from_str(etag) {
        resp_headers.insert(ETAG, value);
    }
    resp
}

/// Read-endpoint wrapper: serve from the response cache (with conditional
/// 304 short-circuit), otherwise run the builder, memoize the indented JSON,
/// and respond with the caching headers.
pub(crate) async fn json_cached<T, F, Fut>(
    state: &AppState,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    build: F,
) -> Response
where
    T: Serialize,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let key = cache_key(method, uri);
    if let Some((body, etag)) = state.cache.get(&key) {
        return conditional_cached_response(headers, body, &etag);
    }
    let value = match build().await {
        Ok(value) => value,
        Err(err) => return http_error(&err),
    };
    let body = match serde_json::to_vec_pretty(&value) {
        Ok(body) => body,
        Err(err) => {
            error!("serialize cached response: {err}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, ApiError::internal());
        }
    };
    let etag = state.cache.set(key, body.clone());
    conditional_cached_response(headers, body, &etag)
}
