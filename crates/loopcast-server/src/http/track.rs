// SPDX-License-Identifier: Apache-2.0

use crate::http::{bad_request, http_error, json_response, request_is_secure};
use crate::middleware::ClientIp;
use crate::session::get_or_create_session;
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::header::{HeaderMap, HeaderValue, LOCATION, SET_COOKIE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use std::collections::HashMap;
use tracing::warn;

/// Record a view for the session (best effort), wake stream subscribers, and
/// return the combined view count.
pub async fn email_view(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if id.trim().is_empty() {
        return bad_request("missing email id");
    }
    let session = get_or_create_session(&headers, request_is_secure(&headers));

    match state.store.track_email_view(&session.id, &id).await {
        Ok(()) => state.notifier.notify(&id),
        Err(err) => warn!(email_id = %id, "track view failed: {err}"),
    }

    let views = match state.store.email_view_count(&id).await {
        Ok(views) => views,
        Err(err) => return http_error(&err),
    };

    let mut resp = json_response(StatusCode::OK, &serde_json::json!({ "views": views }));
    if let Some(cookie) = session.set_cookie {
        resp.headers_mut().insert(SET_COOKIE, cookie);
    }
    resp
}

/// Redirect to the original link target, recording the click only when the
/// per-IP limiter admits it. The redirect itself is unconditional.
pub async fn link_click(
    State(state): State<AppState>,
    Path((id, index)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    Extension(ClientIp(client_ip)): Extension<ClientIp>,
    headers: HeaderMap,
) -> Response {
    let target_url = query.get("url").cloned().unwrap_or_default();
    if id.trim().is_empty() || index.is_empty() || target_url.is_empty() {
        return bad_request("missing parameters");
    }
    let Ok(link_index) = index.parse::<i32>() else {
        return bad_request("invalid link index");
    };
    let Ok(location) = HeaderValue::from_str(&target_url) else {
        return bad_request("invalid url");
    };

    let session = get_or_create_session(&headers, request_is_secure(&headers));

    if state.click_limiter.should_track(&client_ip) {
        match state
            .store
            .track_link_click(&session.id, &id, &target_url, link_index)
            .await
        {
            Ok(()) => state.notifier.notify(&id),
            Err(err) => warn!(email_id = %id, "track click failed: {err}"),
        }
    }

    let mut resp = StatusCode::FOUND.into_response();
    resp.headers_mut().insert(LOCATION, location);
    if let Some(cookie) = session.set_cookie {
        resp.headers_mut().insert(SET_COOKIE, cookie);
    }
    resp
}
