// SPDX-License-Identifier: Apache-2.0

use axum::body::Body;
use axum::http::header::{HeaderValue, CONTENT_TYPE, LOCATION};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

const API_DOCS_MARKDOWN: &str = include_str!("../../docs/api.md");

pub async fn root_redirect() -> Response {
    let mut resp = StatusCode::FOUND.into_response();
    resp.headers_mut()
        .insert(LOCATION, HeaderValue::from_static("/docs"));
    resp
}

pub async fn api_docs() -> Response {
    let mut resp = Response::new(Body::from(API_DOCS_MARKDOWN));
    resp.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/markdown; charset=utf-8"),
    );
    resp
}
