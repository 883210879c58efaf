use axum::body::Body;
use axum::http::header::LOCATION;
use axum::http::{Method, Request, StatusCode};
use axum::middleware::from_fn;
use axum::routing::get;
use axum::Router;
use http_body_util::BodyExt;
use loopcast_server::{build_router, middleware, AppState, FakeStore, ServerConfig};
use std::sync::Arc;
use tower::ServiceExt;

fn app() -> Router {
    let store = Arc::new(FakeStore::default());
    build_router(AppState::new(store, ServerConfig::default()))
}

fn get_req(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

#[tokio::test]
async fn healthz_short_circuits_to_200() {
    let resp = app().oneshot(get_req("/healthz")).await.expect("response");
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn root_redirects_to_docs_with_302() {
    let resp = app().oneshot(get_req("/")).await.expect("response");
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(
        resp.headers().get(LOCATION).and_then(|v| v.to_str().ok()),
        Some("/docs")
    );
}

#[tokio::test]
async fn docs_are_served_as_markdown() {
    let resp = app().oneshot(get_req("/docs")).await.expect("response");
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("text/markdown; charset=utf-8")
    );
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let text = String::from_utf8(body.to_vec()).expect("utf8");
    assert!(text.contains("# Loopcast API"));
    assert!(text.contains("/emails/{id}/stats/stream"));
}

#[tokio::test]
async fn every_response_carries_security_headers_and_request_id() {
    let resp = app()
        .oneshot(get_req("/mailing_lists"))
        .await
        .expect("response");
    let headers = resp.headers();
    assert_eq!(
        headers
            .get("x-content-type-options")
            .and_then(|v| v.to_str().ok()),
        Some("nosniff")
    );
    assert_eq!(
        headers.get("x-frame-options").and_then(|v| v.to_str().ok()),
        Some("DENY")
    );
    assert_eq!(
        headers.get("referrer-policy").and_then(|v| v.to_str().ok()),
        Some("no-referrer")
    );
    assert_eq!(
        headers
            .get("content-security-policy")
            .and_then(|v| v.to_str().ok()),
        Some("default-src 'none'; base-uri 'none'; form-action 'none'; frame-ancestors 'none';")
    );
    assert!(
        headers.get("strict-transport-security").is_none(),
        "hsts is off by default"
    );
    assert!(headers.get("x-request-id").is_some());
}

#[tokio::test]
async fn hsts_is_emitted_when_enabled() {
    let store = Arc::new(FakeStore::default());
    let config = ServerConfig {
        enable_hsts: true,
        ..ServerConfig::default()
    };
    let resp = build_router(AppState::new(store, config))
        .oneshot(get_req("/healthz"))
        .await
        .expect("response");
    assert_eq!(
        resp.headers()
            .get("strict-transport-security")
            .and_then(|v| v.to_str().ok()),
        Some("max-age=31536000; includeSubDomains; preload")
    );
}

#[tokio::test]
async fn incoming_request_id_is_propagated() {
    let req = Request::builder()
        .uri("/healthz")
        .header("x-request-id", "req-123")
        .body(Body::empty())
        .expect("request");
    let resp = app().oneshot(req).await.expect("response");
    assert_eq!(
        resp.headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok()),
        Some("req-123")
    );
}

#[tokio::test]
async fn localhost_origins_get_cors_headers() {
    let req = Request::builder()
        .uri("/mailing_lists")
        .header("origin", "http://localhost:5173")
        .body(Body::empty())
        .expect("request");
    let resp = app().oneshot(req).await.expect("response");
    assert_eq!(
        resp.headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("http://localhost:5173")
    );
    assert_eq!(
        resp.headers()
            .get("access-control-allow-credentials")
            .and_then(|v| v.to_str().ok()),
        Some("true")
    );
}

#[tokio::test]
async fn preflight_returns_204_without_routing() {
    let req = Request::builder()
        .method(Method::OPTIONS)
        .uri("/emails")
        .header("origin", "http://localhost")
        .body(Body::empty())
        .expect("request");
    let resp = app().oneshot(req).await.expect("response");
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        resp.headers()
            .get("access-control-allow-methods")
            .and_then(|v| v.to_str().ok()),
        Some("GET, OPTIONS")
    );
}

#[tokio::test]
async fn disallowed_origins_get_no_cors_headers() {
    let req = Request::builder()
        .uri("/mailing_lists")
        .header("origin", "https://evil.example")
        .body(Body::empty())
        .expect("request");
    let resp = app().oneshot(req).await.expect("response");
    assert!(resp.headers().get("access-control-allow-origin").is_none());
}

#[tokio::test]
async fn forwarded_headers_from_untrusted_peers_are_stripped() {
    // With no trusted proxies configured, two clicks claiming different
    // forwarded IPs still share one limiter key, so only the first records.
    let store = Arc::new(FakeStore::default());
    let app = build_router(AppState::new(store.clone(), ServerConfig::default()));
    for forged in ["198.51.100.1", "198.51.100.2"] {
        let req = Request::builder()
            .uri("/emails/E1/click/0?url=https%3A%2F%2Fexample.com")
            .header("x-forwarded-for", forged)
            .body(Body::empty())
            .expect("request");
        let resp = app.clone().oneshot(req).await.expect("response");
        assert_eq!(resp.status(), StatusCode::FOUND);
    }
    assert_eq!(store.recorded_clicks("E1"), 1);
}

#[tokio::test]
async fn a_handler_panic_becomes_an_opaque_500() {
    let router: Router = Router::new()
        .route(
            "/boom",
            get(|| async {
                panic!("secret detail");
                #[allow(unreachable_code)]
                ()
            }),
        )
        .layer(from_fn(middleware::recover_middleware));
    let resp = router.oneshot(get_req("/boom")).await.expect("response");
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let text = String::from_utf8(body.to_vec()).expect("utf8");
    assert!(text.contains("internal server error"));
    assert!(!text.contains("secret detail"));
}
