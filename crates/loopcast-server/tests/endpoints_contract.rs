use axum::body::Body;
use axum::http::header::{COOKIE, ETAG, IF_NONE_MATCH, LOCATION, SET_COOKIE};
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use loopcast_model::{Email, EmailStats, ListRef, MailingList};
use loopcast_server::{build_router, AppState, FakeStore, ServerConfig};
use std::sync::Arc;
use tower::ServiceExt;

fn list(id: &str, name: &str) -> MailingList {
    MailingList {
        id: id.to_string(),
        slug: loopcast_model::slugify(name),
        name: name.to_string(),
        description: format!("about {name}"),
        color: "#ec3750".to_string(),
        is_public: true,
        subscriber_count: 10,
        last_updated_at: None,
        last_sent_at: None,
        sent_email_count: 1,
    }
}

fn email(id: &str, list_id: &str) -> Email {
    Email {
        id: id.to_string(),
        slug: id.to_string(),
        subject: format!("subject {id}"),
        excerpt: None,
        sent_at: None,
        mailing_list_id: list_id.to_string(),
        mailing_list: ListRef {
            id: list_id.to_string(),
            slug: "newsletter".to_string(),
            name: "Newsletter".to_string(),
            description: String::new(),
            color: "#ec3750".to_string(),
        },
        stats: EmailStats::default(),
        html: None,
        markdown: None,
        preview_text: None,
    }
}

fn app_with(lists: Vec<MailingList>, emails: Vec<Email>, config: ServerConfig) -> Router {
    let store = Arc::new(FakeStore::new(lists, emails));
    build_router(AppState::new(store, config))
}

fn app(lists: Vec<MailingList>, emails: Vec<Email>) -> Router {
    app_with(lists, emails, ServerConfig::default())
}

async fn body_bytes(resp: axum::response::Response) -> Vec<u8> {
    resp.into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes()
        .to_vec()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

#[tokio::test]
async fn mailing_lists_paginate_with_next_offset() {
    let app = app(
        vec![list("l1", "Alpha"), list("l2", "Beta"), list("l3", "Gamma")],
        Vec::new(),
    );
    let resp = app
        .clone()
        .oneshot(get("/mailing_lists?limit=2&offset=0"))
        .await
        .expect("response");
    assert_eq!(resp.status(), StatusCode::OK);
    let json: serde_json::Value =
        serde_json::from_slice(&body_bytes(resp).await).expect("json body");
    assert_eq!(json["items"].as_array().expect("items").len(), 2);
    assert_eq!(json["items"][0]["id"], "l1");
    assert_eq!(json["next_offset"], 2);

    let resp = app
        .oneshot(get("/mailing_lists?limit=2&offset=2"))
        .await
        .expect("response");
    let json: serde_json::Value =
        serde_json::from_slice(&body_bytes(resp).await).expect("json body");
    assert_eq!(json["items"].as_array().expect("items").len(), 1);
    assert!(
        json.get("next_offset").is_none(),
        "short page must omit next_offset"
    );
}

#[tokio::test]
async fn repeated_reads_share_bytes_and_etag_and_304_on_match() {
    let app = app(vec![list("l1", "Alpha")], vec![email("e1", "l1")]);

    let first = app.clone().oneshot(get("/emails")).await.expect("response");
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(
        first
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("application/json; charset=utf-8")
    );
    assert_eq!(
        first
            .headers()
            .get("cache-control")
            .and_then(|v| v.to_str().ok()),
        Some("public, max-age=30, stale-while-revalidate=60")
    );
    let etag = first
        .headers()
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .expect("etag")
        .to_string();
    assert!(etag.starts_with("W/\""), "weak etag, got {etag}");
    let first_body = body_bytes(first).await;

    let second = app.clone().oneshot(get("/emails")).await.expect("response");
    let second_etag = second
        .headers()
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .expect("etag")
        .to_string();
    assert_eq!(second_etag, etag);
    assert_eq!(body_bytes(second).await, first_body);

    let conditional = Request::builder()
        .uri("/emails")
        .header(IF_NONE_MATCH, &etag)
        .body(Body::empty())
        .expect("request");
    let resp = app.oneshot(conditional).await.expect("response");
    assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);
    assert!(body_bytes(resp).await.is_empty());
}

#[tokio::test]
async fn emails_filter_by_mailing_list() {
    let app = app(
        vec![list("l1", "Alpha"), list("l2", "Beta")],
        vec![email("e1", "l1"), email("e2", "l2"), email("e3", "l1")],
    );
    let resp = app
        .oneshot(get("/emails?mailing_list_id=l1"))
        .await
        .expect("response");
    let json: serde_json::Value =
        serde_json::from_slice(&body_bytes(resp).await).expect("json body");
    let items = json["items"].as_array().expect("items");
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|e| e["mailing_list_id"] == "l1"));
}

#[tokio::test]
async fn grouped_emails_omit_empty_lists_and_keep_latest_by_default() {
    let app = app(
        vec![list("l1", "Alpha"), list("l2", "Beta")],
        vec![email("e1", "l1"), email("e2", "l1")],
    );
    let resp = app
        .clone()
        .oneshot(get("/mailing_lists/emails"))
        .await
        .expect("response");
    let json: serde_json::Value =
        serde_json::from_slice(&body_bytes(resp).await).expect("json body");
    let groups = json.as_array().expect("array");
    assert_eq!(groups.len(), 1, "empty list l2 omitted");
    assert_eq!(groups[0]["mailing_list"]["id"], "l1");
    assert_eq!(groups[0]["emails"].as_array().expect("emails").len(), 1);

    let resp = app
        .oneshot(get("/mailing_lists/emails?group_all=true&limit_per_list=5"))
        .await
        .expect("response");
    let json: serde_json::Value =
        serde_json::from_slice(&body_bytes(resp).await).expect("json body");
    assert_eq!(
        json[0]["emails"].as_array().expect("emails").len(),
        2,
        "group_all returns up to limit_per_list"
    );
}

fn track_cookie(resp: &axum::response::Response) -> String {
    let raw = resp
        .headers()
        .get(SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .expect("set-cookie");
    let pair = raw.split(';').next().expect("cookie pair");
    let value = pair.strip_prefix("_track=").expect("_track cookie");
    assert_eq!(value.len(), 32);
    pair.to_string()
}

#[tokio::test]
async fn first_view_counts_once_and_sets_session_cookie() {
    let app = app(Vec::new(), Vec::new());
    let resp = app
        .clone()
        .oneshot(get("/emails/E1/view"))
        .await
        .expect("response");
    assert_eq!(resp.status(), StatusCode::OK);
    let cookie = track_cookie(&resp);
    let json: serde_json::Value =
        serde_json::from_slice(&body_bytes(resp).await).expect("json body");
    assert_eq!(json["views"], 1);

    let repeat = Request::builder()
        .uri("/emails/E1/view")
        .header(COOKIE, &cookie)
        .body(Body::empty())
        .expect("request");
    let resp = app.oneshot(repeat).await.expect("response");
    assert!(
        resp.headers().get(SET_COOKIE).is_none(),
        "existing session is reused"
    );
    let json: serde_json::Value =
        serde_json::from_slice(&body_bytes(resp).await).expect("json body");
    assert_eq!(json["views"], 1, "same session dedupes");
}

#[tokio::test]
async fn click_always_redirects_but_records_at_most_ten_per_second_per_ip() {
    let store = Arc::new(FakeStore::new(Vec::new(), Vec::new()));
    let state = AppState::new(store.clone(), ServerConfig::default());
    let app = build_router(state);

    let mut cookie: Option<String> = None;
    for _ in 0..11 {
        let mut builder = Request::builder().uri("/emails/E1/click/0?url=https%3A%2F%2Fexample.com");
        if let Some(cookie) = &cookie {
            builder = builder.header(COOKIE, cookie);
        }
        let resp = app
            .clone()
            .oneshot(builder.body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(
            resp.headers().get(LOCATION).and_then(|v| v.to_str().ok()),
            Some("https://example.com")
        );
        if cookie.is_none() {
            cookie = Some(track_cookie(&resp));
        }
    }
    assert_eq!(
        store.recorded_clicks("E1"),
        1,
        "tracking is rate limited, redirecting is not"
    );
}

#[tokio::test]
async fn click_validates_parameters() {
    let app = app(Vec::new(), Vec::new());
    let resp = app
        .clone()
        .oneshot(get("/emails/E1/click/0"))
        .await
        .expect("response");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "missing url");

    let resp = app
        .oneshot(get("/emails/E1/click/zero?url=https%3A%2F%2Fexample.com"))
        .await
        .expect("response");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "bad index");
}

#[tokio::test]
async fn stats_stream_sends_snapshot_then_coalesced_update() {
    let app = app(Vec::new(), Vec::new());

    let resp = app
        .clone()
        .oneshot(get("/emails/E1/stats/stream"))
        .await
        .expect("response");
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .expect("content type")
        .starts_with("text/event-stream"));
    assert_eq!(
        resp.headers()
            .get("cache-control")
            .and_then(|v| v.to_str().ok()),
        Some("no-cache")
    );

    let mut body = resp.into_body();
    let first = tokio::time::timeout(std::time::Duration::from_secs(2), body.frame())
        .await
        .expect("snapshot within deadline")
        .expect("stream open")
        .expect("frame");
    let first = String::from_utf8(first.into_data().expect("data frame").to_vec()).expect("utf8");
    assert!(first.contains(r#"data: {"clicks":0,"views":0}"#), "{first}");

    // A recorded view wakes the stream; the next flush reflects it.
    let resp = app
        .clone()
        .oneshot(get("/emails/E1/view"))
        .await
        .expect("response");
    assert_eq!(resp.status(), StatusCode::OK);

    let second = tokio::time::timeout(std::time::Duration::from_secs(2), body.frame())
        .await
        .expect("update within deadline")
        .expect("stream open")
        .expect("frame");
    let second =
        String::from_utf8(second.into_data().expect("data frame").to_vec()).expect("utf8");
    assert!(second.contains(r#""views":1"#), "{second}");
}

#[tokio::test]
async fn read_requests_are_rate_limited_per_ip() {
    let config = ServerConfig {
        read_rate_limit: loopcast_server::RateLimitConfig {
            max_requests: 2,
            window: std::time::Duration::from_secs(60),
        },
        ..ServerConfig::default()
    };
    let app = app_with(Vec::new(), Vec::new(), config);
    for _ in 0..2 {
        let resp = app
            .clone()
            .oneshot(get("/mailing_lists"))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
    }
    let resp = app.oneshot(get("/mailing_lists")).await.expect("response");
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn unknown_paths_are_router_404s() {
    let app = app(Vec::new(), Vec::new());
    let resp = app.oneshot(get("/nope")).await.expect("response");
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
