// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::get;
use axum::Router;
use std::sync::Arc;

pub mod cache;
pub mod click_limiter;
pub mod config;
pub mod http;
pub mod middleware;
pub mod notifier;
pub mod rate_limiter;
pub mod rewrite;
pub mod session;
pub mod store;

pub use cache::{weak_etag, ResponseCache};
pub use click_limiter::ClickRateLimiter;
pub use config::{
    effective_config_payload, parse_cidr_list, validate_startup_config, CidrBlock,
    RateLimitConfig, ServerConfig,
};
pub use notifier::ViewNotifier;
pub use rate_limiter::RequestRateLimiter;
pub use store::{FakeStore, PgStore, Store, StoreError};

pub const CRATE_NAME: &str = "loopcast-server";

const LIMITER_SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

/// Process-singleton state shared by reference across handlers; constructed
/// once at startup.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub cache: Arc<ResponseCache>,
    pub notifier: Arc<ViewNotifier>,
    pub click_limiter: Arc<ClickRateLimiter>,
    pub read_limiter: Arc<RequestRateLimiter>,
    pub stream_limiter: Arc<RequestRateLimiter>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServerConfig) -> Self {
        Self {
            store,
            cache: Arc::new(ResponseCache::new(config.cache_ttl, config.cache_capacity)),
            notifier: Arc::new(ViewNotifier::default()),
            click_limiter: Arc::new(ClickRateLimiter::new(
                config.click_min_interval,
                config.click_sweep_interval,
            )),
            read_limiter: Arc::new(RequestRateLimiter::new(config.read_rate_limit)),
            stream_limiter: Arc::new(RequestRateLimiter::new(config.stream_rate_limit)),
            config: Arc::new(config),
        }
    }

    pub fn spawn_background_tasks(&self) {
        self.click_limiter
            .spawn_sweeper(self.config.click_sweep_interval);
        self.read_limiter.spawn_sweeper(LIMITER_SWEEP_INTERVAL);
        self.stream_limiter.spawn_sweeper(LIMITER_SWEEP_INTERVAL);
    }
}

/// Assemble the router with the full middleware stack. Layer order is
/// inside-out: the last layer added runs first, so the proxy-trust filter
/// sees every request before the real-IP resolution believes any forwarded
/// header.
pub fn build_router(state: AppState) -> Router {
    let read_routes = Router::new()
        .route("/", get(http::docs::root_redirect))
        .route("/docs", get(http::docs::api_docs))
        .route("/mailing_lists", get(http::reads::list_mailing_lists))
        .route("/emails", get(http::reads::list_emails))
        .route("/mailing_lists/emails", get(http::reads::grouped_emails))
        .route("/emails/{id}/view", get(http::track::email_view))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::read_rate_limit_middleware,
        ));

    let stream_routes = Router::new()
        .route(
            "/emails/{id}/stats/stream",
            get(http::stream::email_stats_stream),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::stream_rate_limit_middleware,
        ));

    // Clicks stay outside both rate-limit groups: a redirect is never
    // rejected, only its recording is limited.
    let click_routes = Router::new().route("/emails/{id}/click/{index}", get(http::track::link_click));

    Router::new()
        .merge(read_routes)
        .merge(stream_routes)
        .merge(click_routes)
        .layer(from_fn_with_state(
            state.clone(),
            middleware::security_headers_middleware,
        ))
        .layer(from_fn_with_state(state.clone(), middleware::cors_middleware))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::timeout_middleware,
        ))
        .layer(from_fn(middleware::heartbeat_middleware))
        .layer(from_fn(middleware::recover_middleware))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::request_id_middleware,
        ))
        .layer(from_fn(middleware::real_ip_middleware))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::proxy_trust_middleware,
        ))
        .with_state(state)
}
