// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

use clap::Parser;
use loopcast_server::{
    build_router, effective_config_payload, parse_cidr_list, validate_startup_config, AppState,
    PgStore, RateLimitConfig, ServerConfig,
};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "loopcast-server", version, about = "Loopcast content API server")]
struct ServerCliArgs {
    #[arg(long)]
    bind: Option<String>,
    #[arg(long, default_value_t = false)]
    print_effective_config: bool,
    #[arg(long, default_value_t = false)]
    validate_config: bool,
}

fn env_str(name: &str, default: &str) -> String {
    env::var(name).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| match v.as_str() {
            "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
            "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_duration_ms(name: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_u64(name, default_ms))
}

fn env_list(name: &str) -> Vec<String> {
    env::var(name)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|x| !x.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if env_bool("LOOPCAST_LOG_JSON", false) {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn load_config(cli_bind: Option<&str>) -> ServerConfig {
    let bind_addr = cli_bind.map_or_else(
        || format!("{}:{}", env_str("HOST", "127.0.0.1"), env_str("PORT", "8080")),
        ToString::to_string,
    );

    let (trusted_proxy_cidrs, rejected) =
        parse_cidr_list(&env::var("TRUSTED_PROXY_CIDRS").unwrap_or_default());
    for bad in rejected {
        warn!("ignoring invalid TRUSTED_PROXY_CIDRS entry {bad:?}");
    }

    let cors_allowed_origins = env_list("CORS_ALLOWED_ORIGINS");
    if !cors_allowed_origins.is_empty() {
        info!("CORS allowed origins: {cors_allowed_origins:?}");
    }

    ServerConfig {
        bind_addr,
        database_url: env::var("DATABASE_URL").unwrap_or_default(),
        metrics_database_url: env::var("METRICS_DATABASE_URL").ok().filter(|v| !v.is_empty()),
        allow_db_insecure: env_bool("ALLOW_DB_INSECURE", false),
        cache_ttl: Duration::from_secs(env_u64("LOOPCAST_CACHE_TTL_SECS", 30)),
        cache_capacity: env_usize("LOOPCAST_CACHE_CAPACITY", 512),
        request_timeout: env_duration_ms("LOOPCAST_REQUEST_TIMEOUT_MS", 30_000),
        trusted_proxy_cidrs,
        cors_allowed_origins,
        enable_hsts: env_bool("ENABLE_HSTS", false),
        enable_access_log: env_bool("LOOPCAST_ACCESS_LOG", false),
        read_rate_limit: RateLimitConfig {
            max_requests: env_u64("LOOPCAST_READ_RATE_LIMIT", 30) as u32,
            window: Duration::from_secs(1),
        },
        stream_rate_limit: RateLimitConfig {
            max_requests: env_u64("LOOPCAST_STREAM_RATE_LIMIT", 100) as u32,
            window: Duration::from_secs(1),
        },
        ..ServerConfig::default()
    }
}

/// Resolves once the process should stop accepting work. If the signal
/// handlers cannot even be installed, the server drains immediately rather
/// than running with no way to stop it.
#[cfg(unix)]
async fn shutdown_requested() {
    use tokio::signal::unix::{signal, SignalKind};
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut term), Ok(mut int)) => {
            tokio::select! {
                _ = term.recv() => info!("SIGTERM received, draining"),
                _ = int.recv() => info!("SIGINT received, draining"),
            }
        }
        (Err(err), _) | (_, Err(err)) => {
            warn!("could not install signal handlers, draining now: {err}");
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_requested() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("ctrl-c received, draining"),
        Err(err) => warn!("could not install ctrl-c handler, draining now: {err}"),
    }
}

#[tokio::main]
async fn main() -> Result<(), String> {
    dotenvy::dotenv().ok();
    let cli = ServerCliArgs::parse();
    init_tracing();

    let config = load_config(cli.bind.as_deref());
    validate_startup_config(&config)?;

    if cli.validate_config {
        info!("configuration validated");
        return Ok(());
    }
    if cli.print_effective_config {
        let payload = effective_config_payload(&config)?;
        println!(
            "{}",
            serde_json::to_string_pretty(&payload)
                .map_err(|err| format!("render effective config: {err}"))?
        );
        return Ok(());
    }

    let store = PgStore::connect(
        &config.database_url,
        config.metrics_database_url.as_deref(),
        config.allow_db_insecure,
    )
    .await?;
    store.run_metrics_migrations().await?;

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(Arc::new(store), config);
    state.spawn_background_tasks();
    let app = build_router(state);

    let addr: SocketAddr = bind_addr
        .parse()
        .map_err(|e| format!("invalid bind addr {bind_addr}: {e}"))?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| format!("bind failed: {e}"))?;
    info!("loopcast-server listening on {bind_addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_requested())
    .await
    .map_err(|e| format!("server failed: {e}"))
}
