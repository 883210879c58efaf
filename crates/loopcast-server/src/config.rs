// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;
use std::net::IpAddr;
use std::time::Duration;

pub const CONFIG_SCHEMA_VERSION: &str = "1";

/// Per-IP request budget: `max_requests` admissions per `window`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 30,
            window: Duration::from_secs(1),
        }
    }
}

/// A CIDR block in the trusted-proxy allow-list. A bare address parses as a
/// host-length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CidrBlock {
    pub network: IpAddr,
    pub prefix: u8,
}

impl CidrBlock {
    pub fn parse(input: &str) -> Result<Self, String> {
        let input = input.trim();
        let (addr, prefix) = match input.split_once('/') {
            Some((addr, prefix)) => {
                let prefix = prefix
                    .parse::<u8>()
                    .map_err(|_| format!("invalid CIDR prefix in {input:?}"))?;
                (addr, Some(prefix))
            }
            None => (input, None),
        };
        let network: IpAddr = addr
            .parse()
            .map_err(|_| format!("invalid CIDR address in {input:?}"))?;
        let max_prefix = if network.is_ipv4() { 32 } else { 128 };
        let prefix = prefix.unwrap_or(max_prefix);
        if prefix > max_prefix {
            return Err(format!("CIDR prefix out of range in {input:?}"));
        }
        Ok(Self { network, prefix })
    }

    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u32::MAX << (32 - u32::from(self.prefix))
                };
                (u32::from(net) & mask) == (u32::from(ip) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u128::MAX << (128 - u32::from(self.prefix))
                };
                (u128::from(net) & mask) == (u128::from(ip) & mask)
            }
            _ => false,
        }
    }
}

pub fn parse_cidr_list(raw: &str) -> (Vec<CidrBlock>, Vec<String>) {
    let mut blocks = Vec::new();
    let mut rejected = Vec::new();
    for piece in raw.split(',').map(str::trim).filter(|x| !x.is_empty()) {
        match CidrBlock::parse(piece) {
            Ok(block) => blocks.push(block),
            Err(_) => rejected.push(piece.to_string()),
        }
    }
    (blocks, rejected)
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub database_url: String,
    pub metrics_database_url: Option<String>,
    pub allow_db_insecure: bool,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    pub request_timeout: Duration,
    pub trusted_proxy_cidrs: Vec<CidrBlock>,
    pub cors_allowed_origins: Vec<String>,
    pub enable_hsts: bool,
    pub enable_access_log: bool,
    pub read_rate_limit: RateLimitConfig,
    pub stream_rate_limit: RateLimitConfig,
    pub click_min_interval: Duration,
    pub click_sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            database_url: String::new(),
            metrics_database_url: None,
            allow_db_insecure: false,
            cache_ttl: Duration::from_secs(30),
            cache_capacity: 512,
            request_timeout: Duration::from_secs(30),
            trusted_proxy_cidrs: Vec::new(),
            cors_allowed_origins: Vec::new(),
            enable_hsts: false,
            enable_access_log: false,
            read_rate_limit: RateLimitConfig::default(),
            stream_rate_limit: RateLimitConfig {
                max_requests: 100,
                window: Duration::from_secs(1),
            },
            click_min_interval: Duration::from_millis(100),
            click_sweep_interval: Duration::from_secs(60),
        }
    }
}

pub fn validate_startup_config(cfg: &ServerConfig) -> Result<(), String> {
    if cfg.bind_addr.trim().is_empty() {
        return Err("bind address must not be empty".to_string());
    }
    if cfg.database_url.trim().is_empty() {
        return Err("DATABASE_URL is required".to_string());
    }
    if cfg.cache_ttl.is_zero() || cfg.cache_capacity == 0 {
        return Err("response cache ttl and capacity must be > 0".to_string());
    }
    if cfg.request_timeout.is_zero() {
        return Err("request timeout must be > 0".to_string());
    }
    if cfg.read_rate_limit.max_requests == 0 || cfg.stream_rate_limit.max_requests == 0 {
        return Err("rate limit max_requests must be >= 1".to_string());
    }
    if cfg.read_rate_limit.window.is_zero() || cfg.stream_rate_limit.window.is_zero() {
        return Err("rate limit window must be > 0".to_string());
    }
    if cfg.click_min_interval.is_zero() || cfg.click_sweep_interval.is_zero() {
        return Err("click limiter intervals must be > 0".to_string());
    }
    Ok(())
}

/// Redacted view of the resolved configuration for `--print-effective-config`.
pub fn effective_config_payload(cfg: &ServerConfig) -> Result<serde_json::Value, String> {
    let mut json =
        serde_json::to_value(cfg).map_err(|err| format!("serialize server config: {err}"))?;
    if let Some(obj) = json.as_object_mut() {
        obj.insert("database_url".to_string(), serde_json::json!("<redacted>"));
        if cfg.metrics_database_url.is_some() {
            obj.insert(
                "metrics_database_url".to_string(),
                serde_json::json!("<redacted>"),
            );
        }
    }
    Ok(serde_json::json!({
        "schema_version": CONFIG_SCHEMA_VERSION,
        "kind": "loopcast_server_effective_config_v1",
        "server": json,
    }))
}
