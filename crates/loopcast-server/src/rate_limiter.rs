// SPDX-License-Identifier: Apache-2.0

use crate::config::RateLimitConfig;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    hits: u32,
    last_seen: Instant,
}

/// Fixed-window request counter keyed by client IP: at most `max_requests`
/// admissions per window, with the count restarting when the window rolls
/// over. An entry idle for two full windows can no longer influence an
/// admission decision, so the background sweep drops it.
pub struct RequestRateLimiter {
    max_requests: u32,
    window: Duration,
    visitors: Mutex<HashMap<String, Window>>,
}

impl RequestRateLimiter {
    #[must_use]
    pub fn new(cfg: RateLimitConfig) -> Self {
        Self {
            max_requests: cfg.max_requests,
            window: cfg.window,
            visitors: Mutex::new(HashMap::new()),
        }
    }

    pub fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut visitors = self.visitors.lock().unwrap_or_else(|e| e.into_inner());
        let window = visitors.entry(key.to_string()).or_insert(Window {
            started: now,
            hits: 0,
            last_seen: now,
        });
        window.last_seen = now;
        if now.duration_since(window.started) >= self.window {
            window.started = now;
            window.hits = 0;
        }
        if window.hits < self.max_requests {
            window.hits += 1;
            true
        } else {
            false
        }
    }

    pub fn sweep(&self) {
        let idle_ttl = self.window * 2;
        let now = Instant::now();
        let mut visitors = self.visitors.lock().unwrap_or_else(|e| e.into_inner());
        visitors.retain(|_, w| now.duration_since(w.last_seen) < idle_ttl);
    }

    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) {
        let me = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                me.sweep();
            }
        });
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.visitors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}
