// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Governs whether a click is *recorded*, never whether it is redirected.
///
/// An IP's click is recorded only when its previous recorded click is older
/// than `min_interval` (100 ms, so at most ten recorded clicks per second per
/// IP). Entries idle for a minute are dropped by the background sweep.
pub struct ClickRateLimiter {
    min_interval: Duration,
    idle_ttl: Duration,
    clicks: RwLock<HashMap<String, Instant>>,
}

impl ClickRateLimiter {
    #[must_use]
    pub fn new(min_interval: Duration, idle_ttl: Duration) -> Self {
        Self {
            min_interval,
            idle_ttl,
            clicks: RwLock::new(HashMap::new()),
        }
    }

    pub fn should_track(&self, ip: &str) -> bool {
        let now = Instant::now();
        let mut clicks = self.clicks.write().unwrap_or_else(|e| e.into_inner());
        match clicks.get(ip) {
            Some(last) if now.duration_since(*last) <= self.min_interval => false,
            _ => {
                clicks.insert(ip.to_string(), now);
                true
            }
        }
    }

    pub fn sweep(&self) {
        let now = Instant::now();
        let mut clicks = self.clicks.write().unwrap_or_else(|e| e.into_inner());
        clicks.retain(|_, last| now.duration_since(*last) < self.idle_ttl);
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
    fn tracked_ips(&self) -> usize {
        self.clicks.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}
